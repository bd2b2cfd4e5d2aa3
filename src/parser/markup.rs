// src/parser/markup.rs
//! Builds the rule IR from a markup rule file

use super::ast::*;
use super::xml::{Element, Reader};
use crate::CompilationError;

type BuildResult<T> = Result<T, CompilationError>;

/// Result category given to every markup rule
pub const MARKUP_RESULT_CATEGORY: &str = "chunk";

pub fn parse(source: &str) -> BuildResult<RuleSet> {
    let root = Reader::new(source).read_document()?;

    let stage = match root.name.as_str() {
        "transfer" => Stage::PreTransfer,
        "interchunk" => Stage::InterChunk,
        "postchunk" => Stage::PostChunk,
        _ => return Err(unexpected(&root, "a transfer, interchunk or postchunk root")),
    };

    let mut set = RuleSet::new(stage);

    for section in &root.children {
        match section.name.as_str() {
            "section-def-cats" => {
                for def in children_named(section, "def-cat")? {
                    set.categories.push(build_category(def)?);
                }
            }
            "section-def-attrs" => {
                for def in children_named(section, "def-attr")? {
                    set.attributes.push(Attribute {
                        name: required(def, "n")?,
                        items: item_values(def, "attr-item", "tags")?,
                    });
                }
            }
            "section-def-vars" => {
                for def in children_named(section, "def-var")? {
                    set.variables.push(VariableDef {
                        name: required(def, "n")?,
                        default: def.attr("v").map(str::to_string),
                    });
                }
            }
            "section-def-lists" => {
                for def in children_named(section, "def-list")? {
                    set.lists.push(ListDef {
                        name: required(def, "n")?,
                        items: item_values(def, "list-item", "v")?,
                    });
                }
            }
            "section-def-macros" => {
                for def in children_named(section, "def-macro")? {
                    set.macros.push(build_macro(def)?);
                }
            }
            "section-rules" => {
                for rule in children_named(section, "rule")? {
                    let id = set.rules.len();
                    set.rules.push(build_rule(rule, id)?);
                }
            }
            _ => return Err(unexpected(section, "a section")),
        }
    }

    Ok(set)
}

fn build_category(def: &Element) -> BuildResult<Category> {
    let items = children_named(def, "cat-item")?
        .into_iter()
        .map(|item| {
            let tags = item.attr("tags").unwrap_or("");
            Ok(CategoryItem {
                lemma: item.attr("lemma").map(str::to_string),
                tags: if tags.is_empty() {
                    Vec::new()
                } else {
                    tags.split('.').map(str::to_string).collect()
                },
            })
        })
        .collect::<BuildResult<Vec<_>>>()?;

    Ok(Category {
        name: required(def, "n")?,
        items,
    })
}

fn build_macro(def: &Element) -> BuildResult<Macro> {
    let param_count = match def.attr("npar") {
        Some(n) => parse_number(def, "npar", n)?,
        None => 0,
    };

    Ok(Macro {
        name: required(def, "n")?,
        param_count,
        body: build_operations(&def.children)?,
    })
}

fn build_rule(rule: &Element, id: usize) -> BuildResult<Rule> {
    let pattern_el = first_child(rule, "pattern")?;
    let action_el = first_child(rule, "action")?;

    let pattern = children_named(pattern_el, "pattern-item")?
        .into_iter()
        .map(|item| {
            let mut element = PatternElement::new(required(item, "n")?);
            element.caseless = item.attr("caseless") == Some("yes");
            Ok(element)
        })
        .collect::<BuildResult<Vec<_>>>()?;

    Ok(Rule {
        id,
        result: MARKUP_RESULT_CATEGORY.to_string(),
        grabs: Vec::new(),
        pattern,
        action: build_operations(&action_el.children)?,
        weight: 1.0,
        comment: rule.attr("comment").or_else(|| rule.attr("c")).map(str::to_string),
    })
}

fn build_operations(elements: &[Element]) -> BuildResult<Vec<Operation>> {
    let mut ops = Vec::with_capacity(elements.len());
    for el in elements {
        match el.name.as_str() {
            // grouping wrappers contribute their children directly
            "tags" | "tag" => ops.extend(build_operations(&el.children)?),
            _ => ops.push(build_operation(el)?),
        }
    }
    Ok(ops)
}

fn build_operation(el: &Element) -> BuildResult<Operation> {
    let op = match el.name.as_str() {
        "lit" => Operation::Lit(required(el, "v")?),
        "lit-tag" => Operation::LitTag(required(el, "v")?),
        "var" => Operation::Var(required(el, "n")?),
        "list" => Operation::List(required(el, "n")?),
        "clip" => Operation::Clip(build_clip(el)?),
        "case-of" => Operation::CaseOf(build_clip(el)?),
        "b" => Operation::Blank(match el.attr("pos") {
            Some(pos) => Some(parse_number(el, "pos", pos)?),
            None => None,
        }),

        "not" => logic(el, LogicOp::Not, 1)?,
        "equal" => logic(el, LogicOp::Equal, 2)?,
        "begins-with" => logic(el, LogicOp::BeginsWith, 2)?,
        "ends-with" => logic(el, LogicOp::EndsWith, 2)?,
        "begins-with-list" => logic(el, LogicOp::BeginsWithList, 2)?,
        "ends-with-list" => logic(el, LogicOp::EndsWithList, 2)?,
        "contains-substring" => logic(el, LogicOp::Contains, 2)?,
        "in" => logic(el, LogicOp::In, 2)?,
        "test" => logic(el, LogicOp::Test, 1)?,
        "get-case-from" => {
            let position = parse_number(el, "pos", &required(el, "pos")?)?;
            let mut args = exact_operands(el, 1)?;
            args.push(Operation::clip("lem", position));
            Operation::logic(LogicOp::GetCaseFrom, args)
        }

        "and" => Operation::stack(StackOp::And, build_operations(&el.children)?),
        "or" => Operation::stack(StackOp::Or, build_operations(&el.children)?),
        "concat" | "lu" | "mlu" => Operation::stack(StackOp::Concat, build_operations(&el.children)?),
        "out" => Operation::stack(StackOp::Out, build_operations(&el.children)?),
        "chunk" => {
            let mut args = Vec::new();
            if let Some(name) = el.attr("name") {
                args.push(Operation::Lit(name.to_string()));
            } else if let Some(var) = el.attr("namefrom") {
                args.push(Operation::Var(var.to_string()));
            }
            args.extend(build_operations(&el.children)?);
            Operation::stack(StackOp::Chunk, args)
        }

        "let" | "modify-case" => {
            let mut args = exact_operands(el, 2)?;
            let value = args.pop();
            let target = args.pop();
            match (target, value) {
                (Some(target), Some(value)) => Operation::Let {
                    target: Box::new(target),
                    value: Box::new(value),
                    modify_case: el.name == "modify-case",
                },
                _ => return Err(unexpected(el, "two operands")),
            }
        }
        "append" => Operation::Append {
            var: required(el, "n")?,
            values: build_operations(&el.children)?,
        },
        "pseudolemma" => {
            let mut args = exact_operands(el, 1)?;
            match args.pop() {
                Some(arg) => Operation::PseudoLemma(Box::new(arg)),
                None => return Err(unexpected(el, "one operand")),
            }
        }
        "call-macro" => {
            let args = children_named(el, "with-param")?
                .into_iter()
                .map(|p| parse_number(p, "pos", &required(p, "pos")?))
                .collect::<BuildResult<Vec<_>>>()?;
            Operation::CallMacro {
                name: required(el, "n")?,
                args,
            }
        }
        "choose" => build_choose(el)?,

        _ => return Err(unexpected(el, "an action element")),
    };
    Ok(op)
}

fn build_choose(el: &Element) -> BuildResult<Operation> {
    let mut branches = Vec::new();
    let mut otherwise = None;

    for child in &el.children {
        match child.name.as_str() {
            "when" if otherwise.is_none() => {
                let (test, body) = match child.children.split_first() {
                    Some((test, body)) if test.name == "test" => (test, body),
                    _ => return Err(unexpected(child, "a <test> as first child of <when>")),
                };
                branches.push(When {
                    test: build_operation(test)?,
                    body: build_operations(body)?,
                });
            }
            "otherwise" if otherwise.is_none() => {
                otherwise = Some(build_operations(&child.children)?);
            }
            _ => return Err(unexpected(child, "<when> or a final <otherwise>")),
        }
    }

    if branches.is_empty() {
        return Err(unexpected(el, "at least one <when>"));
    }

    Ok(Operation::Choose {
        branches,
        otherwise,
    })
}

fn build_clip(el: &Element) -> BuildResult<Clip> {
    let side = match el.attr("side") {
        Some("sl") => Side::Source,
        Some("ref") => Side::Reference,
        Some("tl") | None => Side::Target,
        Some(_) => return Err(unexpected(el, "side sl, ref or tl")),
    };

    Ok(Clip {
        part: required(el, "part")?,
        position: parse_number(el, "pos", &required(el, "pos")?)?,
        side,
    })
}

fn logic(el: &Element, op: LogicOp, arity: usize) -> BuildResult<Operation> {
    Ok(Operation::Logic {
        op,
        caseless: op.accepts_caseless() && el.attr("caseless") == Some("yes"),
        args: exact_operands(el, arity)?,
    })
}

fn exact_operands(el: &Element, arity: usize) -> BuildResult<Vec<Operation>> {
    let args = build_operations(&el.children)?;
    if args.len() != arity {
        return Err(unexpected(el, &format!("{} operand(s), found {}", arity, args.len())));
    }
    Ok(args)
}

fn item_values(def: &Element, item: &str, key: &str) -> BuildResult<Vec<String>> {
    children_named(def, item)?
        .into_iter()
        .map(|i| required(i, key))
        .collect()
}

fn children_named<'a>(parent: &'a Element, name: &str) -> BuildResult<Vec<&'a Element>> {
    parent
        .children
        .iter()
        .map(|c| {
            if c.name == name {
                Ok(c)
            } else {
                Err(unexpected(c, &format!("<{}>", name)))
            }
        })
        .collect()
}

fn first_child<'a>(parent: &'a Element, name: &str) -> BuildResult<&'a Element> {
    parent
        .children
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| unexpected(parent, &format!("a <{}> child", name)))
}

fn required(el: &Element, key: &str) -> BuildResult<String> {
    el.attr(key)
        .map(str::to_string)
        .ok_or_else(|| unexpected(el, &format!("attribute '{}'", key)))
}

fn parse_number(el: &Element, key: &str, value: &str) -> BuildResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| unexpected(el, &format!("a number in '{}'", key)))
}

fn unexpected(el: &Element, expected: &str) -> CompilationError {
    CompilationError::Syntax {
        message: format!("line {}: expected {}", el.line, expected),
        token: format!("<{}>", el.name),
        remaining: String::new(),
    }
}
