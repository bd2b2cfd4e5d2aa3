// src/parser/parser.rs
//! Recursive-descent parser for the textual rule syntax

use super::ast::*;
use super::lexer::{Lexer, Token};
use crate::{CompilationError, SymbolKind};
use ahash::HashSet;

type ParseResult<T> = Result<T, CompilationError>;

/// Right-hand side of one `|` alternative before grabs are resolved
struct Alternative {
    weight: f64,
    pattern: Vec<PatternElement>,
    action: Vec<Operation>,
}

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    rule_set: RuleSet,
    known_categories: HashSet<String>,
    known_variables: HashSet<String>,
}

impl Parser {
    pub fn new(input: &str) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current_token = lexer.next_token()?;

        Ok(Self {
            lexer,
            current_token,
            rule_set: RuleSet::new(Stage::PreTransfer),
            known_categories: HashSet::default(),
            known_variables: HashSet::default(),
        })
    }

    pub fn parse(mut self) -> ParseResult<RuleSet> {
        while self.current_token != Token::Eof {
            let name = self.expect_identifier()?;

            if let Some(category) = name.strip_prefix('#') {
                self.parse_category(category.to_string())?;
                continue;
            }

            let mut group = vec![name];
            while self.current_token == Token::Dot {
                self.advance()?;
                group.push(self.expect_identifier()?);
            }

            match self.current_token {
                Token::Assign => self.parse_attribute(group)?,
                Token::Arrow => self.parse_rule(group)?,
                Token::Colon => self.parse_output_rule(group)?,
                Token::Gt => self.parse_retag_rule(group)?,
                _ => return Err(self.unexpected("'=', '->', ':' or '>'")),
            }
        }

        Ok(self.rule_set)
    }

    /// `name = tag tag ... ;`
    fn parse_attribute(&mut self, group: Vec<String>) -> ParseResult<()> {
        let name = self.single_name(group, "attribute")?;
        self.expect(Token::Assign)?;

        let mut items = Vec::new();
        while self.current_token != Token::Semicolon {
            items.push(self.expect_identifier()?);
        }
        self.expect(Token::Semicolon)?;

        if self.rule_set.attributes.iter().any(|a| a.name == name) {
            return Err(CompilationError::Duplicate {
                kind: SymbolKind::Attribute,
                name,
            });
        }

        self.rule_set.attributes.push(Attribute { name, items });
        Ok(())
    }

    /// `#name -> lemma(tag.tag) | (tag.*) ;`
    fn parse_category(&mut self, name: String) -> ParseResult<()> {
        self.expect(Token::Arrow)?;

        let mut items = Vec::new();
        loop {
            let lemma = match &self.current_token {
                Token::Ident(_) => Some(self.expect_identifier()?),
                _ => None,
            };

            let mut tags = Vec::new();
            self.expect(Token::LeftParen)?;
            while self.current_token != Token::RightParen {
                tags.push(self.expect_identifier()?);
                if self.current_token == Token::Dot {
                    self.advance()?;
                }
            }
            self.expect(Token::RightParen)?;
            items.push(CategoryItem { lemma, tags });

            match self.current_token {
                Token::Pipe => self.advance()?,
                Token::Semicolon => {
                    self.advance()?;
                    break;
                }
                _ => return Err(self.unexpected("'|' or ';'")),
            }
        }

        match self.rule_set.categories.iter_mut().find(|c| c.name == name) {
            Some(existing) if existing.items.is_empty() => existing.items = items,
            Some(_) => {
                return Err(CompilationError::Duplicate {
                    kind: SymbolKind::Category,
                    name,
                })
            }
            None => {
                self.known_categories.insert(name.clone());
                self.rule_set.categories.push(Category { name, items });
            }
        }
        Ok(())
    }

    /// `tag.tag: _.attr.<tag> ;`
    fn parse_output_rule(&mut self, pattern: Vec<String>) -> ParseResult<()> {
        self.expect(Token::Colon)?;

        let mut slots = Vec::new();
        loop {
            let slot = match self.current_token.clone() {
                Token::Lt => {
                    self.advance()?;
                    let tag = self.expect_identifier()?;
                    self.expect(Token::Gt)?;
                    OutputSlot::Tag(tag)
                }
                Token::Ident(text) if text == "_" => {
                    self.advance()?;
                    OutputSlot::Pattern
                }
                Token::Ident(_) => OutputSlot::Var(self.expect_identifier()?),
                _ => return Err(self.unexpected("an output slot")),
            };
            slots.push(slot);

            match self.current_token {
                Token::Dot => self.advance()?,
                Token::Semicolon => {
                    self.advance()?;
                    break;
                }
                _ => return Err(self.unexpected("'.' or ';'")),
            }
        }

        self.rule_set.output_rules.push(OutputRule { pattern, slots });
        Ok(())
    }

    /// `source > destination: from to, from to ;`
    fn parse_retag_rule(&mut self, group: Vec<String>) -> ParseResult<()> {
        let source = self.single_name(group, "retag source")?;
        self.expect(Token::Gt)?;
        let destination = self.expect_identifier()?;
        self.expect(Token::Colon)?;

        let mut pairs = Vec::new();
        loop {
            let from = self.expect_identifier()?;
            let to = self.expect_identifier()?;
            pairs.push((from, to));

            match self.current_token {
                Token::Comma => self.advance()?,
                Token::Semicolon => {
                    self.advance()?;
                    break;
                }
                _ => return Err(self.unexpected("',' or ';'")),
            }
        }

        self.rule_set.retag_rules.push(RetagRule {
            source,
            destination,
            pairs,
        });
        Ok(())
    }

    /// `Name[.var]* -> weight: pattern { output } | ... ;`
    fn parse_rule(&mut self, mut group: Vec<String>) -> ParseResult<()> {
        let grab_vars = group.split_off(1);
        let result = group.remove(0);
        self.expect(Token::Arrow)?;

        for var in &grab_vars {
            self.declare_variable(var);
        }

        loop {
            let alternative = self.parse_alternative()?;
            let grabs = resolve_grabs(&result, &grab_vars, &alternative.pattern)?;

            let id = self.rule_set.rules.len();
            self.rule_set.rules.push(Rule {
                id,
                result: result.clone(),
                grabs,
                pattern: alternative.pattern,
                action: alternative.action,
                weight: alternative.weight,
                comment: None,
            });

            match self.current_token {
                Token::Pipe => self.advance()?,
                Token::Semicolon => {
                    self.advance()?;
                    return Ok(());
                }
                _ => return Err(self.unexpected("'|' or ';'")),
            }
        }
    }

    fn parse_alternative(&mut self) -> ParseResult<Alternative> {
        let weight_text = self.expect_identifier()?;
        let weight: f64 = weight_text.parse().map_err(|_| CompilationError::Syntax {
            message: "Expected a numeric weight".to_string(),
            token: weight_text.clone(),
            remaining: self.lexer.remaining(),
        })?;
        self.expect(Token::Colon)?;

        let mut pattern = Vec::new();
        while self.current_token != Token::LeftBrace {
            if self.current_token == Token::Eof {
                return Err(self.unexpected("'{'"));
            }
            pattern.push(self.parse_pattern_element()?);
        }
        if pattern.is_empty() {
            return Err(self.unexpected("a pattern element"));
        }

        let action = self.parse_output(pattern.len())?;

        Ok(Alternative {
            weight,
            pattern,
            action,
        })
    }

    /// `[%][lemma@ | @]category(.tag | .attr | .$var)*`
    fn parse_pattern_element(&mut self) -> ParseResult<PatternElement> {
        let mut grab_source = false;
        let mut lexical_only = false;
        let mut lemma = None;

        if self.current_token == Token::Percent {
            grab_source = true;
            self.advance()?;
        }
        match self.current_token.clone() {
            Token::Lemma(text) => {
                lemma = Some(text);
                lexical_only = true;
                self.advance()?;
            }
            Token::At => {
                lexical_only = true;
                self.advance()?;
            }
            _ => {}
        }

        let category = self.expect_identifier()?;
        self.declare_category(&category);

        let mut element = PatternElement::new(category);
        element.lemma = lemma;
        element.grab_source = grab_source;
        element.lexical_only = lexical_only;

        while self.current_token == Token::Dot {
            self.advance()?;
            if self.current_token == Token::Dollar {
                self.advance()?;
                let var = self.expect_identifier()?;
                self.declare_variable(&var);
                element.bindings.push(var);
            } else {
                element.attributes.push(self.expect_identifier()?);
            }
        }

        Ok(element)
    }

    /// `{ 1 _1 2(gen=1.gen, num=$num) <tag> _ }`, lowered to lets followed by one out
    fn parse_output(&mut self, pattern_len: usize) -> ParseResult<Vec<Operation>> {
        self.expect(Token::LeftBrace)?;

        let mut lets = Vec::new();
        let mut items = Vec::new();

        while self.current_token != Token::RightBrace {
            match self.current_token.clone() {
                Token::Lt => {
                    self.advance()?;
                    let tag = self.expect_identifier()?;
                    self.expect(Token::Gt)?;
                    items.push(Operation::LitTag(tag));
                }
                Token::Ident(text) if text == "_" => {
                    self.advance()?;
                    items.push(Operation::Blank(None));
                }
                Token::Lemma(lemma) => {
                    self.advance()?;
                    items.push(self.parse_output_unit(&lemma)?);
                }
                Token::At => {
                    self.advance()?;
                    items.push(self.parse_output_unit("")?);
                }
                Token::Ident(text) if text.starts_with('_') => {
                    self.advance()?;
                    let position = self.parse_position(&text[1..], pattern_len)?;
                    items.push(Operation::Blank(Some(position)));
                }
                Token::Ident(text) => {
                    self.advance()?;
                    let position = self.parse_position(&text, pattern_len)?;
                    if self.current_token == Token::LeftParen {
                        self.advance()?;
                        self.parse_updates(position, pattern_len, &mut lets)?;
                    }
                    items.push(Operation::clip("whole", position));
                }
                Token::Eof => return Err(self.unexpected("'}'")),
                _ => return Err(self.unexpected("an output item")),
            }
        }
        self.expect(Token::RightBrace)?;

        lets.push(Operation::stack(StackOp::Out, items));
        Ok(lets)
    }

    /// `lemma@tag.tag.$var`, written out as a new lexical unit
    fn parse_output_unit(&mut self, lemma: &str) -> ParseResult<Operation> {
        let mut parts = vec![
            Operation::Lit(format!("^{}", lemma)),
            Operation::LitTag(self.expect_identifier()?),
        ];

        while self.current_token == Token::Dot {
            self.advance()?;
            if self.current_token == Token::Dollar {
                self.advance()?;
                let var = self.expect_identifier()?;
                self.declare_variable(&var);
                parts.push(Operation::Lit("<".to_string()));
                parts.push(Operation::Var(var));
                parts.push(Operation::Lit(">".to_string()));
            } else {
                parts.push(Operation::LitTag(self.expect_identifier()?));
            }
        }
        parts.push(Operation::Lit("$".to_string()));

        Ok(Operation::stack(StackOp::Concat, parts))
    }

    /// `var=src, ...)` after an output position
    fn parse_updates(
        &mut self,
        position: usize,
        pattern_len: usize,
        lets: &mut Vec<Operation>,
    ) -> ParseResult<()> {
        while self.current_token != Token::RightParen {
            let var = self.expect_identifier()?;
            self.expect(Token::Assign)?;

            let value = match self.current_token.clone() {
                Token::Dollar => {
                    self.advance()?;
                    Operation::Var(self.expect_identifier()?)
                }
                Token::Ident(text) if text.chars().all(|c| c.is_ascii_digit()) => {
                    self.advance()?;
                    let source = self.parse_position(&text, pattern_len)?;
                    self.expect(Token::Dot)?;
                    Operation::clip(self.expect_identifier()?, source)
                }
                Token::Ident(text) => {
                    self.advance()?;
                    Operation::Lit(text)
                }
                _ => return Err(self.unexpected("an update value")),
            };

            lets.push(Operation::assign(Operation::clip(var, position), value));

            if self.current_token == Token::Comma {
                self.advance()?;
            }
        }
        self.expect(Token::RightParen)
    }

    fn parse_position(&self, text: &str, pattern_len: usize) -> ParseResult<usize> {
        let position: usize = text.parse().map_err(|_| CompilationError::Syntax {
            message: "Expected a pattern position".to_string(),
            token: text.to_string(),
            remaining: self.lexer.remaining(),
        })?;

        if position == 0 || position > pattern_len {
            return Err(CompilationError::Reference {
                kind: SymbolKind::Position,
                name: text.to_string(),
            });
        }
        Ok(position)
    }

    fn single_name(&self, mut group: Vec<String>, what: &str) -> ParseResult<String> {
        if group.len() != 1 {
            return Err(CompilationError::Syntax {
                message: format!("Expected a single name for the {}", what),
                token: group.join("."),
                remaining: self.lexer.remaining(),
            });
        }
        Ok(group.remove(0))
    }

    fn declare_category(&mut self, name: &str) {
        if self.known_categories.insert(name.to_string()) {
            self.rule_set.categories.push(Category {
                name: name.to_string(),
                items: Vec::new(),
            });
        }
    }

    fn declare_variable(&mut self, name: &str) {
        if self.known_variables.insert(name.to_string()) {
            self.rule_set.variables.push(VariableDef {
                name: name.to_string(),
                default: None,
            });
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<()> {
        if self.current_token == expected {
            self.advance()
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<String> {
        match &self.current_token {
            Token::Ident(name) => {
                let result = name.clone();
                self.advance()?;
                Ok(result)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn advance(&mut self) -> ParseResult<()> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn unexpected(&self, expected: &str) -> CompilationError {
        CompilationError::Syntax {
            message: format!("Expected {}", expected),
            token: self.current_token.to_string(),
            remaining: self.lexer.remaining(),
        }
    }
}

/// Header variables come from the `%` element, else from the first element binding them
fn resolve_grabs(
    result: &str,
    vars: &[String],
    pattern: &[PatternElement],
) -> ParseResult<Vec<Grab>> {
    let marked = pattern.iter().position(|p| p.grab_source);

    vars.iter()
        .map(|var| {
            let index = marked
                .or_else(|| pattern.iter().position(|p| p.bindings.contains(var)))
                .ok_or_else(|| CompilationError::Reference {
                    kind: SymbolKind::Variable,
                    name: format!("{}.{}", result, var),
                })?;
            Ok(Grab {
                position: index + 1,
                var: var.clone(),
            })
        })
        .collect()
}
