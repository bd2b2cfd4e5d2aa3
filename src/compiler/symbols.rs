// src/compiler/symbols.rs
//! Symbol tables built once per rule set and frozen before emission

use crate::parser::ast::{Attribute, Category, ListDef, OutputSlot, RuleSet, VariableDef};
use crate::{CompilationError, SymbolKind};
use ahash::HashMap;
use std::collections::BTreeMap;

/// Clip parts every token provides regardless of declared attributes
pub const BUILTIN_PARTS: &[&str] = &[
    "lem", "lemh", "lemq", "whole", "tags", "content", "chcontent", "chname",
];

/// Category indices travel as one byte
const MAX_CATEGORIES: usize = 256;

/// A match condition on one pattern position: true when any
/// `(attribute, value)` alternative holds for the token's variables
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub source: String,
    pub alternatives: Vec<(String, String)>,
}

/// Declarations of one rule set, indexed for lookup
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    categories: Vec<Category>,
    category_index: HashMap<String, usize>,
    attributes: Vec<Attribute>,
    attribute_index: HashMap<String, usize>,
    attr_inverse: HashMap<String, Vec<String>>,
    variables: Vec<VariableDef>,
    variable_index: HashMap<String, usize>,
    lists: Vec<ListDef>,
    list_index: HashMap<String, usize>,
    macros: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn build(set: &RuleSet) -> Result<Self, CompilationError> {
        if set.categories.len() > MAX_CATEGORIES {
            return Err(CompilationError::FormatLimit {
                what: "category index",
                value: set.categories.len() - 1,
            });
        }

        let mut table = SymbolTable {
            categories: set.categories.clone(),
            attributes: set.attributes.clone(),
            variables: set.variables.clone(),
            lists: set.lists.clone(),
            ..Self::default()
        };

        for (i, cat) in set.categories.iter().enumerate() {
            insert_unique(&mut table.category_index, &cat.name, i, SymbolKind::Category)?;
        }
        for (i, attr) in set.attributes.iter().enumerate() {
            insert_unique(&mut table.attribute_index, &attr.name, i, SymbolKind::Attribute)?;
            for item in &attr.items {
                let owners = table.attr_inverse.entry(item.clone()).or_default();
                if !owners.contains(&attr.name) {
                    owners.push(attr.name.clone());
                }
            }
        }
        for (i, var) in set.variables.iter().enumerate() {
            insert_unique(&mut table.variable_index, &var.name, i, SymbolKind::Variable)?;
        }
        for (i, list) in set.lists.iter().enumerate() {
            insert_unique(&mut table.list_index, &list.name, i, SymbolKind::List)?;
        }
        for mac in &set.macros {
            insert_unique(&mut table.macros, &mac.name, mac.param_count, SymbolKind::Macro)?;
        }

        for retag in &set.retag_rules {
            if !table.attribute_index.contains_key(&retag.source) {
                return Err(reference(SymbolKind::Attribute, &retag.source));
            }
        }
        for rule in &set.output_rules {
            for slot in &rule.slots {
                let OutputSlot::Var(var) = slot else {
                    continue;
                };
                let known = table.attribute_index.contains_key(var)
                    || table.variable_index.contains_key(var)
                    || set.retag_rules.iter().any(|r| &r.destination == var);
                if !known {
                    return Err(reference(SymbolKind::Attribute, var));
                }
            }
        }

        Ok(table)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category(&self, name: &str) -> Option<&Category> {
        self.category_index.get(name).map(|&i| &self.categories[i])
    }

    /// Wire byte of a category
    pub fn category_index(&self, name: &str) -> Result<u8, CompilationError> {
        let index = *self
            .category_index
            .get(name)
            .ok_or_else(|| reference(SymbolKind::Category, name))?;
        u8::try_from(index).map_err(|_| CompilationError::FormatLimit {
            what: "category index",
            value: index,
        })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attribute_index.get(name).map(|&i| &self.attributes[i])
    }

    /// Attributes listing `tag` among their values, in declaration order
    pub fn owners(&self, tag: &str) -> &[String] {
        self.attr_inverse.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn variables(&self) -> &[VariableDef] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Result<&VariableDef, CompilationError> {
        self.variable_index
            .get(name)
            .map(|&i| &self.variables[i])
            .ok_or_else(|| reference(SymbolKind::Variable, name))
    }

    pub fn lists(&self) -> &[ListDef] {
        &self.lists
    }

    /// Items of a declared list; attributes double as lists
    pub fn list(&self, name: &str) -> Result<&[String], CompilationError> {
        if let Some(&i) = self.list_index.get(name) {
            return Ok(&self.lists[i].items);
        }
        self.attribute(name)
            .map(|a| a.items.as_slice())
            .ok_or_else(|| reference(SymbolKind::List, name))
    }

    /// Declared parameter count of a macro
    pub fn macro_arity(&self, name: &str) -> Result<usize, CompilationError> {
        self.macros
            .get(name)
            .copied()
            .ok_or_else(|| reference(SymbolKind::Macro, name))
    }

    /// A clip part must be builtin, an attribute, or a declared variable
    pub fn check_part(&self, part: &str) -> Result<(), CompilationError> {
        if BUILTIN_PARTS.contains(&part)
            || self.attribute_index.contains_key(part)
            || self.variable_index.contains_key(part)
        {
            Ok(())
        } else {
            Err(reference(SymbolKind::Attribute, part))
        }
    }

    /// Resolves a pattern constraint: an attribute name accepts any of its
    /// values, a bare tag accepts that tag under every attribute owning it
    pub fn resolve_constraint(&self, constraint: &str) -> Result<Constraint, CompilationError> {
        let alternatives: Vec<(String, String)> = match self.attribute(constraint) {
            Some(attr) => attr
                .items
                .iter()
                .map(|v| (attr.name.clone(), v.clone()))
                .collect(),
            None => self
                .owners(constraint)
                .iter()
                .map(|owner| (owner.clone(), constraint.to_string()))
                .collect(),
        };

        if alternatives.is_empty() {
            return Err(reference(SymbolKind::Attribute, constraint));
        }

        Ok(Constraint {
            source: constraint.to_string(),
            alternatives,
        })
    }

    /// Variables a lexical unit carries: each attribute takes the value of a
    /// tag it owns, target tags overriding source tags
    pub fn tag_variables<'a>(
        &self,
        source_tags: impl IntoIterator<Item = &'a String>,
        target_tags: impl IntoIterator<Item = &'a String>,
    ) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        for tag in source_tags.into_iter().chain(target_tags) {
            for owner in self.owners(tag) {
                vars.insert(owner.clone(), tag.clone());
            }
        }
        vars
    }
}

fn insert_unique(
    index: &mut HashMap<String, usize>,
    name: &str,
    value: usize,
    kind: SymbolKind,
) -> Result<(), CompilationError> {
    if index.insert(name.to_string(), value).is_some() {
        return Err(CompilationError::Duplicate {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn reference(kind: SymbolKind, name: &str) -> CompilationError {
    CompilationError::Reference {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Stage;

    fn attr(name: &str, items: &[&str]) -> Attribute {
        Attribute {
            name: name.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn table() -> SymbolTable {
        let mut set = RuleSet::new(Stage::PreTransfer);
        set.attributes.push(attr("Number", &["sg", "pl"]));
        set.attributes.push(attr("Count", &["sg", "du"]));
        SymbolTable::build(&set).unwrap()
    }

    #[test]
    fn test_inverse_index_keeps_every_owner() {
        let table = table();
        assert_eq!(table.owners("sg"), &["Number".to_string(), "Count".to_string()]);
        assert_eq!(table.owners("du"), &["Count".to_string()]);
        assert!(table.owners("xx").is_empty());
    }

    #[test]
    fn test_bare_tag_constraint_is_disjunction() {
        let constraint = table().resolve_constraint("sg").unwrap();
        assert_eq!(
            constraint.alternatives,
            vec![
                ("Number".to_string(), "sg".to_string()),
                ("Count".to_string(), "sg".to_string())
            ]
        );
    }

    #[test]
    fn test_attribute_constraint_enumerates_values() {
        let constraint = table().resolve_constraint("Number").unwrap();
        assert_eq!(constraint.alternatives.len(), 2);
        assert!(table().resolve_constraint("nope").is_err());
    }

    #[test]
    fn test_too_many_categories() {
        let mut set = RuleSet::new(Stage::PreTransfer);
        for i in 0..257 {
            set.categories.push(Category {
                name: format!("c{}", i),
                items: vec![],
            });
        }
        let err = SymbolTable::build(&set).unwrap_err();
        assert!(matches!(err, CompilationError::FormatLimit { value: 256, .. }));
    }

    #[test]
    fn test_full_category_table() {
        let mut set = RuleSet::new(Stage::PreTransfer);
        for i in 0..256 {
            set.categories.push(Category {
                name: format!("c{}", i),
                items: vec![],
            });
        }
        let table = SymbolTable::build(&set).unwrap();
        assert_eq!(table.category_index("c255").unwrap(), 255);
    }

    #[test]
    fn test_output_and_retag_references() {
        let parse = |source: &str| SymbolTable::build(&crate::parser::parse(source).unwrap());

        assert!(parse("tense = pri ; tense > tl: pri pres ; v: _.tl ;").is_ok());
        assert!(matches!(
            parse("tense > tl: pri pres ;"),
            Err(CompilationError::Reference { kind: SymbolKind::Attribute, .. })
        ));
        assert!(matches!(
            parse("v: _.nosuch ;"),
            Err(CompilationError::Reference { kind: SymbolKind::Attribute, .. })
        ));
    }

    #[test]
    fn test_duplicate_list() {
        let mut set = RuleSet::new(Stage::PreTransfer);
        for _ in 0..2 {
            set.lists.push(ListDef {
                name: "days".to_string(),
                items: vec![],
            });
        }
        assert!(matches!(
            SymbolTable::build(&set),
            Err(CompilationError::Duplicate { kind: SymbolKind::List, .. })
        ));
    }

    #[test]
    fn test_tag_variables() {
        let table = table();
        let source = vec!["n".to_string(), "sg".to_string()];
        let target = vec!["n".to_string(), "pl".to_string()];
        let vars = table.tag_variables(&source, &target);

        assert_eq!(vars.get("Number").map(String::as_str), Some("pl"));
        assert_eq!(vars.get("Count").map(String::as_str), Some("sg"));
    }
}
