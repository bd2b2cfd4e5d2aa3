// src/runtime/format.rs
//! Output formatting of lexical units
//!
//! A unit whose target tags start with the pattern of an output rule is
//! written through that rule's slots; the longest matching pattern wins,
//! earlier rules first among equals. Other units keep their target tags,
//! with tags owned by an updated attribute replaced.

use super::node::{LexicalEntry, Vars};
use crate::compiler::symbols::SymbolTable;
use crate::parser::ast::{OutputRule, OutputSlot, RetagRule};

pub struct Formatter<'a> {
    symbols: &'a SymbolTable,
    output_rules: &'a [OutputRule],
    retag_rules: &'a [RetagRule],
}

impl<'a> Formatter<'a> {
    pub fn new(symbols: &'a SymbolTable, output_rules: &'a [OutputRule], retag_rules: &'a [RetagRule]) -> Self {
        Self {
            symbols,
            output_rules,
            retag_rules,
        }
    }

    /// `^lemma<tag>...$` on the target side. `overrides` are the updates a
    /// parent applied to this unit, `scope` the parent's variables.
    pub fn lexical(&self, entry: &LexicalEntry, scope: &Vars, overrides: &Vars) -> String {
        let mut out = format!("^{}", entry.target_lemma);
        match self.output_rule(&entry.target_tags) {
            Some(rule) => {
                for slot in &rule.slots {
                    match slot {
                        OutputSlot::Pattern => rule.pattern.iter().for_each(|tag| push_tag(&mut out, tag)),
                        OutputSlot::Tag(tag) => push_tag(&mut out, tag),
                        OutputSlot::Var(var) => {
                            if let Some(value) = self.value(var, entry, scope, overrides) {
                                push_tag(&mut out, &value);
                            }
                        }
                    }
                }
            }
            None => {
                for tag in &entry.target_tags {
                    let replaced = self
                        .symbols
                        .owners(tag)
                        .iter()
                        .find_map(|attr| overrides.get(attr));
                    push_tag(&mut out, replaced.unwrap_or(tag));
                }
            }
        }
        out.push('$');
        out
    }

    fn output_rule(&self, tags: &[String]) -> Option<&'a OutputRule> {
        let mut best: Option<&'a OutputRule> = None;
        for rule in self.output_rules {
            let longer = best.map_or(true, |b| rule.pattern.len() > b.pattern.len());
            if longer && tags.starts_with(&rule.pattern) {
                best = Some(rule);
            }
        }
        best
    }

    /// Updated value, own value, retagged value, then inherited value
    fn value(&self, var: &str, entry: &LexicalEntry, scope: &Vars, overrides: &Vars) -> Option<String> {
        let own = |name: &str| overrides.get(name).or_else(|| entry.vars.get(name));

        own(var)
            .cloned()
            .or_else(|| {
                self.retag_rules
                    .iter()
                    .filter(|rule| rule.destination == var)
                    .find_map(|rule| own(&rule.source).and_then(|value| rule.map(value)))
                    .map(str::to_string)
            })
            .or_else(|| scope.get(var).cloned())
            .filter(|value| !value.is_empty())
    }
}

/// Empty values write nothing
fn push_tag(out: &mut String, tag: &str) {
    if !tag.is_empty() {
        out.push('<');
        out.push_str(tag);
        out.push('>');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn entry(tags: &[&str], vars: &[(&str, &str)]) -> LexicalEntry {
        LexicalEntry {
            id: 0,
            source_lemma: "gato".to_string(),
            source_tags: Vec::new(),
            target_lemma: "cat".to_string(),
            target_tags: tags.iter().map(|t| t.to_string()).collect(),
            vars: vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn render(rules: &str, entry: &LexicalEntry, scope: &Vars, overrides: &Vars) -> String {
        let set = parser::parse(rules).unwrap();
        let symbols = SymbolTable::build(&set).unwrap();
        Formatter::new(&symbols, &set.output_rules, &set.retag_rules).lexical(entry, scope, overrides)
    }

    #[test]
    fn test_longest_pattern_wins() {
        let rules = "num = sg pl ; n: _.num ; n.acr: _.<x> ;";

        let plain = entry(&["n", "f", "sg"], &[("num", "sg")]);
        assert_eq!(render(rules, &plain, &Vars::new(), &Vars::new()), "^cat<n><sg>$");

        let acronym = entry(&["n", "acr", "sg"], &[("num", "sg")]);
        assert_eq!(render(rules, &acronym, &Vars::new(), &Vars::new()), "^cat<n><acr><x>$");
    }

    #[test]
    fn test_slot_values_prefer_updates_then_scope() {
        let rules = "num = sg pl ; case = nom acc ; n: _.num.case ;";
        let unit = entry(&["n", "sg"], &[("num", "sg")]);

        let mut overrides = Vars::new();
        overrides.insert("num".to_string(), "pl".to_string());
        let mut scope = Vars::new();
        scope.insert("case".to_string(), "acc".to_string());

        assert_eq!(render(rules, &unit, &scope, &overrides), "^cat<n><pl><acc>$");
        assert_eq!(render(rules, &unit, &Vars::new(), &Vars::new()), "^cat<n><sg>$");
    }

    #[test]
    fn test_retag_fills_destination() {
        let rules = "tense = pri ifi ; tense > tl_tense: pri pres, ifi past ; vblex: _.tl_tense ;";

        let unit = entry(&["vblex", "ifi"], &[("tense", "ifi")]);
        assert_eq!(render(rules, &unit, &Vars::new(), &Vars::new()), "^cat<vblex><past>$");

        let mut overrides = Vars::new();
        overrides.insert("tense".to_string(), "pri".to_string());
        assert_eq!(render(rules, &unit, &Vars::new(), &overrides), "^cat<vblex><pres>$");
    }

    #[test]
    fn test_unmatched_units_replace_updated_tags() {
        let unit = entry(&["adj", "sg"], &[("num", "sg")]);
        let mut overrides = Vars::new();
        overrides.insert("num".to_string(), String::new());

        assert_eq!(render("num = sg pl ; n: _.num ;", &unit, &Vars::new(), &overrides), "^cat<adj>$");
    }
}
