// src/runtime/stream.rs
//! Reader for `^source<tags>/target<tags>$` input streams

use super::node::{LexicalEntry, Token};
use crate::compiler::symbols::SymbolTable;
use crate::ExecutionError;
use ahash::HashMap;
use std::rc::Rc;

type EntryKey = (String, Vec<String>, String, Vec<String>);

/// Shares one entry between identical lexical units
#[derive(Debug, Default)]
pub struct Interner {
    entries: HashMap<EntryKey, Rc<LexicalEntry>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn intern(&mut self, key: EntryKey, symbols: &SymbolTable) -> Rc<LexicalEntry> {
        let next_id = self.entries.len();
        self.entries
            .entry(key)
            .or_insert_with_key(|(source_lemma, source_tags, target_lemma, target_tags)| {
                Rc::new(LexicalEntry {
                    id: next_id,
                    source_lemma: source_lemma.clone(),
                    source_tags: source_tags.clone(),
                    target_lemma: target_lemma.clone(),
                    target_tags: target_tags.clone(),
                    vars: symbols.tag_variables(source_tags, target_tags),
                })
            })
            .clone()
    }
}

/// Splits input into alternating blanks and lexical units. Every lexical
/// unit is preceded by a (possibly empty) blank; trailing text becomes a
/// final blank.
pub fn read_stream(
    input: &str,
    interner: &mut Interner,
    symbols: &SymbolTable,
) -> Result<Vec<Token>, ExecutionError> {
    let mut tokens = Vec::new();
    let mut blank = String::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '\\' => {
                blank.push(c);
                if let Some((_, escaped)) = chars.next() {
                    blank.push(escaped);
                }
            }
            '^' => {
                let mut unit = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => {
                            unit.push(c);
                            if let Some((_, escaped)) = chars.next() {
                                unit.push(escaped);
                            }
                        }
                        '$' => {
                            closed = true;
                            break;
                        }
                        '^' => {
                            return Err(ExecutionError::Stream {
                                offset,
                                message: "nested '^' inside a lexical unit".to_string(),
                            })
                        }
                        _ => unit.push(c),
                    }
                }
                if !closed {
                    return Err(ExecutionError::Stream {
                        offset,
                        message: "unterminated lexical unit".to_string(),
                    });
                }

                tokens.push(Token::Blank(Rc::from(std::mem::take(&mut blank))));
                let key = parse_unit(&unit, offset)?;
                tokens.push(Token::Lexical(interner.intern(key, symbols)));
            }
            _ => blank.push(c),
        }
    }

    if !blank.is_empty() {
        tokens.push(Token::Blank(Rc::from(blank)));
    }
    Ok(tokens)
}

/// `source<a><b>/target<c>`; a unit without `/` translates to itself
fn parse_unit(unit: &str, offset: usize) -> Result<EntryKey, ExecutionError> {
    let (source, target) = match split_unescaped(unit, '/') {
        Some((source, rest)) => {
            // Only the first of several translations is kept
            let target = split_unescaped(rest, '/').map_or(rest, |(first, _)| first);
            (source, target)
        }
        None => (unit, unit),
    };

    let (source_lemma, source_tags) = parse_side(source, offset)?;
    let (target_lemma, target_tags) = parse_side(target, offset)?;
    Ok((source_lemma, source_tags, target_lemma, target_tags))
}

fn parse_side(text: &str, offset: usize) -> Result<(String, Vec<String>), ExecutionError> {
    let (lemma, mut rest) = match split_unescaped(text, '<') {
        Some((lemma, rest)) => (lemma, Some(rest)),
        None => (text, None),
    };

    let mut tags = Vec::new();
    while let Some(tail) = rest {
        let Some(close) = tail.find('>') else {
            return Err(ExecutionError::Stream {
                offset,
                message: format!("unclosed tag in {:?}", text),
            });
        };
        tags.push(tail[..close].to_string());

        let after = &tail[close + 1..];
        rest = match after.strip_prefix('<') {
            Some(next) => Some(next),
            None if after.is_empty() => None,
            None => {
                return Err(ExecutionError::Stream {
                    offset,
                    message: format!("text after tags in {:?}", text),
                })
            }
        };
    }

    Ok((lemma.to_string(), tags))
}

fn split_unescaped(text: &str, separator: char) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            c if c == separator => return Some((&text[..i], &text[i + c.len_utf8()..])),
            _ => {}
        }
    }
    None
}
