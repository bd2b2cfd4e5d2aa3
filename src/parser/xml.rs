// src/parser/xml.rs
//! Minimal reader for the markup rule syntax
//!
//! Only elements and attributes carry meaning in rule files; text content,
//! CDATA sections, comments, processing instructions and doctype
//! declarations are skipped.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub line: usize,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug)]
pub struct MarkupError {
    pub message: String,
    pub line: usize,
    pub token: String,
    pub remaining: String,
}

impl fmt::Display for MarkupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Markup error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for MarkupError {}

impl From<MarkupError> for crate::CompilationError {
    fn from(err: MarkupError) -> Self {
        crate::CompilationError::Syntax {
            message: err.to_string(),
            token: err.token,
            remaining: err.remaining,
        }
    }
}

pub struct Reader {
    input: Vec<char>,
    position: usize,
    line: usize,
}

impl Reader {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
        }
    }

    /// Reads the single root element of the document
    pub fn read_document(mut self) -> Result<Element, MarkupError> {
        self.skip_misc()?;
        if self.is_at_end() {
            return Err(self.error("Document has no root element"));
        }
        let root = self.read_element()?;
        self.skip_misc()?;
        if !self.is_at_end() {
            return Err(self.error("Content after the root element"));
        }
        Ok(root)
    }

    fn read_element(&mut self) -> Result<Element, MarkupError> {
        let line = self.line;
        self.expect('<')?;
        let name = self.read_name()?;
        let mut attributes = Vec::new();

        loop {
            self.skip_whitespace();
            match self.current_char() {
                Some('/') => {
                    self.advance();
                    self.expect('>')?;
                    return Ok(Element {
                        name,
                        attributes,
                        children: Vec::new(),
                        line,
                    });
                }
                Some('>') => {
                    self.advance();
                    break;
                }
                Some(_) => attributes.push(self.read_attribute()?),
                None => return Err(self.error(&format!("Unterminated tag <{}>", name))),
            }
        }

        let mut children = Vec::new();
        loop {
            self.skip_text();
            if self.is_at_end() {
                return Err(self.error(&format!("Missing closing tag </{}>", name)));
            }
            if self.starts_with("</") {
                self.position += 2;
                let closing = self.read_name()?;
                if closing != name {
                    return Err(MarkupError {
                        message: format!("Mismatched closing tag, expected </{}>", name),
                        line: self.line,
                        token: format!("</{}>", closing),
                        remaining: self.remaining(),
                    });
                }
                self.skip_whitespace();
                self.expect('>')?;
                break;
            }
            if self.skip_special()? {
                continue;
            }
            children.push(self.read_element()?);
        }

        Ok(Element {
            name,
            attributes,
            children,
            line,
        })
    }

    fn read_attribute(&mut self) -> Result<(String, String), MarkupError> {
        let key = self.read_name()?;
        self.skip_whitespace();
        self.expect('=')?;
        self.skip_whitespace();

        let quote = match self.current_char() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(self.error(&format!("Expected quoted value for '{}'", key))),
        };
        self.advance();

        let mut raw = String::new();
        loop {
            match self.current_char() {
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    raw.push(c);
                    self.advance();
                }
                None => return Err(self.error(&format!("Unterminated value for '{}'", key))),
            }
        }

        Ok((key, decode_entities(&raw)))
    }

    fn read_name(&mut self) -> Result<String, MarkupError> {
        let mut name = String::new();
        while let Some(c) = self.current_char() {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.') {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if name.is_empty() {
            return Err(self.error("Expected a name"));
        }
        Ok(name)
    }

    /// Skips whitespace, comments, declarations and processing instructions
    fn skip_misc(&mut self) -> Result<(), MarkupError> {
        loop {
            self.skip_whitespace();
            if !self.skip_special()? {
                return Ok(());
            }
        }
    }

    fn skip_special(&mut self) -> Result<bool, MarkupError> {
        let terminator = if self.starts_with("<!--") {
            "-->"
        } else if self.starts_with("<![CDATA[") {
            "]]>"
        } else if self.starts_with("<?") {
            "?>"
        } else if self.starts_with("<!") {
            ">"
        } else {
            return Ok(false);
        };

        while !self.starts_with(terminator) {
            if self.is_at_end() {
                return Err(self.error(&format!("Expected '{}'", terminator)));
            }
            self.advance();
        }
        self.position += terminator.len();
        Ok(true)
    }

    fn skip_text(&mut self) {
        while let Some(c) = self.current_char() {
            if c == '<' {
                break;
            }
            self.advance();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.current_char().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), MarkupError> {
        if self.current_char() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("Expected '{}'", expected)))
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.input.get(self.position + i) == Some(&c))
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current_char() {
            if c == '\n' {
                self.line += 1;
            }
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn remaining(&self) -> String {
        let rest: String = self.input[self.position.min(self.input.len())..].iter().collect();
        rest.trim().chars().take(60).collect()
    }

    fn error(&self, message: &str) -> MarkupError {
        MarkupError {
            message: message.to_string(),
            line: self.line,
            token: self.current_char().map(String::from).unwrap_or_default(),
            remaining: self.remaining(),
        }
    }
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_nested_elements() {
        let doc = r#"<?xml version="1.0" encoding="UTF-8"?>
            <!-- header -->
            <interchunk>
              <section-def-cats>
                <def-cat n="det"><cat-item tags="det.*"/></def-cat>
              </section-def-cats>
            </interchunk>"#;

        let root = Reader::new(doc).read_document().unwrap();
        assert_eq!(root.name, "interchunk");
        assert_eq!(root.children.len(), 1);

        let def_cat = &root.children[0].children[0];
        assert_eq!(def_cat.attr("n"), Some("det"));
        assert_eq!(def_cat.children[0].attr("tags"), Some("det.*"));
        assert_eq!(def_cat.line, 5);
    }

    #[test]
    fn test_entities_in_attributes() {
        let root = Reader::new(r#"<lit v="a &amp; &lt;b&gt;"/>"#).read_document().unwrap();
        assert_eq!(root.attr("v"), Some("a & <b>"));
    }

    #[test]
    fn test_cdata_is_skipped_as_text() {
        let root = Reader::new("<rule c=\"x\"><![CDATA[ <a> ]> ]]><pattern/></rule>")
            .read_document()
            .unwrap();
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "pattern");
    }

    #[test]
    fn test_unterminated_cdata() {
        let err = Reader::new("<rule><![CDATA[ <a> </rule>").read_document().unwrap_err();
        assert!(err.message.contains("]]>"));
    }

    #[test]
    fn test_mismatched_closing_tag() {
        let err = Reader::new("<rule><pattern></rule>").read_document().unwrap_err();
        assert_eq!(err.token, "</rule>");
    }
}
