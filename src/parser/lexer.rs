// src/parser/lexer.rs
//! Lexical analyzer for the textual rule syntax

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Any run of non-blank, non-symbol characters (names, tags, weights, positions)
    Ident(String),
    /// Lemma of a lexical element, written directly before an `@`
    Lemma(String),

    // Symbols
    At,
    Dollar,
    Percent,
    LeftParen,
    RightParen,
    Assign,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Pipe,
    Backslash,
    Slash,
    Colon,
    Semicolon,
    Lt,
    Gt,
    Comma,
    Dot,
    Arrow,

    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Token::Ident(s) => return write!(f, "'{}'", s),
            Token::Lemma(s) => return write!(f, "'{}@'", s),
            Token::Eof => return write!(f, "end of input"),
            Token::At => "@",
            Token::Dollar => "$",
            Token::Percent => "%",
            Token::LeftParen => "(",
            Token::RightParen => ")",
            Token::Assign => "=",
            Token::LeftBrace => "{",
            Token::RightBrace => "}",
            Token::LeftBracket => "[",
            Token::RightBracket => "]",
            Token::Pipe => "|",
            Token::Backslash => "\\",
            Token::Slash => "/",
            Token::Colon => ":",
            Token::Semicolon => ";",
            Token::Lt => "<",
            Token::Gt => ">",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Arrow => "->",
        };
        write!(f, "'{}'", symbol)
    }
}

#[derive(Debug)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub remaining: String,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lexer error at {}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

impl From<LexError> for crate::CompilationError {
    fn from(err: LexError) -> Self {
        crate::CompilationError::Syntax {
            message: err.to_string(),
            token: String::new(),
            remaining: err.remaining,
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: strip_comments(input).chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        if self.is_at_end() {
            return Ok(Token::Eof);
        }

        let ch = self.current_char();

        let symbol = match ch {
            '@' => Some(Token::At),
            '$' => Some(Token::Dollar),
            '%' => Some(Token::Percent),
            '(' => Some(Token::LeftParen),
            ')' => Some(Token::RightParen),
            '=' => Some(Token::Assign),
            '{' => Some(Token::LeftBrace),
            '}' => Some(Token::RightBrace),
            '[' => Some(Token::LeftBracket),
            ']' => Some(Token::RightBracket),
            '|' => Some(Token::Pipe),
            '/' => Some(Token::Slash),
            ':' => Some(Token::Colon),
            ';' => Some(Token::Semicolon),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '-' if self.peek_char() == Some('>') => {
                self.advance();
                Some(Token::Arrow)
            }
            '\\' if self.peek_char().is_none() => Some(Token::Backslash),
            _ => None,
        };

        if let Some(token) = symbol {
            self.advance();
            return Ok(token);
        }

        self.read_identifier()
    }

    /// Unconsumed input, used in error messages
    pub fn remaining(&self) -> String {
        let rest: String = self.input[self.position..].iter().collect();
        rest.trim().chars().take(60).collect()
    }

    fn read_identifier(&mut self) -> Result<Token, LexError> {
        let mut ident = String::new();

        while !self.is_at_end() {
            let ch = self.current_char();
            if ch == '\\' {
                self.advance();
                if self.is_at_end() {
                    return Err(self.error("Dangling escape at end of input"));
                }
                ident.push(self.current_char());
                self.advance();
                continue;
            }
            // weights like 0.5 keep their decimal point
            if ch == '.'
                && !ident.is_empty()
                && ident.chars().all(|c| c.is_ascii_digit())
                && self.peek_char().is_some_and(|c| c.is_ascii_digit())
            {
                ident.push(ch);
                self.advance();
                continue;
            }
            if ch.is_whitespace() || is_symbol(ch) || (ch == '-' && self.peek_char() == Some('>')) {
                break;
            }
            ident.push(ch);
            self.advance();
        }

        if ident.is_empty() {
            return Err(self.error(&format!("Unexpected character: '{}'", self.current_char())));
        }

        if !self.is_at_end() && self.current_char() == '@' {
            self.advance();
            return Ok(Token::Lemma(ident));
        }

        Ok(Token::Ident(ident))
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            if self.current_char() == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn error(&self, message: &str) -> LexError {
        LexError {
            message: message.to_string(),
            line: self.line,
            column: self.column,
            remaining: self.remaining(),
        }
    }
}

fn is_symbol(ch: char) -> bool {
    matches!(
        ch,
        '@' | '$' | '%' | '(' | ')' | '=' | '{' | '}' | '[' | ']' | '|' | '/' | ':' | ';' | '<'
            | '>' | ',' | '.'
    )
}

/// Drops everything from an unescaped `!` to the end of its line
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_comment = false;
    let mut escaped = false;

    for ch in input.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
                out.push(ch);
            }
        } else if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
            out.push(ch);
        } else if ch == '!' {
            in_comment = true;
        } else {
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(s: &str) -> Token {
        Token::Ident(s.to_string())
    }

    #[test]
    fn test_rule_tokens() {
        let mut lexer = Lexer::new("NP.gen -> 1: det.$n { 1 _1 2 } ;");

        assert_eq!(lexer.next_token().unwrap(), ident("NP"));
        assert_eq!(lexer.next_token().unwrap(), Token::Dot);
        assert_eq!(lexer.next_token().unwrap(), ident("gen"));
        assert_eq!(lexer.next_token().unwrap(), Token::Arrow);
        assert_eq!(lexer.next_token().unwrap(), ident("1"));
        assert_eq!(lexer.next_token().unwrap(), Token::Colon);
        assert_eq!(lexer.next_token().unwrap(), ident("det"));
        assert_eq!(lexer.next_token().unwrap(), Token::Dot);
        assert_eq!(lexer.next_token().unwrap(), Token::Dollar);
        assert_eq!(lexer.next_token().unwrap(), ident("n"));
        assert_eq!(lexer.next_token().unwrap(), Token::LeftBrace);
        assert_eq!(lexer.next_token().unwrap(), ident("1"));
        assert_eq!(lexer.next_token().unwrap(), ident("_1"));
        assert_eq!(lexer.next_token().unwrap(), ident("2"));
        assert_eq!(lexer.next_token().unwrap(), Token::RightBrace);
        assert_eq!(lexer.next_token().unwrap(), Token::Semicolon);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_decimal_weight_and_child_var() {
        let mut lexer = Lexer::new("0.5: x=1.gen");

        assert_eq!(lexer.next_token().unwrap(), ident("0.5"));
        assert_eq!(lexer.next_token().unwrap(), Token::Colon);
        assert_eq!(lexer.next_token().unwrap(), ident("x"));
        assert_eq!(lexer.next_token().unwrap(), Token::Assign);
        assert_eq!(lexer.next_token().unwrap(), ident("1"));
        assert_eq!(lexer.next_token().unwrap(), Token::Dot);
        assert_eq!(lexer.next_token().unwrap(), ident("gen"));
    }

    #[test]
    fn test_lemma_binds_to_following_at() {
        let mut lexer = Lexer::new("de@pr.$num @n");

        assert_eq!(lexer.next_token().unwrap(), Token::Lemma("de".to_string()));
        assert_eq!(lexer.next_token().unwrap(), ident("pr"));
        assert_eq!(lexer.next_token().unwrap(), Token::Dot);
        assert_eq!(lexer.next_token().unwrap(), Token::Dollar);
        assert_eq!(lexer.next_token().unwrap(), ident("num"));
        assert_eq!(lexer.next_token().unwrap(), Token::At);
        assert_eq!(lexer.next_token().unwrap(), ident("n"));
    }

    #[test]
    fn test_comments_and_escapes() {
        let mut lexer = Lexer::new("num = sg ! singular\n pl \\!bang ;");

        assert_eq!(lexer.next_token().unwrap(), ident("num"));
        assert_eq!(lexer.next_token().unwrap(), Token::Assign);
        assert_eq!(lexer.next_token().unwrap(), ident("sg"));
        assert_eq!(lexer.next_token().unwrap(), ident("pl"));
        assert_eq!(lexer.next_token().unwrap(), ident("!bang"));
        assert_eq!(lexer.next_token().unwrap(), Token::Semicolon);
    }
}
