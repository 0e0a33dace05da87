//! Lexer (tokenizer) for the case-file language.

use crate::error::{EmtpError, Result};

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text
    pub text: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

/// Token types in the case file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// An identifier (element name, node name, keyword)
    Identifier,
    /// A number, possibly with a unit suffix
    Number,
    /// A directive (starts with '.')
    Directive,
    /// A signed control input such as `+ERR` or `-FB`; the text keeps the sign
    Signal,
    /// Open parenthesis '('
    OpenParen,
    /// Close parenthesis ')'
    CloseParen,
    /// Equals sign '='
    Equals,
    /// Newline
    Newline,
    /// End of file
    Eof,
}

/// Unit suffixes and their multipliers.
const SUFFIXES: [(char, f64); 9] = [
    ('p', 1e-12),
    ('n', 1e-9),
    ('u', 1e-6),
    ('µ', 1e-6),
    ('m', 1e-3),
    ('k', 1e3),
    ('K', 1e3),
    ('M', 1e6),
    ('G', 1e9),
];

fn is_suffix(ch: char) -> bool {
    SUFFIXES.iter().any(|&(s, _)| s == ch)
}

/// Lexer for tokenizing case-file input.
pub struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn token(&self, kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Token {
        Token {
            kind,
            text: text.into(),
            line,
            column,
        }
    }

    /// Get the next token.
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let Some(&(pos, ch)) = self.chars.peek() else {
            return Ok(self.token(TokenKind::Eof, "", self.line, self.column));
        };
        let (line, column) = (self.line, self.column);

        let token = match ch {
            '\n' => {
                self.advance();
                self.token(TokenKind::Newline, "\n", line, column)
            }
            '.' if self.char_after(pos).map_or(false, char::is_alphabetic) => {
                self.advance();
                let text = self.read_identifier();
                self.token(TokenKind::Directive, format!(".{text}"), line, column)
            }
            '(' => {
                self.advance();
                self.token(TokenKind::OpenParen, "(", line, column)
            }
            ')' => {
                self.advance();
                self.token(TokenKind::CloseParen, ")", line, column)
            }
            '=' => {
                self.advance();
                self.token(TokenKind::Equals, "=", line, column)
            }
            '-' | '+' if self.char_after(pos).map_or(false, |c| c.is_alphabetic() || c == '_') => {
                self.advance();
                let name = self.read_identifier();
                self.token(TokenKind::Signal, format!("{ch}{name}"), line, column)
            }
            '-' | '+' | '.' | '0'..='9' => {
                let text = self.read_number();
                // Node names such as `1A` start with a digit
                if self.chars.peek().map_or(false, |&(_, c)| c.is_alphanumeric() || c == '_') {
                    let rest = self.read_identifier();
                    self.token(TokenKind::Identifier, format!("{text}{rest}"), line, column)
                } else {
                    self.token(TokenKind::Number, text, line, column)
                }
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let text = self.read_identifier();
                self.token(TokenKind::Identifier, text, line, column)
            }
            _ => {
                return Err(EmtpError::lexer(line, column, format!("unexpected character '{ch}'")));
            }
        };

        Ok(token)
    }

    fn char_after(&self, pos: usize) -> Option<char> {
        let mut rest = self.input[pos..].chars();
        rest.next();
        rest.next()
    }

    fn advance(&mut self) -> Option<char> {
        let (_, ch) = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch == ' ' || ch == '\t' || ch == '\r' || ch == ',' {
                self.advance();
            } else if ch == '#' || ch == ';' {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut text = String::new();
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        text
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(&(_, ch)) = self.chars.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> String {
        let mut text = String::new();

        if let Some(&(_, ch)) = self.chars.peek() {
            if ch == '-' || ch == '+' {
                text.push(ch);
                self.advance();
            }
        }

        self.read_digits(&mut text);

        if let Some(&(_, '.')) = self.chars.peek() {
            text.push('.');
            self.advance();
            self.read_digits(&mut text);
        }

        // Exponent, only when a digit or sign follows the 'e'
        if let Some(&(pos, ch)) = self.chars.peek() {
            let next = self.char_after(pos);
            let exponent = (ch == 'e' || ch == 'E')
                && next.map_or(false, |c| c.is_ascii_digit() || c == '-' || c == '+');
            if exponent {
                text.push(ch);
                self.advance();
                if let Some(&(_, sign)) = self.chars.peek() {
                    if sign == '-' || sign == '+' {
                        text.push(sign);
                        self.advance();
                    }
                }
                self.read_digits(&mut text);
            }
        }

        // Unit suffix, unless it starts a longer word
        if let Some(&(pos, ch)) = self.chars.peek() {
            let word_follows = self.char_after(pos).map_or(false, |c| c.is_alphanumeric() || c == '_');
            if is_suffix(ch) && !word_follows {
                text.push(ch);
                self.advance();
            }
        }

        text
    }
}

/// Parse a number string with optional unit suffix.
///
/// `inf` and `never` (any case) stand for an infinite time.
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.eq_ignore_ascii_case("inf") || text.eq_ignore_ascii_case("never") {
        return Some(f64::INFINITY);
    }

    let last = text.chars().last()?;
    let (num_str, multiplier) = match SUFFIXES.iter().find(|&&(s, _)| s == last) {
        Some(&(_, mult)) => (&text[..text.len() - last.len_utf8()], mult),
        None => (text, 1.0),
    };

    num_str.parse::<f64>().ok().map(|v| v * multiplier)
}
