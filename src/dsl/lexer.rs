//! Tokenizer for the plan DSL.
//!
//! Produces tokens lazily through the [`Iterator`] impl, tracking line and
//! column for every token so parse errors can point at the source. The
//! stream is terminated by an explicit [`TokenKind::Eof`] token.

use std::fmt;

use crate::error::{Error, Result};

/// Kinds of token the DSL knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `:`
    Colon,
    /// `,`
    Comma,
    /// `=>`
    Arrow,
    /// Quoted string literal, escapes already resolved.
    Str,
    /// Bare identifier; doubles as keyword and unquoted scalar value.
    Ident,
    /// Optionally signed integer literal.
    Number,
    /// End of input.
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Colon => "':'",
            TokenKind::Comma => "','",
            TokenKind::Arrow => "'=>'",
            TokenKind::Str => "string",
            TokenKind::Ident => "identifier",
            TokenKind::Number => "number",
            TokenKind::Eof => "end of input",
        };
        f.write_str(name)
    }
}

/// One token with its literal value and source position (1-based line/column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

/// Tokenizer over DSL source text.
///
/// Scans by `char` so multi-byte UTF-8 content survives string literals
/// intact. Cheap to reconstruct: restarting a scan means building a new
/// `Lexer`.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    done: bool,
}

impl<'a> Lexer<'a> {
    /// Creates a lexer over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            pos: 0,
            line: 1,
            column: 1,
            done: false,
        }
    }

    /// Collects the whole token stream, including the trailing `Eof` token.
    pub fn tokenize(source: &str) -> Result<Vec<Token>> {
        Lexer::new(source).collect()
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    /// Byte lookahead, only valid after an ASCII character at `self.pos`.
    fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.source.as_bytes().get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn token(&self, kind: TokenKind, value: impl Into<String>, start: Position) -> Token {
        Token {
            kind,
            value: value.into(),
            offset: start.offset,
            line: start.line,
            column: start.column,
        }
    }

    fn current_position(&self) -> Position {
        Position {
            offset: self.pos,
            line: self.line,
            column: self.column,
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn string(&mut self) -> Result<Token> {
        let start = self.current_position();
        let quote = self.bump().expect("string lexed at end of input");
        let mut value = String::new();
        loop {
            let Some(ch) = self.bump() else {
                return Err(Error::parse(
                    start.line,
                    start.column,
                    "unterminated string literal",
                ));
            };
            match ch {
                '\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(Error::parse(
                            start.line,
                            start.column,
                            "unterminated string literal",
                        ));
                    };
                    match esc {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        // Unknown escapes pass the character through.
                        other => value.push(other),
                    }
                }
                ch if ch == quote => return Ok(self.token(TokenKind::Str, value, start)),
                other => value.push(other),
            }
        }
    }

    fn identifier(&mut self) -> Token {
        let start = self.current_position();
        while let Some(ch) = self.peek() {
            if is_ident_part(ch) {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.source[start.offset..self.pos];
        self.token(TokenKind::Ident, text, start)
    }

    fn number(&mut self) -> Token {
        let start = self.current_position();
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.bump();
        }
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.bump();
            } else {
                break;
            }
        }
        let text = &self.source[start.offset..self.pos];
        self.token(TokenKind::Number, text, start)
    }

    fn next_token(&mut self) -> Result<Token> {
        loop {
            let Some(ch) = self.peek() else {
                let start = self.current_position();
                return Ok(self.token(TokenKind::Eof, "", start));
            };
            if ch.is_whitespace() {
                self.bump();
                continue;
            }
            if ch == '#' {
                self.skip_comment();
                continue;
            }

            let start = self.current_position();
            let simple = match ch {
                '{' => Some(TokenKind::LBrace),
                '}' => Some(TokenKind::RBrace),
                '[' => Some(TokenKind::LBracket),
                ']' => Some(TokenKind::RBracket),
                ':' => Some(TokenKind::Colon),
                ',' => Some(TokenKind::Comma),
                _ => None,
            };
            if let Some(kind) = simple {
                self.bump();
                return Ok(self.token(kind, ch.to_string(), start));
            }
            if ch == '=' && self.peek_byte(1) == Some(b'>') {
                self.bump();
                self.bump();
                return Ok(self.token(TokenKind::Arrow, "=>", start));
            }
            if ch == '\'' || ch == '"' {
                return self.string();
            }
            if ch.is_ascii_digit() {
                return Ok(self.number());
            }
            if matches!(ch, '-' | '+') && self.peek_byte(1).is_some_and(|c| c.is_ascii_digit()) {
                return Ok(self.number());
            }
            if is_ident_start(ch) {
                return Ok(self.identifier());
            }
            return Err(Error::parse(
                start.line,
                start.column,
                format!("unexpected character '{ch}'"),
            ));
        }
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let token = self.next_token();
        if let Ok(ref t) = token {
            if t.kind == TokenKind::Eof {
                self.done = true;
            }
        } else {
            self.done = true;
        }
        Some(token)
    }
}

#[derive(Clone, Copy)]
struct Position {
    offset: usize,
    line: usize,
    column: usize,
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || matches!(ch, '_' | '.' | '/')
}

fn is_ident_part(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '/')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn punctuation_and_arrow() {
        assert_eq!(
            kinds("{ } [ ] : , =>"),
            vec![
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::Colon,
                TokenKind::Comma,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn strings_resolve_escapes() {
        let tokens = Lexer::tokenize(r#""a\tb\n" 'it\'s' "\q""#).unwrap();
        assert_eq!(tokens[0].value, "a\tb\n");
        assert_eq!(tokens[1].value, "it's");
        // Unknown escapes pass the character through.
        assert_eq!(tokens[2].value, "q");
    }

    #[test]
    fn strings_preserve_multibyte_characters() {
        let tokens = Lexer::tokenize("'héllo wörld' \"día ✓\"").unwrap();
        assert_eq!(tokens[0].value, "héllo wörld");
        assert_eq!(tokens[1].value, "día ✓");
    }

    #[test]
    fn escapes_next_to_multibyte_characters() {
        let tokens = Lexer::tokenize(r"'café\tnoir' '\é'").unwrap();
        assert_eq!(tokens[0].value, "café\tnoir");
        assert_eq!(tokens[1].value, "é");
    }

    #[test]
    fn identifiers_allow_paths() {
        let tokens = Lexer::tokenize("/etc/motd net.ipv4.ip_forward my-pkg").unwrap();
        assert_eq!(tokens[0].value, "/etc/motd");
        assert_eq!(tokens[1].value, "net.ipv4.ip_forward");
        assert_eq!(tokens[2].value, "my-pkg");
        assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Ident));
    }

    #[test]
    fn signed_numbers() {
        let tokens = Lexer::tokenize("42 -7 +3").unwrap();
        assert_eq!(tokens[0].value, "42");
        assert_eq!(tokens[1].value, "-7");
        assert_eq!(tokens[2].value, "+3");
        assert!(tokens[..3].iter().all(|t| t.kind == TokenKind::Number));
    }

    #[test]
    fn comments_and_positions() {
        let tokens = Lexer::tokenize("# header\nnode 'a'\n  {").unwrap();
        assert_eq!(tokens[0].value, "node");
        assert_eq!((tokens[0].line, tokens[0].column), (2, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 6));
        assert_eq!((tokens[2].line, tokens[2].column), (3, 3));
    }

    #[test]
    fn columns_count_characters_not_bytes() {
        // "é" is two bytes but one column wide.
        let tokens = Lexer::tokenize("'é' {").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (1, 5));
    }

    #[test]
    fn unexpected_character_carries_position() {
        let err = Lexer::tokenize("node @").unwrap_err();
        assert_eq!(err.position(), Some((1, 6)));
    }

    #[test]
    fn unterminated_string_points_at_opening_quote() {
        let err = Lexer::tokenize("task 'demo").unwrap_err();
        assert_eq!(err.position(), Some((1, 6)));
    }
}
