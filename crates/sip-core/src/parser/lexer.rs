//! Token-level scanner shared by every header parser.
//!
//! Header values are scanned after the header name and colon have been
//! removed and continuation lines have been joined. The [`Lexer`] is a cursor
//! that header parsers drive directly (`word`, `quoted_string`, `params`, ...),
//! while [`tokenize`] classifies a whole value into a flat list of [`Token`]s.
//!
//! Folded whitespace (`CRLF` or bare `LF` followed by SP/HT) is treated as a
//! single whitespace token.

use std::str::FromStr;

use nom::{
    bytes::complete::take_while1,
    character::complete::digit1,
};

use crate::error::ParseError;
use crate::parser::whitespace::{lws, sws};
use crate::types::param::Param;

/// RFC 3261 `token` characters
pub fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~')
}

/// Characters accepted in an unquoted parameter value. Wider than `token` so
/// that IPv6 references, `maddr` hosts and URN-like values survive.
fn is_param_value_char(c: char) -> bool {
    is_token_char(c) || matches!(c, ':' | '/' | '@' | '[' | ']' | '&' | '$' | '#')
}

/// A classified piece of header text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// token / atom
    Word(&'a str),
    /// All-digit token
    Number(&'a str),
    /// Unescaped content of a quoted-string
    Quoted(String),
    /// Content of a (possibly nested) comment, without the outer parentheses
    Comment(String),
    /// `;`
    Semicolon,
    /// `,`
    Comma,
    /// `=`
    Equals,
    /// Any other separator: `/ : < > @ ? [ ] { } \`
    Separator(char),
    /// SP, HT or folded line break
    Whitespace,
}

/// Cursor over a header value
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Builds a [`ParseError`] at the current position
    pub fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.input, self.pos, message)
    }

    fn error_at(&self, offset: usize, message: impl Into<String>) -> ParseError {
        ParseError::new(self.input, offset, message)
    }

    fn advance_to(&mut self, rest: &'a str) {
        self.pos = self.input.len() - rest.len();
    }

    /// Skips optional linear whitespace; returns `true` if anything was skipped
    pub fn skip_ws(&mut self) -> bool {
        match sws(self.remaining()) {
            Ok((rest, ws)) => {
                self.advance_to(rest);
                !ws.is_empty()
            }
            Err(_) => false,
        }
    }

    pub fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    /// Consumes `c` if it is the next character
    pub fn eat(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, c: char) -> Result<(), ParseError> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    /// Scans a `token`
    pub fn word(&mut self) -> Result<&'a str, ParseError> {
        let res: nom::IResult<&str, &str> = take_while1(is_token_char)(self.remaining());
        match res {
            Ok((rest, word)) => {
                self.advance_to(rest);
                Ok(word)
            }
            Err(_) => Err(self.error("expected token")),
        }
    }

    /// Scans a decimal number
    pub fn number<T: FromStr>(&mut self) -> Result<T, ParseError> {
        let start = self.pos;
        let res: nom::IResult<&str, &str> = digit1(self.remaining());
        match res {
            Ok((rest, digits)) => {
                let value = digits
                    .parse::<T>()
                    .map_err(|_| self.error_at(start, "number out of range"))?;
                self.advance_to(rest);
                Ok(value)
            }
            Err(_) => Err(self.error("expected number")),
        }
    }

    /// Consumes characters while `pred` holds
    pub fn take_while<F: Fn(char) -> bool>(&mut self, pred: F) -> &'a str {
        let rest = self.remaining();
        let end = rest
            .char_indices()
            .find(|(_, c)| !pred(*c))
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    /// Consumes up to (not including) the first of `stops` that is not inside
    /// a quoted-string or an angle-bracketed URI.
    pub fn take_until_unquoted(&mut self, stops: &[char]) -> Result<&'a str, ParseError> {
        let start = self.pos;
        let rest = self.remaining();
        let mut in_quotes = false;
        let mut in_angle = false;
        let mut escaped = false;
        for (i, c) in rest.char_indices() {
            if in_quotes {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_quotes = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_quotes = true,
                '<' => in_angle = true,
                '>' => in_angle = false,
                _ if !in_angle && stops.contains(&c) => {
                    self.pos += i;
                    return Ok(&rest[..i]);
                }
                _ => {}
            }
        }
        if in_quotes {
            return Err(self.error_at(start, "unterminated quoted string"));
        }
        self.pos = self.input.len();
        Ok(rest)
    }

    /// Scans a quoted-string starting at the opening quote and returns its
    /// unescaped content.
    pub fn quoted_string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.expect('"')?;
        let rest = self.remaining();
        let mut out = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                '"' => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                _ => out.push(c),
            }
        }
        Err(self.error_at(start, "unterminated quoted string"))
    }

    /// Scans a comment starting at `(`, honouring nesting and quoted-pairs
    pub fn comment(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.expect('(')?;
        let rest = self.remaining();
        let mut depth = 1usize;
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if chars.next().is_none() {
                        break;
                    }
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.pos += i + 1;
                        return Ok(rest[..i].to_string());
                    }
                }
                _ => {}
            }
        }
        Err(self.error_at(start, "unterminated comment"))
    }

    /// Scans a sequence of `;name[=value]` parameters. Stops (without error)
    /// at the first character that does not start another parameter.
    pub fn params(&mut self) -> Result<Vec<Param>, ParseError> {
        let mut params = Vec::new();
        loop {
            let checkpoint = self.pos;
            self.skip_ws();
            if !self.eat(';') {
                self.pos = checkpoint;
                break;
            }
            self.skip_ws();
            let name = self.word()?;
            let after_name = self.pos;
            self.skip_ws();
            if self.eat('=') {
                self.skip_ws();
                match self.peek_char() {
                    Some('"') => {
                        let value = self.quoted_string()?;
                        params.push(Param::quoted(name, value));
                    }
                    _ => {
                        let value = self.take_while(is_param_value_char);
                        if value.is_empty() {
                            return Err(self.error(format!("missing value for parameter '{name}'")));
                        }
                        params.push(Param::new(name, value));
                    }
                }
            } else {
                self.pos = after_name;
                params.push(Param::flag(name));
            }
        }
        Ok(params)
    }

    /// Scans the next token, or `None` at end of input
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, ParseError> {
        let Some(c) = self.peek_char() else {
            return Ok(None);
        };
        if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
            return match lws(self.remaining()) {
                Ok((rest, _)) => {
                    self.advance_to(rest);
                    Ok(Some(Token::Whitespace))
                }
                Err(_) => Err(self.error("line break without continuation")),
            };
        }
        let token = match c {
            '"' => Token::Quoted(self.quoted_string()?),
            '(' => Token::Comment(self.comment()?),
            ')' => return Err(self.error("unbalanced ')'")),
            ';' => {
                self.pos += 1;
                Token::Semicolon
            }
            ',' => {
                self.pos += 1;
                Token::Comma
            }
            '=' => {
                self.pos += 1;
                Token::Equals
            }
            c if is_token_char(c) => {
                let word = self.word()?;
                if word.bytes().all(|b| b.is_ascii_digit()) {
                    Token::Number(word)
                } else {
                    Token::Word(word)
                }
            }
            c if c.is_control() => {
                return Err(self.error(format!("unexpected control character {:#04x}", c as u32)));
            }
            c => {
                self.pos += c.len_utf8();
                Token::Separator(c)
            }
        };
        Ok(Some(token))
    }
}

/// Classifies a whole header value into tokens
pub fn tokenize(input: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
