//! Recursive-descent parser for `key=value` argument lists.
//!
//! Grammar (whitespace between tokens is ignored):
//!
//! ```text
//! arguments := ( item ( ',' item )* ','? )?
//! item      := key '=' value
//! key       := [A-Za-z_][A-Za-z0-9_.-]*
//! value     := string | list | bare
//! string    := '"' chars '"' | '\'' chars '\''
//! list      := '[' ( value ( ',' value )* )? ']'
//! bare      := anything up to ',' or ']'  (true, false, null, numbers, words)
//! ```
//!
//! Lists may nest at most [`MAX_DEPTH`] levels.

use serde_json::{Number, Value};

use crate::Arguments;
use crate::error::{ArgsError, Result};

/// Deepest list nesting accepted; matches serde_json's recursion limit.
pub const MAX_DEPTH: usize = 128;

pub struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    pub fn parse_arguments(mut self) -> Result<Arguments> {
        let mut arguments = Arguments::new();

        self.skip_whitespace();
        while !self.at_end() {
            let (key, value) = self.parse_item()?;
            arguments.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(',') => {
                    self.bump();
                    self.skip_whitespace();
                }
                Some(found) => {
                    return Err(ArgsError::UnexpectedChar {
                        found,
                        offset: self.pos,
                    });
                }
            }
        }

        Ok(arguments)
    }

    fn parse_item(&mut self) -> Result<(String, Value)> {
        let key = self.parse_key()?;

        self.skip_whitespace();
        if self.peek() != Some('=') {
            return Err(ArgsError::MissingEquals {
                key,
                offset: self.pos,
            });
        }
        self.bump();
        self.skip_whitespace();

        let value = self.parse_value()?;
        Ok((key, value))
    }

    fn parse_key(&mut self) -> Result<String> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                self.bump();
            } else {
                break;
            }
        }

        let key = &self.src[start..self.pos];
        if key.is_empty() {
            return Err(match self.peek() {
                Some('=') => ArgsError::EmptyKey { offset: start },
                Some(found) => ArgsError::UnexpectedChar {
                    found,
                    offset: start,
                },
                None => ArgsError::UnexpectedEnd { offset: start },
            });
        }
        if !key.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
            return Err(ArgsError::InvalidKey {
                key: key.to_string(),
                offset: start,
            });
        }

        Ok(key.to_string())
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => self.parse_string(quote).map(Value::String),
            Some('[') => self.parse_list(),
            _ => Ok(self.parse_bare()),
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<String> {
        let start = self.pos;
        self.bump();

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ArgsError::UnterminatedString { offset: start });
            };
            self.bump();

            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }

            let Some(escaped) = self.peek() else {
                return Err(ArgsError::UnterminatedString { offset: start });
            };
            self.bump();
            match escaped {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '\\' | '"' | '\'' => out.push(escaped),
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn parse_list(&mut self) -> Result<Value> {
        let start = self.pos;
        if self.depth == MAX_DEPTH {
            return Err(ArgsError::TooDeep {
                limit: MAX_DEPTH,
                offset: start,
            });
        }
        self.depth += 1;
        let list = self.parse_list_items(start);
        self.depth -= 1;
        list
    }

    fn parse_list_items(&mut self, start: usize) -> Result<Value> {
        self.bump();

        let mut items = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(']') {
            self.bump();
            return Ok(Value::Array(items));
        }

        loop {
            self.skip_whitespace();
            items.push(self.parse_value()?);
            self.skip_whitespace();

            match self.peek() {
                Some(',') => self.bump(),
                Some(']') => {
                    self.bump();
                    return Ok(Value::Array(items));
                }
                None => return Err(ArgsError::UnterminatedList { offset: start }),
                Some(found) => {
                    return Err(ArgsError::UnexpectedChar {
                        found,
                        offset: self.pos,
                    });
                }
            }
        }
    }

    /// Reads an unquoted token and classifies it.
    fn parse_bare(&mut self) -> Value {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | ']') {
                break;
            }
            self.bump();
        }

        classify(self.src[start..self.pos].trim())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }
}

fn classify(token: &str) -> Value {
    match token {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }

    if let Ok(n) = token.parse::<i64>() {
        return Value::Number(n.into());
    }

    // f64::from_str also accepts "inf" and "NaN"; only take numeric-looking tokens.
    let numeric = token.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        && token
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    if numeric
        && let Some(n) = token.parse::<f64>().ok().and_then(Number::from_f64)
    {
        return Value::Number(n);
    }

    Value::String(token.to_string())
}
