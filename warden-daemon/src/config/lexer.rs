//! Tokenizer for service description lines
//!
//! A description is a sequence of `setting = value` lines. This module turns raw
//! text into logical lines, splits each line into its setting name and value, and
//! reads value tokens with quoting, escaping and `$NAME` / `${NAME}` substitution.
//!
//! Substitution happens while the token is read, so an escaped `\$` or a `$$` is
//! never expanded and a substituted value is never split into further tokens.

use thiserror::Error;

use crate::env::EnvLookup;

/// Problems found while tokenizing a single line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("expected a setting name")]
    MissingSettingName,

    #[error("expected '=' or ':' after setting '{0}'")]
    MissingSeparator(String),

    #[error("unterminated quote")]
    UnterminatedQuote,

    #[error("backslash at end of line")]
    TrailingBackslash,

    #[error("malformed substitution: {0}")]
    MalformedSubstitution(String),
}

/// One logical line: physical lines joined where a line ends in an unescaped backslash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// 1-based number of the first physical line
    pub number: usize,
    pub text: String,
}

/// Split description text into logical lines.
pub fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut lines = Vec::new();
    let mut pending: Option<LogicalLine> = None;

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let trailing = raw.len() - raw.trim_end_matches('\\').len();
        let continues = trailing % 2 == 1;
        let content = if continues { &raw[..raw.len() - 1] } else { raw };

        let line = pending.get_or_insert_with(|| LogicalLine {
            number: idx + 1,
            text: String::new(),
        });
        line.text.push_str(content);

        if !continues && let Some(done) = pending.take() {
            lines.push(done);
        }
    }

    // Continuation on the very last line: keep what we have
    if let Some(done) = pending {
        lines.push(done);
    }

    lines
}

/// A `setting = value` directive, borrowing from the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Directive<'a> {
    pub setting: &'a str,
    /// Everything after the separator, still raw
    pub value: &'a str,
}

impl<'a> Directive<'a> {
    /// A cursor over this directive's value tokens
    pub fn values(&self) -> ValueCursor<'a> {
        ValueCursor::new(self.value)
    }
}

/// Classification of a logical line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line<'a> {
    /// Empty or comment
    Blank,
    /// `@include` and other meta-commands
    Meta(&'a str),
    Setting(Directive<'a>),
}

fn is_setting_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Classify a logical line and split settings into name and raw value.
pub fn split_line(line: &str) -> Result<Line<'_>, LexError> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(Line::Blank);
    }
    if let Some(meta) = trimmed.strip_prefix('@') {
        return Ok(Line::Meta(meta.trim_end()));
    }

    let name_end = trimmed
        .find(|c: char| !is_setting_char(c))
        .unwrap_or(trimmed.len());
    let setting = &trimmed[..name_end];
    if setting.is_empty() {
        return Err(LexError::MissingSettingName);
    }

    let rest = trimmed[name_end..].trim_start();
    let value = rest
        .strip_prefix('=')
        .or_else(|| rest.strip_prefix(':'))
        .ok_or_else(|| LexError::MissingSeparator(setting.to_string()))?;

    Ok(Line::Setting(Directive { setting, value }))
}

/// Cursor over the value portion of a directive.
///
/// Each call to [`ValueCursor::next_token`] consumes one whitespace-separated token
/// and returns it unquoted and substituted.
#[derive(Debug, Clone)]
pub struct ValueCursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> ValueCursor<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// The part of the value not consumed yet
    pub fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Read the next token, or `None` at end of value (or at a trailing comment).
    pub fn next_token(&mut self, env: &dyn EnvLookup) -> Result<Option<String>, LexError> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        match self.peek() {
            None => return Ok(None),
            Some('#') => {
                self.pos = self.input.len();
                return Ok(None);
            }
            Some(_) => {}
        }

        let mut token = String::new();
        let mut in_quotes = false;
        loop {
            let Some(c) = self.peek() else {
                if in_quotes {
                    return Err(LexError::UnterminatedQuote);
                }
                break;
            };
            if !in_quotes && c.is_whitespace() {
                break;
            }
            self.bump();
            match c {
                '"' => in_quotes = !in_quotes,
                '\\' => match self.bump() {
                    Some(escaped) => token.push(escaped),
                    None => return Err(LexError::TrailingBackslash),
                },
                '$' => self.substitute(&mut token, env)?,
                other => token.push(other),
            }
        }

        Ok(Some(token))
    }

    /// Read every remaining token.
    pub fn collect_tokens(&mut self, env: &dyn EnvLookup) -> Result<Vec<String>, LexError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token(env)? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Expand the substitution following a `$` that has just been consumed.
    fn substitute(&mut self, out: &mut String, env: &dyn EnvLookup) -> Result<(), LexError> {
        match self.peek() {
            Some('$') => {
                self.bump();
                out.push('$');
            }
            Some('{') => {
                self.bump();
                let start = self.pos;
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) if is_var_char(c) => {}
                        Some(c) => {
                            return Err(LexError::MalformedSubstitution(format!(
                                "invalid character '{}' in variable name",
                                c
                            )));
                        }
                        None => {
                            return Err(LexError::MalformedSubstitution(
                                "missing closing '}'".to_string(),
                            ));
                        }
                    }
                }
                let name = &self.input[start..self.pos - 1];
                if name.is_empty() {
                    return Err(LexError::MalformedSubstitution(
                        "empty variable name".to_string(),
                    ));
                }
                out.push_str(&env.lookup(name).unwrap_or_default());
            }
            Some(c) if is_var_char(c) => {
                let start = self.pos;
                while self.peek().is_some_and(is_var_char) {
                    self.bump();
                }
                let name = &self.input[start..self.pos];
                out.push_str(&env.lookup(name).unwrap_or_default());
            }
            _ => {
                return Err(LexError::MalformedSubstitution(
                    "'$' must be followed by a variable name, '{' or '$'".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
