//! Label selectors: `{name="v", other=~"re.*"}`.
//!
//! Clauses are conjunctive. Braces are optional. Regexes are anchored at
//! both ends, and a label the stream does not carry reads as "".

use crate::labels::{is_valid_label_name, LabelSet};
use regex::Regex;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("selector must contain at least one matcher")]
    Empty,

    #[error("syntax error at byte {pos}: {message}")]
    Syntax { pos: usize, message: String },

    #[error("invalid regex for label '{label}': {source}")]
    InvalidRegex {
        label: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub enum Matcher {
    Eq(String),
    NotEq(String),
    Re(Regex),
    NotRe(Regex),
}

impl Matcher {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Eq(expected) => value == expected,
            Matcher::NotEq(expected) => value != expected,
            Matcher::Re(re) => re.is_match(value),
            Matcher::NotRe(re) => !re.is_match(value),
        }
    }

    fn operator(&self) -> &'static str {
        match self {
            Matcher::Eq(_) => "=",
            Matcher::NotEq(_) => "!=",
            Matcher::Re(_) => "=~",
            Matcher::NotRe(_) => "!~",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelMatcher {
    pub name: String,
    pub matcher: Matcher,
    /// Value as written, used for display
    raw: String,
}

impl LabelMatcher {
    pub fn new(name: &str, operator: &str, value: &str) -> Result<Self, SelectorError> {
        let matcher = match operator {
            "=" => Matcher::Eq(value.to_string()),
            "!=" => Matcher::NotEq(value.to_string()),
            "=~" => Matcher::Re(anchored(name, value)?),
            "!~" => Matcher::NotRe(anchored(name, value)?),
            other => {
                return Err(SelectorError::Syntax {
                    pos: 0,
                    message: format!("unknown operator '{}'", other),
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            matcher,
            raw: value.to_string(),
        })
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matcher.matches(labels.value_or_empty(&self.name))
    }
}

fn anchored(label: &str, pattern: &str) -> Result<Regex, SelectorError> {
    Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| SelectorError::InvalidRegex {
        label: label.to_string(),
        source,
    })
}

/// A compiled, conjunctive label selector.
#[derive(Debug, Clone)]
pub struct Selector {
    matchers: Vec<LabelMatcher>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        Parser::new(input).parse()
    }

    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.matchers.iter().all(|m| m.matches(labels))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{}{:?}", m.name, m.matcher.operator(), m.raw)?;
        }
        f.write_str("}")
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn parse(mut self) -> Result<Selector, SelectorError> {
        self.skip_ws();
        let braced = self.eat('{');

        let mut matchers = Vec::new();
        loop {
            self.skip_ws();
            if self.at_end() || self.peek() == Some('}') {
                break;
            }

            matchers.push(self.matcher()?);

            self.skip_ws();
            if !self.eat(',') {
                break;
            }
        }

        self.skip_ws();
        if braced && !self.eat('}') {
            return Err(self.error("expected '}'"));
        }
        self.skip_ws();
        if !self.at_end() {
            return Err(self.error("unexpected trailing input"));
        }

        if matchers.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Selector { matchers })
    }

    fn matcher(&mut self) -> Result<LabelMatcher, SelectorError> {
        let start = self.pos;
        let name = self.identifier()?;
        self.skip_ws();

        let operator = if self.rest().starts_with("=~") {
            "=~"
        } else if self.rest().starts_with("!~") {
            "!~"
        } else if self.rest().starts_with("!=") {
            "!="
        } else if self.rest().starts_with('=') {
            "="
        } else {
            return Err(self.error(&format!("expected operator after '{}'", name)));
        };
        self.pos += operator.len();
        self.skip_ws();

        let value = self.string()?;
        LabelMatcher::new(&name, operator, &value).map_err(|e| match e {
            SelectorError::Syntax { message, .. } => SelectorError::Syntax { pos: start, message },
            other => other,
        })
    }

    fn identifier(&mut self) -> Result<String, SelectorError> {
        let len = self
            .rest()
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(self.rest().len());
        let name = &self.rest()[..len];
        if !is_valid_label_name(name) {
            return Err(self.error("expected label name"));
        }
        self.pos += len;
        Ok(name.to_string())
    }

    /// Double-quoted with backslash escapes, or a raw backtick string.
    fn string(&mut self) -> Result<String, SelectorError> {
        if self.eat('`') {
            let len = self
                .rest()
                .find('`')
                .ok_or_else(|| self.error("unterminated raw string"))?;
            let value = self.rest()[..len].to_string();
            self.pos += len + 1;
            return Ok(value);
        }

        if !self.eat('"') {
            return Err(self.error("expected quoted value"));
        }

        let mut value = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(value);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, 't')) => value.push('\t'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    // Keep unknown escapes so regex classes like \d survive
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                other => value.push(other),
            }
        }

        Err(self.error("unterminated string"))
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> SelectorError {
        SelectorError::Syntax {
            pos: self.pos,
            message: message.to_string(),
        }
    }
}
