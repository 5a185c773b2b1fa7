//! Cell visibility labels.
//!
//! A visibility is a boolean expression over authorization labels:
//!
//! ```text
//! expr  := term ( '&' term )* | term ( '|' term )*
//! term  := label | '"' quoted '"' | '(' expr ')'
//! label := [A-Za-z0-9_\-:./]+
//! ```
//!
//! `&` and `|` may not be mixed at one nesting level without parentheses.
//! The empty expression is visible to everyone. Evaluation happens inside the
//! store while it produces a scan, never on the client after transfer.

use crate::error::ModelError;
use std::collections::BTreeSet;
use std::fmt;

/// The set of labels a caller holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Authorizations {
    labels: BTreeSet<String>,
}

impl Authorizations {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a label set. A single empty string means "no labels"; any other
    /// empty entry is rejected.
    pub fn new<I, S>(labels: I) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: Vec<String> = labels.into_iter().map(|s| s.as_ref().to_string()).collect();
        if labels.len() == 1 && labels[0].is_empty() {
            return Ok(Self::empty());
        }
        let mut set = BTreeSet::new();
        for label in labels {
            if label.is_empty() {
                return Err(ModelError::InvalidAuthorization(
                    "authorization labels cannot be empty".into(),
                ));
            }
            if label.chars().any(char::is_control) {
                return Err(ModelError::InvalidAuthorization(format!(
                    "authorization label {label:?} contains control characters"
                )));
            }
            set.insert(label);
        }
        Ok(Self { labels: set })
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn is_subset(&self, granted: &Authorizations) -> bool {
        self.labels.is_subset(&granted.labels)
    }
}

impl fmt::Display for Authorizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{}", joined.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Label(String),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn evaluate(&self, auths: &Authorizations) -> bool {
        match self {
            Node::Label(label) => auths.contains(label),
            Node::And(children) => children.iter().all(|c| c.evaluate(auths)),
            Node::Or(children) => children.iter().any(|c| c.evaluate(auths)),
        }
    }
}

/// A parsed label expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnVisibility {
    expression: String,
    root: Option<Node>,
}

impl ColumnVisibility {
    pub fn parse(expression: &str) -> Result<Self, ModelError> {
        if expression.is_empty() {
            return Ok(Self {
                expression: String::new(),
                root: None,
            });
        }
        let mut parser = Parser {
            input: expression.as_bytes(),
            pos: 0,
            expression,
        };
        let root = parser.expr()?;
        if parser.pos != parser.input.len() {
            return Err(parser.error("unexpected ')'"));
        }
        Ok(Self {
            expression: expression.to_string(),
            root: Some(root),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn is_visible_to(&self, auths: &Authorizations) -> bool {
        match &self.root {
            None => true,
            Some(node) => node.evaluate(auths),
        }
    }
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self, message: &str) -> ModelError {
        ModelError::InvalidVisibility {
            expression: self.expression.to_string(),
            message: format!("{message} at offset {}", self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Node, ModelError> {
        let first = self.term()?;
        let op = match self.peek() {
            Some(op @ (b'&' | b'|')) => op,
            _ => return Ok(first),
        };
        let mut children = vec![first];
        while let Some(next) = self.peek() {
            match next {
                b'&' | b'|' if next == op => {
                    self.pos += 1;
                    children.push(self.term()?);
                }
                b'&' | b'|' => return Err(self.error("cannot mix '&' and '|' without parentheses")),
                _ => break,
            }
        }
        Ok(if op == b'&' {
            Node::And(children)
        } else {
            Node::Or(children)
        })
    }

    fn term(&mut self) -> Result<Node, ModelError> {
        match self.peek() {
            None => Err(self.error("expected a label")),
            Some(b'(') => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(b'"') => self.quoted(),
            Some(_) => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b':' | b'.' | b'/') {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                if start == self.pos {
                    return Err(self.error("expected a label"));
                }
                Ok(Node::Label(self.expression[start..self.pos].to_string()))
            }
        }
    }

    fn quoted(&mut self) -> Result<Node, ModelError> {
        self.pos += 1;
        let mut label = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quoted label")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            label.push(c);
                            self.pos += 1;
                        }
                        _ => return Err(self.error("invalid escape in quoted label")),
                    }
                }
                Some(c) => {
                    label.push(c);
                    self.pos += 1;
                }
            }
        }
        if label.is_empty() {
            return Err(self.error("empty quoted label"));
        }
        String::from_utf8(label)
            .map(Node::Label)
            .map_err(|_| self.error("quoted label is not valid utf-8"))
    }
}
