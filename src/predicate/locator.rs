//! Typed locators into a message body.
//!
//! A locator is an ordered list of segment accessors parsed once at
//! subscription construction. Accepted syntax: dotted keys (`a.b.c`),
//! bracketed indices (`items[0]`) and quoted keys (`['a.b']`, `["x"]`).

use std::fmt;

use serde_json::Value;

/// One step of a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object member; also indexes arrays when the key is numeric.
    Key(String),
    /// Array element; also reads an object member named by the number.
    Index(usize),
}

/// Parsed path into a JSON value tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    segments: Vec<Segment>,
}

/// Malformed locator text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorError {
    pub path: String,
    pub reason: &'static str,
}

impl fmt::Display for LocatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid locator '{}': {}", self.path, self.reason)
    }
}

impl std::error::Error for LocatorError {}

impl Locator {
    /// Parse a locator from its textual form.
    pub fn parse(path: &str) -> Result<Self, LocatorError> {
        let err = |reason| LocatorError {
            path: path.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();
        let mut current = String::new();
        // Set after `]` so that `a[0].b` does not see an empty key before `.b`.
        let mut after_bracket = false;

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if current.is_empty() {
                        if !after_bracket {
                            return Err(err("empty key"));
                        }
                    } else {
                        segments.push(Segment::Key(std::mem::take(&mut current)));
                    }
                    after_bracket = false;
                    if chars.peek().is_none() {
                        return Err(err("trailing '.'"));
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut current)));
                    }
                    segments.push(parse_bracket(&mut chars).ok_or_else(|| err("unterminated or empty '['"))?);
                    after_bracket = true;
                }
                ']' => return Err(err("unexpected ']'")),
                _ => {
                    if after_bracket {
                        return Err(err("expected '.' or '[' after ']'"));
                    }
                    current.push(c);
                }
            }
        }

        if !current.is_empty() {
            segments.push(Segment::Key(current));
        }
        if segments.is_empty() {
            return Err(err("empty path"));
        }

        Ok(Self { segments })
    }

    /// The parsed segments, outermost first.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walk `root` along the segments.
    pub fn resolve<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(root, |node, segment| match (segment, node) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
            _ => None,
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if key.contains(&['.', '[', ']'][..]) => write!(f, "[{:?}]", key)?,
                Segment::Key(key) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", key)?;
                }
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

fn parse_bracket(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<Segment> {
    match chars.peek().copied() {
        Some(quote @ ('\'' | '"')) => {
            chars.next();
            let mut key = String::new();
            loop {
                match chars.next()? {
                    c if c == quote => break,
                    c => key.push(c),
                }
            }
            (chars.next()? == ']').then_some(Segment::Key(key))
        }
        _ => {
            let mut digits = String::new();
            loop {
                match chars.next()? {
                    ']' => break,
                    c => digits.push(c),
                }
            }
            digits.trim().parse().ok().map(Segment::Index)
        }
    }
}
