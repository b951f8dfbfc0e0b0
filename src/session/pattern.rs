// Copyright (C) 2022 Nitrokey GmbH
// SPDX-License-Identifier: LGPL-3.0-only

use core::fmt;

use regex::Regex;

/// Something to wait for in the output of a session.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Literal text.
    Exact(String),
    /// Regular expression, matched against the unread output.
    Regex(Regex),
}

/// Location of a pattern in a haystack.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Found {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<String>>,
}

impl Pattern {
    /// Compiles `pattern` as a regular expression.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    pub(crate) fn find(&self, haystack: &str) -> Option<Found> {
        match self {
            Self::Exact(text) => haystack.find(text.as_str()).map(|start| Found {
                start,
                end: start + text.len(),
                captures: Vec::new(),
            }),
            Self::Regex(regex) => {
                let captures = regex.captures(haystack)?;
                let whole = captures.get(0)?;
                Some(Found {
                    start: whole.start(),
                    end: whole.end(),
                    captures: captures
                        .iter()
                        .skip(1)
                        .map(|group| group.map(|group| group.as_str().to_owned()))
                        .collect(),
                })
            }
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(text) => write!(f, "{text:?}"),
            Self::Regex(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Self::Exact(text.to_owned())
    }
}

impl From<String> for Pattern {
    fn from(text: String) -> Self {
        Self::Exact(text)
    }
}

impl From<&String> for Pattern {
    fn from(text: &String) -> Self {
        Self::Exact(text.clone())
    }
}

impl From<Regex> for Pattern {
    fn from(regex: Regex) -> Self {
        Self::Regex(regex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_regex() {
        let found = Pattern::from("PIN").find("Password: PIN for alice:").unwrap();
        assert_eq!((found.start, found.end), (10, 13));

        let pattern = Pattern::regex(r"PIN for (\w+):").unwrap();
        let found = pattern.find("Password: PIN for alice:").unwrap();
        assert_eq!(found.start, 10);
        assert_eq!(found.captures, vec![Some("alice".to_owned())]);
        assert_eq!(pattern.to_string(), r"/PIN for (\w+):/");

        assert!(Pattern::from("PIN").find("Password:").is_none());
    }
}
