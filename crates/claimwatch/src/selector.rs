//! Equality-based label and field selectors.
//!
//! A selector is a comma-separated list of requirements, all of which must
//! hold: `key=value` (or `key==value`), `key!=value`, `key` (present) and
//! `!key` (absent). A `!=` requirement also matches when the key is absent.

use core::fmt;
use std::collections::BTreeMap;

use crate::error::{WatchError, WatchResult};

/// Claim fields a field selector may reference.
pub const SELECTABLE_FIELDS: &[&str] = &[
    "metadata.name",
    "metadata.namespace",
    "spec.volumeName",
    "status.phase",
];

/// One term of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// `key=value`
    Equals(String, String),
    /// `key!=value`
    NotEquals(String, String),
    /// `key`
    Exists(String),
    /// `!key`
    NotExists(String),
}

impl Requirement {
    fn key(&self) -> &str {
        match self {
            Requirement::Equals(key, _)
            | Requirement::NotEquals(key, _)
            | Requirement::Exists(key)
            | Requirement::NotExists(key) => key,
        }
    }

    fn matches(&self, values: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => values.get(key) == Some(value),
            Requirement::NotEquals(key, value) => values.get(key) != Some(value),
            Requirement::Exists(key) => values.contains_key(key),
            Requirement::NotExists(key) => !values.contains_key(key),
        }
    }
}

/// A parsed selector. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    /// Parses a label selector such as `app=db,tier!=cache`.
    pub fn parse(text: &str) -> WatchResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Self::default());
        }
        let requirements = text
            .split(',')
            .map(|term| parse_requirement(text, term.trim()))
            .collect::<WatchResult<Vec<_>>>()?;
        Ok(Self { requirements })
    }

    /// Parses a field selector, restricted to [`SELECTABLE_FIELDS`] and to
    /// equality terms.
    pub fn parse_fields(text: &str) -> WatchResult<Self> {
        let selector = Self::parse(text)?;
        for req in &selector.requirements {
            if !SELECTABLE_FIELDS.contains(&req.key()) {
                return Err(invalid(text, &format!("unsupported field {:?}", req.key())));
            }
            if matches!(req, Requirement::Exists(_) | Requirement::NotExists(_)) {
                return Err(invalid(text, "field selectors only support = and !="));
            }
        }
        Ok(selector)
    }

    /// True when the selector has no requirements.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The parsed requirements.
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    /// True when every requirement holds for `values`.
    pub fn matches(&self, values: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|req| req.matches(values))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, req) in self.requirements.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match req {
                Requirement::Equals(key, value) => write!(f, "{}={}", key, value)?,
                Requirement::NotEquals(key, value) => write!(f, "{}!={}", key, value)?,
                Requirement::Exists(key) => write!(f, "{}", key)?,
                Requirement::NotExists(key) => write!(f, "!{}", key)?,
            }
        }
        Ok(())
    }
}

fn parse_requirement(text: &str, term: &str) -> WatchResult<Requirement> {
    if term.is_empty() {
        return Err(invalid(text, "empty term"));
    }

    let req = if let Some((key, value)) = term.split_once("!=") {
        Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
    } else if let Some((key, value)) = term.split_once("==") {
        Requirement::Equals(key.trim().to_string(), value.trim().to_string())
    } else if let Some((key, value)) = term.split_once('=') {
        Requirement::Equals(key.trim().to_string(), value.trim().to_string())
    } else if let Some(key) = term.strip_prefix('!') {
        Requirement::NotExists(key.trim().to_string())
    } else {
        Requirement::Exists(term.to_string())
    };

    validate_token(text, req.key(), "key")?;
    if let Requirement::Equals(_, value) | Requirement::NotEquals(_, value) = &req {
        if value.contains(&['=', '!', ','][..]) || value.contains(char::is_whitespace) {
            return Err(invalid(text, &format!("invalid value {:?}", value)));
        }
    }
    Ok(req)
}

fn validate_token(text: &str, token: &str, what: &str) -> WatchResult<()> {
    if token.is_empty() {
        return Err(invalid(text, &format!("empty {}", what)));
    }
    if token.contains(&['=', '!', ','][..]) || token.contains(char::is_whitespace) {
        return Err(invalid(text, &format!("invalid {} {:?}", what, token)));
    }
    Ok(())
}

fn invalid(text: &str, reason: &str) -> WatchError {
    WatchError::Config(format!("invalid selector {:?}: {}", text, reason))
}
