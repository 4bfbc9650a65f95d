//! Kubernetes label selector syntax
//!
//! Only used to validate a configured selector before it is handed to the API
//! server; the server does the actual matching.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::{Error, Result};

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

static QUALIFIED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

static SET_TERM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+(in|notin)\s*\((.*)\)$").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
    GreaterThan,
    LessThan,
}

/// A single `key <op> values` term
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.values.first().map(String::as_str).unwrap_or("");
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, value),
            Operator::DoubleEquals => write!(f, "{}=={}", self.key, value),
            Operator::NotEquals => write!(f, "{}!={}", self.key, value),
            Operator::GreaterThan => write!(f, "{}>{}", self.key, value),
            Operator::LessThan => write!(f, "{}<{}", self.key, value),
            Operator::Exists => f.write_str(&self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
            Operator::In => write!(f, "{} in ({})", self.key, self.values.join(",")),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, self.values.join(",")),
        }
    }
}

/// A parsed label selector. An empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(selector: &str) -> Result<Self> {
        let err = |reason: String| Error::LabelSelectorParse {
            selector: selector.to_string(),
            reason,
        };

        let trimmed = selector.trim();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }

        let mut requirements = Vec::new();
        for term in split_terms(trimmed).map_err(&err)? {
            requirements.push(parse_term(term.trim()).map_err(&err)?);
        }

        Ok(Self { requirements })
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&terms.join(","))
    }
}

/// Split on commas that are not inside a `( ... )` value set
fn split_terms(selector: &str) -> std::result::Result<Vec<&str>, String> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
            }
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    terms.push(&selector[start..]);

    if terms.iter().any(|t| t.trim().is_empty()) {
        return Err("empty requirement".to_string());
    }
    Ok(terms)
}

fn parse_term(term: &str) -> std::result::Result<Requirement, String> {
    if let Some(key) = term.strip_prefix('!') {
        let key = key.trim();
        validate_key(key)?;
        return Ok(Requirement {
            key: key.to_string(),
            operator: Operator::DoesNotExist,
            values: Vec::new(),
        });
    }

    if let Some(caps) = SET_TERM.captures(term) {
        let key = &caps[1];
        validate_key(key)?;
        let operator = if &caps[2] == "in" {
            Operator::In
        } else {
            Operator::NotIn
        };
        let values: Vec<String> = caps[3].split(',').map(|v| v.trim().to_string()).collect();
        if values.iter().all(String::is_empty) {
            return Err(format!("{} requires at least one value", &caps[2]));
        }
        for value in &values {
            validate_value(value)?;
        }
        return Ok(Requirement {
            key: key.to_string(),
            operator,
            values,
        });
    }

    // Longer operators first so "!=" and "==" are not read as "="
    let binary = [
        ("!=", Operator::NotEquals),
        ("==", Operator::DoubleEquals),
        ("=", Operator::Equals),
        (">", Operator::GreaterThan),
        ("<", Operator::LessThan),
    ];
    for (token, operator) in binary {
        if let Some((key, value)) = term.split_once(token) {
            let key = key.trim();
            let value = value.trim();
            validate_key(key)?;
            match operator {
                Operator::GreaterThan | Operator::LessThan => {
                    value
                        .parse::<i64>()
                        .map_err(|_| format!("{:?} is not an integer", value))?;
                }
                _ => validate_value(value)?,
            }
            return Ok(Requirement {
                key: key.to_string(),
                operator,
                values: vec![value.to_string()],
            });
        }
    }

    validate_key(term)?;
    Ok(Requirement {
        key: term.to_string(),
        operator: Operator::Exists,
        values: Vec::new(),
    })
}

fn validate_key(key: &str) -> std::result::Result<(), String> {
    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN || !DNS_SUBDOMAIN.is_match(prefix)
            {
                return Err(format!("invalid key prefix {:?}", prefix));
            }
            name
        }
        None => key,
    };
    if name.is_empty() || name.len() > MAX_NAME_LEN || !QUALIFIED_NAME.is_match(name) {
        return Err(format!("invalid label key {:?}", key));
    }
    Ok(())
}

fn validate_value(value: &str) -> std::result::Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    if value.len() > MAX_NAME_LEN || !QUALIFIED_NAME.is_match(value) {
        return Err(format!("invalid label value {:?}", value));
    }
    Ok(())
}
