use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

use crate::error::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid label selector '{selector}': {reason}")]
pub struct LabelSelectorError {
    selector: String,
    reason: &'static str,
}

impl From<LabelSelectorError> for Error {
    fn from(err: LabelSelectorError) -> Self {
        Error::configuration(err)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        use Requirement::*;
        match self {
            Equals(k, v) => labels.get(k) == Some(v),
            NotEquals(k, v) => labels.get(k) != Some(v),
            Exists(k) => labels.contains_key(k),
            DoesNotExist(k) => !labels.contains_key(k),
            In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
            NotIn(k, values) => labels.get(k).map_or(true, |v| !values.contains(v)),
        }
    }
}

impl Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Requirement::*;
        match self {
            Equals(k, v) => write!(f, "{k}={v}"),
            NotEquals(k, v) => write!(f, "{k}!={v}"),
            Exists(k) => write!(f, "{k}"),
            DoesNotExist(k) => write!(f, "!{k}"),
            In(k, values) => write!(f, "{k} in ({})", values.join(",")),
            NotIn(k, values) => write!(f, "{k} notin ({})", values.join(",")),
        }
    }
}

/// A label query using the cluster selector syntax
///
/// Supports equality (`a=b`, `a==b`, `a!=b`), existence (`a`, `!a`) and set based
/// (`a in (x,y)`, `a notin (x,y)`) requirements joined by commas. An empty selector
/// matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector(Vec<Requirement>);

/// Split on commas that are not inside a parenthesized value list
fn split_requirements(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn parse(s: &str) -> Result<Self, LabelSelectorError> {
        let invalid = |reason| LabelSelectorError {
            selector: s.to_string(),
            reason,
        };

        if s.trim().is_empty() {
            return Ok(Self::everything());
        }

        let mut requirements = Vec::new();
        for part in split_requirements(s) {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty requirement"));
            }

            let requirement = if let Some((key, rest)) = part.split_once(" notin ") {
                let values = parse_values(rest).ok_or_else(|| invalid("malformed value set"))?;
                Requirement::NotIn(key.trim().to_string(), values)
            } else if let Some((key, rest)) = part.split_once(" in ") {
                let values = parse_values(rest).ok_or_else(|| invalid("malformed value set"))?;
                Requirement::In(key.trim().to_string(), values)
            } else if let Some((key, value)) = part.split_once("!=") {
                Requirement::NotEquals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = part.split_once("==") {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some((key, value)) = part.split_once('=') {
                Requirement::Equals(key.trim().to_string(), value.trim().to_string())
            } else if let Some(key) = part.strip_prefix('!') {
                Requirement::DoesNotExist(key.trim().to_string())
            } else {
                Requirement::Exists(part.to_string())
            };

            let key = match &requirement {
                Requirement::Equals(k, _)
                | Requirement::NotEquals(k, _)
                | Requirement::Exists(k)
                | Requirement::DoesNotExist(k)
                | Requirement::In(k, _)
                | Requirement::NotIn(k, _) => k,
            };
            if key.is_empty() || key.contains(char::is_whitespace) {
                return Err(invalid("malformed label key"));
            }

            requirements.push(requirement);
        }

        Ok(Self(requirements))
    }

    /// Build an equality selector from a label map
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        Self(
            labels
                .iter()
                .map(|(k, v)| Requirement::Equals(k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|r| r.matches(labels))
    }
}

fn parse_values(s: &str) -> Option<Vec<String>> {
    let inner = s.trim().strip_prefix('(')?.strip_suffix(')')?;
    Some(
        inner
            .split(',')
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect(),
    )
}

impl Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for LabelSelector {
    type Err = LabelSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LabelSelector::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn it_matches_equality_requirements() {
        let selector = LabelSelector::parse("app=web,tier!=db").unwrap();
        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "frontend")])));
        assert!(selector.matches(&labels(&[("app", "web")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("tier", "db")])));
        assert!(!selector.matches(&labels(&[])));
    }

    #[test]
    fn it_matches_existence_and_set_requirements() {
        let selector = LabelSelector::parse("app, !canary, env in (prod, staging)").unwrap();
        assert!(selector.matches(&labels(&[("app", "x"), ("env", "prod")])));
        assert!(!selector.matches(&labels(&[("app", "x"), ("env", "dev")])));
        assert!(!selector.matches(&labels(&[("app", "x"), ("env", "prod"), ("canary", "1")])));

        let selector = LabelSelector::parse("env notin (dev)").unwrap();
        assert!(selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("env", "dev")])));
    }

    #[test]
    fn it_matches_everything_when_empty() {
        let selector = LabelSelector::parse("  ").unwrap();
        assert!(selector.is_empty());
        assert!(selector.matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn it_rejects_malformed_selectors() {
        assert!(LabelSelector::parse("a=b,,c").is_err());
        assert!(LabelSelector::parse("=b").is_err());
        assert!(LabelSelector::parse("env in prod").is_err());
    }

    #[test]
    fn it_builds_selectors_from_label_maps() {
        let selector = LabelSelector::from_labels(&labels(&[("app", "web"), ("tier", "api")]));
        assert_eq!(selector.to_string(), "app=web,tier=api");
    }
}
