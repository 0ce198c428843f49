use anyhow::anyhow;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::{LabelSelector, Resource};

/// Criteria shared by every selector
///
/// `group` and `kind` are regular expressions that must match the whole API group and
/// kind of the resource (e.g. `apps|extensions`). Empty criteria match everything.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenericSelector {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,
}

impl GenericSelector {
    pub(crate) fn default_kind(&mut self, group: &str, kind: &str) {
        if self.kind.is_empty() {
            self.group = group.to_string();
            self.kind = kind.to_string();
        }
    }

    /// Compile the criteria
    pub fn matcher(&self) -> Result<Matcher> {
        Ok(Matcher {
            group: anchored(&self.group)?,
            kind: anchored(&self.kind)?,
            labels: LabelSelector::parse(&self.label_selector)?,
        })
    }
}

fn anchored(pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    Regex::new(&format!("^(?:{pattern})$"))
        .map(Some)
        .map_err(|e| Error::configuration(anyhow!("invalid pattern '{pattern}': {e}")))
}

/// Compiled selector criteria
#[derive(Clone, Debug)]
pub struct Matcher {
    group: Option<Regex>,
    kind: Option<Regex>,
    labels: LabelSelector,
}

impl Matcher {
    pub fn matches(&self, resource: &Resource) -> bool {
        let target = resource.target_ref();
        self.group.as_ref().map_or(true, |re| re.is_match(target.group()))
            && self.kind.as_ref().map_or(true, |re| re.is_match(&target.kind))
            && (self.labels.is_empty() || self.labels.matches(&resource.labels()))
    }
}
