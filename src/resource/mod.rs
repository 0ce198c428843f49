//! Cluster resources and references to them

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display};

use crate::error::{Error, Result};

mod labels;

pub use labels::*;

/// Identifies one resource in the cluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ObjectReference {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// The API group, empty for the core group
    pub fn group(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(group, _)| group)
            .unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version
            .rsplit_once('/')
            .map(|(_, version)| version)
            .unwrap_or(&self.api_version)
    }
}

impl Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if !self.group().is_empty() {
            write!(f, ".{}", self.group())?;
        }
        if !self.namespace.is_empty() {
            write!(f, " {}/{}", self.namespace, self.name)
        } else {
            write!(f, " {}", self.name)
        }
    }
}

/// One structured document of the resource set
#[derive(Clone, Debug, PartialEq)]
pub struct Resource {
    target: ObjectReference,
    tree: Value,
}

impl Resource {
    /// Wrap a resource tree, reading its identity from `apiVersion`, `kind` and `metadata`
    pub fn new(tree: Value) -> Result<Self> {
        let field = |ptr: &str| {
            tree.pointer(ptr)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let target = ObjectReference {
            api_version: field("/apiVersion"),
            kind: field("/kind"),
            namespace: field("/metadata/namespace"),
            name: field("/metadata/name"),
        };

        if target.kind.is_empty() || target.name.is_empty() {
            return Err(Error::data_shape(anyhow!(
                "resource is missing a kind or a name: {tree}"
            )));
        }

        Ok(Self { target, tree })
    }

    pub fn target_ref(&self) -> &ObjectReference {
        &self.target
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        self.tree
            .pointer("/metadata/labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Value {
        &mut self.tree
    }

    pub fn into_tree(self) -> Value {
        self.tree
    }
}

impl TryFrom<Value> for Resource {
    type Error = Error;

    fn try_from(tree: Value) -> Result<Self> {
        Resource::new(tree)
    }
}

/// An ordered collection of resources
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceSet(Vec<Resource>);

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from raw resource trees, expanding `List` documents into their items
    pub fn from_trees(trees: impl IntoIterator<Item = Value>) -> Result<Self> {
        let mut resources = Vec::new();
        for tree in trees {
            if tree.get("kind").and_then(Value::as_str) == Some("List") {
                if let Some(Value::Array(items)) = tree.get("items") {
                    for item in items {
                        resources.push(Resource::new(item.clone())?);
                    }
                }
                continue;
            }
            resources.push(Resource::new(tree)?);
        }
        Ok(Self(resources))
    }

    pub fn push(&mut self, resource: Resource) {
        self.0.push(resource);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Find the resource a reference points to
    ///
    /// Empty fields on the reference act as wildcards, so a reference without a
    /// namespace matches a resource in any namespace.
    pub fn find_mut(&mut self, target: &ObjectReference) -> Option<&mut Resource> {
        self.0.iter_mut().find(|r| references(target, &r.target))
    }

    pub fn find(&self, target: &ObjectReference) -> Option<&Resource> {
        self.0.iter().find(|r| references(target, &r.target))
    }
}

fn references(reference: &ObjectReference, target: &ObjectReference) -> bool {
    let matches = |r: &str, t: &str| r.is_empty() || r == t;
    reference.name == target.name
        && matches(&reference.kind, &target.kind)
        && matches(&reference.api_version, &target.api_version)
        && matches(&reference.namespace, &target.namespace)
}

impl FromIterator<Resource> for ResourceSet {
    fn from_iter<T: IntoIterator<Item = Resource>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ResourceSet {
    type Item = Resource;
    type IntoIter = std::vec::IntoIter<Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
