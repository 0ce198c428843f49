//! Selectors finding tunable fields in resources

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

use crate::error::{Error, Result};
use crate::generate::{
    ContainerResourcesField, EnvVarField, ReplicaField, TunableField, MEBIBYTES, MEGABYTES,
};
use crate::json::{FieldPath, Quantity, Segment};
use crate::resource::Resource;

mod generic;

pub use generic::*;

const DEFAULT_GROUP: &str = "apps|extensions";
const DEFAULT_KIND: &str = "Deployment|StatefulSet";
const DEFAULT_REPLICAS_PATH: &str = "/spec/replicas";
const DEFAULT_CONTAINERS_PATH: &str = "/spec/template/spec/containers";

/// Finds tunable fields in the resources it matches
pub trait Selector: Debug + Send + Sync {
    /// Fill in the criteria not configured by the caller
    fn apply_defaults(&mut self);

    /// Matching criteria of the selector
    fn generic(&self) -> &GenericSelector;

    /// Find the tunable fields of a matching resource
    fn map(&self, resource: &Resource) -> Result<Vec<TunableField>>;
}

fn is_missing(value: Option<&Value>) -> bool {
    value.map_or(true, Value::is_null)
}

/// Selects integer replica counts
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSelector {
    #[serde(flatten)]
    pub generic: GenericSelector,
    /// Path to the replica count
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Tune the replica count even if the resource does not set it
    #[serde(default)]
    pub create: bool,
}

impl Selector for ReplicaSelector {
    fn apply_defaults(&mut self) {
        self.generic.default_kind(DEFAULT_GROUP, DEFAULT_KIND);
        if self.path.is_empty() {
            self.path = DEFAULT_REPLICAS_PATH.to_string();
        }
    }

    fn generic(&self) -> &GenericSelector {
        &self.generic
    }

    fn map(&self, resource: &Resource) -> Result<Vec<TunableField>> {
        let target = resource.target_ref();
        let mut fields = Vec::new();
        for (path, value) in FieldPath::parse(&self.path)?.expand(resource.tree())? {
            let value = match value {
                v if is_missing(v) => {
                    if !self.create {
                        debug!(resource = %target, %path, "skipping missing replica count");
                        continue;
                    }
                    None
                }
                Some(v) => {
                    let replicas = v.as_i64().and_then(|v| i32::try_from(v).ok()).ok_or_else(|| {
                        Error::data_shape(anyhow!("expected a replica count at {path} of {target}, found {v}"))
                    })?;
                    Some(replicas)
                }
                None => None,
            };

            fields.push(TunableField::Replicas(ReplicaField {
                target: target.clone(),
                path,
                value,
            }));
        }
        Ok(fields)
    }
}

/// Selects the cpu and memory of containers
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerResourcesSelector {
    #[serde(flatten)]
    pub generic: GenericSelector,
    /// Path to the list of containers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Tune containers that do not declare any resources
    #[serde(default)]
    pub create: bool,
}

fn read_quantity(value: &Value) -> Result<Quantity> {
    match value {
        Value::String(s) => Ok(Quantity::parse(s)?),
        Value::Number(n) => Ok(Quantity::parse(&n.to_string())?),
        other => Err(Error::data_shape(anyhow!("expected a quantity, found {other}"))),
    }
}

impl Selector for ContainerResourcesSelector {
    fn apply_defaults(&mut self) {
        self.generic.default_kind(DEFAULT_GROUP, DEFAULT_KIND);
        if self.path.is_empty() {
            self.path = DEFAULT_CONTAINERS_PATH.to_string();
        }
    }

    fn generic(&self) -> &GenericSelector {
        &self.generic
    }

    fn map(&self, resource: &Resource) -> Result<Vec<TunableField>> {
        let target = resource.target_ref();
        let containers = FieldPath::parse(&self.path)?.with(Segment::Wildcard);

        let mut fields = Vec::new();
        for (path, container) in containers.expand(resource.tree())? {
            let resources = container.and_then(|c| c.get("resources"));
            // limits take precedence over requests
            let current = |name: &str| -> Result<Option<Quantity>> {
                for section in ["limits", "requests"] {
                    if let Some(v) = resources.and_then(|r| r.get(section)).and_then(|s| s.get(name)) {
                        return read_quantity(v).map(Some);
                    }
                }
                Ok(None)
            };

            let cpu = current("cpu")?.map(|q| q.milli_value());
            // decimal units that are not whole mebibytes stay decimal
            let (memory, memory_unit) = match current("memory")? {
                Some(q) => match (q.exact_value(MEBIBYTES), q.exact_value(MEGABYTES)) {
                    (Some(v), _) => (Some(v), MEBIBYTES),
                    (None, Some(v)) => (Some(v), MEGABYTES),
                    (None, None) => (Some(q.mebi_value()), MEBIBYTES),
                },
                None => (None, MEBIBYTES),
            };
            let synthesized = cpu.is_none() && memory.is_none();
            if synthesized && !self.create {
                debug!(resource = %target, %path, "skipping container without resources");
                continue;
            }

            fields.push(TunableField::ContainerResources(ContainerResourcesField {
                target: target.clone(),
                path,
                cpu,
                memory,
                memory_unit,
                synthesized,
            }));
        }
        Ok(fields)
    }
}

/// Selects an environment variable of containers
///
/// The variable becomes a categorical parameter taking one of the configured values.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVarSelector {
    #[serde(flatten)]
    pub generic: GenericSelector,
    /// Path to the list of containers
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    /// Name of the variable
    pub name: String,
    /// Values the variable may take
    #[serde(default)]
    pub values: Vec<String>,
    /// Tune containers that do not declare the variable
    #[serde(default)]
    pub create: bool,
}

impl EnvVarSelector {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl Selector for EnvVarSelector {
    fn apply_defaults(&mut self) {
        self.generic.default_kind(DEFAULT_GROUP, DEFAULT_KIND);
        if self.path.is_empty() {
            self.path = DEFAULT_CONTAINERS_PATH.to_string();
        }
    }

    fn generic(&self) -> &GenericSelector {
        &self.generic
    }

    fn map(&self, resource: &Resource) -> Result<Vec<TunableField>> {
        if self.name.is_empty() {
            return Err(Error::configuration(anyhow!(
                "environment variable selector requires a variable name"
            )));
        }

        let target = resource.target_ref();
        if self.values.is_empty() {
            debug!(resource = %target, variable = %self.name, "no values configured, skipping");
            return Ok(vec![]);
        }

        let containers = FieldPath::parse(&self.path)?.with(Segment::Wildcard);
        let mut fields = Vec::new();
        for (path, container) in containers.expand(resource.tree())? {
            let entry = container
                .and_then(|c| c.get("env"))
                .and_then(Value::as_array)
                .and_then(|env| {
                    env.iter()
                        .find(|e| e.get("name").and_then(Value::as_str) == Some(&self.name))
                });

            let value = match entry {
                None if self.create => None,
                None => continue,
                Some(entry) => match entry.get("value") {
                    Some(Value::String(s)) => Some(s.clone()),
                    None if entry.get("valueFrom").is_some() => {
                        debug!(resource = %target, %path, variable = %self.name, "skipping variable set from a reference");
                        continue;
                    }
                    None | Some(Value::Null) => Some(String::new()),
                    Some(other) => {
                        return Err(Error::data_shape(anyhow!(
                            "expected a string value for variable {} at {path} of {target}, found {other}",
                            self.name
                        )))
                    }
                },
            };

            fields.push(TunableField::EnvVar(EnvVarField {
                target: target.clone(),
                path,
                name: self.name.clone(),
                value,
                values: self.values.clone(),
            }));
        }
        Ok(fields)
    }
}
