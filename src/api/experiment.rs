use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::meta::{apply_condition, Condition, ConditionStatus, IntOrString, ObjectMeta};
use super::trial::TrialSpec;
use crate::json::Quantity;
use crate::resource::ObjectReference;

/// A tunable input of the experiment
///
/// Numeric parameters are bounded by `min` and `max`, categorical parameters declare
/// their `values` instead.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub min: i32,
    #[serde(default)]
    pub max: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<IntOrString>,
}

impl Parameter {
    /// Create an integer parameter
    pub fn integer(name: impl Into<String>, min: i32, max: i32) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            ..Default::default()
        }
    }

    /// Create a categorical parameter
    pub fn categorical(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
            ..Default::default()
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<IntOrString>) -> Self {
        self.baseline = Some(baseline.into());
        self
    }

    pub fn is_categorical(&self) -> bool {
        !self.values.is_empty()
    }

    /// A parameter that can only take one value carries no information
    pub fn is_degenerate(&self) -> bool {
        self.min == self.max && self.values.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    #[default]
    Kubernetes,
    Prometheus,
    Datadog,
    Jsonpath,
}

/// An outcome measured at the end of every trial
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub minimize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
    #[serde(default, rename = "type")]
    pub type_: MetricType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderConstraint {
    pub lower_parameter: String,
    pub upper_parameter: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SumConstraintParameter {
    pub name: String,
    pub weight: Quantity,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SumConstraint {
    #[serde(default)]
    pub is_upper_bound: bool,
    pub bound: Quantity,
    #[serde(default)]
    pub parameters: Vec<SumConstraintParameter>,
}

/// A restriction on the combination of parameter values the optimizer may suggest
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sum: Option<SumConstraint>,
}

/// A free-form directive passed through to the optimizer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Optimization {
    pub name: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchType {
    #[default]
    Strategic,
    Merge,
    Json,
}

/// A patch with `{{ .Values.<name> }}` placeholders, rendered once per trial
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchTemplate {
    #[serde(default, rename = "type")]
    pub patch_type: PatchType,
    pub patch: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<ObjectReference>,
}

/// Template used to create the trials of an experiment
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrialTemplateSpec {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TrialSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSpec {
    /// Number of trials to run concurrently, `0` pauses the experiment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<Metric>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimization: Vec<Optimization>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<PatchTemplate>,
    #[serde(default)]
    pub trial_template: TrialTemplateSpec,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExperimentConditionType {
    Complete,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<ExperimentConditionType>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
}

/// The local record of one experiment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Experiment {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ExperimentSpec,
    #[serde(default)]
    pub status: ExperimentStatus,
}

impl Default for Experiment {
    fn default() -> Self {
        Self {
            api_version: super::API_VERSION.to_string(),
            kind: "Experiment".to_string(),
            metadata: ObjectMeta::default(),
            spec: ExperimentSpec::default(),
            status: ExperimentStatus::default(),
        }
    }
}

impl Experiment {
    pub fn new(name: impl Into<String>) -> Self {
        let mut exp = Self::default();
        exp.metadata.name = name.into();
        exp
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The effective number of concurrent trials, `1` when unset
    pub fn replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(1)
    }

    pub fn set_replicas(&mut self, replicas: i32) {
        self.spec.replicas = Some(replicas);
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.spec.parameters.iter().find(|p| p.name == name)
    }

    pub fn apply_condition(
        &mut self,
        type_: ExperimentConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        time: Option<DateTime<Utc>>,
    ) {
        apply_condition(&mut self.status.conditions, type_, status, reason, message, time);
    }

    pub fn is_failed(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.type_ == ExperimentConditionType::Failed && c.status == ConditionStatus::True)
    }
}
