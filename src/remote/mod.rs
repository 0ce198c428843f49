//! Records exchanged with the remote optimization service
//!
//! These types only describe the wire format. Talking to the service is left to an
//! implementation of [`ExperimentsApi`](crate::sync::ExperimentsApi).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use thiserror::Error;

use crate::error::Error;

/// Name of an experiment on the remote service
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ExperimentName(String);

impl ExperimentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ExperimentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Locations reported by the service alongside an experiment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExperimentMeta {
    pub self_url: String,
    pub next_trial_url: String,
    pub trials_url: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterType {
    #[serde(rename = "int")]
    Integer,
    #[serde(rename = "categorical")]
    Categorical,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Bounds {
    pub min: Number,
    pub max: Number,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Parameter {
    #[serde(rename = "type")]
    pub type_: ParameterType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderConstraint {
    pub lower_parameter: String,
    pub upper_parameter: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SumConstraintParameter {
    pub name: String,
    pub weight: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SumConstraint {
    #[serde(default)]
    pub is_upper_bound: bool,
    pub bound: f64,
    #[serde(default)]
    pub parameters: Vec<SumConstraintParameter>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "constraintType", rename_all = "lowercase")]
pub enum ConstraintKind {
    Order(OrderConstraint),
    Sum(SumConstraint),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Constraint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(flatten)]
    pub kind: ConstraintKind,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Metric {
    pub name: String,
    #[serde(default)]
    pub minimize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Optimization {
    pub name: String,
    pub value: String,
}

/// An experiment definition as known by the remote service
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Experiment {
    #[serde(skip)]
    pub meta: ExperimentMeta,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimization: Vec<Optimization>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
}

/// A value that is either numeric or a string on the wire
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum NumberOrString {
    Number(Number),
    String(String),
}

impl NumberOrString {
    pub fn from_i64(v: i64) -> Self {
        NumberOrString::Number(v.into())
    }

    pub fn is_string(&self) -> bool {
        matches!(self, NumberOrString::String(_))
    }

    /// The value as a 64-bit integer, truncating fractions and saturating out of
    /// range values, `0` if the value is not numeric
    pub fn int64_value(&self) -> i64 {
        let from_f64 = |f: f64| f as i64;
        match self {
            NumberOrString::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
                .or_else(|| n.as_f64().map(from_f64))
                .unwrap_or_default(),
            NumberOrString::String(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(from_f64))
                .unwrap_or_default(),
        }
    }
}

impl Display for NumberOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrString::Number(n) => write!(f, "{n}"),
            NumberOrString::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for NumberOrString {
    fn from(s: &str) -> Self {
        NumberOrString::String(s.to_string())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub parameter_name: String,
    pub value: NumberOrString,
}

/// Parameter values suggested by the service for one trial
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct TrialAssignments {
    /// Location to report the trial values to
    #[serde(skip)]
    pub self_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Value {
    pub metric_name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub error: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// The outcome of one trial
///
/// A failed trial carries the failure reason and message but no values.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrialValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// The experiment no longer accepts trials
    ExperimentStopped,
    ExperimentNotFound,
    /// There is no trial available right now, try again later
    TrialUnavailable,
    Unexpected,
}

/// An error reported by the remote service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::remote(err)
    }
}

/// Find the remote error behind a crate error, if any
pub fn remote_error(err: &Error) -> Option<&RemoteError> {
    err.source().and_then(|e| e.downcast_ref::<RemoteError>())
}
