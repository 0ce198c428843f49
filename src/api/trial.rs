use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::experiment::{Experiment, PatchType};
use super::meta::{apply_condition, Condition, ConditionStatus, Duration, IntOrString, ObjectMeta};
use super::{API_VERSION, LABEL_EXPERIMENT};
use crate::job::JobTemplateSpec;
use crate::resource::ObjectReference;

/// A parameter value assigned to one trial
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: IntOrString,
}

/// A metric value collected at the end of a trial
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrialValue {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// A rendered patch waiting to be applied to a resource
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchOperation {
    pub target_ref: ObjectReference,
    pub patch_type: PatchType,
    pub data: Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrialSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_ref: Option<ObjectReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignments: Vec<Assignment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<TrialValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_template: Option<JobTemplateSpec>,
    /// Expected duration of the trial run, used to size the default run container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_runtime: Option<Duration>,
    /// Time to wait after the run starts before measuring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_offset: Option<Duration>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrialConditionType {
    Complete,
    Failed,
    Patched,
    Ready,
    Observed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrialStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    /// Human readable summary of the assignments
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignments: String,
    /// Human readable summary of the collected values
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition<TrialConditionType>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patch_operations: Vec<PatchOperation>,
}

/// The local record of one trial
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: TrialSpec,
    #[serde(default)]
    pub status: TrialStatus,
}

impl Default for Trial {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: "Trial".to_string(),
            metadata: ObjectMeta::default(),
            spec: TrialSpec::default(),
            status: TrialStatus::default(),
        }
    }
}

impl Trial {
    /// Create a new trial from the experiment trial template
    pub fn from_experiment(exp: &Experiment) -> Self {
        let template = &exp.spec.trial_template;
        let mut trial = Trial {
            metadata: template.metadata.clone(),
            spec: template.spec.clone(),
            ..Default::default()
        };

        trial
            .metadata
            .labels
            .insert(LABEL_EXPERIMENT.to_string(), exp.metadata.name.clone());
        if trial.metadata.generate_name.is_empty() {
            trial.metadata.generate_name = format!("{}-", exp.metadata.name);
        }
        if trial.metadata.namespace.is_empty() {
            trial.metadata.namespace = exp.metadata.namespace.clone();
        }
        if trial.spec.experiment_ref.is_none() {
            trial.spec.experiment_ref = Some(ObjectReference::new(
                exp.api_version.clone(),
                exp.kind.clone(),
                exp.metadata.namespace.clone(),
                exp.metadata.name.clone(),
            ));
        }

        trial
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Name of the experiment owning the trial
    pub fn experiment_name(&self) -> &str {
        match &self.spec.experiment_ref {
            Some(r) if !r.name.is_empty() => &r.name,
            _ => self
                .metadata
                .labels
                .get(LABEL_EXPERIMENT)
                .map(String::as_str)
                .unwrap_or_default(),
        }
    }

    pub fn assignment(&self, name: &str) -> Option<&IntOrString> {
        self.spec
            .assignments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    pub fn has_condition(&self, type_: TrialConditionType) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.type_ == type_ && c.status == ConditionStatus::True)
    }

    pub fn failure(&self) -> Option<&Condition<TrialConditionType>> {
        self.status
            .conditions
            .iter()
            .find(|c| c.type_ == TrialConditionType::Failed && c.status == ConditionStatus::True)
    }

    pub fn apply_condition(
        &mut self,
        type_: TrialConditionType,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        time: Option<DateTime<Utc>>,
    ) {
        apply_condition(&mut self.status.conditions, type_, status, reason, message, time);
    }

    /// Refresh the human readable summary fields of the status
    pub fn update_status(&mut self) {
        self.status.assignments = self
            .spec
            .assignments
            .iter()
            .map(|a| format!("{}={}", a.name, a.value))
            .collect::<Vec<_>>()
            .join(", ");

        self.status.values = self
            .spec
            .values
            .iter()
            .map(|v| format!("{}={}", v.name, v.value))
            .collect::<Vec<_>>()
            .join(", ");

        self.status.phase = if self.has_condition(TrialConditionType::Failed) {
            "Failed"
        } else if self.has_condition(TrialConditionType::Complete) {
            "Completed"
        } else if self.has_condition(TrialConditionType::Ready) {
            "Running"
        } else if self.has_condition(TrialConditionType::Patched) {
            "Patched"
        } else {
            "Created"
        }
        .to_string();
    }
}

/// Check if the reference points to the (possibly not yet created) job of the trial
pub fn is_trial_job_reference(trial: &Trial, target: &ObjectReference) -> bool {
    if target.kind != "Job" {
        return false;
    }

    // older references may omit the version or the namespace
    if !target.api_version.is_empty() && target.api_version != "batch/v1" {
        return false;
    }
    if !target.namespace.is_empty() && target.namespace != trial.metadata.namespace {
        return false;
    }

    match &trial.spec.job_template {
        Some(template) if !template.metadata.name.is_empty() => template.metadata.name == target.name,
        _ => !target.name.is_empty() && target.name == trial.metadata.name,
    }
}
