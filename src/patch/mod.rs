//! Rendering and applying patch templates

use anyhow::anyhow;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::api::{Experiment, IntOrString, PatchOperation, PatchTemplate, PatchType, Trial};
use crate::error::{Error, Result};
use crate::json::strategic_merge;
use crate::resource::{ObjectReference, ResourceSet};
use crate::template::{self, Bindings};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no resource matches patch target {0}")]
    MissingTarget(ObjectReference),

    #[error("json patch for {0} must be a list of operations")]
    NotAPatch(ObjectReference),

    #[error("failed to apply json patch to {target}: {source}")]
    Json {
        target: ObjectReference,
        source: json_patch::PatchError,
    },
}

impl From<MergeError> for Error {
    fn from(err: MergeError) -> Self {
        match err {
            MergeError::MissingTarget(_) => Error::configuration(err),
            _ => Error::data_shape(err),
        }
    }
}

/// Reference to the (possibly not yet created) job of a trial
pub fn trial_job_reference(trial: &Trial) -> ObjectReference {
    let name = trial
        .spec
        .job_template
        .as_ref()
        .map(|t| t.metadata.name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(&trial.metadata.name);
    ObjectReference::new("batch/v1", "Job", trial.metadata.namespace.clone(), name)
}

/// Render one patch template using the given values
///
/// Templates without a target reference patch the trial job.
pub fn render(template: &PatchTemplate, bindings: &Bindings, trial: &Trial) -> Result<PatchOperation> {
    let data = template::render(&template.patch, bindings)?;
    let target_ref = match &template.target_ref {
        Some(target) => target.clone(),
        None => trial_job_reference(trial),
    };

    Ok(PatchOperation {
        target_ref,
        patch_type: template.patch_type,
        data,
    })
}

/// Values bound to the parameters of the experiment for a trial
///
/// Parameters with a single possible value are never sent to the optimizer, they are
/// bound to that value unless the trial assigns them explicitly. Every other parameter
/// must be assigned by the trial.
pub fn trial_bindings(exp: &Experiment, trial: &Trial) -> Result<Bindings> {
    let mut bindings: Bindings = trial
        .spec
        .assignments
        .iter()
        .map(|a| (a.name.clone(), a.value.clone()))
        .collect();

    for p in exp.spec.parameters.iter() {
        if bindings.contains_key(&p.name) {
            continue;
        }
        if !p.is_degenerate() {
            return Err(Error::data_shape(anyhow!(
                "trial '{}' has no assignment for parameter '{}'",
                trial.metadata.name,
                p.name
            )));
        }
        bindings.insert(p.name.clone(), IntOrString::Int(p.min));
    }

    Ok(bindings)
}

/// Render every patch template of the experiment for a trial
#[instrument(skip_all, fields(experiment = %exp.metadata.name, trial = %trial.metadata.name), err)]
pub fn render_trial_patches(exp: &Experiment, trial: &Trial) -> Result<Vec<PatchOperation>> {
    let bindings = trial_bindings(exp, trial)?;
    let ops = exp
        .spec
        .patches
        .iter()
        .map(|t| render(t, &bindings, trial))
        .collect::<Result<Vec<_>>>()?;
    debug!(patches = ops.len(), "rendered trial patches");
    Ok(ops)
}

impl PatchOperation {
    /// Convert the patch into a full object fragment identified by the target reference
    pub fn to_object(&self) -> Result<Value> {
        let Value::Object(data) = &self.data else {
            return Err(Error::configuration(anyhow!(
                "{:?} patch for {} cannot be converted to an object",
                self.patch_type,
                self.target_ref
            )));
        };

        let target = &self.target_ref;
        let mut obj = Map::new();
        obj.insert("apiVersion".to_string(), Value::from(target.api_version.clone()));
        obj.insert("kind".to_string(), Value::from(target.kind.clone()));

        let mut metadata = match data.get("metadata") {
            Some(Value::Object(m)) => m.clone(),
            _ => Map::new(),
        };
        metadata.insert("name".to_string(), Value::from(target.name.clone()));
        if !target.namespace.is_empty() {
            metadata.insert("namespace".to_string(), Value::from(target.namespace.clone()));
        }
        obj.insert("metadata".to_string(), Value::Object(metadata));

        for (k, v) in data {
            if !matches!(k.as_str(), "apiVersion" | "kind" | "metadata") {
                obj.insert(k.clone(), v.clone());
            }
        }
        Ok(Value::Object(obj))
    }

    /// Apply the patch to a resource tree
    pub fn apply_to(&self, doc: &mut Value) -> Result<()> {
        match self.patch_type {
            PatchType::Strategic => strategic_merge(doc, &self.data),
            PatchType::Merge => json_patch::merge(doc, &self.data),
            PatchType::Json => {
                let patch: json_patch::Patch = serde_json::from_value(self.data.clone())
                    .map_err(|_| MergeError::NotAPatch(self.target_ref.clone()))?;
                json_patch::patch(doc, &patch.0).map_err(|source| MergeError::Json {
                    target: self.target_ref.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}

/// Apply rendered patches to the matching resources of the set
pub fn apply_patches(resources: &mut ResourceSet, ops: &[PatchOperation]) -> Result<()> {
    for op in ops {
        let resource = resources
            .find_mut(&op.target_ref)
            .ok_or_else(|| MergeError::MissingTarget(op.target_ref.clone()))?;
        op.apply_to(resource.tree_mut())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Assignment, Parameter};
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn web() -> ObjectReference {
        ObjectReference::new("apps/v1", "Deployment", "prod", "web")
    }

    fn experiment() -> Experiment {
        let mut exp = Experiment::new("web");
        exp.spec.parameters = vec![
            Parameter::integer("replicas", 1, 5),
            Parameter::integer("cpu", 100, 4000),
            Parameter::integer("pinned", 2, 2),
        ];
        exp.spec.patches = vec![
            PatchTemplate {
                patch_type: PatchType::Strategic,
                patch: json!({"spec": {
                    "replicas": "{{ .Values.replicas }}",
                    "template": {"spec": {"containers": [
                        {"name": "app", "resources": {"limits": {"cpu": "{{ .Values.cpu }}m"}}}
                    ]}}
                }}),
                target_ref: Some(web()),
            },
            PatchTemplate {
                patch_type: PatchType::Strategic,
                patch: json!({"spec": {"parallelism": "{{ .Values.pinned }}"}}),
                target_ref: None,
            },
        ];
        exp
    }

    fn trial(assignments: &[(&str, IntOrString)]) -> Trial {
        let mut trial = Trial::from_experiment(&experiment());
        trial.metadata.name = "web-001".to_string();
        trial.metadata.namespace = "prod".to_string();
        trial.spec.assignments = assignments
            .iter()
            .map(|(name, value)| Assignment {
                name: name.to_string(),
                value: value.clone(),
            })
            .collect();
        trial
    }

    #[test]
    fn it_renders_trial_patches() {
        let trial = trial(&[("replicas", 3.into()), ("cpu", 250.into())]);
        let ops = render_trial_patches(&experiment(), &trial).unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].target_ref, web());
        assert_eq!(ops[0].data["spec"]["replicas"], json!(3));
        assert_eq!(
            ops[0].data["spec"]["template"]["spec"]["containers"][0]["resources"]["limits"]["cpu"],
            json!("250m")
        );

        assert_eq!(
            ops[1].target_ref,
            ObjectReference::new("batch/v1", "Job", "prod", "web-001")
        );
        assert_eq!(ops[1].data, json!({"spec": {"parallelism": 2}}));
    }

    #[test]
    fn it_rejects_incomplete_assignments() {
        let trial = trial(&[("replicas", 3.into())]);
        let err = render_trial_patches(&experiment(), &trial).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);
        assert!(err.to_string().contains("'cpu'"));
    }

    #[test]
    fn it_converts_patches_to_objects() {
        let op = PatchOperation {
            target_ref: web(),
            patch_type: PatchType::Strategic,
            data: json!({"metadata": {"labels": {"a": "b"}}, "spec": {"replicas": 2}}),
        };
        assert_eq!(
            op.to_object().unwrap(),
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"labels": {"a": "b"}, "name": "web", "namespace": "prod"},
                "spec": {"replicas": 2}
            })
        );

        let op = PatchOperation {
            target_ref: web(),
            patch_type: PatchType::Json,
            data: json!([{"op": "remove", "path": "/spec/replicas"}]),
        };
        assert_eq!(op.to_object().unwrap_err().kind(), ErrorKind::Configuration);
    }

    #[test]
    fn it_applies_each_patch_type() {
        let mut resources = ResourceSet::from_trees(vec![json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "prod"},
            "spec": {"replicas": 1, "paused": true, "template": {"spec": {"containers": [
                {"name": "app", "image": "web:1"}
            ]}}}
        })])
        .unwrap();

        let ops = vec![
            PatchOperation {
                target_ref: web(),
                patch_type: PatchType::Strategic,
                data: json!({"spec": {"template": {"spec": {"containers": [
                    {"name": "app", "resources": {"limits": {"cpu": "250m"}}}
                ]}}}}),
            },
            PatchOperation {
                target_ref: web(),
                patch_type: PatchType::Merge,
                data: json!({"spec": {"paused": null}}),
            },
            PatchOperation {
                target_ref: web(),
                patch_type: PatchType::Json,
                data: json!([{"op": "replace", "path": "/spec/replicas", "value": 4}]),
            },
        ];
        apply_patches(&mut resources, &ops).unwrap();

        let tree = resources.find(&web()).unwrap().tree();
        assert_eq!(
            tree["spec"],
            json!({"replicas": 4, "template": {"spec": {"containers": [
                {"name": "app", "image": "web:1", "resources": {"limits": {"cpu": "250m"}}}
            ]}}})
        );
    }

    #[test]
    fn it_fails_on_unknown_targets() {
        let mut resources = ResourceSet::new();
        let ops = vec![PatchOperation {
            target_ref: web(),
            patch_type: PatchType::Merge,
            data: json!({}),
        }];
        let err = apply_patches(&mut resources, &ops).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
