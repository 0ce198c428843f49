//! Generation of experiment parameters and patch templates from a resource set
//!
//! A [`Generator`] runs every registered [`Selector`] over every resource, names the
//! tunable fields it finds and turns them into parameters and one patch template per
//! target resource.
//!
//! ```rust
//! use serde_json::json;
//! use tunable::generate::Generator;
//! use tunable::resource::ResourceSet;
//! use tunable::selector::ReplicaSelector;
//!
//! let resources = ResourceSet::from_trees(vec![json!({
//!     "apiVersion": "apps/v1",
//!     "kind": "Deployment",
//!     "metadata": {"name": "web"},
//!     "spec": {"replicas": 2}
//! })])
//! .unwrap();
//!
//! let generated = Generator::new()
//!     .selector(ReplicaSelector::default())
//!     .generate(&resources)
//!     .unwrap();
//!
//! assert_eq!(generated.parameters[0].name, "replicas");
//! ```

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::api::{Application, Experiment, Metric, Parameter, ParameterHint, PatchTemplate, PatchType};
use crate::error::Result;
use crate::json::{strategic_merge, FieldPath};
use crate::resource::{LabelSelector, ObjectReference, ResourceSet};
use crate::selector::{ContainerResourcesSelector, GenericSelector, ReplicaSelector, Selector};

mod field;
mod namer;

pub use field::*;
pub use namer::*;

/// The result of one generation
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Generated {
    pub parameters: Vec<Parameter>,
    /// One strategic merge patch per target, in the order the targets were found
    pub patches: Vec<PatchTemplate>,
    pub metrics: Vec<Metric>,
}

impl Generated {
    /// Build the experiment definition
    pub fn experiment(self, name: impl Into<String>) -> Experiment {
        let mut exp = Experiment::new(name);
        exp.spec.parameters = self.parameters;
        exp.spec.patches = self.patches;
        exp.spec.metrics = self.metrics;
        exp
    }
}

#[derive(Debug, Default)]
pub struct Generator {
    selectors: Vec<Box<dyn Selector>>,
    metrics: Vec<Metric>,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selector, defaulting its criteria
    ///
    /// Selectors are evaluated in registration order.
    pub fn selector<S: Selector + 'static>(mut self, mut selector: S) -> Self {
        selector.apply_defaults();
        self.selectors.push(Box::new(selector));
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    /// Configure a generator for the application
    ///
    /// Container resources are always tuned and replicas only when the application
    /// hints at them. Every objective with a known measure becomes a metric.
    pub fn for_application(app: &Application) -> Self {
        let mut app = app.clone();
        app.apply_defaults();

        let hints = app.parameters.clone().unwrap_or_default();
        let generic = |hint: Option<&ParameterHint>| GenericSelector {
            label_selector: hint
                .map(|h| LabelSelector::from_labels(&h.labels).to_string())
                .unwrap_or_default(),
            ..Default::default()
        };

        let mut generator = Self::new().selector(ContainerResourcesSelector {
            generic: generic(hints.container_resources.as_ref()),
            ..Default::default()
        });
        if let Some(hint) = hints.replicas.as_ref() {
            generator = generator.selector(ReplicaSelector {
                generic: generic(Some(hint)),
                ..Default::default()
            });
        }

        for objective in app.objectives.iter() {
            match objective.metric() {
                Some(metric) => generator = generator.metric(metric),
                None => debug!(objective = %objective.name, "objective has no known measure"),
            }
        }
        generator
    }

    /// Find the tunable fields of the resources
    #[instrument(skip_all, fields(resources = resources.len()), err)]
    pub fn generate(&self, resources: &ResourceSet) -> Result<Generated> {
        let matchers = self
            .selectors
            .iter()
            .map(|s| s.generic().matcher().map(|m| (m, s)))
            .collect::<Result<Vec<_>>>()?;

        let mut fields = Vec::new();
        for resource in resources.iter() {
            for (matcher, selector) in matchers.iter() {
                if !matcher.matches(resource) {
                    continue;
                }
                for field in selector.map(resource)? {
                    if field.suffixes().is_empty() {
                        debug!(resource = %field.target(), path = %field.path(), "field is not tunable");
                        continue;
                    }
                    fields.push(field);
                }
            }
        }

        let named: Vec<(FieldPath, Vec<String>)> = fields
            .iter()
            .map(|field| (field.path(), field.suffixes()))
            .collect();
        let namer = Namer::new(PrefixTable::new(fields.iter().zip(named.iter()).flat_map(
            |(field, (path, suffixes))| {
                suffixes
                    .iter()
                    .map(move |s| (field.target(), path, s.as_str()))
            },
        )));

        let mut names = BTreeSet::new();
        let mut parameters = Vec::new();
        let mut patches: Vec<(ObjectReference, Value)> = Vec::new();
        for field in fields.iter() {
            for parameter in field.parameters(&namer)? {
                // several selectors may find the same field
                if names.insert(parameter.name.clone()) {
                    parameters.push(parameter);
                }
            }

            let fragment = field.patch(&namer)?;
            match patches.iter_mut().find(|(target, _)| target == field.target()) {
                Some((_, patch)) => strategic_merge(patch, &fragment),
                None => patches.push((field.target().clone(), fragment)),
            }
        }

        debug!(
            fields = fields.len(),
            parameters = parameters.len(),
            patches = patches.len(),
            "generated experiment parameters"
        );

        Ok(Generated {
            parameters,
            patches: patches
                .into_iter()
                .map(|(target, patch)| PatchTemplate {
                    patch_type: PatchType::Strategic,
                    patch,
                    target_ref: Some(target),
                })
                .collect(),
            metrics: self.metrics.clone(),
        })
    }
}
