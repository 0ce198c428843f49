#![cfg_attr(docsrs, feature(doc_cfg))]
//! tunable turns the manifests of a cluster workload into an optimization experiment and
//! keeps the experiment trials in sync with a remote optimization service.
//!
//! The crate does not talk to the cluster nor to the service itself. Callers provide the
//! resources to analyze and an implementation of [`ExperimentsApi`](`sync::ExperimentsApi`),
//! and apply the patches and jobs it produces.
//!
//! # Features
//!
//! - Find tunable fields (replica counts, container resources, environment variables) using
//!   declarative selectors.
//! - Collision free parameter names, stable across runs for the same resources.
//! - Patch templates with `{{ .Values.<name> }}` placeholders, rendered for each trial.
//! - Trial job construction with the assignments injected as environment variables.
//! - Conversion between local experiment/trial records and the records of the service,
//!   with a definition check before every synchronization step.
//! - Structured logging through the [tracing crate](https://crates.io/crates/tracing).
//!
//! # Generating an experiment
//!
//! A [Generator](`generate::Generator`) runs [selectors](`selector`) over a
//! [ResourceSet](`resource::ResourceSet`). Every field found becomes one or more parameters,
//! and the fields of a resource are merged into one patch template targeting it.
//!
//! ```rust
//! use serde_json::json;
//! use tunable::generate::Generator;
//! use tunable::resource::ResourceSet;
//! use tunable::selector::{ContainerResourcesSelector, ReplicaSelector};
//!
//! let resources = ResourceSet::from_trees(vec![json!({
//!     "apiVersion": "apps/v1",
//!     "kind": "Deployment",
//!     "metadata": {"name": "web"},
//!     "spec": {
//!         "replicas": 2,
//!         "template": {"spec": {"containers": [
//!             {"name": "app", "resources": {"limits": {"cpu": "500m", "memory": "256Mi"}}}
//!         ]}}
//!     }
//! })])
//! .unwrap();
//!
//! let exp = Generator::new()
//!     .selector(ReplicaSelector::default())
//!     .selector(ContainerResourcesSelector::default())
//!     .generate(&resources)
//!     .unwrap()
//!     .experiment("web");
//!
//! let names: Vec<_> = exp.spec.parameters.iter().map(|p| p.name.as_str()).collect();
//! assert_eq!(names, vec!["replicas", "cpu", "memory"]);
//! assert_eq!(exp.spec.patches.len(), 1);
//! ```
//!
//! # Running trials
//!
//! Once the service suggests an assignment for a trial (see [sync]), the experiment patch
//! templates are rendered with [render_trial_patches](`patch::render_trial_patches`) and the
//! trial job is built with [build_job](`job::build_job`).
//!
//! ```rust
//! use tunable::api::{Assignment, Experiment, Parameter, PatchTemplate, Trial};
//! use tunable::job::build_job;
//! use tunable::patch::render_trial_patches;
//! use serde_json::json;
//!
//! let mut exp = Experiment::new("web");
//! exp.spec.parameters = vec![Parameter::integer("replicas", 1, 5)];
//! exp.spec.patches = vec![PatchTemplate {
//!     patch: json!({"spec": {"replicas": "{{ .Values.replicas }}"}}),
//!     ..Default::default()
//! }];
//!
//! let mut trial = Trial::from_experiment(&exp);
//! trial.metadata.name = "web-001".to_string();
//! trial.spec.assignments = vec![Assignment { name: "replicas".to_string(), value: 3.into() }];
//!
//! let patches = render_trial_patches(&exp, &trial).unwrap();
//! assert_eq!(patches[0].data, json!({"spec": {"replicas": 3}}));
//!
//! let job = build_job(&trial).into_job();
//! assert_eq!(job.metadata.name, "web-001");
//! ```
//!
//! # Errors
//!
//! Every operation returns an [Error](`error::Error`) with an [ErrorKind](`error::ErrorKind`)
//! telling configuration mistakes apart from unexpected data, incompatible definitions and
//! service errors. Nothing is retried by the library.

pub mod api;
pub mod error;
pub mod generate;
pub mod job;
pub mod json;
pub mod patch;
pub mod remote;
pub mod resource;
pub mod selector;
pub mod sync;
pub mod template;
