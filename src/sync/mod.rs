//! Synchronization between local records and the remote optimization service
//!
//! The conversion functions are pure. The [`Synchronizer`] drives them against an
//! [`ExperimentsApi`] implementation, holding an exclusive lock on every record it
//! updates for the duration of a step.
//!
//! ```rust
//! use async_trait::async_trait;
//! use tunable::api::Experiment;
//! use tunable::error::Result;
//! use tunable::remote::{Experiment as RemoteExperiment, ExperimentName, TrialAssignments, TrialValues};
//! use tunable::sync::{ExperimentsApi, Synchronizer};
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl ExperimentsApi for Offline {
//!     async fn create_experiment(&self, _: &ExperimentName, exp: &RemoteExperiment) -> Result<RemoteExperiment> {
//!         Ok(exp.clone())
//!     }
//!     async fn get_experiment(&self, _: &ExperimentName) -> Result<RemoteExperiment> {
//!         Ok(RemoteExperiment::default())
//!     }
//!     async fn create_trial(&self, _: &RemoteExperiment, trial: &TrialAssignments) -> Result<TrialAssignments> {
//!         Ok(trial.clone())
//!     }
//!     async fn next_trial(&self, _: &str) -> Result<TrialAssignments> {
//!         Ok(TrialAssignments::default())
//!     }
//!     async fn report_trial(&self, _: &str, _: &TrialValues) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let sync = Synchronizer::new(Offline);
//! let mut exp = Experiment::new("web");
//! sync.create_experiment(&mut exp).await.unwrap();
//! assert_eq!(exp.metadata.finalizers, vec!["serverFinalizer.tunable.dev"]);
//! # })
//! ```

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, instrument, warn};

use crate::api::{Experiment, Trial, ANNOTATION_NEXT_TRIAL_URL, ANNOTATION_REPORT_TRIAL_URL, FINALIZER};
use crate::error::{Error, ErrorKind, Result};
use crate::remote::{self, remote_error, ExperimentName, RemoteErrorKind, TrialAssignments, TrialValues};

mod definition;
mod experiment;
mod lock;
mod trial;

pub use definition::*;
pub use experiment::*;
pub use lock::*;
pub use trial::*;

/// Access to the remote optimization service
///
/// Errors reported by the service should be returned as a [`remote::RemoteError`]
/// converted into the crate error.
#[async_trait]
pub trait ExperimentsApi: Send + Sync {
    /// Create or update the experiment, returning the stored record with its locations
    async fn create_experiment(
        &self,
        name: &ExperimentName,
        exp: &remote::Experiment,
    ) -> Result<remote::Experiment>;

    async fn get_experiment(&self, name: &ExperimentName) -> Result<remote::Experiment>;

    /// Suggest a trial explicitly, e.g. the baseline
    async fn create_trial(
        &self,
        exp: &remote::Experiment,
        assignments: &TrialAssignments,
    ) -> Result<TrialAssignments>;

    /// Ask the service for the next trial to run
    async fn next_trial(&self, next_trial_url: &str) -> Result<TrialAssignments>;

    async fn report_trial(&self, report_trial_url: &str, values: &TrialValues) -> Result<()>;
}

fn record_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

/// Drives the synchronization steps of experiments and trials
pub struct Synchronizer<A> {
    api: A,
    locks: RecordLocks,
}

impl<A: ExperimentsApi> Synchronizer<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            locks: RecordLocks::new(),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Fetch the experiment from the service and check it still matches the local one
    async fn remote_definition(&self, exp: &Experiment) -> Result<remote::Experiment> {
        let remote = self
            .api
            .get_experiment(&ExperimentName::new(exp.name()))
            .await?;
        check_definition(exp, &remote)?;
        Ok(remote)
    }

    /// Register the experiment on the service
    ///
    /// The baseline trial, if any, is suggested right after the experiment is created.
    /// An experiment that no longer matches its service definition is marked as failed.
    #[instrument(skip_all, fields(experiment = %exp.name()), err)]
    pub async fn create_experiment(&self, exp: &mut Experiment) -> Result<()> {
        let _guard = self
            .locks
            .lock(record_key("experiment", &exp.metadata.namespace, exp.name()))
            .await;

        let (name, definition, baseline) = to_remote(exp)?;
        let created = self.api.create_experiment(&name, &definition).await?;
        if let Err(err) = check_definition(exp, &created) {
            fail_experiment(exp, "Incompatible", &err);
            return Err(err);
        }
        to_local(exp, &created);

        if let Some(baseline) = baseline {
            self.api.create_trial(&created, &baseline).await?;
            debug!("suggested baseline trial");
        }
        Ok(())
    }

    /// Get a new trial for the experiment
    ///
    /// Returns `None` if the service has no trial to offer right now or the experiment
    /// was stopped, in which case the experiment is updated accordingly.
    #[instrument(skip_all, fields(experiment = %exp.name()), err)]
    pub async fn next_trial(&self, exp: &mut Experiment) -> Result<Option<Trial>> {
        let _guard = self
            .locks
            .lock(record_key("experiment", &exp.metadata.namespace, exp.name()))
            .await;

        let Some(url) = exp
            .metadata
            .annotations
            .get(ANNOTATION_NEXT_TRIAL_URL)
            .filter(|url| !url.is_empty())
            .cloned()
        else {
            debug!("experiment does not accept trials");
            return Ok(None);
        };

        if let Err(err) = self.remote_definition(exp).await {
            if err.kind() == ErrorKind::Incompatible {
                fail_experiment(exp, "Incompatible", &err);
            }
            return Err(err);
        }

        match self.api.next_trial(&url).await {
            Ok(suggestion) => {
                let mut trial = Trial::from_experiment(exp);
                apply_assignment(&mut trial, &suggestion);
                debug!(trial = %trial.name(), "received trial assignments");
                Ok(Some(trial))
            }
            Err(err) if stop_experiment(exp, &err) => {
                debug!("experiment was stopped");
                Ok(None)
            }
            Err(err) if remote_error(&err).map(|e| e.kind) == Some(RemoteErrorKind::TrialUnavailable) => {
                debug!("no trial available");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn report(&self, trial: &mut Trial) -> Result<bool> {
        let _guard = self
            .locks
            .lock(record_key("trial", &trial.metadata.namespace, trial.name()))
            .await;

        let url = trial
            .metadata
            .annotations
            .get(ANNOTATION_REPORT_TRIAL_URL)
            .cloned()
            .unwrap_or_default();
        if url.is_empty() {
            if trial.metadata.finalizers.iter().any(|f| f == FINALIZER) {
                return Err(Error::data_shape(anyhow!(
                    "trial '{}' has no location to report to",
                    trial.name()
                )));
            }
            debug!(trial = %trial.name(), "trial is not synchronized, skipping");
            return Ok(false);
        }

        let values = to_remote_values(trial);
        if values.failed {
            warn!(trial = %trial.name(), reason = %values.failure_reason, "reporting failed trial");
        }
        self.api.report_trial(&url, &values).await?;
        trial.metadata.remove_finalizer(FINALIZER);
        Ok(true)
    }

    /// Report the outcome of a finished trial
    ///
    /// Returns `false` if the trial was never synchronized with the service.
    #[instrument(skip_all, fields(experiment = %exp.name(), trial = %trial.name()), err)]
    pub async fn report_trial(&self, exp: &Experiment, trial: &mut Trial) -> Result<bool> {
        self.remote_definition(exp).await?;
        self.report(trial).await
    }

    /// Report several finished trials of one experiment concurrently
    ///
    /// Returns the number of trials reported.
    #[instrument(skip_all, fields(experiment = %exp.name(), trials = trials.len()), err)]
    pub async fn report_trials(&self, exp: &Experiment, trials: &mut [Trial]) -> Result<usize> {
        self.remote_definition(exp).await?;
        let reported = try_join_all(trials.iter_mut().map(|t| self.report(t))).await?;
        Ok(reported.into_iter().filter(|r| *r).count())
    }
}
