//! Construction of the job running a trial

use tracing::warn;

use crate::api::{
    is_trial_job_reference, Duration, ObjectMeta, PatchType, Trial, LABEL_EXPERIMENT, LABEL_TRIAL,
    LABEL_TRIAL_ROLE,
};
use crate::error::{Error, Result};
use crate::json::strategic_merge;

mod spec;

pub use spec::*;

/// Value of the trial role label on trial jobs and their pods
pub const TRIAL_RUN_ROLE: &str = "trialRun";

/// Name of the container added to jobs without containers
pub const DEFAULT_CONTAINER_NAME: &str = "default-trial-run";

const DEFAULT_RUNTIME: Duration = Duration::from_secs(120);

/// The outcome of building a trial job
///
/// Building always produces a job. If a recorded patch targeting the job could not be
/// applied, the unpatched job is returned along with the error.
#[derive(Debug)]
pub struct BuiltJob {
    job: Job,
    error: Option<Error>,
}

impl BuiltJob {
    pub fn job(&self) -> &Job {
        &self.job
    }

    /// The self patch failure, if any
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn into_parts(self) -> (Job, Option<Error>) {
        (self.job, self.error)
    }

    /// Return the job, logging any self patch failure
    pub fn into_job(self) -> Job {
        if let Some(err) = &self.error {
            warn!(job = %self.job.metadata.name, "ignoring trial job patch: {err}");
        }
        self.job
    }
}

/// Build the job for a trial
///
/// The job is created from the trial job template, if any, with the trial labels
/// added, the restart policy and backoff limit defaulted to not retry, and the trial
/// assignments exposed to every container as environment variables. A job without
/// containers gets a container sleeping for the approximate trial runtime.
pub fn build_job(trial: &Trial) -> BuiltJob {
    let mut job = Job::default();
    match &trial.spec.job_template {
        Some(template) => {
            job.metadata = template.metadata.clone();
            job.spec = template.spec.clone();
        }
        None => {
            let experiment = trial.experiment_name();
            job.metadata.add_label(LABEL_EXPERIMENT, experiment);
            job.spec.template.metadata.add_label(LABEL_EXPERIMENT, experiment);
        }
    }

    for meta in [&mut job.metadata, &mut job.spec.template.metadata] {
        add_trial_labels(meta, trial);
    }

    job.metadata.namespace = trial.metadata.namespace.clone();
    if job.metadata.name.is_empty() {
        job.metadata.name = trial.metadata.name.clone();
    }

    let pod = &mut job.spec.template.spec;
    if pod.restart_policy.is_empty() {
        pod.restart_policy = "Never".to_string();
    }
    if job.spec.backoff_limit.is_none() {
        job.spec.backoff_limit = Some(0);
    }

    for container in pod.containers.iter_mut() {
        container.env.extend(assignment_env(trial));
    }

    if pod.containers.is_empty() {
        pod.containers = vec![default_container(trial)];
    }

    match patch_self(trial, &job) {
        Ok(Some(patched)) => BuiltJob {
            job: patched,
            error: None,
        },
        Ok(None) => BuiltJob { job, error: None },
        Err(error) => BuiltJob {
            job,
            error: Some(error),
        },
    }
}

fn add_trial_labels(meta: &mut ObjectMeta, trial: &Trial) {
    meta.add_label(LABEL_TRIAL, &trial.metadata.name);
    meta.add_label(LABEL_TRIAL_ROLE, TRIAL_RUN_ROLE);
}

/// Environment variable name for a parameter, e.g. `db.cpu` becomes `DB_CPU`
pub fn env_var_name(parameter: &str) -> String {
    parameter.to_uppercase().replace('.', "_")
}

fn assignment_env(trial: &Trial) -> impl Iterator<Item = EnvVar> + '_ {
    trial
        .spec
        .assignments
        .iter()
        .map(|a| EnvVar::new(env_var_name(&a.name), a.value.to_string()))
}

fn default_container(trial: &Trial) -> Container {
    let mut runtime = trial
        .spec
        .approximate_runtime
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_RUNTIME);
    if let Some(offset) = trial.spec.start_time_offset {
        runtime = runtime + offset;
    }

    let secs = runtime.as_std().as_secs_f64();
    Container {
        name: DEFAULT_CONTAINER_NAME.to_string(),
        image: "busybox".to_string(),
        command: vec!["/bin/sh".to_string()],
        args: vec![
            "-c".to_string(),
            format!("echo 'Sleeping for {runtime}...' && sleep {secs:.0} && echo 'Done.'"),
        ],
        ..Default::default()
    }
}

/// Apply the recorded strategic merge patches targeting the trial job
///
/// Returns the patched job from the first patch that applies cleanly, `None` if no
/// recorded patch targets the job, or the last error if none of them apply.
pub fn patch_self(trial: &Trial, job: &Job) -> Result<Option<Job>> {
    let mut last_err = None;
    for op in trial.status.patch_operations.iter() {
        if op.patch_type != PatchType::Strategic || !is_trial_job_reference(trial, &op.target_ref) {
            continue;
        }

        let patched = serde_json::to_value(job).and_then(|mut doc| {
            strategic_merge(&mut doc, &op.data);
            serde_json::from_value::<Job>(doc)
        });

        match patched {
            Ok(patched) => return Ok(Some(patched)),
            Err(e) => last_err = Some(Error::from(e)),
        }
    }

    match last_err {
        Some(err) => Err(err),
        None => Ok(None),
    }
}
