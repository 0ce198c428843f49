//! Local experiment, trial and application records

mod application;
mod experiment;
mod meta;
mod trial;

pub use application::*;
pub use experiment::*;
pub use meta::*;
pub use trial::*;

/// Version of the local records
pub const API_VERSION: &str = "tunable.dev/v1beta1";

/// Prefix of every label and annotation owned by this crate
pub const LABEL_PREFIX: &str = "tunable.dev/";

pub const LABEL_EXPERIMENT: &str = "tunable.dev/experiment";
pub const LABEL_TRIAL: &str = "tunable.dev/trial";
pub const LABEL_TRIAL_ROLE: &str = "tunable.dev/trial-role";

pub const ANNOTATION_EXPERIMENT_URL: &str = "tunable.dev/experiment-url";
pub const ANNOTATION_NEXT_TRIAL_URL: &str = "tunable.dev/next-trial-url";
pub const ANNOTATION_REPORT_TRIAL_URL: &str = "tunable.dev/report-trial-url";

/// Finalizer keeping records around until they are synchronized with the remote service
pub const FINALIZER: &str = "serverFinalizer.tunable.dev";
