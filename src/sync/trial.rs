use crate::api::{Assignment, IntOrString, Trial, ANNOTATION_REPORT_TRIAL_URL, FINALIZER};
use crate::remote::{self, TrialAssignments, TrialValues};

/// Name for a trial created from the remote trial at `url`
///
/// Numbered trials are zero padded so they sort in creation order.
fn trial_name(generate_name: &str, url: &str) -> String {
    let base = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    match base.parse::<i64>() {
        Ok(num) => format!("{generate_name}{num:03}"),
        Err(_) => format!("{generate_name}{base}"),
    }
}

fn to_i32(value: &remote::NumberOrString) -> IntOrString {
    match value {
        remote::NumberOrString::String(s) => IntOrString::String(s.clone()),
        n => IntOrString::Int(n.int64_value().clamp(i32::MIN.into(), i32::MAX.into()) as i32),
    }
}

/// Record the suggested assignments on the local trial
pub fn apply_assignment(trial: &mut Trial, suggestion: &TrialAssignments) {
    trial.metadata.annotations.insert(
        ANNOTATION_REPORT_TRIAL_URL.to_string(),
        suggestion.self_url.clone(),
    );

    // match the local name to the trial number on the service
    if trial.metadata.name.is_empty()
        && !trial.metadata.generate_name.is_empty()
        && !suggestion.self_url.is_empty()
    {
        trial.metadata.name = trial_name(&trial.metadata.generate_name, &suggestion.self_url);
    }

    trial
        .spec
        .assignments
        .extend(suggestion.assignments.iter().map(|a| Assignment {
            name: a.parameter_name.clone(),
            value: to_i32(&a.value),
        }));

    for (k, v) in suggestion.labels.iter() {
        if v.is_empty() {
            trial.metadata.labels.remove(k);
        } else {
            trial.metadata.labels.insert(k.clone(), v.clone());
        }
    }

    trial.update_status();
    trial.metadata.add_finalizer(FINALIZER);
}

/// The outcome of the trial as reported to the service
///
/// A failed trial only reports its failure, values that are not numbers are left out.
pub fn to_remote_values(trial: &Trial) -> TrialValues {
    let mut out = TrialValues {
        start_time: trial.status.start_time,
        completion_time: trial.status.completion_time,
        ..Default::default()
    };

    if let Some(failure) = trial.failure() {
        out.failed = true;
        out.failure_reason = failure.reason.clone();
        out.failure_message = failure.message.clone();
        return out;
    }

    out.values = trial
        .spec
        .values
        .iter()
        .filter_map(|v| {
            let value = v.value.parse::<f64>().ok()?;
            Some(remote::Value {
                metric_name: v.name.clone(),
                value,
                error: v.error.parse::<f64>().unwrap_or_default(),
            })
        })
        .collect();
    out
}
