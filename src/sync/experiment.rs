use anyhow::anyhow;
use chrono::Utc;
use serde_json::Number;

use crate::api::{
    ConditionStatus, Experiment, ExperimentConditionType, IntOrString, Optimization,
    ANNOTATION_EXPERIMENT_URL, ANNOTATION_NEXT_TRIAL_URL, FINALIZER, LABEL_PREFIX,
};
use crate::error::{Error, Result};
use crate::remote::{self, remote_error, ExperimentName, RemoteErrorKind, TrialAssignments};

fn milli_to_f64(milli: i64) -> f64 {
    milli as f64 / 1000.0
}

/// Convert a local experiment into the record expected by the service
///
/// Parameters with a single possible value are left out. If the parameters declare a
/// baseline, the returned assignments are the baseline trial to suggest first.
pub fn to_remote(
    exp: &Experiment,
) -> Result<(ExperimentName, remote::Experiment, Option<TrialAssignments>)> {
    let mut out = remote::Experiment::default();
    out.meta.last_modified = exp.metadata.creation_timestamp;
    out.meta.self_url = exp
        .metadata
        .annotations
        .get(ANNOTATION_EXPERIMENT_URL)
        .cloned()
        .unwrap_or_default();
    out.meta.next_trial_url = exp
        .metadata
        .annotations
        .get(ANNOTATION_NEXT_TRIAL_URL)
        .cloned()
        .unwrap_or_default();

    out.labels = exp
        .metadata
        .labels
        .iter()
        .map(|(k, v)| (k.strip_prefix(LABEL_PREFIX).unwrap_or(k).to_string(), v.clone()))
        .collect();

    out.optimization = exp
        .spec
        .optimization
        .iter()
        .map(|o| remote::Optimization {
            name: o.name.clone(),
            value: o.value.clone(),
        })
        .collect();

    let mut baseline = TrialAssignments {
        labels: [("baseline".to_string(), "true".to_string())].into(),
        ..Default::default()
    };

    for p in exp.spec.parameters.iter().filter(|p| !p.is_degenerate()) {
        if p.is_categorical() {
            out.parameters.push(remote::Parameter {
                type_: remote::ParameterType::Categorical,
                name: p.name.clone(),
                bounds: None,
                values: p.values.clone(),
            });
        } else {
            out.parameters.push(remote::Parameter {
                type_: remote::ParameterType::Integer,
                name: p.name.clone(),
                bounds: Some(remote::Bounds {
                    min: Number::from(p.min),
                    max: Number::from(p.max),
                }),
                values: vec![],
            });
        }

        let Some(value) = &p.baseline else {
            continue;
        };
        let value = match value {
            IntOrString::String(s) if p.values.contains(s) => remote::NumberOrString::from(s.as_str()),
            IntOrString::Int(i) if p.min <= *i && *i <= p.max => remote::NumberOrString::from_i64(i64::from(*i)),
            _ => {
                return Err(Error::data_shape(anyhow!(
                    "baseline out of range for parameter '{}'",
                    p.name
                )))
            }
        };
        baseline.assignments.push(remote::Assignment {
            parameter_name: p.name.clone(),
            value,
        });
    }

    for c in exp.spec.constraints.iter() {
        let kind = if let Some(order) = &c.order {
            remote::ConstraintKind::Order(remote::OrderConstraint {
                lower_parameter: order.lower_parameter.clone(),
                upper_parameter: order.upper_parameter.clone(),
            })
        } else if let Some(sum) = &c.sum {
            remote::ConstraintKind::Sum(remote::SumConstraint {
                is_upper_bound: sum.is_upper_bound,
                bound: milli_to_f64(sum.bound.milli_value()),
                parameters: sum
                    .parameters
                    .iter()
                    .filter(|p| !p.weight.is_zero())
                    .map(|p| remote::SumConstraintParameter {
                        name: p.name.clone(),
                        weight: milli_to_f64(p.weight.milli_value()),
                    })
                    .collect(),
            })
        } else {
            continue;
        };
        out.constraints.push(remote::Constraint {
            name: c.name.clone(),
            kind,
        });
    }

    out.metrics = exp
        .spec
        .metrics
        .iter()
        .map(|m| remote::Metric {
            name: m.name.clone(),
            minimize: m.minimize,
            optimize: m.optimize,
        })
        .collect();

    let baseline = if baseline.assignments.is_empty() {
        None
    } else if baseline.assignments.len() != out.parameters.len() {
        return Err(Error::data_shape(anyhow!(
            "baseline must be specified on all or none of the parameters"
        )));
    } else {
        Some(baseline)
    };

    Ok((ExperimentName::new(exp.name()), out, baseline))
}

/// Record the service state of the experiment on the local experiment
pub fn to_local(exp: &mut Experiment, remote: &remote::Experiment) {
    let annotations = &mut exp.metadata.annotations;
    annotations.insert(ANNOTATION_EXPERIMENT_URL.to_string(), remote.meta.self_url.clone());
    annotations.insert(
        ANNOTATION_NEXT_TRIAL_URL.to_string(),
        remote.meta.next_trial_url.clone(),
    );

    exp.spec.optimization = remote
        .optimization
        .iter()
        .map(|o| Optimization {
            name: o.name.clone(),
            value: o.value.clone(),
        })
        .collect();

    exp.metadata.add_finalizer(FINALIZER);
}

/// Pause the experiment if the service reports it stopped
///
/// Returns `true` if the experiment was changed.
pub fn stop_experiment(exp: &mut Experiment, err: &Error) -> bool {
    match remote_error(err) {
        Some(e) if e.kind == RemoteErrorKind::ExperimentStopped => {
            exp.set_replicas(0);
            exp.metadata.annotations.remove(ANNOTATION_NEXT_TRIAL_URL);
            true
        }
        _ => false,
    }
}

/// Record the error as an experiment failure
pub fn fail_experiment(exp: &mut Experiment, reason: &str, err: &Error) -> bool {
    exp.set_replicas(0);
    exp.apply_condition(
        ExperimentConditionType::Failed,
        ConditionStatus::True,
        reason,
        &err.to_string(),
        Some(Utc::now()),
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Constraint, Metric, OrderConstraint, Parameter, SumConstraint, SumConstraintParameter};
    use crate::error::ErrorKind;
    use crate::json::Quantity;
    use crate::remote::RemoteError;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn experiment() -> Experiment {
        let mut exp = Experiment::new("postgres");
        exp.metadata
            .labels
            .insert("tunable.dev/application".to_string(), "db".to_string());
        exp.metadata.labels.insert("team".to_string(), "data".to_string());
        exp.spec.parameters = vec![
            Parameter::integer("cpu", 100, 4000).with_baseline(500),
            Parameter::categorical("mode", vec!["fast".into(), "safe".into()]).with_baseline("safe"),
            Parameter::integer("pinned", 3, 3),
        ];
        exp.spec.metrics = vec![Metric {
            name: "cost".to_string(),
            minimize: true,
            ..Default::default()
        }];
        exp
    }

    #[test]
    fn it_converts_experiments_for_the_service() {
        let (name, out, baseline) = to_remote(&experiment()).unwrap();
        assert_eq!(name.as_str(), "postgres");
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            json!({
                "labels": {"application": "db", "team": "data"},
                "parameters": [
                    {"type": "int", "name": "cpu", "bounds": {"min": 100, "max": 4000}},
                    {"type": "categorical", "name": "mode", "values": ["fast", "safe"]}
                ],
                "metrics": [{"name": "cost", "minimize": true}]
            })
        );

        let baseline = baseline.unwrap();
        assert_eq!(baseline.labels.get("baseline"), Some(&"true".to_string()));
        assert_eq!(
            baseline.assignments,
            vec![
                remote::Assignment {
                    parameter_name: "cpu".to_string(),
                    value: remote::NumberOrString::from_i64(500),
                },
                remote::Assignment {
                    parameter_name: "mode".to_string(),
                    value: "safe".into(),
                },
            ]
        );
    }

    #[test]
    fn it_omits_the_baseline_when_none_is_given() {
        let mut exp = experiment();
        exp.spec.parameters.iter_mut().for_each(|p| p.baseline = None);
        let (_, _, baseline) = to_remote(&exp).unwrap();
        assert!(baseline.is_none());
    }

    #[test]
    fn it_rejects_partial_or_invalid_baselines() {
        let mut exp = experiment();
        exp.spec.parameters[1].baseline = None;
        let err = to_remote(&exp).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataShape);

        let mut exp = experiment();
        exp.spec.parameters[0].baseline = Some(IntOrString::Int(5000));
        let err = to_remote(&exp).unwrap_err();
        assert!(err.to_string().contains("'cpu'"));

        let mut exp = experiment();
        exp.spec.parameters[1].baseline = Some("unknown".into());
        assert!(to_remote(&exp).is_err());
    }

    #[test]
    fn it_converts_constraints() {
        let mut exp = experiment();
        exp.spec.constraints = vec![
            Constraint {
                name: "order".to_string(),
                order: Some(OrderConstraint {
                    lower_parameter: "requests".to_string(),
                    upper_parameter: "limits".to_string(),
                }),
                sum: None,
            },
            Constraint {
                name: "budget".to_string(),
                order: None,
                sum: Some(SumConstraint {
                    is_upper_bound: true,
                    bound: Quantity::parse("1500m").unwrap(),
                    parameters: vec![
                        SumConstraintParameter {
                            name: "cpu".to_string(),
                            weight: Quantity::parse("250m").unwrap(),
                        },
                        SumConstraintParameter {
                            name: "memory".to_string(),
                            weight: Quantity::parse("0").unwrap(),
                        },
                    ],
                }),
            },
        ];

        let (_, out, _) = to_remote(&exp).unwrap();
        assert_eq!(
            serde_json::to_value(&out.constraints).unwrap(),
            json!([
                {"name": "order", "constraintType": "order", "lowerParameter": "requests", "upperParameter": "limits"},
                {"name": "budget", "constraintType": "sum", "isUpperBound": true, "bound": 1.5,
                 "parameters": [{"name": "cpu", "weight": 0.25}]}
            ])
        );
    }

    #[test]
    fn it_records_service_state_locally() {
        let mut exp = experiment();
        let mut remote = remote::Experiment::default();
        remote.meta.self_url = "https://api.example.com/experiments/postgres".to_string();
        remote.meta.next_trial_url = "https://api.example.com/experiments/postgres/nextTrial".to_string();
        remote.optimization = vec![remote::Optimization {
            name: "experimentBudget".to_string(),
            value: "20".to_string(),
        }];

        to_local(&mut exp, &remote);
        to_local(&mut exp, &remote);

        assert_eq!(
            exp.metadata.annotations.get(ANNOTATION_NEXT_TRIAL_URL),
            Some(&remote.meta.next_trial_url)
        );
        assert_eq!(exp.spec.optimization[0].name, "experimentBudget");
        assert_eq!(exp.metadata.finalizers, vec![FINALIZER.to_string()]);

        let (_, out, _) = to_remote(&exp).unwrap();
        assert_eq!(out.meta.self_url, remote.meta.self_url);
        assert_eq!(out.optimization, remote.optimization);
    }

    #[test]
    fn it_stops_experiments_only_when_the_service_says_so() {
        let mut exp = experiment();
        exp.metadata
            .annotations
            .insert(ANNOTATION_NEXT_TRIAL_URL.to_string(), "next".to_string());

        let err = Error::from(RemoteError::new(RemoteErrorKind::TrialUnavailable, "wait"));
        assert!(!stop_experiment(&mut exp, &err));
        assert_eq!(exp.replicas(), 1);

        let err = Error::from(RemoteError::new(RemoteErrorKind::ExperimentStopped, "stopped"));
        assert!(stop_experiment(&mut exp, &err));
        assert_eq!(exp.replicas(), 0);
        assert!(!exp.metadata.annotations.contains_key(ANNOTATION_NEXT_TRIAL_URL));
    }

    #[test]
    fn it_fails_experiments() {
        let mut exp = experiment();
        let err = Error::incompatible(anyhow!("parameters do not match"));
        assert!(fail_experiment(&mut exp, "Incompatible", &err));
        assert!(exp.is_failed());
        assert_eq!(exp.replicas(), 0);
        assert_eq!(exp.status.conditions[0].message, "parameters do not match");
    }
}
