use anyhow::anyhow;
use std::collections::BTreeSet;

use crate::api::Experiment;
use crate::error::{Error, Result};
use crate::remote;

/// Check that the local experiment still describes the experiment on the service
///
/// Parameters with a single possible value are never sent to the service so they are
/// not compared.
pub fn check_definition(exp: &Experiment, remote: &remote::Experiment) -> Result<()> {
    let local: BTreeSet<&str> = exp
        .spec
        .parameters
        .iter()
        .filter(|p| !p.is_degenerate())
        .map(|p| p.name.as_str())
        .collect();
    let found: BTreeSet<&str> = remote.parameters.iter().map(|p| p.name.as_str()).collect();
    if local != found {
        return Err(Error::incompatible(anyhow!(
            "experiment '{}' has parameters {:?} but the service expects {:?}",
            exp.name(),
            local,
            found
        )));
    }

    let local: BTreeSet<&str> = exp.spec.metrics.iter().map(|m| m.name.as_str()).collect();
    let found: BTreeSet<&str> = remote.metrics.iter().map(|m| m.name.as_str()).collect();
    if local != found {
        return Err(Error::incompatible(anyhow!(
            "experiment '{}' has metrics {:?} but the service expects {:?}",
            exp.name(),
            local,
            found
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Metric, Parameter};
    use crate::error::ErrorKind;
    use crate::sync::to_remote;

    fn experiment() -> Experiment {
        let mut exp = Experiment::new("web");
        exp.spec.parameters = vec![
            Parameter::integer("cpu", 100, 4000),
            Parameter::integer("memory", 128, 4096),
            Parameter::integer("fixed", 1, 1),
        ];
        exp.spec.metrics = vec![Metric {
            name: "cost".to_string(),
            ..Default::default()
        }];
        exp
    }

    #[test]
    fn it_accepts_matching_definitions() {
        let exp = experiment();
        let (_, remote, _) = to_remote(&exp).unwrap();
        assert!(check_definition(&exp, &remote).is_ok());
    }

    #[test]
    fn it_rejects_renamed_parameters() {
        let exp = experiment();
        let (_, mut remote, _) = to_remote(&exp).unwrap();
        remote.parameters[1].name = "mem".to_string();
        let err = check_definition(&exp, &remote).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Incompatible);
    }

    #[test]
    fn it_rejects_different_metrics() {
        let exp = experiment();
        let (_, mut remote, _) = to_remote(&exp).unwrap();
        remote.metrics[0].name = "latency".to_string();
        assert_eq!(
            check_definition(&exp, &remote).unwrap_err().kind(),
            ErrorKind::Incompatible
        );

        remote.metrics.clear();
        assert!(check_definition(&exp, &remote).is_err());
    }
}
