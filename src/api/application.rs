use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::experiment::{Metric, MetricType};
use super::meta::ObjectMeta;
use crate::json::Quantity;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LatencyType {
    Mean,
    Minimum,
    Maximum,
    P50,
    P95,
    P99,
}

impl LatencyType {
    pub fn as_str(&self) -> &'static str {
        use LatencyType::*;
        match self {
            Mean => "mean",
            Minimum => "minimum",
            Maximum => "maximum",
            P50 => "p50",
            P95 => "p95",
            P99 => "p99",
        }
    }

    /// Interpret a loosely written latency name (`percentile_95`, `-avg`, `Max`)
    pub fn parse_loose(s: &str) -> Option<Self> {
        let normalized = s
            .trim_matches(|c: char| c == '-' || c == '_' || c.is_whitespace())
            .to_lowercase()
            .replace(['-', '_'], "");
        match normalized.as_str() {
            "mean" | "average" | "avg" => Some(LatencyType::Mean),
            "minimum" | "min" => Some(LatencyType::Minimum),
            "maximum" | "max" => Some(LatencyType::Maximum),
            "p50" | "percentile50" | "median" => Some(LatencyType::P50),
            "p95" | "percentile95" => Some(LatencyType::P95),
            "p99" | "percentile99" => Some(LatencyType::P99),
            _ => None,
        }
    }
}

/// Objective measured using the resource requests of the application
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct RequestsObjective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<BTreeMap<String, Quantity>>,
}

/// Objective measured using the latency reported by a load test
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LatencyObjective {
    pub latency_type: LatencyType,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Objective {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<RequestsObjective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency: Option<LatencyObjective>,
}

fn weights(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .filter_map(|(k, v)| Quantity::parse(v).ok().map(|q| (k.to_string(), q)))
        .collect()
}

impl Objective {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    fn configs(&self) -> usize {
        usize::from(self.requests.is_some()) + usize::from(self.latency.is_some())
    }

    /// Fill in the objective configuration implied by well known names
    pub fn apply_defaults(&mut self) {
        match self.name.to_lowercase().as_str() {
            "cost" => self.default_weights(&[("cpu", "17"), ("memory", "3")]),
            "cost-gcp" | "gcp-cost" => self.default_weights(&[("cpu", "17"), ("memory", "2")]),
            "cost-aws" | "aws-cost" => self.default_weights(&[("cpu", "18"), ("memory", "5")]),
            "cpu-requests" | "cpu" => self.default_weights(&[("cpu", "1")]),
            "memory-requests" | "memory" => self.default_weights(&[("memory", "1")]),
            _ => {
                if let Some(latency) = LatencyType::parse_loose(&self.name.replace("latency", "")) {
                    self.default_latency(latency);
                }

                if self.requests.as_ref().is_some_and(|r| r.weights.is_none()) {
                    self.default_weights(&[("cpu", "1"), ("memory", "1")]);
                }

                if self.name.is_empty() {
                    if self.requests.is_some() {
                        self.name = "requests".to_string();
                    } else if let Some(latency) = &self.latency {
                        self.name = format!("latency-{}", latency.latency_type.as_str());
                    }
                }
            }
        }
    }

    fn default_weights(&mut self, defaults: &[(&str, &str)]) {
        if self.requests.is_none() {
            // an explicitly configured objective of another type wins
            if self.configs() != 0 {
                return;
            }
            self.requests = Some(RequestsObjective::default());
        }

        if let Some(requests) = self.requests.as_mut() {
            let current = requests.weights.get_or_insert_with(BTreeMap::new);
            for (k, v) in weights(defaults) {
                current.entry(k).or_insert(v);
            }
        }
    }

    fn default_latency(&mut self, latency: LatencyType) {
        if self.latency.is_none() && self.configs() == 0 {
            self.latency = Some(LatencyObjective {
                latency_type: latency,
            });
        }
    }

    /// The experiment metric measuring this objective
    pub fn metric(&self) -> Option<Metric> {
        if let Some(requests) = &self.requests {
            let weights = requests
                .weights
                .iter()
                .flatten()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",");
            return Some(Metric {
                name: self.name.clone(),
                minimize: true,
                optimize: None,
                type_: MetricType::Kubernetes,
                query: format!("{{{{ resourceRequests .Target \"{weights}\" }}}}"),
            });
        }

        self.latency.as_ref().map(|latency| Metric {
            name: self.name.clone(),
            minimize: true,
            optimize: None,
            type_: MetricType::Prometheus,
            query: format!(
                "scalar(latency_milliseconds{{type=\"{}\",job=\"trialRun\"}})",
                latency.latency_type.as_str()
            ),
        })
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Scenario {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl Scenario {
    pub fn apply_defaults(&mut self) {
        if self.name.is_empty() {
            self.name = "default".to_string();
        }
    }
}

/// Label restrictions for one kind of generated parameter
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ParameterHint {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_resources: Option<ParameterHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<ParameterHint>,
}

/// Description of an application to optimize
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Application {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Locations of the application manifests, loading them is left to the caller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ParameterHints>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scenarios: Vec<Scenario>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<Objective>,
}

impl Application {
    pub fn apply_defaults(&mut self) {
        self.scenarios.iter_mut().for_each(Scenario::apply_defaults);
        self.objectives.iter_mut().for_each(Objective::apply_defaults);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn weight_values(objective: &Objective) -> Vec<(String, i64)> {
        objective
            .requests
            .as_ref()
            .and_then(|r| r.weights.as_ref())
            .map(|w| w.iter().map(|(k, v)| (k.clone(), v.value())).collect())
            .unwrap_or_default()
    }

    #[test]
    fn it_defaults_cost_objectives() {
        for (name, cpu, memory) in [("cost", 17, 3), ("gcp-cost", 17, 2), ("Cost-AWS", 18, 5)] {
            let mut objective = Objective::named(name);
            objective.apply_defaults();
            assert_eq!(
                weight_values(&objective),
                vec![("cpu".to_string(), cpu), ("memory".to_string(), memory)]
            );
        }

        let mut objective = Objective::named("cpu");
        objective.apply_defaults();
        assert_eq!(weight_values(&objective), vec![("cpu".to_string(), 1)]);
    }

    #[test]
    fn it_keeps_configured_weights() {
        let mut objective = Objective::named("cost");
        objective.requests = Some(RequestsObjective {
            weights: Some(weights(&[("cpu", "5")])),
        });
        objective.apply_defaults();
        assert_eq!(
            weight_values(&objective),
            vec![("cpu".to_string(), 5), ("memory".to_string(), 3)]
        );
    }

    #[test]
    fn it_does_not_override_other_objective_types() {
        let mut objective = Objective::named("cost");
        objective.latency = Some(LatencyObjective {
            latency_type: LatencyType::P95,
        });
        objective.apply_defaults();
        assert!(objective.requests.is_none());
    }

    #[test]
    fn it_defaults_latency_objectives() {
        let mut objective = Objective::named("latency-p95");
        objective.apply_defaults();
        assert_eq!(
            objective.latency,
            Some(LatencyObjective {
                latency_type: LatencyType::P95
            })
        );
        assert_eq!(objective.metric().unwrap().type_, MetricType::Prometheus);
    }

    #[test]
    fn it_names_unnamed_objectives() {
        let mut objective = Objective {
            requests: Some(RequestsObjective::default()),
            ..Default::default()
        };
        objective.apply_defaults();
        assert_eq!(objective.name, "requests");
        assert_eq!(
            weight_values(&objective),
            vec![("cpu".to_string(), 1), ("memory".to_string(), 1)]
        );

        let mut objective = Objective {
            latency: Some(LatencyObjective {
                latency_type: LatencyType::P99,
            }),
            ..Default::default()
        };
        objective.apply_defaults();
        assert_eq!(objective.name, "latency-p99");
    }

    #[test]
    fn it_defaults_scenario_names() {
        let mut app = Application {
            scenarios: vec![Scenario::default(), Scenario { name: "peak".into() }],
            ..Default::default()
        };
        app.apply_defaults();
        assert_eq!(app.scenarios[0].name, "default");
        assert_eq!(app.scenarios[1].name, "peak");
    }

    #[test]
    fn it_builds_request_metrics() {
        let mut objective = Objective::named("cost");
        objective.apply_defaults();
        let metric = objective.metric().unwrap();
        assert!(metric.minimize);
        assert_eq!(
            metric.query,
            "{{ resourceRequests .Target \"cpu=17,memory=3\" }}"
        );
    }
}
