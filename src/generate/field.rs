use serde_json::{json, Map, Value};

use super::namer::Namer;
use crate::api::Parameter;
use crate::error::Result;
use crate::json::{FieldPath, Segment, MERGE_KEY};
use crate::resource::ObjectReference;
use crate::template::placeholder;

/// Something that can be turned into experiment parameters and a patch setting them
pub trait PatchSource {
    /// The parameters tuning the field
    fn parameters(&self, namer: &Namer) -> Result<Vec<Parameter>>;

    /// A structural merge patch setting the field to its parameter placeholders
    fn patch(&self, namer: &Namer) -> Result<Value>;
}

/// Inclusive range of a numeric parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Bounds {
    pub min: i64,
    pub max: i64,
}

impl Bounds {
    /// Widen the bounds to include the value
    fn including(self, value: i64) -> Self {
        Self {
            min: self.min.min(value),
            max: self.max.max(value),
        }
    }
}

pub const CPU_BOUNDS: Bounds = Bounds { min: 100, max: 4000 };
/// Bounds of the memory parameter, in the unit the memory is tuned in
pub const MEMORY_BOUNDS: Bounds = Bounds { min: 128, max: 4096 };

pub const MEBIBYTES: &str = "Mi";
pub const MEGABYTES: &str = "M";

/// Replica count used by the cluster when the field is not set
const DEFAULT_REPLICAS: i32 = 1;

fn to_i32(v: i64) -> i32 {
    v.clamp(i32::MIN.into(), i32::MAX.into()) as i32
}

/// An integer replica count
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaField {
    pub target: ObjectReference,
    pub path: FieldPath,
    /// The current value, `None` if the field is created by the patch
    pub value: Option<i32>,
}

impl ReplicaField {
    const SUFFIX: &'static str = "replicas";

    fn baseline(&self) -> Option<i32> {
        self.value
            .or(Some(DEFAULT_REPLICAS))
            .filter(|v| *v > 0)
    }
}

impl PatchSource for ReplicaField {
    fn parameters(&self, namer: &Namer) -> Result<Vec<Parameter>> {
        let Some(baseline) = self.baseline() else {
            return Ok(vec![]);
        };

        // only raise the upper bound if the current value needs it
        let name = namer.name(&self.target, &self.path, Self::SUFFIX);
        Ok(vec![
            Parameter::integer(name, 1, baseline.max(5)).with_baseline(baseline)
        ])
    }

    fn patch(&self, namer: &Namer) -> Result<Value> {
        if self.baseline().is_none() {
            return Ok(Value::Object(Map::new()));
        }
        let name = namer.name(&self.target, &self.path, Self::SUFFIX);
        Ok(self.path.fragment(Value::String(placeholder(&name)))?)
    }
}

/// The cpu and memory of a container
///
/// Cpu is tuned in millicores and memory in mebibytes, or in megabytes when the current
/// value is a whole number of megabytes only. Both requests and limits are set to the
/// parameter value.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerResourcesField {
    pub target: ObjectReference,
    /// Path to the container
    pub path: FieldPath,
    /// Current cpu in millicores, read from the limits or else the requests
    pub cpu: Option<i64>,
    /// Current memory in `memory_unit`, read from the limits or else the requests
    pub memory: Option<i64>,
    /// Suffix of the memory value, `Mi` or `M`
    pub memory_unit: &'static str,
    /// The container has no resources yet
    pub synthesized: bool,
}

impl ContainerResourcesField {
    fn baselines(&self) -> Vec<(&'static str, &'static str, Bounds, i64)> {
        let mut baselines = Vec::with_capacity(2);
        for (suffix, unit, bounds, value) in [
            ("cpu", "m", CPU_BOUNDS, self.cpu),
            ("memory", self.memory_unit, MEMORY_BOUNDS, self.memory),
        ] {
            let baseline = match value {
                Some(v) if v > 0 => v,
                None if self.synthesized => bounds.min,
                _ => continue,
            };
            baselines.push((suffix, unit, bounds, baseline));
        }
        baselines
    }
}

impl PatchSource for ContainerResourcesField {
    fn parameters(&self, namer: &Namer) -> Result<Vec<Parameter>> {
        Ok(self
            .baselines()
            .into_iter()
            .map(|(suffix, _, bounds, baseline)| {
                let bounds = bounds.including(baseline);
                let name = namer.name(&self.target, &self.path, suffix);
                Parameter::integer(name, to_i32(bounds.min), to_i32(bounds.max))
                    .with_baseline(to_i32(baseline))
            })
            .collect())
    }

    fn patch(&self, namer: &Namer) -> Result<Value> {
        let baselines = self.baselines();
        if baselines.is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        let mut values = Map::new();
        for (suffix, unit, _, _) in baselines {
            let name = namer.name(&self.target, &self.path, suffix);
            values.insert(
                suffix.to_string(),
                Value::String(format!("{}{unit}", placeholder(&name))),
            );
        }

        let resources = json!({"limits": values.clone(), "requests": values});
        Ok(self
            .path
            .with(Segment::Field("resources".to_string()))
            .fragment(resources)?)
    }
}

/// A container environment variable with a fixed set of allowed values
#[derive(Clone, Debug, PartialEq)]
pub struct EnvVarField {
    pub target: ObjectReference,
    /// Path to the container
    pub path: FieldPath,
    /// Name of the variable
    pub name: String,
    /// The current value, `None` if the variable is created by the patch
    pub value: Option<String>,
    pub values: Vec<String>,
}

impl EnvVarField {
    fn suffix(&self) -> String {
        self.name.to_lowercase()
    }

    fn value_path(&self) -> FieldPath {
        self.path
            .with(Segment::Field("env".to_string()))
            .with(Segment::Match {
                key: MERGE_KEY.to_string(),
                value: self.name.clone(),
            })
            .with(Segment::Field("value".to_string()))
    }
}

impl PatchSource for EnvVarField {
    fn parameters(&self, namer: &Namer) -> Result<Vec<Parameter>> {
        if self.values.is_empty() {
            return Ok(vec![]);
        }

        let mut values = self.values.clone();
        let baseline = match &self.value {
            Some(v) => {
                if !values.contains(v) {
                    values.push(v.clone());
                }
                v.clone()
            }
            None => values[0].clone(),
        };

        let name = namer.name(&self.target, &self.value_path(), &self.suffix());
        Ok(vec![Parameter::categorical(name, values).with_baseline(baseline)])
    }

    fn patch(&self, namer: &Namer) -> Result<Value> {
        if self.values.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        let path = self.value_path();
        let name = namer.name(&self.target, &path, &self.suffix());
        Ok(path.fragment(Value::String(placeholder(&name)))?)
    }
}

/// A field found by a selector
#[derive(Clone, Debug, PartialEq)]
pub enum TunableField {
    Replicas(ReplicaField),
    ContainerResources(ContainerResourcesField),
    EnvVar(EnvVarField),
}

impl TunableField {
    pub fn target(&self) -> &ObjectReference {
        match self {
            TunableField::Replicas(f) => &f.target,
            TunableField::ContainerResources(f) => &f.target,
            TunableField::EnvVar(f) => &f.target,
        }
    }

    /// The path used to name the field parameters
    ///
    /// Environment variables are named after the variable entry rather than the
    /// container, so they never share a name with the container resources.
    pub fn path(&self) -> FieldPath {
        match self {
            TunableField::Replicas(f) => f.path.clone(),
            TunableField::ContainerResources(f) => f.path.clone(),
            TunableField::EnvVar(f) => f.value_path(),
        }
    }

    /// Suffixes of the parameters the field produces, empty if the field is not tunable
    pub fn suffixes(&self) -> Vec<String> {
        match self {
            TunableField::Replicas(f) => f
                .baseline()
                .map(|_| vec![ReplicaField::SUFFIX.to_string()])
                .unwrap_or_default(),
            TunableField::ContainerResources(f) => f
                .baselines()
                .into_iter()
                .map(|(suffix, ..)| suffix.to_string())
                .collect(),
            TunableField::EnvVar(f) if f.values.is_empty() => vec![],
            TunableField::EnvVar(f) => vec![f.suffix()],
        }
    }
}

impl PatchSource for TunableField {
    fn parameters(&self, namer: &Namer) -> Result<Vec<Parameter>> {
        match self {
            TunableField::Replicas(f) => f.parameters(namer),
            TunableField::ContainerResources(f) => f.parameters(namer),
            TunableField::EnvVar(f) => f.parameters(namer),
        }
    }

    fn patch(&self, namer: &Namer) -> Result<Value> {
        match self {
            TunableField::Replicas(f) => f.patch(namer),
            TunableField::ContainerResources(f) => f.patch(namer),
            TunableField::EnvVar(f) => f.patch(namer),
        }
    }
}
