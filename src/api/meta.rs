use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;
use std::time;

/// Metadata shared by every record
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ObjectMeta {
    /// Add a label unless it is already set
    pub fn add_label(&mut self, key: &str, value: &str) {
        self.labels
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Add a finalizer if not already present
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.finalizers.iter().any(|f| f == finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Remove a finalizer, returning `true` if it was present
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let len = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != len
    }
}

/// A value that is either a 32-bit integer or a string
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i32),
    String(String),
}

impl IntOrString {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            IntOrString::Int(v) => Some(*v),
            IntOrString::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            IntOrString::Int(_) => None,
            IntOrString::String(s) => Some(s),
        }
    }
}

impl Display for IntOrString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntOrString::Int(v) => write!(f, "{v}"),
            IntOrString::String(s) => f.write_str(s),
        }
    }
}

impl From<i32> for IntOrString {
    fn from(v: i32) -> Self {
        IntOrString::Int(v)
    }
}

impl From<&str> for IntOrString {
    fn from(s: &str) -> Self {
        IntOrString::String(s.to_string())
    }
}

impl From<String> for IntOrString {
    fn from(s: String) -> Self {
        IntOrString::String(s)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// The latest observation of one aspect of a record's state
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition<T> {
    #[serde(rename = "type")]
    pub type_: T,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

/// Insert or update a condition, only moving the transition time when the status changes
pub fn apply_condition<T: PartialEq>(
    conditions: &mut Vec<Condition<T>>,
    type_: T,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    time: Option<DateTime<Utc>>,
) {
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(condition) => {
            if condition.status != status {
                condition.status = status;
                condition.last_transition_time = time;
            }
            condition.reason = reason.to_string();
            condition.message = message.to_string();
        }
        None => conditions.push(Condition {
            type_,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: time,
        }),
    }
}

/// A duration written as a sequence of decimal numbers with units, e.g. `1h30m` or `90s`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration(time::Duration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(time::Duration::from_secs(secs))
    }

    pub fn as_std(&self) -> time::Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl std::ops::Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Self) -> Self::Output {
        Duration(self.0 + rhs.0)
    }
}

impl From<time::Duration> for Duration {
    fn from(d: time::Duration) -> Self {
        Self(d)
    }
}

impl FromStr for Duration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid duration '{s}'");
        if s == "0" {
            return Ok(Duration::default());
        }

        let mut total = 0f64;
        let mut rest = s;
        if rest.is_empty() {
            return Err(invalid());
        }
        while !rest.is_empty() {
            let num_len = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(invalid)?;
            let (num, tail) = rest.split_at(num_len);
            let num: f64 = num.parse().map_err(|_| invalid())?;
            let unit_len = tail
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(tail.len());
            let (unit, tail) = tail.split_at(unit_len);
            let scale = match unit {
                "ns" => 1e-9,
                "us" | "µs" => 1e-6,
                "ms" => 1e-3,
                "s" => 1.0,
                "m" => 60.0,
                "h" => 3600.0,
                _ => return Err(invalid()),
            };
            total += num * scale;
            rest = tail;
        }

        Ok(Duration(time::Duration::from_secs_f64(total)))
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let millis = self.0.subsec_millis();
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let seconds = if millis > 0 {
            format!("{s}.{}", format!("{millis:03}").trim_end_matches('0'))
        } else {
            s.to_string()
        };

        if h > 0 {
            write!(f, "{h}h{m}m{seconds}s")
        } else if m > 0 {
            write!(f, "{m}m{seconds}s")
        } else {
            write!(f, "{seconds}s")
        }
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_parses_and_formats_durations() {
        let d: Duration = "2m".parse().unwrap();
        assert_eq!(d.as_std().as_secs(), 120);
        assert_eq!(d.to_string(), "2m0s");

        let d: Duration = "1h30m15s".parse().unwrap();
        assert_eq!(d.as_std().as_secs(), 5415);
        assert_eq!(d.to_string(), "1h30m15s");

        let d: Duration = "1.5s".parse().unwrap();
        assert_eq!(d.to_string(), "1.5s");

        assert_eq!("0".parse::<Duration>().unwrap().to_string(), "0s");
        assert!("10".parse::<Duration>().is_err());
        assert!("5 minutes".parse::<Duration>().is_err());
    }

    #[test]
    fn it_serializes_int_or_string_untagged() {
        assert_eq!(serde_json::to_string(&IntOrString::Int(3)).unwrap(), "3");
        assert_eq!(
            serde_json::from_str::<IntOrString>("\"fast\"").unwrap(),
            IntOrString::from("fast")
        );
    }

    #[test]
    fn it_only_moves_transition_time_on_status_changes() {
        let t0 = DateTime::from_timestamp(0, 0);
        let t1 = DateTime::from_timestamp(60, 0);
        let mut conditions = Vec::new();
        apply_condition(&mut conditions, "Ready", ConditionStatus::False, "", "", t0);
        apply_condition(&mut conditions, "Ready", ConditionStatus::False, "Waiting", "", t1);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, t0);
        assert_eq!(conditions[0].reason, "Waiting");

        apply_condition(&mut conditions, "Ready", ConditionStatus::True, "", "", t1);
        assert_eq!(conditions[0].last_transition_time, t1);
    }
}
