use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

use crate::error::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity '{0}' is empty or has no digits")]
    Empty(String),

    #[error("quantity '{quantity}' has an unknown suffix '{suffix}'")]
    UnknownSuffix { quantity: String, suffix: String },

    #[error("quantity '{0}' is not a number")]
    Invalid(String),

    #[error("quantity '{0}' is too large")]
    Overflow(String),
}

impl From<QuantityError> for Error {
    fn from(err: QuantityError) -> Self {
        Error::data_shape(err)
    }
}

const MEBI: i128 = 1 << 20;

/// A cluster resource quantity (e.g. `500m`, `1.5`, `512Mi`, `1e3`)
///
/// The value is kept with milli precision, rounding up any finer digits the same way the
/// cluster does when asked for milli values. The original representation is kept for
/// display and serialization.
#[derive(Clone, Debug)]
pub struct Quantity {
    repr: String,
    milli: i128,
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

fn ceil_div(a: i128, b: i128) -> i128 {
    if a >= 0 {
        (a + b - 1) / b
    } else {
        a / b
    }
}

/// Multiplier for the suffix, expressed as a (numerator, denominator) ratio of milli units
fn suffix_ratio(suffix: &str) -> Option<(i128, i128)> {
    let ratio = match suffix {
        "n" => (1, 1_000_000),
        "u" => (1, 1_000),
        "m" => (1, 1),
        "" => (1_000, 1),
        "k" => (1_000_000, 1),
        "M" => (1_000_000_000, 1),
        "G" => (1_000_000_000_000, 1),
        "T" => (1_000_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000_000, 1),
        "Ki" => (1_000 << 10, 1),
        "Mi" => (1_000 << 20, 1),
        "Gi" => (1_000 << 30, 1),
        "Ti" => (1_000 << 40, 1),
        "Pi" => (1_000 << 50, 1),
        "Ei" => (1_000 << 60, 1),
        exp if exp.starts_with(['e', 'E']) => {
            let exp: i32 = exp[1..].parse().ok()?;
            if exp.unsigned_abs() > 18 {
                return None;
            }
            let pow = 10i128.pow(exp.unsigned_abs());
            if exp >= 0 {
                (1_000 * pow, 1)
            } else {
                (1_000, pow)
            }
        }
        _ => return None,
    };
    Some(ratio)
}

impl Quantity {
    pub fn parse(s: &str) -> Result<Self, QuantityError> {
        let trimmed = s.trim();
        let (negative, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        let number_len = unsigned
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::Empty(s.to_string()));
        }
        if frac_part.contains('.') {
            return Err(QuantityError::Invalid(s.to_string()));
        }

        let overflow = || QuantityError::Overflow(s.to_string());
        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = digits.parse().map_err(|_| overflow())?;
        let scale = 10i128
            .checked_pow(frac_part.len() as u32)
            .ok_or_else(overflow)?;

        let (num, den) = suffix_ratio(suffix).ok_or_else(|| QuantityError::UnknownSuffix {
            quantity: s.to_string(),
            suffix: suffix.to_string(),
        })?;

        let numerator = mantissa.checked_mul(num).ok_or_else(overflow)?;
        let denominator = scale.checked_mul(den).ok_or_else(overflow)?;
        let milli = ceil_div(numerator, denominator);

        Ok(Quantity {
            repr: trimmed.to_string(),
            milli: if negative { -milli } else { milli },
        })
    }

    /// Create a quantity from a milli value, e.g. `from_milli(1500)` is `1500m`
    pub fn from_milli(milli: i64) -> Self {
        Quantity {
            repr: format!("{milli}m"),
            milli: milli.into(),
        }
    }

    /// The value in thousandths of a unit, rounded up
    pub fn milli_value(&self) -> i64 {
        self.milli.clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }

    /// The value in whole units, rounded up
    pub fn value(&self) -> i64 {
        ceil_div(self.milli, 1_000).clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }

    /// The value in mebibytes (2^20), rounded up
    pub fn mebi_value(&self) -> i64 {
        ceil_div(self.milli, 1_000 * MEBI).clamp(i64::MIN.into(), i64::MAX.into()) as i64
    }

    /// The value in multiples of the suffix (e.g. `Mi`), `None` unless it is a whole number
    pub fn exact_value(&self, suffix: &str) -> Option<i64> {
        let (num, den) = suffix_ratio(suffix)?;
        let scaled = self.milli.checked_mul(den)?;
        if scaled % num != 0 {
            return None;
        }
        i64::try_from(scaled / num).ok()
    }

    pub fn is_zero(&self) -> bool {
        self.milli == 0
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.repr)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // quantities may be written as strings or bare numbers
        let repr = match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(serde::de::Error::custom(format!(
                    "expected a quantity, found {other}"
                )))
            }
        };
        Quantity::parse(&repr).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_parses_cpu_quantities() {
        assert_eq!(Quantity::parse("500m").unwrap().milli_value(), 500);
        assert_eq!(Quantity::parse("1").unwrap().milli_value(), 1000);
        assert_eq!(Quantity::parse("1.5").unwrap().milli_value(), 1500);
        assert_eq!(Quantity::parse("0.1").unwrap().milli_value(), 100);
        assert_eq!(Quantity::parse("100u").unwrap().milli_value(), 1);
    }

    #[test]
    fn it_parses_memory_quantities() {
        assert_eq!(Quantity::parse("512Mi").unwrap().mebi_value(), 512);
        assert_eq!(Quantity::parse("1Gi").unwrap().mebi_value(), 1024);
        assert_eq!(Quantity::parse("1G").unwrap().mebi_value(), 954);
        assert_eq!(Quantity::parse("134217728").unwrap().mebi_value(), 128);
        assert_eq!(Quantity::parse("1e3").unwrap().value(), 1000);
        assert_eq!(Quantity::parse("2k").unwrap().value(), 2000);
    }

    #[test]
    fn it_reads_whole_multiples_of_a_suffix() {
        assert_eq!(Quantity::parse("1Gi").unwrap().exact_value("Mi"), Some(1024));
        assert_eq!(Quantity::parse("1G").unwrap().exact_value("Mi"), None);
        assert_eq!(Quantity::parse("1G").unwrap().exact_value("M"), Some(1000));
        assert_eq!(Quantity::parse("1500k").unwrap().exact_value("M"), None);
    }

    #[test]
    fn it_handles_signs_and_zero() {
        assert_eq!(Quantity::parse("-1").unwrap().milli_value(), -1000);
        assert_eq!(Quantity::parse("+2").unwrap().value(), 2);
        assert!(Quantity::parse("0").unwrap().is_zero());
    }

    #[test]
    fn it_rejects_invalid_quantities() {
        assert_eq!(
            Quantity::parse(""),
            Err(QuantityError::Empty("".to_string()))
        );
        assert_eq!(
            Quantity::parse("1.2.3"),
            Err(QuantityError::Invalid("1.2.3".to_string()))
        );
        assert!(matches!(
            Quantity::parse("12parsecs"),
            Err(QuantityError::UnknownSuffix { .. })
        ));
    }

    #[test]
    fn it_deserializes_strings_and_numbers() {
        let q: Quantity = serde_json::from_str("\"250m\"").unwrap();
        assert_eq!(q.milli_value(), 250);
        let q: Quantity = serde_json::from_str("0.75").unwrap();
        assert_eq!(q.milli_value(), 750);
        assert_eq!(serde_json::to_string(&q).unwrap(), "\"0.75\"");
    }
}
