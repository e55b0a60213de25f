//! Operation parameters: values, schemas and configurable limits.
//!
//! A [`Descriptor`](crate::Descriptor) carries parameters as an untyped
//! `name -> value` map so that it can be built from user input or
//! deserialized from JSON. Each operation kind declares a schema of
//! [`ParamSpec`]s whose ranges come from [`Limits`]; the
//! [`Handler`](crate::Handler) checks descriptors against the schema
//! before any pixel is touched.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::OpError;

/// A single parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl ParamValue {
    /// Integer view. Floats are not coerced.
    #[must_use]
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(_) => None,
        }
    }

    /// Float view. Integers widen losslessly for the ranges used here.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v:?}"),
        }
    }
}

impl FromStr for ParamValue {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(v) = s.parse::<i64>() {
            return Ok(Self::Int(v));
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Self::Float(v)),
            _ => Err(format!("`{s}` is not a number")),
        }
    }
}

/// Named parameters of a descriptor, ordered by name.
pub type Params = BTreeMap<String, ParamValue>;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// Whole number; floats are rejected.
    Int,
    /// Any finite number; integers are accepted.
    Float,
}

/// Inclusive numeric range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    /// Smallest accepted value.
    pub min: f64,
    /// Largest accepted value.
    pub max: f64,
}

impl Range {
    /// Create a range.
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the range (bounds included).
    #[must_use]
    pub fn contains(self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Schema entry for one parameter of one operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParamSpec {
    /// Name used in descriptors.
    pub name: &'static str,
    /// Declared type.
    pub kind: ParamKind,
    /// Accepted values.
    pub range: Range,
    /// Value used when a descriptor is built with defaults.
    pub default: ParamValue,
}

impl ParamSpec {
    /// Check a (possibly missing) value against this spec.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::InvalidParameter`] if the value is missing,
    /// has the wrong type, is not finite, or lies outside the range.
    pub fn check(&self, value: Option<ParamValue>) -> Result<ParamValue, OpError> {
        let Some(value) = value else {
            return Err(OpError::invalid(self.name, "required parameter is missing"));
        };
        if self.kind == ParamKind::Int && value.as_int().is_none() {
            return Err(OpError::invalid(
                self.name,
                format!("expected an integer, got {value}"),
            ));
        }
        let v = value.as_float();
        if !v.is_finite() || !self.range.contains(v) {
            return Err(OpError::invalid(
                self.name,
                format!("{value} is outside {}", self.range),
            ));
        }
        Ok(value)
    }
}

/// Configurable parameter ranges.
///
/// Defaults are the ranges the interactive controls offered; hosts may
/// widen or narrow them (e.g. allow more Otsu classes for 16-bit work).
/// Kernels still enforce their own hard floors (at least two classes,
/// at least one iteration) regardless of what is configured here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Number of Multi-Otsu classes.
    pub otsu_classes: Range,
    /// Chan-Vese iteration budget.
    pub chan_vese_iterations: Range,
    /// Morphological snakes iteration count.
    pub snake_iterations: Range,
    /// Morphological snakes smoothing rounds per iteration.
    pub snake_smoothing: Range,
    /// Edge magnitude threshold.
    pub edge_threshold: Range,
}

impl Limits {
    /// Default Multi-Otsu class count.
    pub const DEFAULT_OTSU_CLASSES: i64 = 3;
    /// Default Chan-Vese iteration budget.
    pub const DEFAULT_CHAN_VESE_ITERATIONS: i64 = 200;
    /// Default morphological snakes iteration count.
    pub const DEFAULT_SNAKE_ITERATIONS: i64 = 200;
    /// Default morphological snakes smoothing rounds.
    pub const DEFAULT_SNAKE_SMOOTHING: i64 = 3;
    /// Default edge threshold (100 on a 0-255 slider).
    pub const DEFAULT_EDGE_THRESHOLD: f64 = 100.0 / 255.0;

    /// Check that every range is well formed.
    ///
    /// # Errors
    ///
    /// Returns [`OpError::InvalidParameter`] naming the first range whose
    /// bounds are not finite or whose `min` exceeds `max`.
    pub fn validate(&self) -> Result<(), OpError> {
        let ranges = [
            ("otsu_classes", self.otsu_classes),
            ("chan_vese_iterations", self.chan_vese_iterations),
            ("snake_iterations", self.snake_iterations),
            ("snake_smoothing", self.snake_smoothing),
            ("edge_threshold", self.edge_threshold),
        ];
        for (name, range) in ranges {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(OpError::invalid(name, format!("bad range {range}")));
            }
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            otsu_classes: Range::new(2.0, 5.0),
            chan_vese_iterations: Range::new(1.0, 1000.0),
            snake_iterations: Range::new(1.0, 1000.0),
            snake_smoothing: Range::new(0.0, 4.0),
            edge_threshold: Range::new(0.0, 1.0),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn classes_spec() -> ParamSpec {
        ParamSpec {
            name: "classes",
            kind: ParamKind::Int,
            range: Range::new(2.0, 5.0),
            default: ParamValue::Int(3),
        }
    }

    #[test]
    fn parse_prefers_integers() {
        assert_eq!("3".parse::<ParamValue>(), Ok(ParamValue::Int(3)));
        assert_eq!("0.25".parse::<ParamValue>(), Ok(ParamValue::Float(0.25)));
        assert!("abc".parse::<ParamValue>().is_err());
        assert!("NaN".parse::<ParamValue>().is_err());
    }

    #[test]
    fn check_accepts_value_in_range() {
        assert_eq!(
            classes_spec().check(Some(ParamValue::Int(2))),
            Ok(ParamValue::Int(2))
        );
        assert_eq!(
            classes_spec().check(Some(ParamValue::Int(5))),
            Ok(ParamValue::Int(5))
        );
    }

    #[test]
    fn check_rejects_missing_value() {
        let err = classes_spec().check(None).unwrap_err();
        assert!(matches!(err, OpError::InvalidParameter { ref name, .. } if name == "classes"));
    }

    #[test]
    fn check_rejects_out_of_range() {
        assert!(classes_spec().check(Some(ParamValue::Int(0))).is_err());
        assert!(classes_spec().check(Some(ParamValue::Int(6))).is_err());
    }

    #[test]
    fn check_rejects_float_for_int() {
        assert!(classes_spec().check(Some(ParamValue::Float(3.0))).is_err());
    }

    #[test]
    fn float_spec_accepts_integer() {
        let spec = ParamSpec {
            name: "threshold",
            kind: ParamKind::Float,
            range: Range::new(0.0, 1.0),
            default: ParamValue::Float(0.5),
        };
        assert!(spec.check(Some(ParamValue::Int(1))).is_ok());
        assert!(spec.check(Some(ParamValue::Float(f64::NAN))).is_err());
    }

    #[test]
    fn default_limits_are_valid() {
        assert!(Limits::default().validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let limits = Limits {
            edge_threshold: Range::new(1.0, 0.0),
            ..Limits::default()
        };
        assert!(matches!(
            limits.validate(),
            Err(OpError::InvalidParameter { ref name, .. }) if name == "edge_threshold"
        ));
    }

    #[test]
    fn limits_fill_missing_fields_from_defaults() {
        let limits: Limits =
            serde_json::from_str(r#"{"otsu_classes": {"min": 2.0, "max": 8.0}}"#).unwrap();
        assert_eq!(limits.otsu_classes, Range::new(2.0, 8.0));
        assert_eq!(limits.snake_smoothing, Limits::default().snake_smoothing);
    }

    #[test]
    fn untagged_values_deserialize() {
        let params: Params = serde_json::from_str(r#"{"classes": 3, "threshold": 0.5}"#).unwrap();
        assert_eq!(params.get("classes"), Some(&ParamValue::Int(3)));
        assert_eq!(params.get("threshold"), Some(&ParamValue::Float(0.5)));
    }
}
