use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors raised when a model invariant would be violated
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("x-scale needs at least 2 values, got {0}")]
    TooShort(usize),
    #[error("x-scale is not strictly increasing at position {0}")]
    NotIncreasing(usize),
    #[error("x-scale contains a non-finite value at position {0}")]
    NotFinite(usize),
    #[error("{x} x values cannot describe {y} y values")]
    LengthMismatch { x: usize, y: usize },
    #[error("{errors} error values for {y} y values")]
    ErrorLengthMismatch { errors: usize, y: usize },
}

// ---------------------------------------------------------------------------
// AttributeValue – a single entry of an attribute map
// ---------------------------------------------------------------------------

/// A dynamically-typed attribute value attached to a DataSet or Spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    /// Cartesian position in metres.
    Position { x: f64, y: f64, z: f64 },
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Str(s) => write!(f, "{s}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v:.4}"),
            AttributeValue::IntList(ids) => {
                let parts: Vec<String> = ids.iter().map(|i| i.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            AttributeValue::FloatList(values) => {
                let parts: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
                write!(f, "[{}]", parts.join(","))
            }
            AttributeValue::Position { x, y, z } => write!(f, "({x:.4}, {y:.4}, {z:.4})"),
        }
    }
}

impl AttributeValue {
    /// Interpret the value as an `f64` where that makes sense.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Build a position from cylindrical coordinates (radius, azimuth in
    /// radians, height).
    pub fn cylindrical(r: f64, angle: f64, z: f64) -> Self {
        AttributeValue::Position {
            x: r * angle.cos(),
            y: r * angle.sin(),
            z,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Str(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Str(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// XScale – bin boundaries or point positions
// ---------------------------------------------------------------------------

/// Strictly increasing x values, either uniformly spaced or explicit.
/// Deserialising goes through the same checks as the constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedXScale")]
pub enum XScale {
    Uniform { start: f64, end: f64, num_x: usize },
    Variable(Vec<f64>),
}

#[derive(Deserialize)]
enum UncheckedXScale {
    Uniform { start: f64, end: f64, num_x: usize },
    Variable(Vec<f64>),
}

impl TryFrom<UncheckedXScale> for XScale {
    type Error = ModelError;

    fn try_from(raw: UncheckedXScale) -> Result<Self, Self::Error> {
        match raw {
            UncheckedXScale::Uniform { start, end, num_x } => XScale::uniform(start, end, num_x),
            UncheckedXScale::Variable(values) => XScale::variable(values),
        }
    }
}

impl XScale {
    pub fn uniform(start: f64, end: f64, num_x: usize) -> Result<Self, ModelError> {
        if num_x < 2 {
            return Err(ModelError::TooShort(num_x));
        }
        if !start.is_finite() {
            return Err(ModelError::NotFinite(0));
        }
        if !end.is_finite() {
            return Err(ModelError::NotFinite(num_x - 1));
        }
        if end <= start {
            return Err(ModelError::NotIncreasing(num_x - 1));
        }
        Ok(XScale::Uniform { start, end, num_x })
    }

    pub fn variable(values: Vec<f64>) -> Result<Self, ModelError> {
        if values.len() < 2 {
            return Err(ModelError::TooShort(values.len()));
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NotFinite(i));
        }
        if let Some(i) = values.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ModelError::NotIncreasing(i + 1));
        }
        Ok(XScale::Variable(values))
    }

    pub fn len(&self) -> usize {
        match self {
            XScale::Uniform { num_x, .. } => *num_x,
            XScale::Variable(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn start(&self) -> Option<f64> {
        match self {
            XScale::Uniform { start, .. } => Some(*start),
            XScale::Variable(v) => v.first().copied(),
        }
    }

    pub fn end(&self) -> Option<f64> {
        match self {
            XScale::Uniform { end, .. } => Some(*end),
            XScale::Variable(v) => v.last().copied(),
        }
    }

    /// Materialise every x value.
    pub fn values(&self) -> Vec<f64> {
        match self {
            XScale::Uniform { start, end, num_x } => {
                let step = (end - start) / (*num_x as f64 - 1.0);
                (0..*num_x)
                    .map(|i| if i + 1 == *num_x { *end } else { start + step * i as f64 })
                    .collect()
            }
            XScale::Variable(v) => v.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one measured curve
// ---------------------------------------------------------------------------

/// One binned (histogram) or point spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub x: XScale,
    pub y: Vec<f64>,
    /// Same length as `y` when present.
    pub errors: Option<Vec<f64>>,
    /// 0 marks monitor data in the file decoders.
    pub group_id: i32,
    pub attributes: Attributes,
}

impl Spectrum {
    pub fn new(
        x: XScale,
        y: Vec<f64>,
        errors: Option<Vec<f64>>,
        group_id: i32,
    ) -> Result<Self, ModelError> {
        if x.len() != y.len() && x.len() != y.len() + 1 {
            return Err(ModelError::LengthMismatch { x: x.len(), y: y.len() });
        }
        if let Some(e) = &errors {
            if e.len() != y.len() {
                return Err(ModelError::ErrorLengthMismatch { errors: e.len(), y: y.len() });
            }
        }
        Ok(Spectrum {
            x,
            y,
            errors,
            group_id,
            attributes: Attributes::new(),
        })
    }

    /// Replace the errors with counting-statistics errors, `sqrt(y)`.
    pub fn with_sqrt_errors(mut self) -> Self {
        self.errors = Some(self.y.iter().map(|v| v.max(0.0).sqrt()).collect());
        self
    }

    pub fn is_histogram(&self) -> bool {
        self.x.len() == self.y.len() + 1
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

// ---------------------------------------------------------------------------
// DataSet – spectra sharing one family of x units
// ---------------------------------------------------------------------------

/// A named collection of spectra with shared metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub title: String,
    pub x_units: String,
    pub x_label: String,
    pub y_units: String,
    pub y_label: String,
    pub spectra: Vec<Spectrum>,
    pub attributes: Attributes,
}

impl DataSet {
    pub fn new(title: &str, x_units: &str, x_label: &str) -> Self {
        DataSet {
            title: title.to_string(),
            x_units: x_units.to_string(),
            x_label: x_label.to_string(),
            y_units: "Counts".to_string(),
            y_label: "Scattering Intensity".to_string(),
            spectra: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Number of spectra.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// Whether the DataSet holds no spectra.
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    pub fn set_attribute(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    /// First spectrum with the given group id.
    pub fn spectrum_by_group(&self, group_id: i32) -> Option<&Spectrum> {
        self.spectra.iter().find(|s| s.group_id == group_id)
    }

    pub fn spectrum_by_group_mut(&mut self, group_id: i32) -> Option<&mut Spectrum> {
        self.spectra.iter_mut().find(|s| s.group_id == group_id)
    }

    /// Smallest and largest x value over all spectra.
    pub fn x_range(&self) -> Option<(f64, f64)> {
        self.spectra
            .iter()
            .filter_map(|s| Some((s.x.start()?, s.x.end()?)))
            .fold(None, |acc, (lo, hi)| {
                Some(match acc {
                    None => (lo, hi),
                    Some((a, b)) => (a.min(lo), b.max(hi)),
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_scale_rejects_repeated_values() {
        assert_eq!(
            XScale::variable(vec![1.0, 2.0, 2.0]),
            Err(ModelError::NotIncreasing(2))
        );
        assert_eq!(XScale::variable(vec![1.0]), Err(ModelError::TooShort(1)));
    }

    #[test]
    fn uniform_scale_materialises_endpoints() {
        let xs = XScale::uniform(10.0, 20.0, 6).unwrap();
        assert_eq!(xs.values(), vec![10.0, 12.0, 14.0, 16.0, 18.0, 20.0]);
    }

    #[test]
    fn spectrum_checks_lengths() {
        let x = XScale::variable(vec![0.0, 1.0, 2.0]).unwrap();
        assert!(Spectrum::new(x.clone(), vec![1.0, 2.0], None, 1).unwrap().is_histogram());
        assert!(Spectrum::new(x.clone(), vec![1.0], None, 1).is_err());
        assert_eq!(
            Spectrum::new(x, vec![1.0, 2.0], Some(vec![1.0]), 1),
            Err(ModelError::ErrorLengthMismatch { errors: 1, y: 2 })
        );
    }

    #[test]
    fn sqrt_errors_clamp_negative_counts() {
        let x = XScale::variable(vec![0.0, 1.0, 2.0]).unwrap();
        let s = Spectrum::new(x, vec![4.0, -1.0], None, 1).unwrap().with_sqrt_errors();
        assert_eq!(s.errors, Some(vec![2.0, 0.0]));
    }

    #[test]
    fn x_range_spans_all_spectra() {
        let mut ds = DataSet::new("t", "Time(us)", "Time-of-flight");
        ds.spectra.push(
            Spectrum::new(XScale::variable(vec![5.0, 6.0]).unwrap(), vec![1.0], None, 1).unwrap(),
        );
        ds.spectra.push(
            Spectrum::new(XScale::variable(vec![2.0, 4.0]).unwrap(), vec![1.0], None, 2).unwrap(),
        );
        assert_eq!(ds.x_range(), Some((2.0, 6.0)));
    }

    #[test]
    fn deserialising_checks_the_scale() {
        assert!(serde_json::from_str::<XScale>(r#"{"Variable":[]}"#).is_err());
        assert!(serde_json::from_str::<XScale>(r#"{"Variable":[2.0,1.0]}"#).is_err());
        assert!(
            serde_json::from_str::<XScale>(r#"{"Uniform":{"start":1.0,"end":1.0,"num_x":5}}"#).is_err()
        );
        let ok: XScale = serde_json::from_str(r#"{"Variable":[1.0,2.0]}"#).unwrap();
        assert_eq!(ok.end(), Some(2.0));
    }

    #[test]
    fn empty_scale_has_no_range() {
        let mut ds = DataSet::new("t", "Time(us)", "Time-of-flight");
        ds.spectra.push(Spectrum {
            x: XScale::Variable(Vec::new()),
            ..Spectrum::new(XScale::variable(vec![1.0, 2.0]).unwrap(), vec![1.0], None, 1).unwrap()
        });
        assert_eq!(ds.x_range(), None);
    }
}
