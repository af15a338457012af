use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width that student ids are zero-padded to.
pub const ID_WIDTH: usize = 3;

/// Added to the cosine denominator so degenerate (all-zero) vectors score 0.0
/// instead of producing NaN.
pub const SIMILARITY_EPSILON: f32 = 1e-6;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp the box to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `(x, y, width, height)` in whole pixels, or `None` when nothing
    /// of the box lies inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor();
        let y0 = self.y.max(0.0).floor();
        let x1 = (self.x + self.width).min(frame_width as f32).ceil();
        let y1 = (self.y + self.height).min(frame_height as f32).ceil();

        if !(x1 > x0 && y1 > y0) {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Face embedding vector produced by the external embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self { values }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid student id {0:?}: expected a non-empty decimal number")]
pub struct InvalidId(pub String);

/// Normalized student id: ASCII digits, left-padded with zeros to [`ID_WIDTH`].
///
/// Every id entering the gallery, roster or ledger passes through here, so
/// `"7"`, `" 07 "` and `7` all compare equal as `"007"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: &str) -> Result<Self, InvalidId> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidId(raw.to_string()));
        }
        Ok(Self(format!("{trimmed:0>width$}", width = ID_WIDTH)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u32> for StudentId {
    fn from(n: u32) -> Self {
        Self(format!("{n:0>width$}", width = ID_WIDTH))
    }
}

impl FromStr for StudentId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StudentId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StudentId> for String {
    fn from(id: StudentId) -> Self {
        id.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Numeric order: a longer digit string is always the larger id.
impl Ord for StudentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for StudentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A registered person: display name plus normalized id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub id: StudentId,
}

impl Identity {
    pub fn new(name: impl Into<String>, id: StudentId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_id_padding() {
        assert_eq!(StudentId::parse("7").unwrap().as_str(), "007");
        assert_eq!(StudentId::parse(" 42 ").unwrap().as_str(), "042");
        assert_eq!(StudentId::parse("123").unwrap().as_str(), "123");
        assert_eq!(StudentId::parse("1234").unwrap().as_str(), "1234");
        assert_eq!(StudentId::from(5u32).as_str(), "005");
    }

    #[test]
    fn test_student_id_rejects_non_numeric() {
        assert!(StudentId::parse("").is_err());
        assert!(StudentId::parse("   ").is_err());
        assert!(StudentId::parse("ab1").is_err());
        assert!(StudentId::parse("-5").is_err());
    }

    #[test]
    fn test_student_id_equivalent_forms_compare_equal() {
        let a: StudentId = "7".parse().unwrap();
        let b: StudentId = "007".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a, StudentId::from(7u32));
    }

    #[test]
    fn test_student_id_numeric_order() {
        let mut ids: Vec<StudentId> = ["1000", "010", "002", "999"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        ids.sort();
        let sorted: Vec<&str> = ids.iter().map(|i| i.as_str()).collect();
        assert_eq!(sorted, vec!["002", "010", "999", "1000"]);
    }

    #[test]
    fn test_student_id_serde_normalizes() {
        let id: StudentId = serde_json::from_str("\"9\"").unwrap();
        assert_eq!(id.as_str(), "009");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"009\"");
        assert!(serde_json::from_str::<StudentId>("\"x\"").is_err());
    }

    #[test]
    fn test_bbox_clamp_inside() {
        let b = BoundingBox { x: 10.0, y: 20.0, width: 30.0, height: 40.0, confidence: 1.0 };
        assert_eq!(b.clamp_to(100, 100), Some((10, 20, 30, 40)));
    }

    #[test]
    fn test_bbox_clamp_partially_outside() {
        let b = BoundingBox { x: -10.0, y: 90.0, width: 30.0, height: 40.0, confidence: 1.0 };
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 20, 10)));
    }

    #[test]
    fn test_bbox_clamp_outside() {
        let b = BoundingBox { x: 200.0, y: 0.0, width: 30.0, height: 40.0, confidence: 1.0 };
        assert_eq!(b.clamp_to(100, 100), None);
    }
}
