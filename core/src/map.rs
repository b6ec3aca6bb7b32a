//! Landmark map and observation types.
//!
//! The map is validated once on construction (non-empty, unique ids of at least one, finite coordinates)
//! and is only ever borrowed by the filter afterwards.
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use std::collections::HashMap;
use std::fmt::{self, Display};

use crate::error::{FilterError, Result, check_finite};

/// A landmark with a known, fixed position in the world frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Identifier, unique within a map and at least 1
    pub id: i32,
    /// World frame x position in meters
    pub x: f64,
    /// World frame y position in meters
    pub y: f64,
}
impl Display for Landmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Landmark({}: {:.3}, {:.3})", self.id, self.x, self.y)
    }
}
impl Landmark {
    pub fn new(id: i32, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// A single landmark observation expressed in the body frame of the agent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Body frame x (forward) in meters
    pub x: f64,
    /// Body frame y (left) in meters
    pub y: f64,
}
impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Observation { x, y }
    }
    pub fn point(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}
impl From<(f64, f64)> for Observation {
    fn from(tuple: (f64, f64)) -> Self {
        Observation::new(tuple.0, tuple.1)
    }
}

/// Read-only collection of landmarks, kept in the order it was supplied.
///
/// Iteration order matters: data association keeps the first landmark that achieves the minimum distance.
#[derive(Clone, Debug)]
pub struct LandmarkMap {
    landmarks: Vec<Landmark>,
    index: HashMap<i32, usize>,
}
impl LandmarkMap {
    pub fn new(landmarks: Vec<Landmark>) -> Result<Self> {
        if landmarks.is_empty() {
            return Err(FilterError::EmptyLandmarkMap);
        }
        let mut index = HashMap::with_capacity(landmarks.len());
        for (i, landmark) in landmarks.iter().enumerate() {
            if landmark.id < 1 {
                return Err(FilterError::InvalidLandmarkId(landmark.id));
            }
            check_finite("landmark.x", landmark.x)?;
            check_finite("landmark.y", landmark.y)?;
            if index.insert(landmark.id, i).is_some() {
                return Err(FilterError::DuplicateLandmarkId(landmark.id));
            }
        }
        Ok(LandmarkMap { landmarks, index })
    }
    /// Builds a map from `(id, x, y)` triples.
    pub fn from_tuples(tuples: &[(i32, f64, f64)]) -> Result<Self> {
        Self::new(
            tuples
                .iter()
                .map(|&(id, x, y)| Landmark::new(id, x, y))
                .collect(),
        )
    }
    pub fn get(&self, id: i32) -> Option<&Landmark> {
        self.index.get(&id).map(|&i| &self.landmarks[i])
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Landmark> {
        self.landmarks.iter()
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    /// Always false for a constructed map; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
}
impl<'a> IntoIterator for &'a LandmarkMap {
    type Item = &'a Landmark;
    type IntoIter = std::slice::Iter<'a, Landmark>;
    fn into_iter(self) -> Self::IntoIter {
        self.landmarks.iter()
    }
}
