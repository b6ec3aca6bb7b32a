//! Error types for the landmark particle filter

use thiserror::Error;

/// Errors raised at the boundary of the filter before any numeric work is done.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("particle filter has not been initialized")]
    NotInitialized,

    #[error("particle filter has already been initialized")]
    AlreadyInitialized,

    #[error("number of particles must be positive")]
    ZeroParticles,

    #[error("time step must be positive and finite, got {0}")]
    InvalidTimeStep(f64),

    #[error("standard deviation `{name}` must be non-negative and finite, got {value}")]
    InvalidStandardDeviation { name: &'static str, value: f64 },

    #[error("sensor range must be non-negative and finite, got {0}")]
    InvalidSensorRange(f64),

    #[error("input `{name}` must be finite, got {value}")]
    NonFiniteInput { name: &'static str, value: f64 },

    #[error("landmark map is empty")]
    EmptyLandmarkMap,

    #[error("landmark id must be >= 1, got {0}")]
    InvalidLandmarkId(i32),

    #[error("duplicate landmark id {0}")]
    DuplicateLandmarkId(i32),

    #[error("association record lengths differ: {ids} ids, {sense_x} x, {sense_y} y")]
    MismatchedAssociations {
        ids: usize,
        sense_x: usize,
        sense_y: usize,
    },

    #[error("cannot resample from degenerate weights: {0}")]
    DegenerateWeights(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Rejects negative, NaN, or infinite standard deviations.
pub(crate) fn check_std(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidStandardDeviation { name, value })
    }
}

/// Like [`check_std`] but also rejects zero, for noise terms that end up in a denominator.
pub(crate) fn check_positive_std(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidStandardDeviation { name, value })
    }
}

pub(crate) fn check_finite(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FilterError::NonFiniteInput { name, value })
    }
}
