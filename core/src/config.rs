//! Tunable configuration for the landmark particle filter.
//!
//! The configuration holds the parameters that stay fixed for the life of a filter (particle count, motion
//! model threshold, association and weighting policies, resampling and estimate strategies). Per-step noise
//! terms and control inputs are passed to the individual filter steps instead.
//!
//! ```
//! use landmark_pf::config::{FilterConfig, RangeOrigin};
//!
//! let cfg = FilterConfig {
//!     num_particles: 500,
//!     range_origin: RangeOrigin::Observation,
//!     ..FilterConfig::default()
//! };
//! assert!(cfg.validate().is_ok());
//! ```
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::error::{FilterError, Result};
use crate::particle::EstimateStrategy;
use crate::resample::ResamplingStrategy;

/// Default number of particles in the belief.
pub const DEFAULT_NUM_PARTICLES: usize = 100;
/// Default turn rate (rad/s) below which the straight-line motion model is used.
pub const DEFAULT_YAW_RATE_THRESHOLD: f64 = 0.001;
/// Default weight assigned to a particle that associated none of the observations.
pub const DEFAULT_UNASSOCIATED_WEIGHT: f64 = 1.0;

fn default_num_particles() -> usize {
    DEFAULT_NUM_PARTICLES
}
fn default_yaw_rate_threshold() -> f64 {
    DEFAULT_YAW_RATE_THRESHOLD
}
fn default_unassociated_weight() -> f64 {
    DEFAULT_UNASSOCIATED_WEIGHT
}

/// Point from which the sensor range gate is measured when searching for a landmark to associate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum RangeOrigin {
    /// Only landmarks within `sensor_range` of the particle position are candidates.
    #[default]
    Particle,
    /// Only landmarks within `sensor_range` of the transformed observation are candidates.
    Observation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of particles N. Fixed when the filter is initialized.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,

    /// Magnitude of the yaw rate (rad/s) at or below which the straight-line model replaces the
    /// constant-turn-rate model, avoiding the division by a near-zero turn rate.
    #[serde(default = "default_yaw_rate_threshold")]
    pub yaw_rate_threshold: f64,

    /// Weight given to a particle for which no observation could be associated.
    ///
    /// The default of 1.0 is the multiplicative identity. Note that this favours particles that see
    /// nothing over particles whose associations are poor; lower it to penalise them instead.
    #[serde(default = "default_unassociated_weight")]
    pub unassociated_weight: f64,

    /// Origin of the sensor range gate used during data association.
    #[serde(default)]
    pub range_origin: RangeOrigin,

    /// Strategy used to draw the next generation of particles.
    #[serde(default)]
    pub resampling: ResamplingStrategy,

    /// Reduction used by [`crate::filter::ParticleFilter::estimate`].
    #[serde(default)]
    pub estimate: EstimateStrategy,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: DEFAULT_NUM_PARTICLES,
            yaw_rate_threshold: DEFAULT_YAW_RATE_THRESHOLD,
            unassociated_weight: DEFAULT_UNASSOCIATED_WEIGHT,
            range_origin: RangeOrigin::default(),
            resampling: ResamplingStrategy::default(),
            estimate: EstimateStrategy::default(),
        }
    }
}

impl FilterConfig {
    /// Checks every field for values the numeric core cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(FilterError::ZeroParticles);
        }
        if !(self.yaw_rate_threshold.is_finite() && self.yaw_rate_threshold >= 0.0) {
            return Err(FilterError::Config(format!(
                "yaw_rate_threshold must be non-negative and finite, got {}",
                self.yaw_rate_threshold
            )));
        }
        if !(self.unassociated_weight.is_finite() && self.unassociated_weight >= 0.0) {
            return Err(FilterError::Config(format!(
                "unassociated_weight must be non-negative and finite, got {}",
                self.unassociated_weight
            )));
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
