//! Particles, the particle set, and the per-step association diagnostics.
//!
//! A [`Particle`] is one weighted pose hypothesis. The [`ParticleSet`] is the fixed-size belief made of N
//! particles together with the reductions used to summarise it (weighted/unweighted mean, highest weight,
//! covariance, effective sample size).
//!
//! The association record produced by the weighting step is kept in a separate [`Associations`] structure
//! hanging off each particle. It describes the most recent weighting step only and is replaced wholesale
//! the next time the particle is weighted.
use nalgebra::{Matrix3, Point2, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Debug, Display};

use crate::error::{FilterError, Result};
use crate::{Pose, wrap_to_pi};

/// Coordinate selector for [`Associations::sense_coord_string`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

/// Landmark associations made for one particle during the most recent weighting step.
///
/// `ids[k]` is the landmark matched to the observation whose world frame position was
/// `(sense_x[k], sense_y[k])`. The three sequences always have the same length.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Associations {
    ids: Vec<i32>,
    sense_x: Vec<f64>,
    sense_y: Vec<f64>,
}
impl Associations {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_capacity(capacity: usize) -> Self {
        Associations {
            ids: Vec::with_capacity(capacity),
            sense_x: Vec::with_capacity(capacity),
            sense_y: Vec::with_capacity(capacity),
        }
    }
    /// Builds a record from three parallel sequences, rejecting mismatched lengths.
    pub fn from_parts(ids: Vec<i32>, sense_x: Vec<f64>, sense_y: Vec<f64>) -> Result<Self> {
        if ids.len() != sense_x.len() || ids.len() != sense_y.len() {
            return Err(FilterError::MismatchedAssociations {
                ids: ids.len(),
                sense_x: sense_x.len(),
                sense_y: sense_y.len(),
            });
        }
        Ok(Associations {
            ids,
            sense_x,
            sense_y,
        })
    }
    pub fn push(&mut self, id: i32, sensed: Point2<f64>) {
        self.ids.push(id);
        self.sense_x.push(sensed.x);
        self.sense_y.push(sensed.y);
    }
    pub fn ids(&self) -> &[i32] {
        &self.ids
    }
    pub fn sense_x(&self) -> &[f64] {
        &self.sense_x
    }
    pub fn sense_y(&self) -> &[f64] {
        &self.sense_y
    }
    pub fn len(&self) -> usize {
        self.ids.len()
    }
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
    /// Landmark ids separated by single spaces, e.g. `"1 4 7"`.
    pub fn ids_string(&self) -> String {
        join(self.ids.iter())
    }
    /// Sensed world coordinates along one axis separated by single spaces.
    pub fn sense_coord_string(&self, axis: Axis) -> String {
        match axis {
            Axis::X => join(self.sense_x.iter()),
            Axis::Y => join(self.sense_y.iter()),
        }
    }
}

fn join<T: Display>(values: impl Iterator<Item = T>) -> String {
    values
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Index assigned at initialization. Copies made by resampling keep the id of their source.
    pub id: usize,
    pub pose: Pose,
    pub weight: f64,
    /// Diagnostics from the most recent weighting step, `None` until the particle is first weighted.
    pub associations: Option<Associations>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("theta", &self.pose.theta)
            .field("weight", &self.weight)
            .field(
                "associations",
                &self.associations.as_ref().map_or(0, |a| a.len()),
            )
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            pose,
            weight,
            associations: None,
        }
    }
    /// Replaces the association record with the three given parallel sequences.
    pub fn set_associations(
        &mut self,
        ids: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        self.associations = Some(Associations::from_parts(ids, sense_x, sense_y)?);
        Ok(())
    }
}

/// Reduction used to collapse the particle set into a single pose estimate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum EstimateStrategy {
    /// Weight-averaged position with the heading averaged on the unit circle
    #[default]
    WeightedMean,
    /// Plain average over all particles, ignoring weights
    UnweightedMean,
    /// Pose of the particle carrying the largest weight
    HighestWeight,
}

/// Fixed-size, non-empty belief made of weighted pose hypotheses.
#[derive(Clone)]
pub struct ParticleSet {
    particles: Vec<Particle>,
}
impl Debug for ParticleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.weighted_mean();
        let min_weight = self
            .particles
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self.particles.iter().map(|p| p.weight).fold(0.0, f64::max);
        f.debug_struct("ParticleSet")
            .field("num_particles", &self.particles.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field(
                "mean_pose",
                &format_args!("({:.3}, {:.3}, {:.3} rad)", mean.x, mean.y, mean.theta),
            )
            .finish()
    }
}
impl ParticleSet {
    pub fn from_particles(particles: Vec<Particle>) -> Result<Self> {
        if particles.is_empty() {
            return Err(FilterError::ZeroParticles);
        }
        Ok(ParticleSet { particles })
    }
    pub fn len(&self) -> usize {
        self.particles.len()
    }
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub(crate) fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }
    pub fn weights(&self) -> Vec<f64> {
        self.particles.iter().map(|p| p.weight).collect()
    }
    pub fn weight_sum(&self) -> f64 {
        self.particles.iter().map(|p| p.weight).sum()
    }
    /// Divides every weight by the total. Falls back to uniform weights when the total is zero or not
    /// finite and returns `false` in that case.
    pub fn normalize_weights(&mut self) -> bool {
        let sum = self.weight_sum();
        if sum > 0.0 && sum.is_finite() {
            for particle in &mut self.particles {
                particle.weight /= sum;
            }
            true
        } else {
            let uniform = 1.0 / self.particles.len() as f64;
            for particle in &mut self.particles {
                particle.weight = uniform;
            }
            false
        }
    }
    /// N_eff = (Σw)² / Σw², which reduces to 1 / Σw² for normalized weights.
    pub fn effective_sample_size(&self) -> f64 {
        let sum = self.weight_sum();
        let sum_of_squares: f64 = self.particles.iter().map(|p| p.weight * p.weight).sum();
        if sum_of_squares > 0.0 {
            sum * sum / sum_of_squares
        } else {
            0.0
        }
    }
    pub fn estimate(&self, strategy: EstimateStrategy) -> Pose {
        match strategy {
            EstimateStrategy::WeightedMean => self.weighted_mean(),
            EstimateStrategy::UnweightedMean => self.unweighted_mean(),
            EstimateStrategy::HighestWeight => self.highest_weight().pose,
        }
    }
    /// Weighted mean pose. Weights need not be normalized; a set with no weight mass is averaged
    /// without weights.
    pub fn weighted_mean(&self) -> Pose {
        let sum = self.weight_sum();
        if !(sum > 0.0 && sum.is_finite()) {
            return self.unweighted_mean();
        }
        mean_pose(self.particles.iter().map(|p| (p.weight / sum, &p.pose)))
    }
    pub fn unweighted_mean(&self) -> Pose {
        let w = 1.0 / self.particles.len() as f64;
        mean_pose(self.particles.iter().map(|p| (w, &p.pose)))
    }
    /// Particle with the largest weight; the first one wins ties.
    pub fn highest_weight(&self) -> &Particle {
        let mut best = &self.particles[0];
        for particle in &self.particles[1..] {
            if particle.weight > best.weight {
                best = particle;
            }
        }
        best
    }
    /// Weighted covariance of `[x, y, theta]` about the weighted mean. Heading residuals are wrapped.
    pub fn covariance(&self) -> Matrix3<f64> {
        let sum = self.weight_sum();
        let n = self.particles.len() as f64;
        let mean = self.weighted_mean();
        let mut cov = Matrix3::<f64>::zeros();
        for particle in &self.particles {
            let w = if sum > 0.0 && sum.is_finite() {
                particle.weight / sum
            } else {
                1.0 / n
            };
            let diff = Vector3::new(
                particle.pose.x - mean.x,
                particle.pose.y - mean.y,
                wrap_to_pi(particle.pose.theta - mean.theta),
            );
            cov += w * diff * diff.transpose();
        }
        cov
    }
}
impl<'a> IntoIterator for &'a ParticleSet {
    type Item = &'a Particle;
    type IntoIter = std::slice::Iter<'a, Particle>;
    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter()
    }
}

fn mean_pose<'a>(weighted: impl Iterator<Item = (f64, &'a Pose)>) -> Pose {
    let (mut x, mut y, mut sin, mut cos) = (0.0, 0.0, 0.0, 0.0);
    for (w, pose) in weighted {
        x += w * pose.x;
        y += w * pose.y;
        sin += w * pose.theta.sin();
        cos += w * pose.theta.cos();
    }
    Pose::new(x, y, sin.atan2(cos))
}
