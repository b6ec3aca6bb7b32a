//! Data association and importance weighting.
//!
//! For every particle, each body frame observation is moved into the world frame through the particle's
//! pose and matched to the nearest landmark inside the sensor range. The particle weight is then the
//! product of axis-independent bivariate Gaussian densities
//!
//! $$
//! p(dx, dy) = \frac{1}{2 \pi \sigma_x \sigma_y} \exp\left( -\left( \frac{dx^2}{2\sigma_x^2} + \frac{dy^2}{2\sigma_y^2} \right) \right)
//! $$
//!
//! evaluated at the offset between each transformed observation and its associated landmark. Once every
//! particle has been scored the weights are normalized across the set.
use log::{debug, warn};
use nalgebra::Point2;

use std::f64::consts::PI;

use crate::Pose;
use crate::config::RangeOrigin;
use crate::error::{FilterError, Result, check_finite, check_positive_std};
use crate::map::{Landmark, LandmarkMap, Observation};
use crate::particle::{Associations, ParticleSet};

/// Density of an axis-independent bivariate Gaussian at offset `(dx, dy)` from its mean.
pub fn bivariate_gaussian(dx: f64, dy: f64, std_x: f64, std_y: f64) -> f64 {
    let normalizer = 1.0 / (2.0 * PI * std_x * std_y);
    let exponent = dx * dx / (2.0 * std_x * std_x) + dy * dy / (2.0 * std_y * std_y);
    normalizer * (-exponent).exp()
}

/// Nearest landmark to `sensed` (a world frame observation) among the landmarks passing the range gate.
///
/// The running best starts at `sensor_range` and is only replaced on a strictly smaller distance, so the
/// first landmark in map order wins ties and nothing farther than `sensor_range` from the observation is
/// ever returned.
pub fn associate<'a>(
    pose: &Pose,
    sensed: &Point2<f64>,
    map: &'a LandmarkMap,
    sensor_range: f64,
    origin: RangeOrigin,
) -> Option<&'a Landmark> {
    let mut min_dist = sensor_range;
    let mut best = None;
    for landmark in map {
        let to_observation = (landmark.x - sensed.x).hypot(landmark.y - sensed.y);
        let gate = match origin {
            RangeOrigin::Particle => pose.distance_to(landmark.x, landmark.y),
            RangeOrigin::Observation => to_observation,
        };
        if gate <= sensor_range && to_observation < min_dist {
            min_dist = to_observation;
            best = Some(landmark);
        }
    }
    best
}

/// Summary of one weighting step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightingSummary {
    /// Sum of the raw weights before normalization
    pub weight_sum: f64,
    /// True when the raw weights summed to zero (or overflowed) and were reset to uniform
    pub uniform_reset: bool,
    /// Total associations made across all particles
    pub associations: usize,
    /// Particles for which no observation could be associated
    pub unassociated_particles: usize,
}

/// Weighting step of the filter.
#[derive(Clone, Copy, Debug)]
pub struct ObservationWeighter {
    range_origin: RangeOrigin,
    unassociated_weight: f64,
}
impl Default for ObservationWeighter {
    fn default() -> Self {
        ObservationWeighter::new(RangeOrigin::Particle, 1.0)
    }
}
impl ObservationWeighter {
    pub fn new(range_origin: RangeOrigin, unassociated_weight: f64) -> Self {
        ObservationWeighter {
            range_origin,
            unassociated_weight,
        }
    }
    pub fn range_origin(&self) -> RangeOrigin {
        self.range_origin
    }
    pub fn unassociated_weight(&self) -> f64 {
        self.unassociated_weight
    }

    /// Raw (unnormalized) likelihood of `observations` for a particle at `pose`, along with the
    /// associations that produced it. Inputs are assumed validated.
    pub fn likelihood(
        &self,
        pose: &Pose,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[Observation],
        map: &LandmarkMap,
    ) -> (f64, Associations) {
        let mut associations = Associations::with_capacity(observations.len());
        let mut weight = 1.0;
        for observation in observations {
            let sensed = pose.to_world(&observation.point());
            if let Some(landmark) = associate(pose, &sensed, map, sensor_range, self.range_origin) {
                associations.push(landmark.id, sensed);
                weight *= bivariate_gaussian(
                    sensed.x - landmark.x,
                    sensed.y - landmark.y,
                    std_landmark[0],
                    std_landmark[1],
                );
            }
        }
        if associations.is_empty() {
            weight = self.unassociated_weight;
        }
        (weight, associations)
    }

    /// Recomputes the weight and association record of every particle, then normalizes the weights.
    ///
    /// # Errors
    /// Rejects a negative or non-finite `sensor_range`, non-positive or non-finite landmark noise, and
    /// non-finite observations before any particle is touched.
    pub fn update_weights(
        &self,
        set: &mut ParticleSet,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[Observation],
        map: &LandmarkMap,
    ) -> Result<WeightingSummary> {
        if !(sensor_range.is_finite() && sensor_range >= 0.0) {
            return Err(FilterError::InvalidSensorRange(sensor_range));
        }
        check_positive_std("std_landmark[0]", std_landmark[0])?;
        check_positive_std("std_landmark[1]", std_landmark[1])?;
        for observation in observations {
            check_finite("observation.x", observation.x)?;
            check_finite("observation.y", observation.y)?;
        }

        let mut total_associations = 0;
        let mut unassociated_particles = 0;
        for particle in set.particles_mut() {
            let (weight, associations) =
                self.likelihood(&particle.pose, sensor_range, std_landmark, observations, map);
            total_associations += associations.len();
            if associations.is_empty() {
                unassociated_particles += 1;
            }
            particle.weight = weight;
            particle.associations = Some(associations);
        }

        let weight_sum = set.weight_sum();
        let uniform_reset = !set.normalize_weights();
        if uniform_reset {
            warn!(
                "particle weights summed to {}; reset {} particles to uniform weight",
                weight_sum,
                set.len()
            );
        }
        debug!(
            "update_weights: {} observations, {} associations, {} unassociated particles, N_eff = {:.2}",
            observations.len(),
            total_associations,
            unassociated_particles,
            set.effective_sample_size()
        );
        Ok(WeightingSummary {
            weight_sum,
            uniform_reset,
            associations: total_associations,
            unassociated_particles,
        })
    }
}
