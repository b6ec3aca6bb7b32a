//! The landmark particle filter.
//!
//! [`ParticleFilter`] owns the particle belief and drives the four stages of a filter cycle:
//!
//! 1. [`ParticleFilter::init`] draws N particles from a Gaussian around a first pose guess.
//! 2. [`ParticleFilter::prediction`] moves every particle through the bicycle motion model.
//! 3. [`ParticleFilter::update_weights`] scores every particle against landmark observations.
//! 4. [`ParticleFilter::resample`] draws a new generation in proportion to weight.
//!
//! Randomness is always supplied by the caller, so a seeded generator reproduces a run exactly. The filter
//! is a two-state machine: every operation other than `init` returns [`FilterError::NotInitialized`] until
//! `init` has succeeded once, and `init` itself returns [`FilterError::AlreadyInitialized`] afterwards.
use log::{debug, info};
use nalgebra::Matrix3;
use rand::Rng;

use std::fmt::{self, Debug};

use crate::Pose;
use crate::config::FilterConfig;
use crate::error::{FilterError, Result, check_finite};
use crate::map::{LandmarkMap, Observation};
use crate::motion::{MotionPredictor, PoseNoise};
use crate::observation::{ObservationWeighter, WeightingSummary};
use crate::particle::{Axis, EstimateStrategy, Particle, ParticleSet};

pub struct ParticleFilter {
    config: FilterConfig,
    predictor: MotionPredictor,
    weighter: ObservationWeighter,
    /// `None` until the filter has been initialized
    belief: Option<ParticleSet>,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ParticleFilter");
        debug
            .field("num_particles", &self.config.num_particles)
            .field("yaw_rate_threshold", &self.config.yaw_rate_threshold)
            .field("resampling", &self.config.resampling)
            .field("estimate", &self.config.estimate);
        match &self.belief {
            Some(belief) => debug.field("belief", belief),
            None => debug.field("belief", &"uninitialized"),
        };
        debug.finish()
    }
}
impl ParticleFilter {
    /// Creates an uninitialized filter.
    ///
    /// # Errors
    /// Returns the first problem [`FilterConfig::validate`] finds.
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(ParticleFilter {
            predictor: MotionPredictor::new(config.yaw_rate_threshold),
            weighter: ObservationWeighter::new(config.range_origin, config.unassociated_weight),
            belief: None,
            config,
        })
    }
    /// Shorthand for a default configuration with `num_particles` particles.
    pub fn with_particles(num_particles: usize) -> Result<Self> {
        ParticleFilter::new(FilterConfig {
            num_particles,
            ..FilterConfig::default()
        })
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
    pub fn is_initialized(&self) -> bool {
        self.belief.is_some()
    }

    /// Samples `num_particles` particles around `(x, y, theta)` with independent Gaussian noise of
    /// deviations `std = [σx, σy, σθ]`. Particles get ids `0..N` and weight `1.0`.
    pub fn init<R: Rng + ?Sized>(
        &mut self,
        x: f64,
        y: f64,
        theta: f64,
        std: [f64; 3],
        rng: &mut R,
    ) -> Result<()> {
        if self.belief.is_some() {
            return Err(FilterError::AlreadyInitialized);
        }
        check_finite("x", x)?;
        check_finite("y", y)?;
        check_finite("theta", theta)?;
        let noise = PoseNoise::new(std, ["std[0]", "std[1]", "std[2]"])?;
        let mean = Pose::new(x, y, theta);
        let particles = (0..self.config.num_particles)
            .map(|id| Particle::new(id, noise.perturb(&mean, rng), 1.0))
            .collect();
        self.belief = Some(ParticleSet::from_particles(particles)?);
        info!(
            "Initialized particle filter with {} particles around {}",
            self.config.num_particles, mean
        );
        Ok(())
    }

    /// Propagates every particle by `delta_t` seconds with commanded `velocity` and `yaw_rate`, adding
    /// process noise with deviations `std_pos = [σx, σy, σθ]`.
    pub fn prediction<R: Rng + ?Sized>(
        &mut self,
        delta_t: f64,
        std_pos: [f64; 3],
        velocity: f64,
        yaw_rate: f64,
        rng: &mut R,
    ) -> Result<()> {
        let belief = self.belief.as_mut().ok_or(FilterError::NotInitialized)?;
        self.predictor
            .predict(belief, delta_t, std_pos, velocity, yaw_rate, rng)
    }

    /// Weights every particle by the likelihood of the body frame `observations` given `map`, records
    /// the associations made, and normalizes the weights to sum to one.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: [f64; 2],
        observations: &[Observation],
        map: &LandmarkMap,
    ) -> Result<WeightingSummary> {
        let belief = self.belief.as_mut().ok_or(FilterError::NotInitialized)?;
        self.weighter
            .update_weights(belief, sensor_range, std_landmark, observations, map)
    }

    /// Replaces the belief with N particles drawn with probability proportional to weight using the
    /// configured strategy. The new generation is built in full before the old one is dropped.
    pub fn resample<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let belief = self.belief.as_mut().ok_or(FilterError::NotInitialized)?;
        let next = self.config.resampling.resample(belief.particles(), rng)?;
        *belief = ParticleSet::from_particles(next)?;
        debug!(
            "resample: {:?} drew {} particles",
            self.config.resampling,
            belief.len()
        );
        Ok(())
    }

    /// Resamples only when the effective sample size has dropped below `threshold_ratio * N`.
    ///
    /// Returns `true` if resampling was performed.
    pub fn resample_if_needed<R: Rng + ?Sized>(
        &mut self,
        threshold_ratio: f64,
        rng: &mut R,
    ) -> Result<bool> {
        if !(threshold_ratio.is_finite() && threshold_ratio >= 0.0) {
            return Err(FilterError::Config(format!(
                "resampling threshold ratio must be non-negative and finite, got {}",
                threshold_ratio
            )));
        }
        let n_eff = self.effective_sample_size()?;
        let threshold = threshold_ratio * self.num_particles() as f64;
        if n_eff < threshold {
            debug!("N_eff = {:.2} below {:.2}, resampling", n_eff, threshold);
            self.resample(rng)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn belief(&self) -> Result<&ParticleSet> {
        self.belief.as_ref().ok_or(FilterError::NotInitialized)
    }
    pub fn particles(&self) -> Result<&[Particle]> {
        Ok(self.belief()?.particles())
    }
    /// N_eff = (Σw)² / Σw²
    pub fn effective_sample_size(&self) -> Result<f64> {
        Ok(self.belief()?.effective_sample_size())
    }
    /// Pose estimate using the configured [`EstimateStrategy`].
    pub fn estimate(&self) -> Result<Pose> {
        self.estimate_with(self.config.estimate)
    }
    pub fn estimate_with(&self, strategy: EstimateStrategy) -> Result<Pose> {
        Ok(self.belief()?.estimate(strategy))
    }
    /// Particle with the largest weight. The lowest index wins ties.
    pub fn best_particle(&self) -> Result<&Particle> {
        Ok(self.belief()?.highest_weight())
    }
    /// Weighted sample covariance of `[x, y, theta]` about the weighted mean.
    pub fn covariance(&self) -> Result<Matrix3<f64>> {
        Ok(self.belief()?.covariance())
    }

    /// Overwrites the association record of the particle at `index`.
    ///
    /// # Errors
    /// [`FilterError::NotInitialized`] before `init`, [`FilterError::Config`] for an index outside the
    /// belief and [`FilterError::MismatchedAssociations`] when the three sequences differ in length.
    pub fn set_associations(
        &mut self,
        index: usize,
        ids: Vec<i32>,
        sense_x: Vec<f64>,
        sense_y: Vec<f64>,
    ) -> Result<()> {
        let belief = self.belief.as_mut().ok_or(FilterError::NotInitialized)?;
        let len = belief.len();
        let particle = belief.particles_mut().get_mut(index).ok_or_else(|| {
            FilterError::Config(format!("particle index {} out of range for {}", index, len))
        })?;
        particle.set_associations(ids, sense_x, sense_y)
    }
    /// Associated landmark ids of `particle` separated by spaces, empty if it has none.
    pub fn get_associations(particle: &Particle) -> String {
        particle
            .associations
            .as_ref()
            .map(|a| a.ids_string())
            .unwrap_or_default()
    }
    /// World frame sensed coordinates of `particle` along `axis` separated by spaces.
    pub fn get_sense_coord(particle: &Particle, axis: Axis) -> String {
        particle
            .associations
            .as_ref()
            .map(|a| a.sense_coord_string(axis))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::ResamplingStrategy;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::FRAC_PI_2;

    fn map() -> LandmarkMap {
        LandmarkMap::from_tuples(&[
            (1, 5.0, 3.0),
            (2, 2.0, 1.0),
            (3, 6.0, 1.0),
            (4, 7.0, 4.0),
            (5, 4.0, 7.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_new_rejects_bad_config() {
        assert_eq!(
            ParticleFilter::with_particles(0).unwrap_err(),
            FilterError::ZeroParticles
        );
        let config = FilterConfig {
            yaw_rate_threshold: -1.0,
            ..FilterConfig::default()
        };
        assert!(matches!(
            ParticleFilter::new(config),
            Err(FilterError::Config(_))
        ));
    }

    #[test]
    fn test_init_samples_around_guess() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut pf = ParticleFilter::with_particles(10_000).unwrap();
        assert!(!pf.is_initialized());
        pf.init(4983.0, 5029.0, 1.201, [2.0, 2.0, 0.05], &mut rng)
            .unwrap();
        assert!(pf.is_initialized());

        let particles = pf.particles().unwrap();
        assert_eq!(particles.len(), 10_000);
        for (i, p) in particles.iter().enumerate() {
            assert_eq!(p.id, i);
            assert_eq!(p.weight, 1.0);
            assert!(p.associations.is_none());
        }
        let mean = pf.estimate_with(EstimateStrategy::UnweightedMean).unwrap();
        assert_approx_eq!(mean.x, 4983.0, 0.1);
        assert_approx_eq!(mean.y, 5029.0, 0.1);
        assert_approx_eq!(mean.theta, 1.201, 0.005);
        let covariance = pf.covariance().unwrap();
        assert_approx_eq!(covariance[(0, 0)].sqrt(), 2.0, 0.1);
        assert_approx_eq!(covariance[(2, 2)].sqrt(), 0.05, 0.005);
    }

    #[test]
    fn test_zero_deviation_init_is_exact() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pf = ParticleFilter::with_particles(3).unwrap();
        pf.init(1.0, 2.0, 0.5, [0.0; 3], &mut rng).unwrap();
        for p in pf.particles().unwrap() {
            assert_eq!(p.pose, Pose::new(1.0, 2.0, 0.5));
        }
    }

    #[test]
    fn test_huge_heading_reductions_terminate() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pf = ParticleFilter::with_particles(4).unwrap();
        pf.init(0.0, 0.0, 1e17, [0.0; 3], &mut rng).unwrap();
        let covariance = pf.covariance().unwrap();
        assert!(covariance.iter().all(|v| v.is_finite()));
        let estimate = pf.estimate().unwrap();
        assert!(estimate.theta.abs() <= std::f64::consts::PI);
    }

    #[test]
    fn test_init_twice_is_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pf = ParticleFilter::with_particles(5).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.1; 3], &mut rng).unwrap();
        let before = pf.particles().unwrap().to_vec();
        assert_eq!(
            pf.init(9.0, 9.0, 0.0, [0.1; 3], &mut rng),
            Err(FilterError::AlreadyInitialized)
        );
        assert_eq!(pf.particles().unwrap(), before.as_slice());
    }

    #[test]
    fn test_init_rejects_bad_deviation() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pf = ParticleFilter::with_particles(5).unwrap();
        assert_eq!(
            pf.init(0.0, 0.0, 0.0, [0.1, 0.1, -0.01], &mut rng),
            Err(FilterError::InvalidStandardDeviation {
                name: "std[2]",
                value: -0.01
            })
        );
        assert!(!pf.is_initialized());
    }

    #[test]
    fn test_operations_before_init_fail() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut pf = ParticleFilter::with_particles(5).unwrap();
        let obs = [Observation::new(1.0, 0.0)];
        assert_eq!(
            pf.prediction(0.1, [0.1; 3], 1.0, 0.0, &mut rng),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(
            pf.update_weights(50.0, [0.3, 0.3], &obs, &map()),
            Err(FilterError::NotInitialized)
        );
        assert_eq!(pf.resample(&mut rng), Err(FilterError::NotInitialized));
        assert_eq!(pf.estimate(), Err(FilterError::NotInitialized));
        assert_eq!(
            pf.best_particle().unwrap_err(),
            FilterError::NotInitialized
        );
        assert_eq!(
            pf.set_associations(0, vec![], vec![], vec![]),
            Err(FilterError::NotInitialized)
        );
    }

    #[test]
    fn test_update_weights_normalizes_and_records() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pf = ParticleFilter::with_particles(200).unwrap();
        pf.init(4.0, 5.0, -FRAC_PI_2, [0.3, 0.3, 0.01], &mut rng)
            .unwrap();
        let observations = [Observation::new(2.0, 1.0), Observation::new(4.0, -2.0)];
        let summary = pf
            .update_weights(50.0, [0.3, 0.3], &observations, &map())
            .unwrap();
        assert!(!summary.uniform_reset);
        assert_eq!(summary.unassociated_particles, 0);

        let total: f64 = pf.particles().unwrap().iter().map(|p| p.weight).sum();
        assert_approx_eq!(total, 1.0, 1e-12);

        // The best particle sits close to the pose the observations were taken from
        let best = pf.best_particle().unwrap();
        assert_approx_eq!(best.pose.x, 4.0, 0.5);
        assert_approx_eq!(best.pose.y, 5.0, 0.5);
        assert_eq!(ParticleFilter::get_associations(best), "1 2");
        let sense_x = ParticleFilter::get_sense_coord(best, Axis::X);
        assert_eq!(sense_x.split(' ').count(), 2);
        assert!(!sense_x.ends_with(' '));
    }

    #[test]
    fn test_update_weights_without_observations_is_uniform() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pf = ParticleFilter::with_particles(4).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.5; 3], &mut rng).unwrap();
        let summary = pf.update_weights(50.0, [0.3, 0.3], &[], &map()).unwrap();
        assert_eq!(summary.unassociated_particles, 4);
        for p in pf.particles().unwrap() {
            assert_approx_eq!(p.weight, 0.25, 1e-12);
            assert_eq!(ParticleFilter::get_associations(p), "");
            assert_eq!(ParticleFilter::get_sense_coord(p, Axis::Y), "");
        }
        assert_approx_eq!(pf.effective_sample_size().unwrap(), 4.0, 1e-12);
    }

    #[test]
    fn test_update_weights_rejects_bad_inputs() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut pf = ParticleFilter::with_particles(4).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.5; 3], &mut rng).unwrap();
        let obs = [Observation::new(1.0, 0.0)];
        assert_eq!(
            pf.update_weights(-1.0, [0.3, 0.3], &obs, &map()),
            Err(FilterError::InvalidSensorRange(-1.0))
        );
        assert!(matches!(
            pf.update_weights(50.0, [0.0, 0.3], &obs, &map()),
            Err(FilterError::InvalidStandardDeviation { .. })
        ));
        // Nothing was weighted
        assert!(
            pf.particles()
                .unwrap()
                .iter()
                .all(|p| p.weight == 1.0 && p.associations.is_none())
        );
    }

    #[test]
    fn test_resample_keeps_size_and_draws_from_belief() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut pf = ParticleFilter::with_particles(50).unwrap();
        pf.init(4.0, 5.0, -FRAC_PI_2, [1.0, 1.0, 0.05], &mut rng)
            .unwrap();
        let observations = [Observation::new(2.0, 1.0), Observation::new(4.0, -2.0)];
        pf.update_weights(50.0, [0.3, 0.3], &observations, &map())
            .unwrap();
        let before = pf.particles().unwrap().to_vec();
        pf.resample(&mut rng).unwrap();
        let after = pf.particles().unwrap();
        assert_eq!(after.len(), 50);
        for p in after {
            assert_eq!(&before[p.id], p);
        }
    }

    #[test]
    fn test_resample_if_needed() {
        let mut rng = StdRng::seed_from_u64(9);
        let config = FilterConfig {
            num_particles: 100,
            resampling: ResamplingStrategy::Systematic,
            ..FilterConfig::default()
        };
        let mut pf = ParticleFilter::new(config).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.5; 3], &mut rng).unwrap();
        // Uniform weights: N_eff == N
        assert!(!pf.resample_if_needed(0.5, &mut rng).unwrap());
        pf.update_weights(
            50.0,
            [0.1, 0.1],
            &[Observation::new(4.0, 4.0)],
            &LandmarkMap::from_tuples(&[(1, 4.0, 4.0)]).unwrap(),
        )
        .unwrap();
        assert!(pf.effective_sample_size().unwrap() < 50.0);
        assert!(pf.resample_if_needed(0.5, &mut rng).unwrap());
        assert!(pf.resample_if_needed(-0.5, &mut rng).is_err());
    }

    #[test]
    fn test_set_associations() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut pf = ParticleFilter::with_particles(2).unwrap();
        pf.init(0.0, 0.0, 0.0, [0.0; 3], &mut rng).unwrap();
        pf.set_associations(1, vec![3, 1], vec![1.5, -2.0], vec![0.25, 7.0])
            .unwrap();
        let particle = &pf.particles().unwrap()[1];
        assert_eq!(ParticleFilter::get_associations(particle), "3 1");
        assert_eq!(ParticleFilter::get_sense_coord(particle, Axis::X), "1.5 -2");
        assert_eq!(ParticleFilter::get_sense_coord(particle, Axis::Y), "0.25 7");
        assert_eq!(
            pf.set_associations(0, vec![1, 2], vec![0.0], vec![0.0]),
            Err(FilterError::MismatchedAssociations {
                ids: 2,
                sense_x: 1,
                sense_y: 1
            })
        );
        assert!(matches!(
            pf.set_associations(2, vec![], vec![], vec![]),
            Err(FilterError::Config(_))
        ));
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = |seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut pf = ParticleFilter::with_particles(30).unwrap();
            pf.init(1.0, 1.0, 0.3, [0.3, 0.3, 0.01], &mut rng).unwrap();
            pf.prediction(0.1, [0.3, 0.3, 0.01], 2.0, 0.2, &mut rng)
                .unwrap();
            pf.update_weights(50.0, [0.3, 0.3], &[Observation::new(3.0, 1.5)], &map())
                .unwrap();
            pf.resample(&mut rng).unwrap();
            pf.particles().unwrap().to_vec()
        };
        assert_eq!(run(77), run(77));
        assert_ne!(run(77), run(78));
    }
}
