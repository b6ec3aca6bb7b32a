//! Constant-turn-rate-and-velocity (bicycle) motion model and the particle prediction step.
//!
//! With commanded speed $v$, yaw rate $\omega$ and time step $\Delta t$ the noiseless pose update is
//!
//! $$
//! \begin{aligned}
//! x' &= x + \frac{v}{\omega} \left( \sin(\theta + \omega \Delta t) - \sin\theta \right) \\\\
//! y' &= y + \frac{v}{\omega} \left( \cos\theta - \cos(\theta + \omega \Delta t) \right) \\\\
//! \theta' &= \theta + \omega \Delta t
//! \end{aligned}
//! $$
//!
//! For $|\omega|$ at or below a small threshold the $v/\omega$ term is ill conditioned and the straight-line
//! limit $x' = x + v \Delta t \cos\theta$, $y' = y + v \Delta t \sin\theta$ is used instead. The branch is a
//! function of the shared control input, so every particle in a step takes the same one.
use log::debug;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::Pose;
use crate::error::{FilterError, Result, check_finite, check_std};
use crate::particle::ParticleSet;

/// Which form of the motion model applies for a given yaw rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionBranch {
    /// Curved path, `|yaw_rate| > threshold`
    Turning,
    /// Straight-line approximation, `|yaw_rate| <= threshold`
    Straight,
}
impl MotionBranch {
    pub fn select(yaw_rate: f64, threshold: f64) -> Self {
        if yaw_rate.abs() > threshold {
            MotionBranch::Turning
        } else {
            MotionBranch::Straight
        }
    }
}

/// Curved-path update. Only valid for a yaw rate away from zero.
pub fn turning_motion(pose: &Pose, velocity: f64, yaw_rate: f64, dt: f64) -> Pose {
    let theta = pose.theta + yaw_rate * dt;
    let radius = velocity / yaw_rate;
    Pose::new(
        pose.x + radius * (theta.sin() - pose.theta.sin()),
        pose.y + radius * (pose.theta.cos() - theta.cos()),
        theta,
    )
}

/// Straight-line update. The heading still integrates the yaw rate.
pub fn straight_motion(pose: &Pose, velocity: f64, yaw_rate: f64, dt: f64) -> Pose {
    let distance = velocity * dt;
    Pose::new(
        pose.x + distance * pose.theta.cos(),
        pose.y + distance * pose.theta.sin(),
        pose.theta + yaw_rate * dt,
    )
}

/// Noiseless pose update along the given branch.
pub fn forward(pose: &Pose, branch: MotionBranch, velocity: f64, yaw_rate: f64, dt: f64) -> Pose {
    match branch {
        MotionBranch::Turning => turning_motion(pose, velocity, yaw_rate, dt),
        MotionBranch::Straight => straight_motion(pose, velocity, yaw_rate, dt),
    }
}

/// Zero-mean Gaussian process noise for `[x, y, theta]`.
#[derive(Clone, Debug)]
pub(crate) struct PoseNoise {
    x: Normal<f64>,
    y: Normal<f64>,
    theta: Normal<f64>,
}
impl PoseNoise {
    /// `names` label the three deviations in the error returned for a bad value.
    pub(crate) fn new(std: [f64; 3], names: [&'static str; 3]) -> Result<Self> {
        for (value, name) in std.iter().zip(names) {
            check_std(name, *value)?;
        }
        let normal = |i: usize| {
            Normal::new(0.0, std[i]).map_err(|_| FilterError::InvalidStandardDeviation {
                name: names[i],
                value: std[i],
            })
        };
        Ok(PoseNoise {
            x: normal(0)?,
            y: normal(1)?,
            theta: normal(2)?,
        })
    }
    /// Draws a pose from a Gaussian centred on `mean`.
    pub(crate) fn perturb<R: Rng + ?Sized>(&self, mean: &Pose, rng: &mut R) -> Pose {
        Pose::new(
            mean.x + self.x.sample(rng),
            mean.y + self.y.sample(rng),
            mean.theta + self.theta.sample(rng),
        )
    }
}

/// Prediction step of the filter: bicycle model plus additive Gaussian process noise.
#[derive(Clone, Copy, Debug)]
pub struct MotionPredictor {
    yaw_rate_threshold: f64,
}
impl MotionPredictor {
    pub fn new(yaw_rate_threshold: f64) -> Self {
        MotionPredictor { yaw_rate_threshold }
    }
    pub fn yaw_rate_threshold(&self) -> f64 {
        self.yaw_rate_threshold
    }
    /// Propagates every particle of `set` through the motion model and perturbs the result with
    /// `std_pos` process noise.
    ///
    /// # Errors
    /// Rejects a non-positive or non-finite `delta_t`, negative or non-finite deviations, and non-finite
    /// control inputs before any particle is touched.
    pub fn predict<R: Rng + ?Sized>(
        &self,
        set: &mut ParticleSet,
        delta_t: f64,
        std_pos: [f64; 3],
        velocity: f64,
        yaw_rate: f64,
        rng: &mut R,
    ) -> Result<()> {
        if !(delta_t.is_finite() && delta_t > 0.0) {
            return Err(FilterError::InvalidTimeStep(delta_t));
        }
        check_finite("velocity", velocity)?;
        check_finite("yaw_rate", yaw_rate)?;
        let noise = PoseNoise::new(std_pos, ["std_pos[0]", "std_pos[1]", "std_pos[2]"])?;
        let branch = MotionBranch::select(yaw_rate, self.yaw_rate_threshold);
        debug!(
            "predict: {} particles, dt = {}, v = {}, yaw_rate = {}, {:?}",
            set.len(),
            delta_t,
            velocity,
            yaw_rate,
            branch
        );
        for particle in set.particles_mut() {
            let predicted = forward(&particle.pose, branch, velocity, yaw_rate, delta_t);
            particle.pose = noise.perturb(&predicted, rng);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn single(pose: Pose) -> ParticleSet {
        ParticleSet::from_particles(vec![Particle::new(0, pose, 1.0)]).unwrap()
    }

    #[test]
    fn test_branch_selection() {
        assert_eq!(MotionBranch::select(0.1, 0.001), MotionBranch::Turning);
        assert_eq!(MotionBranch::select(-0.1, 0.001), MotionBranch::Turning);
        assert_eq!(MotionBranch::select(0.001, 0.001), MotionBranch::Straight);
        assert_eq!(MotionBranch::select(-0.0005, 0.001), MotionBranch::Straight);
        assert_eq!(MotionBranch::select(0.0, 0.001), MotionBranch::Straight);
    }

    #[test]
    fn test_straight_motion() {
        let pose = straight_motion(&Pose::new(1.0, 2.0, FRAC_PI_2), 10.0, 0.0, 0.5);
        assert_approx_eq!(pose.x, 1.0, 1e-12);
        assert_approx_eq!(pose.y, 7.0, 1e-12);
        assert_approx_eq!(pose.theta, FRAC_PI_2, 1e-12);
    }

    #[test]
    fn test_quarter_turn() {
        // Radius 1 m counter-clockwise quarter circle starting at the origin heading +x
        let pose = turning_motion(&Pose::new(0.0, 0.0, 0.0), FRAC_PI_2, FRAC_PI_2, 1.0);
        assert_approx_eq!(pose.x, 1.0, 1e-12);
        assert_approx_eq!(pose.y, 1.0, 1e-12);
        assert_approx_eq!(pose.theta, FRAC_PI_2, 1e-12);
    }

    #[test]
    fn test_negative_turn_rate() {
        let pose = turning_motion(&Pose::new(0.0, 0.0, 0.0), 1.0, -PI, 1.0);
        assert_approx_eq!(pose.x, 0.0, 1e-12);
        assert_approx_eq!(pose.y, -2.0 / PI, 1e-12);
        assert_approx_eq!(pose.theta, -PI, 1e-12);
    }

    #[test]
    fn test_turning_converges_to_straight() {
        let start = Pose::new(3.0, -1.0, 0.7);
        let straight = straight_motion(&start, 12.0, 0.0, 0.1);
        for yaw_rate in [1e-3, 1e-4, 1e-5, 1e-6] {
            let turning = turning_motion(&start, 12.0, yaw_rate, 0.1);
            // Error term is of order v * yaw_rate * dt^2 / 2
            let tolerance = 12.0 * yaw_rate * 0.01 + 1e-8;
            assert_approx_eq!(turning.x, straight.x, tolerance);
            assert_approx_eq!(turning.y, straight.y, tolerance);
        }
    }

    #[test]
    fn test_predict_without_noise_is_deterministic() {
        let mut set = single(Pose::new(102.0, 65.0, 5.0 * PI / 8.0));
        let mut rng = StdRng::seed_from_u64(1);
        MotionPredictor::new(0.001)
            .predict(&mut set, 0.1, [0.0, 0.0, 0.0], 110.0, PI / 8.0, &mut rng)
            .unwrap();
        let pose = set.particles()[0].pose;
        assert_approx_eq!(pose.x, 97.592046, 1e-5);
        assert_approx_eq!(pose.y, 75.077420, 1e-5);
        assert_approx_eq!(pose.theta, 51.0 * PI / 80.0, 1e-12);
    }

    #[test]
    fn test_predict_stationary_keeps_mean() {
        let start = Pose::new(-4.0, 9.0, 1.2);
        let particles = (0..5000).map(|i| Particle::new(i, start, 1.0)).collect();
        let mut set = ParticleSet::from_particles(particles).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        MotionPredictor::new(0.001)
            .predict(&mut set, 0.1, [0.1, 0.1, 0.01], 0.0, 0.0, &mut rng)
            .unwrap();
        let mean = set.unweighted_mean();
        assert_approx_eq!(mean.x, start.x, 0.01);
        assert_approx_eq!(mean.y, start.y, 0.01);
        assert_approx_eq!(mean.theta, start.theta, 0.001);
    }

    #[test]
    fn test_predict_rejects_bad_inputs() {
        let mut set = single(Pose::default());
        let mut rng = StdRng::seed_from_u64(0);
        let predictor = MotionPredictor::new(0.001);
        assert_eq!(
            predictor.predict(&mut set, 0.0, [0.1; 3], 1.0, 0.0, &mut rng),
            Err(FilterError::InvalidTimeStep(0.0))
        );
        assert!(matches!(
            predictor.predict(&mut set, -0.1, [0.1; 3], 1.0, 0.0, &mut rng),
            Err(FilterError::InvalidTimeStep(_))
        ));
        assert_eq!(
            predictor.predict(&mut set, 0.1, [0.1, -0.1, 0.1], 1.0, 0.0, &mut rng),
            Err(FilterError::InvalidStandardDeviation {
                name: "std_pos[1]",
                value: -0.1
            })
        );
        assert!(matches!(
            predictor.predict(&mut set, 0.1, [0.1; 3], f64::NAN, 0.0, &mut rng),
            Err(FilterError::NonFiniteInput {
                name: "velocity",
                ..
            })
        ));
        // A rejected step leaves the particles untouched
        assert_eq!(set.particles()[0].pose, Pose::default());
    }
}
