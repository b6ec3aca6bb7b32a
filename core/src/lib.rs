//! Landmark particle filter toolbox for 2D pose estimation
//!
//! This crate provides a sequential Monte Carlo (particle filter) estimator for the planar pose of a moving
//! agent. The belief is represented as a set of weighted pose hypotheses that are propagated through a
//! constant-turn-rate-and-velocity (bicycle) motion model and corrected with range/bearing observations of
//! landmarks whose positions are known ahead of time. It is designed as a toolbox: the caller owns the
//! control loop and the sensor/map I/O and simply drives the filter once per time step.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rigid-body transforms and small matrices.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides
//!   the random number generation used for initialization, process noise, and resampling.
//! - [`serde`](https://crates.io/crates/serde): Provides (de)serialization of the filter configuration.
//!
//! ## Crate overview
//!
//! - [error]: Contains the error type returned at the filter boundary.
//! - [config]: Contains the tunable filter configuration and its file I/O.
//! - [map]: Contains the landmark map and observation types.
//! - [particle]: Contains the particle, the particle set, and the per-step association diagnostics.
//! - [motion]: Contains the bicycle motion model and the prediction step.
//! - [observation]: Contains data association and the importance weighting step.
//! - [resample]: Contains the resampling strategies.
//! - [filter]: Contains the [`filter::ParticleFilter`] that ties the pipeline together.
//!
//! ## Coordinate and state definitions
//!
//! The pose of the agent is the three-state vector
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$ and $p_y$ are the world (map) frame position in meters and $\theta$ is the heading in radians,
//! measured counter-clockwise from the world x axis. Observations are expressed in the body frame of the
//! agent (x forward, y left) and are moved into the world frame by rotating through $\theta$ and then
//! translating by $(p_x, p_y)$:
//!
//! $$
//! \begin{bmatrix} x_w \\\\ y_w \end{bmatrix} =
//! \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix}
//! \begin{bmatrix} x_b \\\\ y_b \end{bmatrix} + \begin{bmatrix} p_x \\\\ p_y \end{bmatrix}
//! $$
//!
//! Heading is not wrapped during propagation. Reductions that average headings do so on the unit circle and
//! report the result in $[-\pi, \pi]$.
//!
//! ## Filter cycle
//!
//! ```rust
//! use landmark_pf::config::FilterConfig;
//! use landmark_pf::filter::ParticleFilter;
//! use landmark_pf::map::{LandmarkMap, Observation};
//! use rand::SeedableRng;
//! use rand::rngs::StdRng;
//!
//! let map = LandmarkMap::from_tuples(&[(1, 5.0, 0.0), (2, 0.0, 5.0)]).unwrap();
//! let mut rng = StdRng::seed_from_u64(42);
//! let mut pf = ParticleFilter::new(FilterConfig::default()).unwrap();
//! pf.init(0.0, 0.0, 0.0, [0.3, 0.3, 0.01], &mut rng).unwrap();
//!
//! pf.prediction(0.1, [0.3, 0.3, 0.01], 1.0, 0.0, &mut rng).unwrap();
//! let observations = vec![Observation::new(4.9, 0.0), Observation::new(-0.1, 5.0)];
//! pf.update_weights(50.0, [0.3, 0.3], &observations, &map).unwrap();
//! pf.resample(&mut rng).unwrap();
//!
//! let estimate = pf.estimate().unwrap();
//! assert!((estimate.x - 0.1).abs() < 0.5);
//! ```
pub mod config;
pub mod error;
pub mod filter;
pub mod map;
pub mod motion;
pub mod observation;
pub mod particle;
pub mod resample;

use nalgebra::{Isometry2, Point2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use std::f64::consts::{PI, TAU};
use std::fmt::{self, Display};

pub use error::{FilterError, Result};

/// Planar pose of the agent (or of a single particle) in the world frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the world x axis in meters
    pub x: f64,
    /// Position along the world y axis in meters
    pub y: f64,
    /// Heading in radians, counter-clockwise from the world x axis
    pub theta: f64,
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose {{ x: {:.4}, y: {:.4}, theta: {:.4} }}",
            self.x, self.y, self.theta
        )
    }
}
impl From<Vector3<f64>> for Pose {
    fn from(vector: Vector3<f64>) -> Self {
        Pose::new(vector[0], vector[1], vector[2])
    }
}
impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        Vector3::new(pose.x, pose.y, pose.theta)
    }
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Rigid body transform from the body frame of this pose to the world frame.
    pub fn isometry(&self) -> Isometry2<f64> {
        Isometry2::new(Vector2::new(self.x, self.y), self.theta)
    }
    /// Moves a body frame point into the world frame (rotation, then translation).
    pub fn to_world(&self, body: &Point2<f64>) -> Point2<f64> {
        self.isometry() * body
    }
    /// Moves a world frame point into the body frame of this pose. Inverse of [`Pose::to_world`].
    pub fn to_body(&self, world: &Point2<f64>) -> Point2<f64> {
        self.isometry().inverse_transform_point(world)
    }
    /// Planar distance from this pose's position to a world frame point.
    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        (self.x - x).hypot(self.y - y)
    }
}

/// Wrap an angle to the range $\pm\pi$ radians
///
/// # Example
/// ```rust
/// use landmark_pf::wrap_to_pi;
/// use std::f64::consts::PI;
/// let wrapped_angle = wrap_to_pi(3.0 * PI / 2.0);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi(angle: f64) -> f64 {
    if (-PI..=PI).contains(&angle) {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    // Positive odd multiples of pi land on +pi, matching the interval's closed upper end
    if wrapped == -PI && angle > 0.0 {
        PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_wrap_to_pi() {
        assert_eq!(wrap_to_pi(3.0 * PI), PI);
        assert_eq!(wrap_to_pi(-3.0 * PI), -PI);
        assert_eq!(wrap_to_pi(0.0), 0.0);
        assert_eq!(wrap_to_pi(PI), PI);
        assert_eq!(wrap_to_pi(-PI), -PI);
        assert_approx_eq!(wrap_to_pi(7.0), 7.0 - 2.0 * PI, 1e-12);
        assert_approx_eq!(wrap_to_pi(-7.0), 2.0 * PI - 7.0, 1e-12);
    }
    #[test]
    fn test_wrap_to_pi_huge_angles() {
        for angle in [1e17, -1e17, 1e300, 4.0e9 * PI] {
            let wrapped = wrap_to_pi(angle);
            assert!((-PI..=PI).contains(&wrapped), "{} -> {}", angle, wrapped);
        }
        assert!(wrap_to_pi(f64::INFINITY).is_nan());
    }
    #[test]
    fn test_to_world_rotates_then_translates() {
        let pose = Pose::new(4.0, 5.0, -FRAC_PI_2);
        let world = pose.to_world(&Point2::new(2.0, 2.0));
        assert_approx_eq!(world.x, 6.0, 1e-12);
        assert_approx_eq!(world.y, 3.0, 1e-12);
    }
    #[test]
    fn test_to_world_identity_pose() {
        let world = Pose::default().to_world(&Point2::new(-1.5, 7.25));
        assert_approx_eq!(world.x, -1.5, 1e-15);
        assert_approx_eq!(world.y, 7.25, 1e-15);
    }
    #[test]
    fn test_body_world_round_trip() {
        let poses = [
            Pose::new(0.0, 0.0, 0.0),
            Pose::new(102.0, 65.0, 0.75 * PI),
            Pose::new(-3.2, 8.1, -2.9),
            Pose::new(1e3, -1e3, 12.0),
        ];
        let body = Point2::new(3.7, -1.25);
        for pose in poses {
            let back = pose.to_body(&pose.to_world(&body));
            assert_approx_eq!(back.x, body.x, 1e-9);
            assert_approx_eq!(back.y, body.y, 1e-9);
        }
    }
    #[test]
    fn test_pose_vector_conversion() {
        let pose = Pose::new(1.0, 2.0, 0.5);
        let vector: Vector3<f64> = pose.into();
        assert_eq!(vector, Vector3::new(1.0, 2.0, 0.5));
        assert_eq!(Pose::from(vector), pose);
    }
    #[test]
    fn test_distance_to() {
        assert_approx_eq!(Pose::new(1.0, 1.0, 3.0).distance_to(4.0, 5.0), 5.0, 1e-12);
    }
}
