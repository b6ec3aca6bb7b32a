//! Resampling strategies.
//!
//! Every strategy draws N particle indices with probability proportional to weight and builds a brand new
//! particle collection from full copies of the selected particles. The source collection is only read, so
//! the caller can swap the new generation in once it is complete.
//!
//! - [`ResamplingStrategy::Multinomial`]: N independent draws from the discrete weight distribution.
//! - [`ResamplingStrategy::Systematic`]: a single uniform offset shared by N evenly spaced positions.
//! - [`ResamplingStrategy::Stratified`]: one uniform draw inside each of N equal strata.
//! - [`ResamplingStrategy::Residual`]: `floor(N w_i)` deterministic copies, the remainder drawn
//!   systematically from the residual weights.
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};
use crate::particle::Particle;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ResamplingStrategy {
    #[default]
    Multinomial,
    Systematic,
    Stratified,
    Residual,
}

impl ResamplingStrategy {
    /// Builds the next generation of `particles.len()` particles.
    pub fn resample<R: Rng + ?Sized>(
        &self,
        particles: &[Particle],
        rng: &mut R,
    ) -> Result<Vec<Particle>> {
        let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
        let indices = self.sample_indices(&weights, particles.len(), rng)?;
        Ok(indices.into_iter().map(|i| particles[i].clone()).collect())
    }

    /// Draws `n` indices into `weights` with probability proportional to weight.
    ///
    /// # Errors
    /// Returns [`FilterError::DegenerateWeights`] for an empty slice, negative or non-finite weights, or
    /// weights that sum to zero.
    pub fn sample_indices<R: Rng + ?Sized>(
        &self,
        weights: &[f64],
        n: usize,
        rng: &mut R,
    ) -> Result<Vec<usize>> {
        let total = checked_total(weights)?;
        let indices = match self {
            ResamplingStrategy::Multinomial => {
                let distribution = WeightedIndex::new(weights)
                    .map_err(|e| FilterError::DegenerateWeights(e.to_string()))?;
                (0..n).map(|_| distribution.sample(rng)).collect()
            }
            ResamplingStrategy::Systematic => {
                let offset = rng.random::<f64>();
                let positions = (0..n).map(|i| (offset + i as f64) / n as f64 * total);
                select_sorted(weights, positions)
            }
            ResamplingStrategy::Stratified => {
                let positions: Vec<f64> = (0..n)
                    .map(|i| (rng.random::<f64>() + i as f64) / n as f64 * total)
                    .collect();
                select_sorted(weights, positions.into_iter())
            }
            ResamplingStrategy::Residual => residual_indices(weights, total, n, rng),
        };
        Ok(indices)
    }
}

fn checked_total(weights: &[f64]) -> Result<f64> {
    if weights.is_empty() {
        return Err(FilterError::DegenerateWeights("no weights".to_string()));
    }
    if let Some(w) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(FilterError::DegenerateWeights(format!(
            "invalid weight {}",
            w
        )));
    }
    let total: f64 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return Err(FilterError::DegenerateWeights(format!(
            "weights sum to {}",
            total
        )));
    }
    Ok(total)
}

/// Maps ascending positions in `[0, Σw)` onto the index whose cumulative weight first exceeds them.
fn select_sorted(weights: &[f64], positions: impl Iterator<Item = f64>) -> Vec<usize> {
    // Positions that round up to the total land on the last particle that has any weight
    let last = weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or(weights.len() - 1);
    let mut indices = Vec::new();
    let mut i = 0;
    let mut cumsum = weights[0];
    for position in positions {
        while position >= cumsum && i < last {
            i += 1;
            cumsum += weights[i];
        }
        indices.push(i);
    }
    indices
}

fn residual_indices<R: Rng + ?Sized>(
    weights: &[f64],
    total: f64,
    n: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut indices = Vec::with_capacity(n);
    let mut residual = vec![0.0; weights.len()];
    for (i, &w) in weights.iter().enumerate() {
        let expected = w / total * n as f64;
        let copies = expected.floor() as usize;
        residual[i] = expected - copies as f64;
        for _ in 0..copies.min(n - indices.len()) {
            indices.push(i);
        }
    }
    let remaining = n - indices.len();
    let residual_total: f64 = residual.iter().sum();
    if remaining > 0 && residual_total > 0.0 {
        let offset = rng.random::<f64>();
        let positions =
            (0..remaining).map(|j| (offset + j as f64) / remaining as f64 * residual_total);
        indices.extend(select_sorted(&residual, positions));
    }
    // Rounding can leave the residual mass at zero with slots still open
    if indices.len() < n {
        let mut heaviest = 0;
        for (i, &w) in weights.iter().enumerate() {
            if w > weights[heaviest] {
                heaviest = i;
            }
        }
        indices.resize(n, heaviest);
    }
    indices
}
