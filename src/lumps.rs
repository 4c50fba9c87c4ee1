use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::{LogNormal, Pareto};
use serde::{Deserialize, Serialize};

/// Size distribution of the lumps of population added to clusters.
///
/// Every variant has a positive finite mean, so drawing lumps until a
/// target mass is reached always terminates.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum LumpDist {
    Constant { size: f64 },
    LogNormal { mu: f64, sigma: f64 },
    Pareto { scale: f64, shape: f64 },
}

impl LumpDist {
    pub fn validate(&self) -> Result<()> {
        match *self {
            LumpDist::Constant { size } => {
                if !(size > 0.0 && size.is_finite()) {
                    bail!("lump size must be positive and finite, but is {size}");
                }
            }
            LumpDist::LogNormal { mu, sigma } => {
                if !mu.is_finite() || !(sigma >= 0.0 && sigma.is_finite()) {
                    bail!("invalid log-normal parameters mu = {mu}, sigma = {sigma}");
                }
            }
            LumpDist::Pareto { scale, shape } => {
                if !(scale > 0.0 && scale.is_finite()) {
                    bail!("pareto scale must be positive and finite, but is {scale}");
                }
                // The mean is infinite for shape <= 1.
                if !(shape > 1.0 && shape.is_finite()) {
                    bail!("pareto shape must be greater than 1, but is {shape}");
                }
            }
        }
        Ok(())
    }

    /// Build the sampler for this distribution.
    pub fn sampler(&self) -> Result<LumpSampler> {
        self.validate()?;
        let sampler = match *self {
            LumpDist::Constant { size } => LumpSampler::Constant(size),
            LumpDist::LogNormal { mu, sigma } => LumpSampler::LogNormal(LogNormal::new(mu, sigma)?),
            LumpDist::Pareto { scale, shape } => LumpSampler::Pareto(Pareto::new(scale, shape)?),
        };
        Ok(sampler)
    }
}

/// Draws one positive lump size per call.
pub enum LumpSampler {
    Constant(f64),
    LogNormal(LogNormal<f64>),
    Pareto(Pareto<f64>),
}

impl Distribution<f64> for LumpSampler {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            LumpSampler::Constant(size) => *size,
            LumpSampler::LogNormal(dist) => dist.sample(rng),
            LumpSampler::Pareto(dist) => dist.sample(rng),
        }
    }
}

/// Draw lumps until their cumulative mass reaches `target`.
///
/// The last lump may overshoot the target. Returns no lumps when the
/// target is not positive.
pub fn sample_lumps<R: Rng + ?Sized>(target: f64, sampler: &LumpSampler, rng: &mut R) -> Vec<f64> {
    let mut lumps = Vec::new();
    let mut mass = 0.0;
    while mass < target {
        let lump = sampler.sample(rng);
        lumps.push(lump);
        mass += lump;
    }
    lumps
}
