//! Random-walk growth models.

use crate::calibration::Calibration;
use crate::model::{State, floor_at};
use crate::stable::StandardStable;
use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::{LogNormal, StandardNormal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Log-normal parameters of the size of newborn clusters.
const BIRTH_MU: f64 = 8.0;
const BIRTH_SIGMA: f64 = 1.0;

/// Stability exponent of growth shocks as a step function of size.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShockExponent {
    /// Size separating small and large clusters.
    pub threshold: f64,
    /// Exponent of clusters below the threshold.
    pub small: f64,
    /// Exponent of clusters at or above the threshold.
    pub large: f64,
}

impl Default for ShockExponent {
    fn default() -> Self {
        Self {
            threshold: 5000.0,
            small: 1.25,
            large: 1.5,
        }
    }
}

impl ShockExponent {
    pub fn at(&self, size: f64) -> f64 {
        if size < self.threshold {
            self.small
        } else {
            self.large
        }
    }

    pub fn validate(&self) -> Result<()> {
        for alpha in [self.small, self.large] {
            if !(alpha > 0.0 && alpha <= 2.0) {
                bail!("exponent must be in the range (0, 2], but is {alpha}");
            }
        }
        Ok(())
    }
}

/// Distribution of the growth shock of a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Shock {
    /// Gaussian shocks.
    Normal,
    /// Symmetric alpha-stable shocks with a size-dependent exponent.
    Stable(ShockExponent),
}

/// Cluster sizes follow multiplicative random walks; new clusters are born
/// at the calibrated rate with exogenous sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomWalk {
    state: State,
    calib: Arc<Calibration>,
    shock: Shock,
}

impl RandomWalk {
    pub fn new(state: State, calib: Arc<Calibration>, shock: Shock) -> Self {
        Self {
            state,
            calib,
            shock,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.shock {
            Shock::Normal => "gabaix",
            Shock::Stable(_) => "barthelemy",
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Draw one non-negative growth multiplier per existing cluster.
    pub fn growth_multipliers<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<f64>> {
        let mut mults = Vec::with_capacity(self.state.n_clusters());
        for &p in &self.state.pop {
            let loc = self.calib.mean_growth.eval(p);
            let scale = self.calib.std_growth.eval(p);
            let z: f64 = match &self.shock {
                Shock::Normal => StandardNormal.sample(rng),
                Shock::Stable(exponent) => StandardStable::new(exponent.at(p), 0.0)?.sample(rng),
            };
            mults.push(floor_at(1.0 + (loc + scale * z), 0.0));
        }
        Ok(mults)
    }

    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let mults = self.growth_multipliers(rng)?;
        self.state
            .pop
            .iter_mut()
            .zip(mults)
            .for_each(|(p, m)| *p *= m);

        let n_new = self.calib.cluster_count_delta(self.state.year);
        if n_new.is_nan() {
            log::warn!("cluster count delta is NaN in year {}", self.state.year);
        }
        // Truncated like a count; declines in the count add no clusters.
        let n_new = if n_new > 0.0 { n_new as usize } else { 0 };
        let birth_dist = LogNormal::new(BIRTH_MU, BIRTH_SIGMA)?;
        self.state
            .pop
            .extend((0..n_new).map(|_| birth_dist.sample(rng)));

        self.state.clip_to_lower_bound();
        self.state.year += 1;
        Ok(())
    }
}
