//! Preferential-attachment growth models.
//!
//! Each year the calibrated population increase is split into lumps, and
//! every lump joins an existing cluster with probability proportional to
//! its expected growth, or founds a new cluster.

use crate::calibration::Calibration;
use crate::lumps::{LumpDist, sample_lumps};
use crate::model::{State, floor_at};
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::{Binomial, weighted::WeightedIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A unit of population mass owned by a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lump {
    pub mass: f64,
    pub cluster: usize,
}

/// How assigned lumps are recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Bookkeeping {
    /// Lumps are added to cluster totals and forgotten.
    Aggregate,
    /// Every lump is kept in a register and may later relocate.
    Ledger {
        register: Vec<Lump>,
        relocation_prob: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    state: State,
    calib: Arc<Calibration>,
    lump_dist: LumpDist,
    book: Bookkeeping,
}

impl Attachment {
    /// Create a model that only tracks cluster totals.
    pub fn aggregate(state: State, calib: Arc<Calibration>, lump_dist: LumpDist) -> Self {
        Self {
            state,
            calib,
            lump_dist,
            book: Bookkeeping::Aggregate,
        }
    }

    /// Create a model that tracks every lump, seeding the register with
    /// lumps drawn until each cluster's mass reaches its population.
    pub fn ledger<R: Rng + ?Sized>(
        state: State,
        calib: Arc<Calibration>,
        lump_dist: LumpDist,
        relocation_prob: f64,
        rng: &mut R,
    ) -> Result<Self> {
        let sampler = lump_dist.sampler()?;
        let mut register = Vec::new();
        for (cluster, &p) in state.pop.iter().enumerate() {
            for mass in sample_lumps(p, &sampler, rng) {
                register.push(Lump { mass, cluster });
            }
        }
        log::info!(
            "seeded register with {} lumps for {} clusters",
            register.len(),
            state.n_clusters()
        );

        Ok(Self {
            state,
            calib,
            lump_dist,
            book: Bookkeeping::Ledger {
                register,
                relocation_prob,
            },
        })
    }

    pub fn name(&self) -> &'static str {
        match self.book {
            Bookkeeping::Aggregate => "simon",
            Bookkeeping::Ledger { .. } => "duranton",
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// The lump register, if this model keeps one.
    #[cfg(test)]
    pub fn register(&self) -> Option<&[Lump]> {
        match &self.book {
            Bookkeeping::Aggregate => None,
            Bookkeeping::Ledger { register, .. } => Some(register),
        }
    }

    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        let sampler = self.lump_dist.sampler()?;
        let target = self.calib.population_delta(self.state.year);
        let mut lumps = sample_lumps(target, &sampler, rng);
        log::debug!("drew {} lumps for a target of {target}", lumps.len());

        match &mut self.book {
            Bookkeeping::Aggregate => {
                let assignment = assign_lumps(&self.state, &self.calib, lumps.len(), rng)?;
                let n_clusters = self.state.n_clusters();
                for (mass, i_cluster) in lumps.into_iter().zip(assignment) {
                    if i_cluster < n_clusters {
                        self.state.pop[i_cluster] += mass;
                    } else {
                        self.state.pop.push(mass);
                    }
                }
            }
            Bookkeeping::Ledger {
                register,
                relocation_prob,
            } => {
                let n_clusters = self.state.n_clusters();
                let relocated = relocate_lumps(register, n_clusters, *relocation_prob, rng)
                    .context("failed to relocate lumps")?;
                log::debug!("relocating {} lumps", relocated.len());
                lumps.extend(relocated);

                let assignment = assign_lumps(&self.state, &self.calib, lumps.len(), rng)?;
                let mut next_cluster = n_clusters;
                for (mass, i_cluster) in lumps.into_iter().zip(assignment) {
                    let cluster = if i_cluster < n_clusters {
                        i_cluster
                    } else {
                        next_cluster += 1;
                        next_cluster - 1
                    };
                    register.push(Lump { mass, cluster });
                }

                self.state.pop = register_totals(register, next_cluster);
            }
        }

        self.state.clip_to_lower_bound();
        self.state.year += 1;
        Ok(())
    }
}

/// Pick the destination of each of `n_lumps` lumps.
///
/// Index `i < n_clusters` is an existing cluster; `n_clusters` stands for a
/// new cluster.
pub fn assign_lumps<R: Rng + ?Sized>(
    state: &State,
    calib: &Calibration,
    n_lumps: usize,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if n_lumps == 0 {
        return Ok(Vec::new());
    }

    let weights: Vec<_> = state
        .pop
        .iter()
        .map(|&p| floor_at(p * calib.mean_growth.eval(p), 0.0))
        .collect();
    let weight_sum: f64 = weights.iter().sum();
    if !(weight_sum > 0.0 && weight_sum.is_finite()) {
        bail!("attachment weights of existing clusters sum to {weight_sum}");
    }

    let prob_new = (calib.cluster_count_delta(state.year) / n_lumps as f64).clamp(0.0, 1.0);
    let mut probs: Vec<_> = weights
        .iter()
        .map(|w| (1.0 - prob_new) * w / weight_sum)
        .collect();
    probs.push(prob_new);

    let dist = WeightedIndex::new(&probs).context("failed to build attachment distribution")?;
    Ok((0..n_lumps).map(|_| dist.sample(rng)).collect())
}

/// Remove a random set of lumps from clusters owning more than one lump.
///
/// The number of movers is binomial in the number of candidates, and small
/// lumps are chosen more readily. Returns the masses of the removed lumps.
pub fn relocate_lumps<R: Rng + ?Sized>(
    register: &mut Vec<Lump>,
    n_clusters: usize,
    relocation_prob: f64,
    rng: &mut R,
) -> Result<Vec<f64>> {
    let mut n_lumps_of = vec![0usize; n_clusters];
    for lump in register.iter() {
        n_lumps_of[lump.cluster] += 1;
    }
    let candidates: Vec<usize> = (0..register.len())
        .filter(|&i_lump| n_lumps_of[register[i_lump].cluster] > 1)
        .collect();

    let n_moving = Binomial::new(candidates.len() as u64, relocation_prob)?.sample(rng) as usize;
    if n_moving == 0 {
        return Ok(Vec::new());
    }

    let mut is_moving = vec![false; register.len()];
    let mut moved = Vec::with_capacity(n_moving);
    for &i_lump in candidates.choose_multiple_weighted(rng, n_moving, |&i| 1.0 / register[i].mass)? {
        is_moving[i_lump] = true;
        moved.push(register[i_lump].mass);
    }

    let mut i_lump = 0;
    register.retain(|_| {
        let keep = !is_moving[i_lump];
        i_lump += 1;
        keep
    });

    Ok(moved)
}

/// Total mass owned by each of `n_clusters` clusters.
pub fn register_totals(register: &[Lump], n_clusters: usize) -> Vec<f64> {
    let mut totals = vec![0.0; n_clusters];
    for lump in register {
        totals[lump.cluster] += lump.mass;
    }
    totals
}
