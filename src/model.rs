//! Growth models of a system of clusters.

use crate::attachment::Attachment;
use crate::calibration::Calibration;
use crate::config::{ModelConfig, ModelKind};
use crate::lumps::LumpDist;
use crate::walk::{RandomWalk, Shock};
use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Population state of a model.
///
/// Cluster `i` keeps index `i` for the whole run; clusters are only appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Population of every cluster.
    pub pop: Vec<f64>,
    /// Current simulated year.
    pub year: i32,
    /// Minimum population of every cluster after a step.
    pub lower_bound: f64,
}

impl State {
    pub fn new(pop: Vec<f64>, year: i32, lower_bound: f64) -> Self {
        Self {
            pop,
            year,
            lower_bound,
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.pop.len()
    }

    /// Raise every population to the lower bound.
    pub fn clip_to_lower_bound(&mut self) {
        let lower_bound = self.lower_bound;
        self.pop
            .iter_mut()
            .for_each(|p| *p = floor_at(*p, lower_bound));
    }
}

/// `val` raised to `floor`, keeping `NaN` as `NaN`.
pub fn floor_at(val: f64, floor: f64) -> f64 {
    if val < floor { floor } else { val }
}

/// One of the simulated growth theories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Model {
    RandomWalk(RandomWalk),
    Attachment(Attachment),
}

impl Model {
    /// Create the model selected by `cfg` with initial populations `pop`.
    ///
    /// Models with a lump register draw their initial lumps from `rng`.
    pub fn new<R: Rng + ?Sized>(
        cfg: &ModelConfig,
        lump_dist: Option<&LumpDist>,
        pop: Vec<f64>,
        calib: Arc<Calibration>,
        rng: &mut R,
    ) -> Result<Self> {
        let state = State::new(pop, cfg.start_year, cfg.lower_bound);
        let lumps = || {
            lump_dist
                .cloned()
                .with_context(|| format!("model {} needs a lump distribution", cfg.kind.name()))
        };

        let model = match cfg.kind {
            ModelKind::Gabaix => Model::RandomWalk(RandomWalk::new(state, calib, Shock::Normal)),
            ModelKind::Barthelemy => Model::RandomWalk(RandomWalk::new(
                state,
                calib,
                Shock::Stable(cfg.shock_exponent.clone()),
            )),
            ModelKind::Simon => Model::Attachment(Attachment::aggregate(state, calib, lumps()?)),
            ModelKind::Duranton => Model::Attachment(
                Attachment::ledger(state, calib, lumps()?, cfg.relocation_prob, rng)
                    .context("failed to seed lump register")?,
            ),
        };
        log::info!(
            "created {} model with {} clusters",
            model.name(),
            model.state().n_clusters()
        );

        Ok(model)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Model::RandomWalk(walk) => walk.name(),
            Model::Attachment(attachment) => attachment.name(),
        }
    }

    pub fn state(&self) -> &State {
        match self {
            Model::RandomWalk(walk) => walk.state(),
            Model::Attachment(attachment) => attachment.state(),
        }
    }

    pub fn pop(&self) -> &[f64] {
        &self.state().pop
    }

    pub fn year(&self) -> i32 {
        self.state().year
    }

    /// Advance the model by one year.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        match self {
            Model::RandomWalk(walk) => walk.step(rng),
            Model::Attachment(attachment) => attachment.step(rng),
        }
        .with_context(|| format!("failed to step {} model", self.name()))?;

        log::debug!(
            "{} model reached year {} with {} clusters",
            self.name(),
            self.year(),
            self.state().n_clusters()
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::linear_calibration;
    use super::*;
    use crate::walk::ShockExponent;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    fn model_cfg(kind: ModelKind) -> ModelConfig {
        ModelConfig {
            kind,
            start_year: 1850,
            lower_bound: 100.0,
            relocation_prob: 0.05,
            shock_exponent: ShockExponent::default(),
        }
    }

    fn all_models(rng: &mut ChaCha12Rng) -> Vec<Model> {
        let calib = linear_calibration((3.0, 203.0), (1e5, 1e6), 0.02, 0.1);
        let lumps = LumpDist::LogNormal {
            mu: 5.0,
            sigma: 1.0,
        };
        [
            ModelKind::Gabaix,
            ModelKind::Barthelemy,
            ModelKind::Simon,
            ModelKind::Duranton,
        ]
        .into_iter()
        .map(|kind| {
            Model::new(
                &model_cfg(kind),
                Some(&lumps),
                vec![50_000.0, 30_000.0, 20_000.0],
                calib.clone(),
                &mut *rng,
            )
            .unwrap()
        })
        .collect()
    }

    #[test]
    fn floor_keeps_nan() {
        assert_eq!(floor_at(-1.0, 0.0), 0.0);
        assert_eq!(floor_at(2.0, 0.0), 2.0);
        assert!(floor_at(f64::NAN, 0.0).is_nan());
    }

    #[test]
    fn names_follow_kind() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let names: Vec<_> = all_models(&mut rng).iter().map(|m| m.name()).collect();
        assert_eq!(names, ["gabaix", "barthelemy", "simon", "duranton"]);
    }

    #[test]
    fn clusters_are_never_removed_and_stay_above_lower_bound() {
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        for mut model in all_models(&mut rng) {
            for _ in 0..30 {
                let n_before = model.state().n_clusters();
                model.step(&mut rng).unwrap();
                assert!(model.state().n_clusters() >= n_before, "{}", model.name());
                assert!(model.pop().iter().all(|&p| p >= 100.0), "{}", model.name());
            }
            assert_eq!(model.year(), 1880);
        }
    }

    #[test]
    fn cluster_births_follow_calibration() {
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        for mut model in all_models(&mut rng).into_iter().take(2) {
            for _ in 0..10 {
                model.step(&mut rng).unwrap();
            }
            assert_eq!(model.state().n_clusters(), 23, "{}", model.name());
        }
    }

    #[test]
    fn attachment_models_need_lumps() {
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let calib = linear_calibration((3.0, 3.0), (1e5, 1e5), 0.0, 0.0);
        let res = Model::new(
            &model_cfg(ModelKind::Simon),
            None,
            vec![1000.0],
            calib,
            &mut rng,
        );
        assert!(res.is_err());
    }
}
