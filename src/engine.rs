use crate::calibration::Calibration;
use crate::config::{Config, check_pop};
use crate::model::Model;
use crate::trajectory::Trajectory;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
    sync::Arc,
};

/// Simulation engine.
///
/// Holds the configuration, the model, the number of completed steps and
/// the random number generator of one run, and provides methods to run,
/// save, and load simulations.
#[derive(Clone, Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    model: Model,
    step: usize,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` from an initial population and a fitted calibration.
    pub fn new(
        cfg: Config,
        pop: Vec<f64>,
        calib: Arc<Calibration>,
        mut rng: ChaCha12Rng,
    ) -> Result<Self> {
        check_pop(&pop).context("invalid initial population")?;
        let model = Model::new(&cfg.model, cfg.lumps.as_ref(), pop, calib, &mut rng)
            .context("failed to create model")?;
        Ok(Self {
            cfg,
            model,
            step: 0,
            rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Independent copy of this engine drawing from a generator seeded with `seed`.
    pub fn fork(&self, seed: u64) -> Self {
        Self {
            cfg: self.cfg.clone(),
            model: self.model.clone(),
            step: self.step,
            rng: ChaCha12Rng::seed_from_u64(seed),
        }
    }

    /// Run `n_steps` steps, recording the current state and the state after every step.
    pub fn run(&mut self, n_steps: usize) -> Result<Trajectory> {
        log::info!("running {} model for {n_steps} steps", self.model.name());

        let mut traj = Trajectory::new(self.step);
        traj.push(self.model.pop().to_vec());

        let log_every = (n_steps / 10).max(1);
        for i_step in 0..n_steps {
            self.model
                .step(&mut self.rng)
                .with_context(|| format!("failed to perform step {}", self.step + 1))?;
            self.step += 1;
            traj.push(self.model.pop().to_vec());

            if (i_step + 1) % log_every == 0 {
                let progress = 100.0 * (i_step + 1) as f64 / n_steps as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        Ok(traj)
    }

    /// Perform the configured number of steps and save the trajectory to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let traj = self
            .run(self.cfg.output.n_steps)
            .context("failed to run model")?;
        traj.save(file).context("failed to save trajectory")?;
        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write_named(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}
