use crate::analysis::Analyzer;
use crate::calibration::Calibration;
use crate::config::Config;
use crate::engine::Engine;
use crate::history::HistoricalTables;
use anyhow::{Context, Result, bail};
use glob::glob;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    /// Create `n_runs` new runs sharing one calibration and initial condition.
    ///
    /// Every run draws from its own generator.
    pub fn create_runs(&self, n_runs: usize) -> Result<()> {
        let first_idx = self.count_run_dirs().context("failed to count run dirs")?;

        let base = self
            .generate_initial_condition()
            .context("failed to generate initial condition")?;

        for run_idx in first_idx..first_idx + n_runs {
            let run_dir = self.run_dir(run_idx);
            fs::create_dir_all(&run_dir)
                .with_context(|| format!("failed to create {run_dir:?}"))?;
            log::info!("created {run_dir:?}");

            let mut engine = base.fork(self.run_seed(run_idx));

            engine
                .perform_simulation(self.trajectory_file(run_idx, 0))
                .context("failed to perform simulation")?;

            engine
                .save_checkpoint(self.checkpoint_file(run_idx))
                .context("failed to save checkpoint")?;
        }

        Ok(())
    }

    pub fn resume_run(&self, run_idx: usize) -> Result<()> {
        let file_idx = self
            .count_trajectory_files(run_idx)
            .context("failed to count trajectory files")?;

        let checkpoint_file = self.checkpoint_file(run_idx);
        let mut engine = Engine::load_checkpoint(&checkpoint_file)
            .with_context(|| format!("failed to load {checkpoint_file:?}"))?;
        if engine.cfg() != &self.cfg {
            bail!("checkpoint config differs from the current config");
        }
        log::info!(
            "loaded {checkpoint_file:?}, resuming {} model at step {}",
            engine.model().name(),
            engine.step()
        );

        engine
            .perform_simulation(self.trajectory_file(run_idx, file_idx))
            .context("failed to perform simulation")?;

        engine
            .save_checkpoint(&checkpoint_file)
            .context("failed to save checkpoint")?;

        Ok(())
    }

    pub fn analyze_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let mut analyzer = Analyzer::new(&self.cfg);

            let n_files = self
                .count_trajectory_files(run_idx)
                .context("failed to count trajectory files")?;
            for file_idx in 0..n_files {
                analyzer
                    .add_file(self.trajectory_file(run_idx, file_idx))
                    .context("failed to add file")?;
            }

            let results_file = self.results_file(run_idx);
            analyzer
                .save_results(&results_file)
                .context("failed to save results")?;
            log::info!("saved {results_file:?}");
        }

        Ok(())
    }

    pub fn clean_sim(&self) -> Result<()> {
        let n_runs = self.count_run_dirs().context("failed to count run dirs")?;
        for run_idx in 0..n_runs {
            let results_file = self.results_file(run_idx);
            if results_file.exists() {
                fs::remove_file(&results_file)
                    .with_context(|| format!("failed to remove {results_file:?}"))?;
                log::info!("removed {results_file:?}");
            }
        }

        Ok(())
    }

    /// Fit the calibration functions and save them for inspection.
    pub fn fit_calibration(&self) -> Result<()> {
        let data = self.load_history()?;
        let calib = Calibration::fit(&data, &self.cfg.calibration)
            .context("failed to fit calibration")?;

        let calib_file = self.sim_dir.join("calibration.json");
        let file = File::create(&calib_file)
            .with_context(|| format!("failed to create {calib_file:?}"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &calib)
            .context("failed to serialize calibration")?;
        writer.flush().context("failed to flush writer stream")?;
        log::info!("saved {calib_file:?}");

        Ok(())
    }

    fn load_history(&self) -> Result<HistoricalTables> {
        let data_file = self.sim_dir.join(&self.cfg.calibration.data_file);
        HistoricalTables::from_file(&data_file)
            .with_context(|| format!("failed to load {data_file:?}"))
    }

    fn generate_initial_condition(&self) -> Result<Engine> {
        let data = self.load_history()?;

        let calib = Calibration::fit(&data, &self.cfg.calibration)
            .context("failed to fit calibration")?;

        let start_year = self.cfg.model.start_year;
        let pop = match &self.cfg.init.pop {
            Some(pop) => pop.clone(),
            None => data.population_in(start_year),
        };
        if pop.is_empty() {
            bail!("no initial population given and none observed in {start_year}");
        }

        self.base_engine(pop, Arc::new(calib))
    }

    /// Engine every run of one `create` is forked from.
    fn base_engine(&self, pop: Vec<f64>, calib: Arc<Calibration>) -> Result<Engine> {
        let rng = ChaCha12Rng::seed_from_u64(self.base_seed());
        Engine::new(self.cfg.clone(), pop, calib, rng)
    }

    /// Seed of the base engine, one below the seed of run 0.
    fn base_seed(&self) -> u64 {
        match self.cfg.output.seed {
            Some(seed) => seed.wrapping_sub(1),
            None => rand::random(),
        }
    }

    fn run_seed(&self, run_idx: usize) -> u64 {
        match self.cfg.output.seed {
            Some(seed) => seed.wrapping_add(run_idx as u64),
            None => rand::random(),
        }
    }

    fn count_run_dirs(&self) -> Result<usize> {
        let pattern = self.sim_dir.join("run-*");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob run dirs")?
            .filter_map(Result::ok)
            .filter(|p| p.is_dir())
            .count();
        Ok(count)
    }

    fn run_dir(&self, run_idx: usize) -> PathBuf {
        self.sim_dir.join(format!("run-{run_idx:04}"))
    }

    fn count_trajectory_files(&self, run_idx: usize) -> Result<usize> {
        let pattern = self.run_dir(run_idx).join("trajectory-*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        let count = glob(pattern)
            .context("failed to glob trajectory files")?
            .filter_map(Result::ok)
            .count();
        Ok(count)
    }

    fn checkpoint_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("checkpoint.msgpack")
    }

    fn trajectory_file(&self, run_idx: usize, file_idx: usize) -> PathBuf {
        self.run_dir(run_idx)
            .join(format!("trajectory-{file_idx:04}.msgpack"))
    }

    fn results_file(&self, run_idx: usize) -> PathBuf {
        self.run_dir(run_idx).join("results.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Model, testing::linear_calibration};
    use rand_distr::{Distribution, LogNormal};

    fn manager() -> Manager {
        let src = "[model]\nkind = \"duranton\"\n[lumps]\ndist = \"log_normal\"\nmu = 5.0\nsigma = 1.0\n[output]\nn_steps = 1\nseed = 7\n";
        Manager {
            sim_dir: PathBuf::new(),
            cfg: toml::from_str(src).unwrap(),
        }
    }

    #[test]
    fn base_seed_differs_from_every_run_seed() {
        let mgr = manager();
        let base_seed = mgr.base_seed();
        assert!((0..10_000).all(|run_idx| mgr.run_seed(run_idx) != base_seed));
    }

    #[test]
    fn first_run_does_not_replay_register_draws() {
        let mgr = manager();
        let calib = linear_calibration((2.0, 2.0), (3000.0, 3000.0), 0.01, 0.05);
        let base = mgr.base_engine(vec![2000.0, 1000.0], calib).unwrap();
        let Model::Attachment(model) = base.model() else {
            panic!("duranton should be an attachment model");
        };
        let register_masses: Vec<_> = model.register().unwrap()[..3]
            .iter()
            .map(|lump| lump.mass)
            .collect();

        let lump_dist = LogNormal::new(5.0, 1.0).unwrap();
        let mut run_rng = ChaCha12Rng::seed_from_u64(mgr.run_seed(0));
        let run_draws: Vec<f64> = (0..3).map(|_| lump_dist.sample(&mut run_rng)).collect();

        assert_ne!(register_masses, run_draws);
    }
}
