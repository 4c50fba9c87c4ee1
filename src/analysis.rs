use crate::config::Config;
use crate::stats::{Accumulator, LinearFit, annualized_growth, autocorrelation, zipf_regression};
use crate::trajectory::Trajectory;
use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

pub trait Obs {
    fn update(&mut self, year: i32, pop: &[f64]) -> Result<()>;
    fn report(&self) -> serde_json::Value;
}

#[derive(Debug, Serialize)]
pub struct YearValue<T> {
    pub year: i32,
    pub value: T,
}

pub struct ClusterCount {
    series: Vec<YearValue<usize>>,
}

impl ClusterCount {
    pub fn new() -> Self {
        Self { series: Vec::new() }
    }
}

impl Obs for ClusterCount {
    fn update(&mut self, year: i32, pop: &[f64]) -> Result<()> {
        self.series.push(YearValue {
            year,
            value: pop.len(),
        });
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "cluster_count": self.series })
    }
}

pub struct TotalPopulation {
    series: Vec<YearValue<f64>>,
}

impl TotalPopulation {
    pub fn new() -> Self {
        Self { series: Vec::new() }
    }
}

impl Obs for TotalPopulation {
    fn update(&mut self, year: i32, pop: &[f64]) -> Result<()> {
        self.series.push(YearValue {
            year,
            value: pop.iter().sum(),
        });
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "total_population": self.series })
    }
}

/// Rank-size regression of every analyzed snapshot.
pub struct ZipfExponent {
    threshold: f64,
    series: Vec<YearValue<LinearFit>>,
}

impl ZipfExponent {
    pub fn new(cfg: &Config) -> Self {
        Self {
            threshold: cfg.analysis.zipf_threshold,
            series: Vec::new(),
        }
    }
}

impl Obs for ZipfExponent {
    fn update(&mut self, year: i32, pop: &[f64]) -> Result<()> {
        self.series.push(YearValue {
            year,
            value: zipf_regression(pop, self.threshold),
        });
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        serde_json::json!({ "zipf_regression": self.series })
    }
}

/// Annualized growth of each cluster between analyzed snapshots.
pub struct GrowthAutocorrelation {
    prev: Option<(i32, Vec<f64>)>,
    growth_vec: Vec<Vec<f64>>,
}

impl GrowthAutocorrelation {
    pub fn new() -> Self {
        Self {
            prev: None,
            growth_vec: Vec::new(),
        }
    }
}

impl Obs for GrowthAutocorrelation {
    fn update(&mut self, year: i32, pop: &[f64]) -> Result<()> {
        if let Some((prev_year, prev_pop)) = &self.prev {
            let n_years = (year - prev_year) as f64;
            self.growth_vec.resize_with(prev_pop.len(), Vec::new);
            for (i_cluster, (&p_0, &p_1)) in prev_pop.iter().zip(pop).enumerate() {
                self.growth_vec[i_cluster].push(annualized_growth(p_0, p_1, n_years));
            }
        }
        self.prev = Some((year, pop.to_vec()));
        Ok(())
    }

    fn report(&self) -> serde_json::Value {
        let mut growth_acc = Accumulator::new();
        let mut autocorr_acc = Accumulator::new();
        for growth in &self.growth_vec {
            growth
                .iter()
                .filter(|g| g.is_finite())
                .for_each(|&g| growth_acc.add(g));
            let autocorr = autocorrelation(growth);
            if autocorr.is_finite() {
                autocorr_acc.add(autocorr);
            }
        }
        serde_json::json!({
            "annualized_growth": growth_acc.report(),
            "growth_autocorrelation": autocorr_acc.report(),
        })
    }
}

pub struct Analyzer {
    start_year: i32,
    frequency: usize,
    last_step: Option<usize>,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: &Config) -> Self {
        let obs_ptr_vec: Vec<Box<dyn Obs>> = vec![
            Box::new(ClusterCount::new()),
            Box::new(TotalPopulation::new()),
            Box::new(ZipfExponent::new(cfg)),
            Box::new(GrowthAutocorrelation::new()),
        ];
        Self {
            start_year: cfg.model.start_year,
            frequency: cfg.analysis.frequency,
            last_step: None,
            obs_ptr_vec,
        }
    }

    /// Feed every `frequency`-th snapshot of a trajectory to the observables.
    ///
    /// Trajectories must be added in step order; steps already analyzed are
    /// skipped.
    pub fn add_trajectory(&mut self, traj: &Trajectory) -> Result<()> {
        if traj.is_empty() {
            log::warn!("skipping empty trajectory");
            return Ok(());
        }

        let first_new = match self.last_step {
            Some(last) => traj.first_step().max(last + 1),
            None => traj.first_step(),
        };
        let end = traj.first_step() + traj.len();

        for step in (first_new.next_multiple_of(self.frequency)..end).step_by(self.frequency) {
            let pop = traj
                .get(step)
                .with_context(|| format!("trajectory has no step {step}"))?;
            let year = self.start_year + step as i32;
            for obs in &mut self.obs_ptr_vec {
                obs.update(year, pop).context("failed to update observable")?;
            }
        }

        self.last_step = self.last_step.max(Some(end - 1));
        Ok(())
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let traj =
            Trajectory::load(file).with_context(|| format!("failed to load {file:?}"))?;
        self.add_trajectory(&traj)
    }

    pub fn reports(&self) -> Vec<serde_json::Value> {
        self.obs_ptr_vec.iter().map(|obs| obs.report()).collect()
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &self.reports())
            .context("failed to serialize results")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let src = "[model]\nkind = \"gabaix\"\n[output]\nn_steps = 1\n[analysis]\nfrequency = 2\nzipf_threshold = 0.0\n";
        toml::from_str(src).unwrap()
    }

    fn growing_trajectory(first_step: usize, n_snapshots: usize) -> Trajectory {
        let mut traj = Trajectory::new(first_step);
        for step in first_step..first_step + n_snapshots {
            let factor = 1.1f64.powi(step as i32);
            traj.push(vec![1000.0 * factor, 500.0 * factor]);
        }
        traj
    }

    #[test]
    fn samples_every_frequency_steps() {
        let mut analyzer = Analyzer::new(&config());
        analyzer.add_trajectory(&growing_trajectory(0, 11)).unwrap();
        let reports = analyzer.reports();
        let counts = reports[0]["cluster_count"].as_array().unwrap();
        assert_eq!(counts.len(), 6);
        assert_eq!(counts[1]["year"], 1852);
        assert_eq!(counts[1]["value"], 2);
    }

    #[test]
    fn overlapping_files_are_not_double_counted() {
        let mut analyzer = Analyzer::new(&config());
        analyzer.add_trajectory(&growing_trajectory(0, 5)).unwrap();
        analyzer.add_trajectory(&growing_trajectory(4, 7)).unwrap();
        let reports = analyzer.reports();
        assert_eq!(reports[1]["total_population"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn sampling_follows_absolute_steps() {
        let mut analyzer = Analyzer::new(&config());
        analyzer.add_trajectory(&growing_trajectory(3, 6)).unwrap();
        analyzer.add_trajectory(&Trajectory::new(9)).unwrap();
        analyzer.add_trajectory(&growing_trajectory(8, 3)).unwrap();
        let reports = analyzer.reports();
        let years: Vec<_> = reports[0]["cluster_count"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["year"].as_i64().unwrap())
            .collect();
        assert_eq!(years, [1854, 1856, 1858, 1860]);
    }

    #[test]
    fn constant_growth_is_recovered() {
        let mut analyzer = Analyzer::new(&config());
        analyzer.add_trajectory(&growing_trajectory(0, 11)).unwrap();
        let reports = analyzer.reports();
        let growth = &reports[3]["annualized_growth"];
        assert_eq!(growth["n_vals"], 10);
        assert!((growth["mean"].as_f64().unwrap() - 0.1).abs() < 1e-9);
        let autocorr = &reports[3]["growth_autocorrelation"];
        assert!((autocorr["mean"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }
}
