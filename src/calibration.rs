use crate::config::CalibrationConfig;
use crate::curve::Curve;
use crate::estimator::{kernel_regression, trim_outliers};
use crate::history::{GrowthRecord, HistoricalData, PopulationRecord};
use crate::stats::Accumulator;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calibration functions shared by all growth models.
///
/// Built once from historical data and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Number of clusters as a function of year.
    pub cluster_count: Curve,
    /// Total population as a function of year.
    pub total_population: Curve,
    /// Mean annualized growth rate as a function of size.
    pub mean_growth: Curve,
    /// Standard deviation of the annualized growth rate as a function of size.
    pub std_growth: Curve,
}

impl Calibration {
    /// Fit all calibration functions from `data`.
    pub fn fit(data: &dyn HistoricalData, cfg: &CalibrationConfig) -> Result<Self> {
        let pop_recs = data
            .cluster_population()
            .context("failed to get cluster population")?;

        let calib = Self {
            cluster_count: cluster_count_curve(&pop_recs)
                .context("failed to fit cluster count curve")?,
            total_population: total_population_curve(&pop_recs)
                .context("failed to fit total population curve")?,
            mean_growth: mean_growth_rate_curve(data, cfg)
                .context("failed to fit mean growth rate curve")?,
            std_growth: std_growth_rate_curve(data, cfg)
                .context("failed to fit std growth rate curve")?,
        };
        log::info!(
            "fitted calibration over {} years and {} size bins",
            calib.cluster_count.x_vals().len(),
            calib.mean_growth.x_vals().len()
        );
        let (low, high) = finite_range(calib.mean_growth.y_vals());
        log::info!("mean growth rate ranges from {low:.4} to {high:.4}");

        Ok(calib)
    }

    /// Change in the number of clusters from `year` to `year + 1`.
    pub fn cluster_count_delta(&self, year: i32) -> f64 {
        self.cluster_count.eval(year as f64 + 1.0) - self.cluster_count.eval(year as f64)
    }

    /// Change in total population from `year` to `year + 1`.
    pub fn population_delta(&self, year: i32) -> f64 {
        self.total_population.eval(year as f64 + 1.0) - self.total_population.eval(year as f64)
    }
}

/// Number of clusters observed in each year, interpolated between years.
pub fn cluster_count_curve(pop_recs: &[PopulationRecord]) -> Result<Curve> {
    year_curve(pop_recs, |count, _| count + 1.0)
}

/// Total population observed in each year, interpolated between years.
pub fn total_population_curve(pop_recs: &[PopulationRecord]) -> Result<Curve> {
    year_curve(pop_recs, |total, rec| total + rec.population)
}

fn year_curve<F>(pop_recs: &[PopulationRecord], fold: F) -> Result<Curve>
where
    F: Fn(f64, &PopulationRecord) -> f64,
{
    let mut by_year: BTreeMap<i32, f64> = BTreeMap::new();
    for rec in pop_recs {
        let acc = by_year.entry(rec.year).or_insert(0.0);
        *acc = fold(*acc, rec);
    }
    if by_year.is_empty() {
        bail!("no population records");
    }
    let (years, vals) = by_year.into_iter().map(|(y, v)| (y as f64, v)).unzip();
    Curve::new(years, vals)
}

/// Mean annualized growth rate by size, after trimming outlying rates.
pub fn mean_growth_rate_curve(data: &dyn HistoricalData, cfg: &CalibrationConfig) -> Result<Curve> {
    let growth = data
        .cluster_growth_rate(cfg.years)
        .context("failed to get cluster growth rate")?;
    let growth = usable_growth(growth);

    let rates: Vec<_> = growth.iter().map(|r| r.growth_rate).collect();
    let kept = trim_outliers(&rates, cfg.outlier_q);
    log::debug!("kept {} of {} growth records", kept.len(), rates.len());

    let sizes: Vec<_> = kept.iter().map(|&i| growth[i].population).collect();
    let rates: Vec<_> = kept.iter().map(|&i| growth[i].growth_rate).collect();
    let est = kernel_regression(&sizes, &rates, cfg.n_bins, cfg.mean_bandwidth)?;
    let (_, max_spread) = finite_range(&est.std_dev);
    log::debug!("growth rate spread around the mean is at most {max_spread:.4}");
    Curve::new(est.grid, est.mean)
}

/// Expected dispersion of growth by size.
///
/// Each cluster contributes the sample standard deviation of its own growth
/// history, placed at its earliest observed size.
pub fn std_growth_rate_curve(data: &dyn HistoricalData, cfg: &CalibrationConfig) -> Result<Curve> {
    let mut growth = data
        .cluster_growth_rate(None)
        .context("failed to get cluster growth rate")?;
    growth.retain(|r| !r.growth_rate.is_nan());
    growth.sort_by_key(|r| (r.cluster, r.year));

    let mut by_cluster: BTreeMap<u64, (f64, Accumulator)> = BTreeMap::new();
    for rec in &growth {
        by_cluster
            .entry(rec.cluster)
            .or_insert_with(|| (rec.population, Accumulator::new()))
            .1
            .add(rec.growth_rate);
    }

    let n_clusters = by_cluster.len();
    let (sizes, std_devs): (Vec<_>, Vec<_>) = by_cluster
        .into_values()
        .filter(|(_, acc)| acc.n_vals() >= 2)
        .map(|(pop, acc)| (pop, acc.std_dev()))
        .filter(|&(pop, _)| pop > 0.0)
        .unzip();
    if sizes.len() < n_clusters {
        log::warn!(
            "dropped {} of {n_clusters} clusters with too few growth observations",
            n_clusters - sizes.len()
        );
    }

    let est = kernel_regression(&sizes, &std_devs, cfg.n_bins, cfg.std_bandwidth)?;
    Curve::new(est.grid, est.mean)
}

/// Smallest and largest finite value, `NaN` if there are none.
fn finite_range(vals: &[f64]) -> (f64, f64) {
    vals.iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f64::NAN, f64::NAN), |(low, high), v| (low.min(v), high.max(v)))
}

fn usable_growth(mut growth: Vec<GrowthRecord>) -> Vec<GrowthRecord> {
    let n_recs = growth.len();
    growth.retain(|r| r.population > 0.0 && !r.growth_rate.is_nan());
    if growth.len() < n_recs {
        log::warn!(
            "dropped {} growth records with non-positive size or missing rate",
            n_recs - growth.len()
        );
    }
    growth
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoricalTables;

    fn cfg() -> CalibrationConfig {
        CalibrationConfig {
            n_bins: 20,
            ..CalibrationConfig::default()
        }
    }

    fn synthetic_tables() -> HistoricalTables {
        let mut population = Vec::new();
        let mut growth = Vec::new();
        for cluster in 0..40u64 {
            let size = 1000.0 * (1.0 + cluster as f64);
            for (i_year, year) in [1850, 1860, 1870].into_iter().enumerate() {
                if cluster >= 30 && year == 1850 {
                    continue;
                }
                population.push(PopulationRecord {
                    cluster,
                    year,
                    population: size,
                });
                let sign = if i_year % 2 == 0 { 1.0 } else { -1.0 };
                growth.push(GrowthRecord {
                    cluster,
                    year,
                    population: size,
                    growth_rate: 0.01 + sign * 0.005 + cluster as f64 * 1e-5,
                });
            }
        }
        HistoricalTables { population, growth }
    }

    #[test]
    fn year_curves_count_and_sum() {
        let tables = synthetic_tables();
        let calib = Calibration::fit(&tables, &cfg()).unwrap();
        assert_eq!(calib.cluster_count.eval(1850.0), 30.0);
        assert_eq!(calib.cluster_count.eval(1860.0), 40.0);
        assert!((calib.cluster_count_delta(1850) - 1.0).abs() < 1e-9);
        assert!((calib.cluster_count.eval(1855.0) - 35.0).abs() < 1e-9);

        let total_1850: f64 = (0..30).map(|c| 1000.0 * (1.0 + c as f64)).sum();
        assert!((calib.total_population.eval(1850.0) - total_1850).abs() < 1e-6);
    }

    #[test]
    fn growth_curves_recover_synthetic_moments() {
        let tables = synthetic_tables();
        let calib = Calibration::fit(&tables, &cfg()).unwrap();
        for &size in calib.mean_growth.x_vals() {
            let mean = calib.mean_growth.eval(size);
            assert!(mean > 0.005 && mean < 0.016, "mean {mean} at {size}");
        }

        // Every cluster alternates +-0.005 around 0.01.
        for &size in calib.std_growth.x_vals() {
            let std = calib.std_growth.eval(size);
            assert!(std > 0.0 && std < 0.01, "std {std} at {size}");
        }
    }

    #[test]
    fn single_observation_clusters_are_dropped() {
        let growth = vec![
            GrowthRecord {
                cluster: 1,
                year: 1850,
                population: 1000.0,
                growth_rate: 0.1,
            },
            GrowthRecord {
                cluster: 2,
                year: 1850,
                population: 2000.0,
                growth_rate: 0.0,
            },
            GrowthRecord {
                cluster: 2,
                year: 1860,
                population: 2200.0,
                growth_rate: 0.02,
            },
        ];
        let tables = HistoricalTables {
            population: Vec::new(),
            growth,
        };
        let curve = std_growth_rate_curve(&tables, &cfg()).unwrap();
        let expected = (0.0002f64).sqrt();
        assert!(curve.y_vals().iter().all(|v| (v - expected).abs() < 1e-12));
    }

    #[test]
    fn constant_growth_gives_constant_curves() {
        let mut population = Vec::new();
        for cluster in 0..20u64 {
            let size = 1000.0 * (1.0 + cluster as f64);
            for (i_year, year) in [1850, 1851, 1852].into_iter().enumerate() {
                population.push(PopulationRecord {
                    cluster,
                    year,
                    population: size * 1.01f64.powi(i_year as i32),
                });
            }
        }
        let tables = HistoricalTables {
            population,
            growth: Vec::new(),
        };
        let calib = Calibration::fit(&tables, &cfg()).unwrap();
        for &size in calib.mean_growth.x_vals() {
            assert!((calib.mean_growth.eval(size) - 0.01).abs() < 1e-9);
            assert!(calib.std_growth.eval(size).abs() < 1e-7);
        }
    }

    #[test]
    fn zero_outlier_probability_keeps_extremes() {
        let growth = [0.0, 0.02]
            .into_iter()
            .enumerate()
            .map(|(cluster, growth_rate)| GrowthRecord {
                cluster: cluster as u64,
                year: 1850,
                population: 1000.0,
                growth_rate,
            })
            .collect();
        let tables = HistoricalTables {
            population: Vec::new(),
            growth,
        };
        let untrimmed = CalibrationConfig {
            outlier_q: 0.0,
            ..cfg()
        };
        let curve = mean_growth_rate_curve(&tables, &untrimmed).unwrap();
        assert!(curve.y_vals().iter().all(|v| (v - 0.01).abs() < 1e-12));
        assert!(mean_growth_rate_curve(&tables, &cfg()).is_err());
    }

    #[test]
    fn empty_history_is_an_error() {
        let tables = HistoricalTables::default();
        assert!(Calibration::fit(&tables, &cfg()).is_err());
    }
}
