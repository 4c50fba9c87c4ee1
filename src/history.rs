//! Historical calibration data.

use crate::stats::annualized_growth;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path};

/// Population of one cluster observed in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub cluster: u64,
    pub year: i32,
    pub population: f64,
}

/// Annualized growth rate of one cluster from `year` to its next observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRecord {
    pub cluster: u64,
    pub year: i32,
    pub population: f64,
    pub growth_rate: f64,
}

/// Read-only source of historical cluster data.
pub trait HistoricalData {
    /// Per-cluster per-year population counts.
    fn cluster_population(&self) -> Result<Vec<PopulationRecord>>;

    /// Per-cluster per-year annualized growth, optionally restricted to an
    /// inclusive year range.
    fn cluster_growth_rate(&self, years: Option<(i32, i32)>) -> Result<Vec<GrowthRecord>>;
}

/// Historical data held in memory, loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoricalTables {
    #[serde(default)]
    pub population: Vec<PopulationRecord>,
    #[serde(default)]
    pub growth: Vec<GrowthRecord>,
}

impl HistoricalTables {
    /// Load [`HistoricalTables`] from a TOML file.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let tables = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        let tables: HistoricalTables =
            toml::from_str(&tables).context("failed to deserialize historical tables")?;
        log::info!(
            "loaded {} population and {} growth records from {file:?}",
            tables.population.len(),
            tables.growth.len()
        );
        Ok(tables)
    }

    /// Population of every cluster observed in `year`, ordered by cluster id.
    pub fn population_in(&self, year: i32) -> Vec<f64> {
        let mut recs: Vec<_> = self.population.iter().filter(|r| r.year == year).collect();
        recs.sort_by_key(|r| r.cluster);
        recs.iter().map(|r| r.population).collect()
    }

    /// Growth between consecutive observations of each cluster.
    fn derived_growth(&self) -> Vec<GrowthRecord> {
        let mut by_cluster: BTreeMap<u64, Vec<&PopulationRecord>> = BTreeMap::new();
        for rec in &self.population {
            by_cluster.entry(rec.cluster).or_default().push(rec);
        }

        let mut growth = Vec::new();
        for recs in by_cluster.values_mut() {
            recs.sort_by_key(|r| r.year);
            for pair in recs.windows(2) {
                let n_years = (pair[1].year - pair[0].year) as f64;
                growth.push(GrowthRecord {
                    cluster: pair[0].cluster,
                    year: pair[0].year,
                    population: pair[0].population,
                    growth_rate: annualized_growth(pair[0].population, pair[1].population, n_years),
                });
            }
        }
        growth
    }
}

impl HistoricalData for HistoricalTables {
    fn cluster_population(&self) -> Result<Vec<PopulationRecord>> {
        Ok(self.population.clone())
    }

    fn cluster_growth_rate(&self, years: Option<(i32, i32)>) -> Result<Vec<GrowthRecord>> {
        let growth = if self.growth.is_empty() {
            self.derived_growth()
        } else {
            self.growth.clone()
        };
        let growth = match years {
            None => growth,
            Some((first, last)) => growth
                .into_iter()
                .filter(|r| (first..=last).contains(&r.year))
                .collect(),
        };
        Ok(growth)
    }
}
