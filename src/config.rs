use crate::lumps::LumpDist;
use crate::walk::ShockExponent;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path, path::PathBuf};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub model: ModelConfig,
    #[serde(default)]
    pub lumps: Option<LumpDist>,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub init: InitConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Growth theory to simulate.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Random walk with Gaussian growth shocks.
    Gabaix,
    /// Random walk with alpha-stable growth shocks.
    Barthelemy,
    /// Preferential attachment of lumps, aggregate bookkeeping.
    Simon,
    /// Preferential attachment with a lump register and relocation.
    Duranton,
}

impl ModelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Gabaix => "gabaix",
            ModelKind::Barthelemy => "barthelemy",
            ModelKind::Simon => "simon",
            ModelKind::Duranton => "duranton",
        }
    }

    pub fn uses_lumps(&self) -> bool {
        matches!(self, ModelKind::Simon | ModelKind::Duranton)
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub kind: ModelKind,
    /// Year of the initial state.
    #[serde(default = "default_start_year")]
    pub start_year: i32,
    /// Minimum population of every cluster.
    #[serde(default = "default_lower_bound")]
    pub lower_bound: f64,
    /// Probability that a relocatable lump moves in one step.
    #[serde(default = "default_relocation_prob")]
    pub relocation_prob: f64,
    #[serde(default)]
    pub shock_exponent: ShockExponent,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Historical data file, relative to the simulation directory.
    pub data_file: PathBuf,
    /// Inclusive year range of the growth observations used for the mean growth curve.
    pub years: Option<(i32, i32)>,
    pub n_bins: usize,
    pub mean_bandwidth: f64,
    pub std_bandwidth: f64,
    /// Tail probability trimmed from each end of the growth rates.
    pub outlier_q: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            data_file: PathBuf::from("history.toml"),
            years: None,
            n_bins: 100,
            mean_bandwidth: 1.0,
            std_bandwidth: 0.5,
            outlier_q: 1e-5,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct InitConfig {
    /// Initial population vector. Taken from the historical data at the start year when absent.
    pub pop: Option<Vec<f64>>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of steps per trajectory file.
    pub n_steps: usize,
    /// Base seed; run `i` uses `seed + i`. Seeded from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analyze every `frequency`-th step.
    pub frequency: usize,
    /// Minimum size of clusters entering the rank-size regression.
    pub zipf_threshold: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frequency: 10,
            zipf_threshold: 5000.0,
        }
    }
}

fn default_start_year() -> i32 {
    1850
}

fn default_lower_bound() -> f64 {
    100.0
}

fn default_relocation_prob() -> f64 {
    0.001
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be TOML-encoded and contain a serialized [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let config = fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&config).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let model = &self.model;
        check_num(model.lower_bound, 0.0..1e12).context("invalid lower bound")?;
        check_num(model.relocation_prob, 0.0..=1.0).context("invalid relocation probability")?;
        model
            .shock_exponent
            .validate()
            .context("invalid shock exponent")?;

        match (&self.lumps, model.kind.uses_lumps()) {
            (Some(lumps), _) => lumps.validate().context("invalid lump distribution")?,
            (None, true) => bail!("model {} needs a lump distribution", model.kind.name()),
            (None, false) => {}
        }

        let calib = &self.calibration;
        check_num(calib.n_bins, 2..100_000).context("invalid number of bins")?;
        check_num(calib.mean_bandwidth, 1e-6..1e3).context("invalid mean bandwidth")?;
        check_num(calib.std_bandwidth, 1e-6..1e3).context("invalid std bandwidth")?;
        check_num(calib.outlier_q, 0.0..0.5).context("invalid outlier probability")?;
        if let Some((first, last)) = calib.years {
            if first > last {
                bail!("year range must be ordered, but is {first}..={last}");
            }
        }

        if let Some(pop) = &self.init.pop {
            check_pop(pop).context("invalid initial population")?;
        }

        check_num(self.output.n_steps, 1..1_000_000).context("invalid number of steps")?;

        check_num(self.analysis.frequency, 1..1_000_000).context("invalid analysis frequency")?;
        check_num(self.analysis.zipf_threshold, 0.0..1e12).context("invalid zipf threshold")?;

        Ok(())
    }
}

pub fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

pub fn check_pop(pop: &[f64]) -> Result<()> {
    if pop.is_empty() {
        bail!("population vector must not be empty");
    }
    if let Some(p) = pop.iter().find(|p| !(p.is_finite() && **p >= 0.0)) {
        bail!("populations must be finite and non-negative, but found {p}");
    }
    Ok(())
}
