use serde::{Deserialize, Serialize};

/// Running mean and sample variance (Welford's algorithm).
#[derive(Clone)]
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub n_vals: usize,
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn n_vals(&self) -> usize {
        self.n_vals
    }

    pub fn mean(&self) -> f64 {
        if self.n_vals > 0 { self.mean } else { f64::NAN }
    }

    /// Sample standard deviation, `NaN` with fewer than two values.
    pub fn std_dev(&self) -> f64 {
        if self.n_vals > 1 {
            (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
        } else {
            f64::NAN
        }
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            n_vals: self.n_vals,
            mean: self.mean(),
            std_dev: self.std_dev(),
        }
    }
}

/// Constant yearly rate that takes `pop_0` to `pop_1` in `n_years`.
pub fn annualized_growth(pop_0: f64, pop_1: f64, n_years: f64) -> f64 {
    (pop_1 / pop_0).powf(1.0 / n_years) - 1.0
}

/// Lag-1 autocorrelation (uncentered), `NaN` with fewer than four values.
pub fn autocorrelation(vals: &[f64]) -> f64 {
    if vals.len() < 4 {
        return f64::NAN;
    }
    let head = &vals[..vals.len() - 1];
    let tail = &vals[1..];
    let dot: f64 = head.iter().zip(tail).map(|(a, b)| a * b).sum();
    dot / (norm(head) * norm(tail))
}

fn norm(vals: &[f64]) -> f64 {
    vals.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Ordinary least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub adj_r2: f64,
    pub n_obs: usize,
}

pub fn fit_line(x_vals: &[f64], y_vals: &[f64]) -> LinearFit {
    let n_obs = x_vals.len().min(y_vals.len());
    let n = n_obs as f64;
    let x_mean = x_vals.iter().take(n_obs).sum::<f64>() / n;
    let y_mean = y_vals.iter().take(n_obs).sum::<f64>() / n;

    let mut s_xy = 0.0;
    let mut s_xx = 0.0;
    let mut s_yy = 0.0;
    for (x, y) in x_vals.iter().zip(y_vals) {
        s_xy += (x - x_mean) * (y - y_mean);
        s_xx += (x - x_mean).powi(2);
        s_yy += (y - y_mean).powi(2);
    }

    let slope = s_xy / s_xx;
    let intercept = y_mean - slope * x_mean;
    let r2 = s_xy * s_xy / (s_xx * s_yy);
    let adj_r2 = if n_obs > 2 {
        1.0 - (1.0 - r2) * (n - 1.0) / (n - 2.0)
    } else {
        f64::NAN
    };

    LinearFit {
        slope,
        intercept,
        r2,
        adj_r2,
        n_obs,
    }
}

/// Rank-size regression of `ln(rank)` on `ln(size / size_min)` over sizes above `threshold`.
///
/// For a Zipf distribution the slope is close to `-1`.
pub fn zipf_regression(pop: &[f64], threshold: f64) -> LinearFit {
    let mut sizes: Vec<_> = pop.iter().copied().filter(|&p| p > threshold).collect();
    sizes.sort_by(|a, b| b.total_cmp(a));
    let log_min = sizes.last().map_or(f64::NAN, |p| p.ln());
    let log_sizes: Vec<_> = sizes.iter().map(|p| p.ln() - log_min).collect();
    let log_ranks: Vec<_> = (1..=sizes.len()).map(|r| (r as f64).ln()).collect();
    fit_line(&log_sizes, &log_ranks)
}
