use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Piecewise-linear function over a sorted grid.
///
/// Queries outside the grid return the nearest boundary value. `NaN` values
/// stored in the grid are returned unchanged by queries that touch them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurvePoints")]
pub struct Curve {
    x_vals: Vec<f64>,
    y_vals: Vec<f64>,
}

#[derive(Deserialize)]
struct CurvePoints {
    x_vals: Vec<f64>,
    y_vals: Vec<f64>,
}

impl TryFrom<CurvePoints> for Curve {
    type Error = anyhow::Error;

    fn try_from(points: CurvePoints) -> Result<Self> {
        Curve::new(points.x_vals, points.y_vals)
    }
}

impl Curve {
    /// Create a new `Curve` from strictly increasing `x_vals` and matching `y_vals`.
    pub fn new(x_vals: Vec<f64>, y_vals: Vec<f64>) -> Result<Self> {
        if x_vals.is_empty() {
            bail!("curve must have at least one point");
        }
        if x_vals.len() != y_vals.len() {
            bail!(
                "curve has {} grid points but {} values",
                x_vals.len(),
                y_vals.len()
            );
        }
        if x_vals.iter().any(|x| !x.is_finite()) {
            bail!("curve grid must be finite");
        }
        if x_vals.windows(2).any(|w| w[0] >= w[1]) {
            bail!("curve grid must be strictly increasing");
        }
        Ok(Self { x_vals, y_vals })
    }

    /// Curve that takes the same value everywhere.
    #[cfg(test)]
    pub fn constant(val: f64) -> Self {
        Self {
            x_vals: vec![0.0],
            y_vals: vec![val],
        }
    }

    pub fn x_vals(&self) -> &[f64] {
        &self.x_vals
    }

    pub fn y_vals(&self) -> &[f64] {
        &self.y_vals
    }

    /// Evaluate the curve at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        let n_pts = self.x_vals.len();
        if x <= self.x_vals[0] {
            return self.y_vals[0];
        }
        if x >= self.x_vals[n_pts - 1] {
            return self.y_vals[n_pts - 1];
        }
        // First grid point strictly greater than `x`; in 1..n_pts here.
        let i = self.x_vals.partition_point(|&xi| xi <= x);
        let (x_0, x_1) = (self.x_vals[i - 1], self.x_vals[i]);
        let (y_0, y_1) = (self.y_vals[i - 1], self.y_vals[i]);
        y_0 + (y_1 - y_0) * (x - x_0) / (x_1 - x_0)
    }
}
