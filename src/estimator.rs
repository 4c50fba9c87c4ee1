use anyhow::{Result, bail};

/// Kernel-smoothed conditional mean and standard deviation of `y` given `x`.
///
/// All three vectors share the same length and are indexed by grid point.
#[derive(Debug, Clone)]
pub struct KernelEstimate {
    pub grid: Vec<f64>,
    pub mean: Vec<f64>,
    pub std_dev: Vec<f64>,
}

/// Nadaraya-Watson estimator with a Gaussian kernel in log-size space.
///
/// The estimate is evaluated on `n_bins` log-spaced points spanning
/// `[0.9 * min(x), 1.1 * max(x)]`. Grid points with no effective kernel
/// weight yield `NaN` mean and standard deviation.
pub fn kernel_regression(
    x_vals: &[f64],
    y_vals: &[f64],
    n_bins: usize,
    bandwidth: f64,
) -> Result<KernelEstimate> {
    let n_vals = x_vals.len();
    if n_vals == 0 {
        bail!("no observations to estimate from");
    }
    if y_vals.len() != n_vals {
        bail!("x has {n_vals} values but y has {}", y_vals.len());
    }
    if n_bins < 2 {
        bail!("number of bins must be at least 2, but is {n_bins}");
    }
    if !(bandwidth > 0.0) {
        bail!("bandwidth must be positive, but is {bandwidth}");
    }
    if let Some(x) = x_vals.iter().find(|&&x| !(x > 0.0 && x.is_finite())) {
        bail!("sizes must be positive and finite, but found {x}");
    }

    let x_min = x_vals.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = x_vals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let grid = log_space(0.9 * x_min, 1.1 * x_max, n_bins);

    let log_x_vals: Vec<_> = x_vals.iter().map(|x| x.ln()).collect();
    let two_h_2 = 2.0 * bandwidth * bandwidth;

    let mut mean = Vec::with_capacity(n_bins);
    let mut std_dev = Vec::with_capacity(n_bins);
    let mut weights = vec![0.0; n_vals];
    for &s in &grid {
        let log_s = s.ln();
        for (w, log_x) in weights.iter_mut().zip(&log_x_vals) {
            *w = (-(log_s - log_x).powi(2) / two_h_2).exp();
        }
        let w_sum: f64 = weights.iter().sum();

        // A zero weight sum gives 0/0 here on purpose.
        let m = weights.iter().zip(y_vals).map(|(w, y)| w * y).sum::<f64>() / w_sum;
        let var = weights
            .iter()
            .zip(y_vals)
            .map(|(w, y)| w * (y - m).powi(2))
            .sum::<f64>()
            / w_sum;

        mean.push(m);
        std_dev.push(var.sqrt());
    }

    Ok(KernelEstimate {
        grid,
        mean,
        std_dev,
    })
}

/// Indices of the values lying strictly between the `q` and `1 - q` quantiles.
///
/// Nothing is trimmed when `q` is zero. When both quantiles coincide the
/// values equal to them are kept.
pub fn trim_outliers(vals: &[f64], q: f64) -> Vec<usize> {
    if q <= 0.0 {
        return (0..vals.len()).collect();
    }
    let mut sorted: Vec<_> = vals.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let low = quantile(&sorted, q);
    let high = quantile(&sorted, 1.0 - q);
    let keep = |v: f64| {
        if low < high {
            v > low && v < high
        } else {
            v >= low && v <= high
        }
    };
    vals.iter()
        .enumerate()
        .filter(|&(_, &v)| keep(v))
        .map(|(i, _)| i)
        .collect()
}

/// Linearly interpolated quantile of an already sorted slice.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    let n_vals = sorted.len();
    if n_vals == 0 {
        return f64::NAN;
    }
    let rank = q.clamp(0.0, 1.0) * (n_vals - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

fn log_space(start: f64, stop: f64, num: usize) -> Vec<f64> {
    let log_start = start.log10();
    let log_stop = stop.log10();
    let step = (log_stop - log_start) / (num - 1) as f64;
    (0..num)
        .map(|i| {
            if i == num - 1 {
                stop
            } else {
                10f64.powf(log_start + i as f64 * step)
            }
        })
        .collect()
}
