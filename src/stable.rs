use anyhow::{Result, bail};
use rand::prelude::*;
use rand_distr::{Exp1, Uniform};
use std::f64::consts::{FRAC_PI_2, PI};

/// Standard alpha-stable distribution (location 0, scale 1, S1 parametrization).
///
/// Samples are drawn with the Chambers-Mallows-Stuck method.
#[derive(Debug, Clone)]
pub struct StandardStable {
    alpha: f64,
    beta: f64,
    angle_dist: Uniform<f64>,
}

impl StandardStable {
    /// Create a new `StandardStable` with stability `alpha` in `(0, 2]` and skewness `beta` in `[-1, 1]`.
    pub fn new(alpha: f64, beta: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha <= 2.0) {
            bail!("stability must be in the range (0, 2], but is {alpha}");
        }
        if !(-1.0..=1.0).contains(&beta) {
            bail!("skewness must be in the range [-1, 1], but is {beta}");
        }
        let angle_dist = Uniform::new(-FRAC_PI_2, FRAC_PI_2)?;
        Ok(Self {
            alpha,
            beta,
            angle_dist,
        })
    }
}

impl Distribution<f64> for StandardStable {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let v = self.angle_dist.sample(rng);
        let w: f64 = Exp1.sample(rng);
        let (alpha, beta) = (self.alpha, self.beta);

        if alpha == 1.0 {
            let b_v = FRAC_PI_2 + beta * v;
            return (b_v * v.tan() - beta * (FRAC_PI_2 * w * v.cos() / b_v).ln()) / FRAC_PI_2;
        }

        let tan_a = beta * (PI * alpha / 2.0).tan();
        let shift = tan_a.atan() / alpha;
        let scale = (1.0 + tan_a * tan_a).powf(1.0 / (2.0 * alpha));
        let a_v = alpha * (v + shift);
        scale * a_v.sin() / v.cos().powf(1.0 / alpha)
            * ((v - a_v).cos() / w).powf((1.0 - alpha) / alpha)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha12Rng;

    fn draw(alpha: f64, n: usize) -> Vec<f64> {
        let dist = StandardStable::new(alpha, 0.0).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(7);
        (0..n).map(|_| dist.sample(&mut rng)).collect()
    }

    #[test]
    fn alpha_two_is_gaussian_with_variance_two() {
        let vals = draw(2.0, 20_000);
        let mean = vals.iter().sum::<f64>() / vals.len() as f64;
        let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / vals.len() as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 2.0).abs() < 0.1, "var {var}");
    }

    #[test]
    fn symmetric_draws_have_zero_median() {
        for alpha in [0.8, 1.0, 1.25, 1.5] {
            let mut vals = draw(alpha, 20_000);
            vals.sort_by(|a, b| a.total_cmp(b));
            let median = vals[vals.len() / 2];
            assert!(median.abs() < 0.05, "alpha {alpha} median {median}");
        }
    }

    #[test]
    fn smaller_alpha_has_heavier_tails() {
        let frac_large = |vals: &[f64]| vals.iter().filter(|v| v.abs() > 10.0).count();
        assert!(frac_large(&draw(1.25, 20_000)) > frac_large(&draw(1.9, 20_000)));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert!(StandardStable::new(0.0, 0.0).is_err());
        assert!(StandardStable::new(2.5, 0.0).is_err());
        assert!(StandardStable::new(1.5, 1.5).is_err());
    }
}
