//! Simple regression `y = a + b x` with an HC3 robust t-statistic.
//!
//! ```text
//! b      = cov(x, y) / var(x)
//! e_i    = y_i - (a + b x_i)
//! h_i    = 1/n + (x_i - x̄)² / Sxx
//! Var(b) = Σ (x_i - x̄)² e_i² / (1 - h_i)²  /  Sxx²
//! t      = b / sqrt(Var(b))
//! ```
//!
//! # References
//! - MacKinnon, J. G., & White, H. (1985). "Some heteroskedasticity-consistent
//!   covariance matrix estimators with improved finite sample properties."
//!   Journal of Econometrics, 29(3), 305-325.

use super::{LEVERAGE_TOL, is_perfect_fit, robust_t};
use serde::{Deserialize, Serialize};

/// Minimum complete observations for a slope.
pub const MIN_OBSERVATIONS: usize = 3;

/// Result of a simple regression.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlopeFit {
    /// Slope, `None` when undefined
    pub beta: Option<f64>,
    /// Robust t-statistic, `None` when undefined or the fit is perfect
    pub t_stat: Option<f64>,
    /// Complete observations used
    pub n: usize,
}

impl SlopeFit {
    const fn empty(n: usize) -> Self {
        Self {
            beta: None,
            t_stat: None,
            n,
        }
    }
}

/// Regress `y` on `x` over the complete pairs.
///
/// Pairs with a missing or non-finite side are dropped before counting `n`.
/// Fewer than three pairs, or zero variance in `x`, yield `(None, None, n)`.
pub fn ols_slope_t<I>(pairs: I) -> SlopeFit
where
    I: IntoIterator<Item = (Option<f64>, Option<f64>)>,
{
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs
        .into_iter()
        .filter_map(|(x, y)| Some((x?, y?)))
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .unzip();
    let n = xs.len();
    if n < MIN_OBSERVATIONS {
        return SlopeFit::empty(n);
    }

    let nf = n as f64;
    let x_mean = xs.iter().sum::<f64>() / nf;
    let y_mean = ys.iter().sum::<f64>() / nf;
    let sxx: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();
    let var_x = sxx / (nf - 1.0);
    if var_x == 0.0 || !var_x.is_finite() {
        return SlopeFit::empty(n);
    }
    let cov = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum::<f64>()
        / (nf - 1.0);
    let beta = cov / var_x;
    let alpha = y_mean - beta * x_mean;

    let meat: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| {
            let dev = x - x_mean;
            let resid = y - (beta * x + alpha);
            let one_minus_h = 1.0 - (1.0 / nf + dev * dev / sxx);
            if one_minus_h <= LEVERAGE_TOL {
                0.0
            } else {
                (dev * resid / one_minus_h).powi(2)
            }
        })
        .sum();
    let se = (meat / (sxx * sxx)).sqrt();
    let ssr: f64 = xs
        .iter()
        .zip(&ys)
        .map(|(x, y)| (y - (beta * x + alpha)).powi(2))
        .sum();
    let y_sq: f64 = ys.iter().map(|y| y * y).sum();

    SlopeFit {
        beta: Some(beta),
        t_stat: robust_t(beta, se, is_perfect_fit(ssr, y_sq)),
        n,
    }
}
