//! Multiple regression with an HC3 sandwich covariance.
//!
//! ```text
//! β      = (X'X)⁻¹ X'y
//! h_ii   = x_i' (X'X)⁻¹ x_i
//! Ω      = Σ x_i x_i' e_i² / (1 - h_ii)²
//! V(β)   = (X'X)⁻¹ Ω (X'X)⁻¹
//! ```

use super::ols::SlopeFit;
use super::{LEVERAGE_TOL, is_perfect_fit, robust_t};
use nalgebra::{DMatrix, DVector};
use tracing::trace;

/// Coefficients and robust standard errors of a multiple regression.
#[derive(Debug, Clone, PartialEq)]
pub struct RobustFit {
    /// One coefficient per design column
    pub coefficients: DVector<f64>,
    /// HC3 standard error per coefficient
    pub standard_errors: DVector<f64>,
    /// Observations used
    pub n: usize,
    /// Residuals vanished up to rounding
    pub perfect_fit: bool,
}

impl RobustFit {
    /// Robust t-statistic of coefficient `j`, `None` for a perfect fit or
    /// an out-of-range column.
    pub fn t_stat(&self, j: usize) -> Option<f64> {
        let beta = *self.coefficients.get(j)?;
        let se = *self.standard_errors.get(j)?;
        robust_t(beta, se, self.perfect_fit)
    }
}

/// Numerical rank test on the singular values of `x`.
fn is_full_column_rank(x: &DMatrix<f64>) -> bool {
    let sv = x.singular_values();
    let Some(max_sv) = sv.iter().copied().reduce(f64::max) else {
        return false;
    };
    if max_sv <= 0.0 || !max_sv.is_finite() {
        return false;
    }
    let tol = max_sv * (x.nrows().max(x.ncols()) as f64) * f64::EPSILON;
    sv.iter().all(|&s| s > tol)
}

/// Fit `y = X β` with HC3 standard errors.
///
/// Returns `None` when `n <= k`, the design is rank deficient, or `X'X`
/// cannot be inverted.
pub fn fit_hc3(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<RobustFit> {
    let (n, k) = x.shape();
    if n <= k || y.len() != n || k == 0 {
        return None;
    }
    if !is_full_column_rank(x) {
        trace!(n, k, "design matrix is rank deficient");
        return None;
    }
    let xtx_inv = (x.transpose() * x).try_inverse()?;
    let coefficients = &xtx_inv * (x.transpose() * y);
    let residuals = y - x * &coefficients;

    let mut meat = DMatrix::<f64>::zeros(k, k);
    for i in 0..n {
        let xi = x.row(i).transpose();
        let h = (xi.transpose() * &xtx_inv * &xi)[(0, 0)];
        let one_minus_h = 1.0 - h;
        if one_minus_h <= LEVERAGE_TOL {
            continue;
        }
        let w = (residuals[i] / one_minus_h).powi(2);
        meat += &xi * xi.transpose() * w;
    }
    let cov = &xtx_inv * meat * &xtx_inv;
    let standard_errors = DVector::from_iterator(k, cov.diagonal().iter().map(|v| v.max(0.0).sqrt()));

    Some(RobustFit {
        perfect_fit: is_perfect_fit(residuals.norm_squared(), y.norm_squared()),
        coefficients,
        standard_errors,
        n,
    })
}

/// Coefficient on `z` in `y ~ 1 + z + rank` with its HC3 t-statistic.
///
/// Rows missing any of the three values are dropped. Fewer than three rows,
/// or a singular design, yield `(None, None, n)`.
pub fn partial_slope_t<I>(rows: I) -> SlopeFit
where
    I: IntoIterator<Item = (Option<f64>, Option<f64>, Option<f64>)>,
{
    let complete: Vec<[f64; 3]> = rows
        .into_iter()
        .filter_map(|(y, z, r)| Some([y?, z?, r?]))
        .filter(|row| row.iter().all(|v| v.is_finite()))
        .collect();
    let n = complete.len();
    let empty = SlopeFit {
        beta: None,
        t_stat: None,
        n,
    };
    if n < super::ols::MIN_OBSERVATIONS {
        return empty;
    }

    let design = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => 1.0,
        1 => complete[i][1],
        _ => complete[i][2],
    });
    let y = DVector::from_iterator(n, complete.iter().map(|row| row[0]));
    match fit_hc3(&design, &y) {
        Some(fit) => SlopeFit {
            beta: Some(fit.coefficients[1]),
            t_stat: fit.t_stat(1),
            n,
        },
        None => empty,
    }
}
