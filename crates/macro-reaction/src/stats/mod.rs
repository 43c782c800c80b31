//! Regression and inference primitives used by the impact engine.
//!
//! Standard errors are heteroscedasticity-consistent (HC3) throughout:
//! event-day return dispersion grows with the size of the surprise, so the
//! classical homoscedastic error would overstate significance.

pub mod inference;
pub mod multiple;
pub mod ols;

pub use inference::{bh_correction, t_to_pvalue};
pub use multiple::{RobustFit, fit_hc3, partial_slope_t};
pub use ols::{SlopeFit, ols_slope_t};

/// Whether a fit leaves no residual beyond rounding noise: the residual sum
/// of squares is at most `f64::EPSILON` times the sum of squared responses.
pub(crate) fn is_perfect_fit(ssr: f64, y_sq: f64) -> bool {
    ssr <= f64::EPSILON * y_sq
}

/// Guard for the t-statistic of a coefficient.
///
/// A perfect fit, or a standard error that is zero or not finite, yields no
/// t-statistic. Large but finite t-statistics of noisy fits are kept.
pub(crate) fn robust_t(beta: f64, se: f64, perfect_fit: bool) -> Option<f64> {
    if perfect_fit || !se.is_finite() || se == 0.0 {
        return None;
    }
    let t = beta / se;
    t.is_finite().then_some(t)
}

/// Leverage threshold above which an observation's HC3 weight is undefined.
/// Such points are fitted exactly and contribute no residual.
pub(crate) const LEVERAGE_TOL: f64 = 1e-12;
