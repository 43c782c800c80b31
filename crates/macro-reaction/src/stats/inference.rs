//! p-values and false discovery rate control.

use statrs::distribution::{ContinuousCDF, StudentsT};
use std::cmp::Ordering;

/// Two-tailed p-value of a t-statistic with `n - 2` degrees of freedom.
///
/// `None` when `t` is missing or non-finite, or when `n < 3`.
pub fn t_to_pvalue(t: Option<f64>, n: Option<usize>) -> Option<f64> {
    let t = t.filter(|t| t.is_finite())?;
    let n = n.filter(|&n| n >= 3)?;
    let dist = StudentsT::new(0.0, 1.0, (n - 2) as f64).ok()?;
    let p = 2.0 * (1.0 - dist.cdf(t.abs()));
    Some(p.clamp(0.0, 1.0))
}

/// Benjamini-Hochberg adjusted p-values.
///
/// Missing and non-finite entries are passed through as `None` and do not
/// count towards the number of tests. Adjusted values keep the input order,
/// are monotone in the raw p-values and capped at 1.
pub fn bh_correction(pvalues: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut present: Vec<(usize, f64)> = pvalues
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.filter(|p| p.is_finite()).map(|p| (i, p)))
        .collect();
    let mut adjusted = vec![None; pvalues.len()];
    let m = present.len();
    if m == 0 {
        return adjusted;
    }
    present.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));

    let mut running = 1.0_f64;
    for (pos, &(idx, p)) in present.iter().enumerate().rev() {
        let rank = (pos + 1) as f64;
        running = running.min(p * m as f64 / rank);
        adjusted[idx] = Some(running.min(1.0));
    }
    adjusted
}
