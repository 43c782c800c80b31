//! Trading calendar, price series and simple daily returns.
//!
//! The calendar is the sorted union of every date with at least one price.
//! Return series are sparse: a date with no price for an instrument has no
//! return for that instrument, it is never filled with zero.

use crate::types::PriceRow;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use tracing::debug;

/// Per-instrument date series.
pub type DateSeries = BTreeMap<NaiveDate, f64>;

/// Instrument to adjusted close by date.
pub type PriceSeries = BTreeMap<String, DateSeries>;

/// Instrument to simple return by date.
pub type ReturnSeries = BTreeMap<String, DateSeries>;

/// Strictly increasing sequence of trading dates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
}

impl TradingCalendar {
    /// Build the calendar from raw price rows.
    pub fn from_prices(rows: &[PriceRow]) -> Self {
        Self::from_dates(rows.iter().map(|r| r.date))
    }

    /// Build the calendar from any set of dates; duplicates are removed.
    pub fn from_dates(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        let unique: BTreeSet<NaiveDate> = dates.into_iter().collect();
        Self {
            dates: unique.into_iter().collect(),
        }
    }

    /// All trading dates in order.
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    /// Number of trading dates.
    pub fn len(&self) -> usize {
        self.dates.len()
    }

    /// Whether the calendar has no dates.
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Date at a calendar index.
    pub fn date_at(&self, idx: usize) -> Option<NaiveDate> {
        self.dates.get(idx).copied()
    }

    /// Index of an exact trading date.
    pub fn index_of(&self, date: NaiveDate) -> Option<usize> {
        self.dates.binary_search(&date).ok()
    }

    /// First trading date on or after `date`.
    ///
    /// Returns `None` when `date` is past the last trading date.
    pub fn nearest_on_or_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        let idx = self.dates.partition_point(|d| *d < date);
        self.dates.get(idx).copied()
    }

    /// Inclusive index range `[center - half, center + half]` clipped to the
    /// calendar. Windows near either end of history are truncated.
    pub fn window_bounds(&self, center: usize, half: usize) -> Option<RangeInclusive<usize>> {
        if self.dates.is_empty() || center >= self.dates.len() {
            return None;
        }
        let lo = center.saturating_sub(half);
        let hi = center.saturating_add(half).min(self.dates.len() - 1);
        Some(lo..=hi)
    }
}

/// Group raw rows into per-instrument series. A repeated `(ticker, date)`
/// keeps the last row seen.
pub fn build_price_series(rows: &[PriceRow]) -> PriceSeries {
    let mut prices = PriceSeries::new();
    for row in rows {
        prices
            .entry(row.ticker.clone())
            .or_default()
            .insert(row.date, row.adj_close);
    }
    prices
}

/// Simple returns `p[t] / p[t_prev] - 1`, where `t_prev` is the previous date
/// the instrument itself traded. A zero previous price yields no return.
pub fn compute_returns(prices: &PriceSeries) -> ReturnSeries {
    let mut returns = ReturnSeries::new();
    let mut skipped = 0usize;
    for (ticker, series) in prices {
        let mut out = DateSeries::new();
        let mut prev: Option<f64> = None;
        for (&date, &px) in series {
            if let Some(last) = prev {
                if last != 0.0 && last.is_finite() && px.is_finite() {
                    out.insert(date, px / last - 1.0);
                } else {
                    skipped += 1;
                }
            }
            prev = Some(px);
        }
        returns.insert(ticker.clone(), out);
    }
    if skipped > 0 {
        debug!(skipped, "returns skipped on zero or non-finite previous price");
    }
    returns
}

/// Subtract the benchmark's same-date return from every other instrument.
///
/// Dates without a benchmark return leave the instrument's return unchanged.
/// An unknown benchmark returns the input untouched.
pub fn adjust_for_benchmark(returns: &ReturnSeries, benchmark: &str) -> ReturnSeries {
    let Some(bench) = returns.get(benchmark) else {
        return returns.clone();
    };
    returns
        .iter()
        .map(|(ticker, series)| {
            if ticker == benchmark {
                return (ticker.clone(), series.clone());
            }
            let adjusted = series
                .iter()
                .map(|(date, r)| (*date, bench.get(date).map_or(*r, |b| r - b)))
                .collect();
            (ticker.clone(), adjusted)
        })
        .collect()
}

/// Compounded return `prod(1 + r) - 1` of the values present, `None` if empty.
pub fn compound(returns: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut product = 1.0;
    let mut seen = false;
    for r in returns {
        product *= 1.0 + r;
        seen = true;
    }
    seen.then_some(product - 1.0)
}

/// Mean of the values present, `None` if empty.
pub fn mean_present(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}
