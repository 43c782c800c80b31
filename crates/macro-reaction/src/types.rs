//! Input rows and output records shared across the pipeline stages.

use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sector label used when a ticker has no sector.
pub const UNKNOWN_SECTOR: &str = "UNKNOWN";

/// One adjusted close observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    /// Observation date
    pub date: NaiveDate,
    /// Instrument identifier
    pub ticker: String,
    /// Dividend/split adjusted close
    pub adj_close: f64,
}

impl PriceRow {
    /// Build a price row.
    pub fn new(date: NaiveDate, ticker: impl Into<String>, adj_close: f64) -> Self {
        Self {
            date,
            ticker: ticker.into(),
            adj_close,
        }
    }
}

/// A scheduled macroeconomic release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroEvent {
    /// Stable identifier of the release
    pub event_id: String,
    /// Human readable name
    pub event_name: String,
    /// Calendar date of the release
    pub event_date: NaiveDate,
    /// Indicator family (CPI, NFP, FOMC, ...); may be empty
    pub event_type: String,
    /// Free-form importance tag
    pub importance: String,
    /// Consensus forecast
    pub expected_value: Option<f64>,
    /// Released figure
    pub actual_value: Option<f64>,
}

impl MacroEvent {
    /// Grouping key for surprise standardisation: `event_type`, or
    /// `event_name` when the type is blank.
    pub fn group_key(&self) -> &str {
        if self.event_type.is_empty() {
            &self.event_name
        } else {
            &self.event_type
        }
    }

    /// `actual - expected` when both are present.
    pub fn surprise(&self) -> Option<f64> {
        Some(self.actual_value? - self.expected_value?)
    }

    /// Surprise relative to `|expected|`; `None` for a zero forecast.
    pub fn surprise_pct(&self) -> Option<f64> {
        let expected = self.expected_value?;
        if expected == 0.0 {
            return None;
        }
        Some(self.surprise()? / expected.abs())
    }
}

/// Sort events by `(event_date, event_name)` for a deterministic order.
pub fn sort_events(events: &mut [MacroEvent]) {
    events.sort_by(|a, b| {
        a.event_date
            .cmp(&b.event_date)
            .then_with(|| a.event_name.cmp(&b.event_name))
    });
}

/// Ticker to sector mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectorMembership {
    by_ticker: BTreeMap<String, String>,
}

impl SectorMembership {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a ticker to a sector; blank labels become [`UNKNOWN_SECTOR`].
    pub fn insert(&mut self, ticker: impl Into<String>, sector: &str) {
        let sector = sector.trim();
        let sector = if sector.is_empty() {
            UNKNOWN_SECTOR
        } else {
            sector
        };
        self.by_ticker.insert(ticker.into(), sector.to_string());
    }

    /// Sector of a ticker, [`UNKNOWN_SECTOR`] if unmapped.
    pub fn sector_of(&self, ticker: &str) -> &str {
        self.by_ticker
            .get(ticker)
            .map_or(UNKNOWN_SECTOR, String::as_str)
    }

    /// Sector to member tickers, both in sorted order.
    pub fn members_by_sector(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut out: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (ticker, sector) in &self.by_ticker {
            out.entry(sector.as_str()).or_default().push(ticker.as_str());
        }
        out
    }

    /// Number of mapped tickers.
    pub fn len(&self) -> usize {
        self.by_ticker.len()
    }

    /// Whether no ticker is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_ticker.is_empty()
    }
}

impl<S: Into<String>, T: AsRef<str>> FromIterator<(S, T)> for SectorMembership {
    fn from_iter<I: IntoIterator<Item = (S, T)>>(iter: I) -> Self {
        let mut membership = Self::new();
        for (ticker, sector) in iter {
            membership.insert(ticker, sector.as_ref());
        }
        membership
    }
}

/// A named date range used to slice results by macro regime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeWindow {
    /// First day of the regime (inclusive)
    pub start_date: NaiveDate,
    /// Last day of the regime (inclusive)
    pub end_date: NaiveDate,
    /// Regime label
    pub name: String,
}

impl RegimeWindow {
    /// Build a regime, swapping reversed bounds.
    pub fn new(start: NaiveDate, end: NaiveDate, name: impl Into<String>) -> Self {
        let (start_date, end_date) = if end < start { (end, start) } else { (start, end) };
        Self {
            start_date,
            end_date,
            name: name.into(),
        }
    }

    /// Whether `date` falls inside the regime.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Momentum and rank of a sector on an event's anchor date.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleSnapshot {
    /// Trailing cumulative benchmark return
    pub momentum: Option<f64>,
    /// Cross-sectional rank, 1 = strongest
    pub rank: Option<usize>,
}

/// Reaction of one sector to one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionRecord {
    /// Event identifier
    pub event_id: String,
    /// Event name
    pub event_name: String,
    /// Calendar date of the event
    pub event_date: NaiveDate,
    /// First trading date on or after `event_date`
    pub t0_date: NaiveDate,
    /// Indicator family
    pub event_type: String,
    /// Importance tag
    pub importance: String,
    /// Sector label
    pub sector: String,
    /// Equal-weighted member return on `t0_date`
    pub t0_return_avg: Option<f64>,
    /// Equal-weighted member cumulative return keyed by half-window
    pub window_cum_avg: BTreeMap<usize, Option<f64>>,
    /// Consensus forecast
    pub expected_value: Option<f64>,
    /// Released figure
    pub actual_value: Option<f64>,
    /// `actual - expected`
    pub surprise: Option<f64>,
    /// Surprise relative to `|expected|`
    pub surprise_pct: Option<f64>,
    /// Standardised surprise
    pub surprise_z: Option<f64>,
    /// Sector momentum/rank at `t0_date`, keyed by lookback window
    pub cycle: BTreeMap<usize, CycleSnapshot>,
}

impl ReactionRecord {
    /// Value of a named metric (`t0_return_avg` or `win{W}_cum_avg`).
    pub fn metric(&self, name: &str) -> Option<f64> {
        if name == crate::reaction::T0_METRIC {
            return self.t0_return_avg;
        }
        let window = crate::reaction::parse_window_metric(name)?;
        self.window_cum_avg.get(&window).copied().flatten()
    }

    /// Rank of the sector for a momentum window, as a regressor.
    pub fn rank(&self, window: usize) -> Option<f64> {
        self.cycle
            .get(&window)
            .and_then(|c| c.rank)
            .map(|r| r as f64)
    }
}

/// Standardised surprise of one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseZRecord {
    /// Event identifier
    pub event_id: String,
    /// Grouping key the event was standardised in
    pub event_type: String,
    /// Raw surprise before scaling
    pub surprise: Option<f64>,
    /// Standardised surprise
    pub surprise_z: Option<f64>,
}

/// Trailing momentum and ranks of one sector on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumRankRecord {
    /// Trading date
    pub date: NaiveDate,
    /// Sector label
    pub sector: String,
    /// Momentum and rank per lookback window
    pub windows: BTreeMap<usize, CycleSnapshot>,
}

/// Sensitivity of one sector metric to one event type's surprises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactRecord {
    /// Event type (or event name when types are absent)
    pub event_type: String,
    /// Sector label
    pub sector: String,
    /// Reaction metric regressed on `surprise_z`
    pub metric: String,
    /// Complete observations
    pub n: usize,
    /// Slope on `surprise_z`
    pub beta: Option<f64>,
    /// Robust t-statistic of `beta`
    pub t_stat: Option<f64>,
    /// Slope on positive surprises only
    pub beta_pos: Option<f64>,
    /// Robust t-statistic of `beta_pos`
    pub t_pos: Option<f64>,
    /// Positive-surprise observations
    pub n_pos: usize,
    /// Slope on negative surprises only
    pub beta_neg: Option<f64>,
    /// Robust t-statistic of `beta_neg`
    pub t_neg: Option<f64>,
    /// Negative-surprise observations
    pub n_neg: usize,
    /// Two-tailed p-value of `t_stat`
    pub p_value: Option<f64>,
    /// Benjamini-Hochberg adjusted p-value
    pub p_adj_bh: Option<f64>,
    /// `p_adj_bh <= fdr_alpha`
    pub significant_bh: Option<bool>,
}

/// Scope of a partial regression.
#[derive(Debug, Display, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    /// Full sample
    #[display("overall")]
    Overall,
    /// Reactions whose anchor date falls in a regime window
    #[display("regime:{_0}")]
    Regime(String),
}

/// Partial sensitivity to surprises after controlling for momentum rank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialImpactRecord {
    /// Sample scope
    pub scope: Scope,
    /// Event type
    pub event_type: String,
    /// Sector label
    pub sector: String,
    /// Response metric
    pub metric: String,
    /// Coefficient on `surprise_z`
    pub beta_partial: Option<f64>,
    /// Robust t-statistic of `beta_partial`
    pub t_stat: Option<f64>,
    /// Complete observations
    pub n: usize,
}
