//! Event-to-sector reaction aggregation.
//!
//! For every event the anchor date `t0` is the first trading date on or
//! after the release. Each sector then gets:
//!
//! - `t0_return_avg`: equal-weighted mean of member returns on `t0`
//! - `win{W}_cum_avg`: equal-weighted mean of each member's own compounded
//!   return over `[t0 - W, t0 + W]` (cumulate per member, then average)
//!
//! Missing member returns are skipped, never zero-filled, and a sector with
//! no usable member returns reports `None`.

use crate::calendar::{ReturnSeries, TradingCalendar, compound, mean_present};
use crate::config::RecentFilter;
use crate::types::{MacroEvent, ReactionRecord, SectorMembership};
use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Metric name of the event-day return.
pub const T0_METRIC: &str = "t0_return_avg";

/// Metric name of a windowed cumulative return.
pub fn window_metric(half_window: usize) -> String {
    format!("win{half_window}_cum_avg")
}

/// Half-window of a `win{W}_cum_avg` metric name.
pub fn parse_window_metric(name: &str) -> Option<usize> {
    name.strip_prefix("win")?
        .strip_suffix("_cum_avg")?
        .parse()
        .ok()
}

/// Metric names present on a set of reactions: `t0_return_avg` first, then
/// window metrics in ascending window order.
pub fn detect_metrics(reactions: &[ReactionRecord]) -> Vec<String> {
    let windows: BTreeSet<usize> = reactions
        .iter()
        .flat_map(|r| r.window_cum_avg.keys().copied())
        .collect();
    std::iter::once(T0_METRIC.to_string())
        .chain(windows.into_iter().map(window_metric))
        .collect()
}

/// Sector to benchmark ticker whose return is subtracted from members.
pub type SectorBenchmarks = BTreeMap<String, String>;

/// Computes sector reactions around macro events.
#[derive(Debug)]
pub struct ReactionAggregator<'a> {
    calendar: &'a TradingCalendar,
    membership: &'a SectorMembership,
    returns: &'a ReturnSeries,
    sector_benchmarks: Option<&'a SectorBenchmarks>,
}

impl<'a> ReactionAggregator<'a> {
    /// Create an aggregator over an immutable calendar and return snapshot.
    pub const fn new(
        calendar: &'a TradingCalendar,
        membership: &'a SectorMembership,
        returns: &'a ReturnSeries,
    ) -> Self {
        Self {
            calendar,
            membership,
            returns,
            sector_benchmarks: None,
        }
    }

    /// Subtract a per-sector benchmark from member returns before compounding.
    pub const fn with_sector_benchmarks(mut self, benchmarks: &'a SectorBenchmarks) -> Self {
        self.sector_benchmarks = Some(benchmarks);
        self
    }

    /// Member return on a calendar index, net of the sector benchmark when
    /// both returns exist.
    fn member_return(&self, ticker: &str, bench: Option<&str>, idx: usize) -> Option<f64> {
        let date = self.calendar.date_at(idx)?;
        let r = *self.returns.get(ticker)?.get(&date)?;
        let b = bench
            .and_then(|t| self.returns.get(t))
            .and_then(|series| series.get(&date));
        Some(b.map_or(r, |b| r - b))
    }

    /// Equal-weighted mean of members' compounded returns over the window.
    fn window_average(&self, tickers: &[&str], bench: Option<&str>, t0_idx: usize, half: usize) -> Option<f64> {
        let range = self.calendar.window_bounds(t0_idx, half)?;
        mean_present(tickers.iter().map(|ticker| {
            compound(
                range
                    .clone()
                    .filter_map(|idx| self.member_return(ticker, bench, idx)),
            )
        }))
    }

    /// Reactions for every `(event, sector)` pair, events in input order and
    /// sectors sorted. Events after the last trading date are dropped.
    pub fn compute(&self, events: &[MacroEvent], half_windows: &[usize]) -> Vec<ReactionRecord> {
        let sectors = self.membership.members_by_sector();
        let mut rows = Vec::with_capacity(events.len() * sectors.len());
        let mut dropped = 0usize;

        for event in events {
            let Some(t0_date) = self.calendar.nearest_on_or_after(event.event_date) else {
                dropped += 1;
                continue;
            };
            let Some(t0_idx) = self.calendar.index_of(t0_date) else {
                dropped += 1;
                continue;
            };

            for (&sector, tickers) in &sectors {
                let bench = self
                    .sector_benchmarks
                    .and_then(|m| m.get(sector))
                    .map(String::as_str);

                let t0_return_avg = self.window_average(tickers, bench, t0_idx, 0);
                let window_cum_avg = half_windows
                    .iter()
                    .map(|&w| (w, self.window_average(tickers, bench, t0_idx, w)))
                    .collect();

                rows.push(ReactionRecord {
                    event_id: event.event_id.clone(),
                    event_name: event.event_name.clone(),
                    event_date: event.event_date,
                    t0_date,
                    event_type: event.event_type.clone(),
                    importance: event.importance.clone(),
                    sector: sector.to_string(),
                    t0_return_avg,
                    window_cum_avg,
                    expected_value: event.expected_value,
                    actual_value: event.actual_value,
                    surprise: event.surprise(),
                    surprise_pct: event.surprise_pct(),
                    surprise_z: None,
                    cycle: BTreeMap::new(),
                });
            }
        }

        if dropped > 0 {
            warn!(dropped, "events after the last trading date were dropped");
        }
        info!(
            events = events.len() - dropped,
            sectors = sectors.len(),
            rows = rows.len(),
            "computed sector reactions"
        );
        rows
    }
}

/// Convenience wrapper around [`ReactionAggregator`].
pub fn compute_reactions(
    calendar: &TradingCalendar,
    membership: &SectorMembership,
    returns: &ReturnSeries,
    events: &[MacroEvent],
    half_windows: &[usize],
    sector_benchmarks: Option<&SectorBenchmarks>,
) -> Vec<ReactionRecord> {
    let aggregator = ReactionAggregator::new(calendar, membership, returns);
    let aggregator = match sector_benchmarks {
        Some(b) => aggregator.with_sector_benchmarks(b),
        None => aggregator,
    };
    aggregator.compute(events, half_windows)
}

impl RecentFilter {
    /// Keep reactions of recent events only.
    ///
    /// `last_days` keeps events within that many days of the latest event
    /// date; `last_events` then keeps the latest distinct event dates.
    pub fn apply(&self, reactions: &[ReactionRecord]) -> Vec<ReactionRecord> {
        let Some(max_date) = reactions.iter().map(|r| r.event_date).max() else {
            return Vec::new();
        };
        let min_date = (self.last_days > 0).then(|| max_date - Duration::days(self.last_days));

        let in_days: Vec<&ReactionRecord> = reactions
            .iter()
            .filter(|r| min_date.is_none_or(|min| r.event_date >= min))
            .collect();

        let keep_dates: Option<BTreeSet<NaiveDate>> = (self.last_events > 0).then(|| {
            let distinct: BTreeSet<NaiveDate> = in_days.iter().map(|r| r.event_date).collect();
            let skip = distinct.len().saturating_sub(self.last_events);
            distinct.into_iter().skip(skip).collect()
        });

        in_days
            .into_iter()
            .filter(|r| keep_dates.as_ref().is_none_or(|keep| keep.contains(&r.event_date)))
            .cloned()
            .collect()
    }
}
