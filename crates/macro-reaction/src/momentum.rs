//! Sector momentum and cross-sectional ranks.
//!
//! Each sector is represented by its benchmark instrument. Momentum over a
//! lookback `W` ending at calendar index `i` is
//! `prod_{k = i-W+1}^{i} (1 + r_k) - 1` over the returns present in that
//! span. With fewer than `W` calendar days of history the value is `None`,
//! never a shorter-window estimate.
//!
//! The compounding is a rolling sum of `log(1 + r)` partitioned by sector,
//! and ranks are an ordinal descending rank partitioned by day.

use crate::calendar::{DateSeries, ReturnSeries, TradingCalendar};
use crate::error::Result;
use crate::frame;
use crate::reaction::SectorBenchmarks;
use crate::types::{CycleSnapshot, MomentumRankRecord, ReactionRecord, RegimeWindow};
use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Sector to benchmark daily return series.
pub type SectorSeries = BTreeMap<String, DateSeries>;

/// Pull each sector's benchmark series out of the return table. Sectors whose
/// benchmark has no returns are left out.
pub fn build_sector_series(returns: &ReturnSeries, benchmarks: &SectorBenchmarks) -> SectorSeries {
    benchmarks
        .iter()
        .filter_map(|(sector, ticker)| {
            returns
                .get(ticker)
                .filter(|s| !s.is_empty())
                .map(|s| (sector.clone(), s.clone()))
        })
        .collect()
}

/// Dense `(sector, day, ret)` frame: every sector on every calendar day,
/// with a null return where the benchmark has none. `day` is the calendar
/// index.
fn sector_frame(calendar: &TradingCalendar, sector_series: &SectorSeries) -> Result<DataFrame> {
    let size = calendar.len() * sector_series.len();
    let mut sectors = Vec::with_capacity(size);
    let mut days = Vec::with_capacity(size);
    let mut returns = Vec::with_capacity(size);
    for (sector, series) in sector_series {
        for (day, date) in calendar.dates().iter().enumerate() {
            sectors.push(sector.as_str());
            days.push(day);
            returns.push(series.get(date).copied());
        }
    }
    Ok(DataFrame::new(vec![
        frame::text("sector", sectors.into_iter()),
        frame::position("day", days.into_iter()),
        frame::float("ret", returns.into_iter()),
    ])?)
}

/// `exp(Σ log(1 + r)) - 1` over the trailing `window` days of each sector;
/// null before the window is full or when no return falls inside it.
fn momentum_expr(window: usize) -> Expr {
    let log_sum = col("log_ret")
        .rolling_sum(RollingOptionsFixedWindow {
            window_size: window,
            min_periods: 1,
            ..Default::default()
        })
        .over([col("sector")]);
    when(col("day").gt_eq(lit(window.saturating_sub(1) as u32)))
        .then(log_sum.exp() - lit(1.0))
        .otherwise(lit(NULL))
        .alias(format!("mom_{window}"))
}

/// Cross-sectional rank per day, 1 = strongest; ties get distinct ranks.
fn rank_expr(window: usize) -> Expr {
    col(format!("mom_{window}"))
        .rank(
            RankOptions {
                method: RankMethod::Ordinal,
                descending: true,
            },
            None,
        )
        .over([col("day")])
        .cast(DataType::UInt64)
        .alias(format!("rank_{window}"))
}

/// Momentum and rank of every sector on every calendar date.
///
/// Rows are ordered by date, then sector.
pub fn compute_momentum(
    calendar: &TradingCalendar,
    sector_series: &SectorSeries,
    windows: &[usize],
) -> Result<Vec<MomentumRankRecord>> {
    if sector_series.is_empty() || calendar.is_empty() {
        return Ok(Vec::new());
    }

    let ranked = sector_frame(calendar, sector_series)?
        .lazy()
        .sort(["sector", "day"], Default::default())
        .with_column(
            (lit(1.0) + col("ret"))
                .log(std::f64::consts::E)
                .alias("log_ret"),
        )
        .with_columns(windows.iter().map(|&w| momentum_expr(w)).collect::<Vec<_>>())
        .with_columns(windows.iter().map(|&w| rank_expr(w)).collect::<Vec<_>>())
        .sort(["day", "sector"], Default::default())
        .collect()?;

    let day = ranked.column("day")?.u32()?;
    let sector = ranked.column("sector")?.str()?;
    let per_window = windows
        .iter()
        .map(|&w| {
            let momentum = ranked.column(&format!("mom_{w}"))?.f64()?;
            let rank = ranked.column(&format!("rank_{w}"))?.u64()?;
            Ok((w, momentum, rank))
        })
        .collect::<PolarsResult<Vec<_>>>()?;

    let mut rows = Vec::with_capacity(ranked.height());
    for row in 0..ranked.height() {
        let (Some(day), Some(sector)) = (day.get(row), sector.get(row)) else {
            continue;
        };
        let Some(date) = calendar.date_at(day as usize) else {
            continue;
        };
        rows.push(MomentumRankRecord {
            date,
            sector: sector.to_string(),
            windows: per_window
                .iter()
                .map(|(w, momentum, rank)| {
                    let snapshot = CycleSnapshot {
                        momentum: momentum.get(row),
                        rank: rank.get(row).map(|r| r as usize),
                    };
                    (*w, snapshot)
                })
                .collect(),
        });
    }

    info!(
        dates = calendar.len(),
        sectors = sector_series.len(),
        windows = windows.len(),
        "computed sector momentum ranks"
    );
    Ok(rows)
}

/// Attach momentum and rank at `(t0_date, sector)` to each reaction.
///
/// Reactions without a matching row get empty snapshots for every window.
pub fn join_momentum(reactions: &mut [ReactionRecord], ranks: &[MomentumRankRecord], windows: &[usize]) {
    let lookup: HashMap<(NaiveDate, &str), &MomentumRankRecord> = ranks
        .iter()
        .map(|r| ((r.date, r.sector.as_str()), r))
        .collect();
    let mut matched = 0usize;
    for reaction in reactions.iter_mut() {
        let hit = lookup.get(&(reaction.t0_date, reaction.sector.as_str()));
        matched += usize::from(hit.is_some());
        reaction.cycle = windows
            .iter()
            .map(|&w| {
                let snap = hit
                    .and_then(|r| r.windows.get(&w))
                    .copied()
                    .unwrap_or_default();
                (w, snap)
            })
            .collect();
    }
    debug!(matched, total = reactions.len(), "joined momentum into reactions");
}

/// Average daily benchmark return of a sector within a regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeAverage {
    /// Regime label
    pub regime: String,
    /// Regime start
    pub start_date: NaiveDate,
    /// Regime end
    pub end_date: NaiveDate,
    /// Sector label
    pub sector: String,
    /// Mean daily return over trading days in the regime
    pub avg_daily_return: Option<f64>,
}

/// Mean daily sector return inside each regime window. Regimes that contain
/// no trading day are skipped.
pub fn regime_averages(
    calendar: &TradingCalendar,
    sector_series: &SectorSeries,
    regimes: &[RegimeWindow],
) -> Result<Vec<RegimeAverage>> {
    if sector_series.is_empty() {
        return Ok(Vec::new());
    }
    let returns = sector_frame(calendar, sector_series)?;
    let mut out = Vec::new();
    for regime in regimes {
        let mut inside = calendar
            .dates()
            .iter()
            .enumerate()
            .filter(|(_, d)| regime.contains(**d))
            .map(|(day, _)| day as u32);
        let Some(first) = inside.next() else { continue };
        let last = inside.last().unwrap_or(first);

        let means = returns
            .clone()
            .lazy()
            .filter(col("day").gt_eq(lit(first)).and(col("day").lt_eq(lit(last))))
            .group_by([col("sector")])
            .agg([col("ret").mean().alias("avg_daily_return")])
            .sort(["sector"], Default::default())
            .collect()?;
        let sector = means.column("sector")?.str()?;
        let avg = means.column("avg_daily_return")?.f64()?;
        for (sector, avg_daily_return) in sector.into_iter().zip(avg) {
            let Some(sector) = sector else { continue };
            out.push(RegimeAverage {
                regime: regime.name.clone(),
                start_date: regime.start_date,
                end_date: regime.end_date,
                sector: sector.to_string(),
                avg_daily_return,
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap()
    }

    fn series(values: &[(u32, f64)]) -> DateSeries {
        values.iter().map(|&(day, r)| (d(day), r)).collect()
    }

    fn fixture() -> (TradingCalendar, SectorSeries) {
        let calendar = TradingCalendar::from_dates((1..=5).map(d));
        let mut sectors = SectorSeries::new();
        sectors.insert("Energy".into(), series(&[(2, 0.02), (3, 0.01), (4, -0.01), (5, 0.0)]));
        sectors.insert("Tech".into(), series(&[(2, 0.01), (3, 0.03), (5, 0.01)]));
        sectors.insert("Utilities".into(), series(&[(5, 0.005)]));
        (calendar, sectors)
    }

    fn snapshot(rows: &[MomentumRankRecord], day: u32, sector: &str, window: usize) -> CycleSnapshot {
        rows.iter()
            .find(|r| r.date == d(day) && r.sector == sector)
            .unwrap()
            .windows[&window]
    }

    #[test]
    fn test_momentum_requires_full_history() {
        let (cal, sectors) = fixture();
        let rows = compute_momentum(&cal, &sectors, &[2, 3]).unwrap();
        assert_eq!(snapshot(&rows, 2, "Tech", 3).momentum, None);
        assert_relative_eq!(
            snapshot(&rows, 3, "Tech", 3).momentum.unwrap(),
            1.01 * 1.03 - 1.0,
            epsilon = 1e-12
        );
        // day 4 missing for Tech: compounded over what exists
        assert_relative_eq!(
            snapshot(&rows, 5, "Tech", 3).momentum.unwrap(),
            1.03 * 1.01 - 1.0,
            epsilon = 1e-12
        );
        // window with no returns at all
        assert_eq!(snapshot(&rows, 4, "Utilities", 2), CycleSnapshot::default());
    }

    #[test]
    fn test_compute_momentum_rows_and_ranks() {
        let (cal, sectors) = fixture();
        let rows = compute_momentum(&cal, &sectors, &[2]).unwrap();
        assert_eq!(rows.len(), 5 * 3);
        // first date has insufficient history for everyone
        assert!(rows[..3].iter().all(|r| r.windows[&2] == CycleSnapshot::default()));
        assert!(rows.windows(2).all(|p| (p[0].date, &p[0].sector) < (p[1].date, &p[1].sector)));

        assert_eq!(snapshot(&rows, 3, "Tech", 2).rank, Some(1));
        assert_eq!(snapshot(&rows, 3, "Energy", 2).rank, Some(2));
        assert_eq!(snapshot(&rows, 3, "Utilities", 2), CycleSnapshot::default());

        // day 5 over two days: Tech +1%, Utilities +0.5%, Energy -1%
        assert_eq!(snapshot(&rows, 5, "Tech", 2).rank, Some(1));
        assert_eq!(snapshot(&rows, 5, "Utilities", 2).rank, Some(2));
        assert_eq!(snapshot(&rows, 5, "Energy", 2).rank, Some(3));
    }

    #[test]
    fn test_no_sectors_no_rows() {
        let (cal, _) = fixture();
        assert!(compute_momentum(&cal, &SectorSeries::new(), &[2]).unwrap().is_empty());
    }

    #[test]
    fn test_regime_averages() {
        let (cal, sectors) = fixture();
        let regimes = vec![
            RegimeWindow::new(d(2), d(3), "hot"),
            RegimeWindow::new(d(20), d(25), "empty"),
        ];
        let out = regime_averages(&cal, &sectors, &regimes).unwrap();
        assert_eq!(out.len(), 3);
        let energy = out.iter().find(|r| r.sector == "Energy").unwrap();
        assert_relative_eq!(energy.avg_daily_return.unwrap(), 0.015, epsilon = 1e-12);
        let utilities = out.iter().find(|r| r.sector == "Utilities").unwrap();
        assert_eq!(utilities.avg_daily_return, None);
    }

    #[test]
    fn test_build_sector_series_skips_missing_benchmarks() {
        let mut returns = ReturnSeries::new();
        returns.insert("XLE".into(), series(&[(2, 0.01)]));
        returns.insert("XLK".into(), DateSeries::new());
        let benchmarks: SectorBenchmarks = BTreeMap::from([
            ("Energy".to_string(), "XLE".to_string()),
            ("Tech".to_string(), "XLK".to_string()),
            ("Utilities".to_string(), "XLU".to_string()),
        ]);
        let out = build_sector_series(&returns, &benchmarks);
        assert_eq!(out.keys().collect::<Vec<_>>(), vec!["Energy"]);
    }
}
