//! Output tables as polars DataFrames, and their CSV serialisation.
//!
//! Missing results become polars nulls, written as empty CSV fields. Floats
//! are written with six decimals.

use crate::error::Result;
use crate::focus::{FocusQuantileRecord, FocusRankRecord};
use crate::momentum::RegimeAverage;
use crate::quantile::{QuantileBucket, SurpriseQuantileRecord};
use crate::types::{
    CycleSnapshot, ImpactRecord, MomentumRankRecord, PartialImpactRecord, ReactionRecord,
    SurpriseZRecord,
};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// Decimal places of floats in CSV output.
pub const FLOAT_PRECISION: usize = 6;

pub(crate) fn text<'a>(name: &str, values: impl Iterator<Item = &'a str>) -> Column {
    Column::new(name.into(), values.collect::<Vec<&str>>())
}

pub(crate) fn float(name: &str, values: impl Iterator<Item = Option<f64>>) -> Column {
    Column::new(name.into(), values.collect::<Vec<Option<f64>>>())
}

pub(crate) fn count(name: &str, values: impl Iterator<Item = usize>) -> Column {
    Column::new(name.into(), values.map(|v| v as u64).collect::<Vec<u64>>())
}

pub(crate) fn position(name: &str, values: impl Iterator<Item = usize>) -> Column {
    Column::new(name.into(), values.map(|v| v as u32).collect::<Vec<u32>>())
}

pub(crate) fn date(name: &str, values: impl Iterator<Item = NaiveDate>) -> Column {
    Column::new(name.into(), values.collect::<Vec<NaiveDate>>())
}

fn cycle_columns<'a, T>(
    rows: &'a [T],
    windows: &[usize],
    snapshot: impl Fn(&'a T, usize) -> CycleSnapshot,
) -> Vec<Column> {
    let momentum = windows.iter().map(|&w| {
        float(&format!("mom_{w}"), rows.iter().map(|r| snapshot(r, w).momentum))
    });
    let ranks = windows.iter().map(|&w| {
        Column::new(
            format!("rank_{w}").into(),
            rows.iter()
                .map(|r| snapshot(r, w).rank.map(|v| v as u64))
                .collect::<Vec<Option<u64>>>(),
        )
    });
    momentum.chain(ranks).collect()
}

/// Long reaction table: one row per `(event, sector)`.
///
/// `cycle_windows` appends `mom_W` and `rank_W` columns; pass an empty
/// slice for the plain reaction table.
pub fn reactions_frame(
    reactions: &[ReactionRecord],
    metrics: &[String],
    cycle_windows: &[usize],
) -> Result<DataFrame> {
    let mut columns = vec![
        text("event_id", reactions.iter().map(|r| r.event_id.as_str())),
        text("event_name", reactions.iter().map(|r| r.event_name.as_str())),
        date("event_date", reactions.iter().map(|r| r.event_date)),
        date("t0_date", reactions.iter().map(|r| r.t0_date)),
        text("event_type", reactions.iter().map(|r| r.event_type.as_str())),
        text("importance", reactions.iter().map(|r| r.importance.as_str())),
        text("sector", reactions.iter().map(|r| r.sector.as_str())),
    ];
    columns.extend(
        metrics
            .iter()
            .map(|m| float(m, reactions.iter().map(|r| r.metric(m)))),
    );
    columns.extend([
        float("expected_value", reactions.iter().map(|r| r.expected_value)),
        float("actual_value", reactions.iter().map(|r| r.actual_value)),
        float("surprise", reactions.iter().map(|r| r.surprise)),
        float("surprise_pct", reactions.iter().map(|r| r.surprise_pct)),
        float("surprise_z", reactions.iter().map(|r| r.surprise_z)),
    ]);
    columns.extend(cycle_columns(reactions, cycle_windows, |r, w| {
        r.cycle.get(&w).copied().unwrap_or_default()
    }));
    Ok(DataFrame::new(columns)?)
}

/// Single-metric slice of the reaction table.
pub fn heatmap_frame(reactions: &[ReactionRecord], metric: &str) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        text("event_id", reactions.iter().map(|r| r.event_id.as_str())),
        text("event_name", reactions.iter().map(|r| r.event_name.as_str())),
        date("event_date", reactions.iter().map(|r| r.event_date)),
        text("event_type", reactions.iter().map(|r| r.event_type.as_str())),
        text("importance", reactions.iter().map(|r| r.importance.as_str())),
        text("sector", reactions.iter().map(|r| r.sector.as_str())),
        float(metric, reactions.iter().map(|r| r.metric(metric))),
    ])?)
}

/// Identity of an event across its sector rows.
type EventKey<'a> = (&'a str, &'a str, NaiveDate, &'a str);

fn event_key(r: &ReactionRecord) -> EventKey<'_> {
    (
        r.event_id.as_str(),
        r.event_name.as_str(),
        r.event_date,
        r.importance.as_str(),
    )
}

/// One row per event with a `<metric>__<sector>` column for every metric
/// and sector, sectors sorted. Events keep their first-seen order.
pub fn wide_frame(reactions: &[ReactionRecord], metrics: &[String]) -> Result<DataFrame> {
    let sectors: BTreeSet<&str> = reactions.iter().map(|r| r.sector.as_str()).collect();

    let mut order: Vec<&ReactionRecord> = Vec::new();
    let mut cells: BTreeMap<EventKey<'_>, BTreeMap<&str, &ReactionRecord>> = BTreeMap::new();
    for r in reactions {
        let entry = cells.entry(event_key(r)).or_default();
        if entry.is_empty() {
            order.push(r);
        }
        entry.entry(r.sector.as_str()).or_insert(r);
    }

    let mut columns = vec![
        text("event_id", order.iter().map(|r| r.event_id.as_str())),
        text("event_name", order.iter().map(|r| r.event_name.as_str())),
        date("event_date", order.iter().map(|r| r.event_date)),
        date("t0_date", order.iter().map(|r| r.t0_date)),
        text("event_type", order.iter().map(|r| r.event_type.as_str())),
        text("importance", order.iter().map(|r| r.importance.as_str())),
        float("expected_value", order.iter().map(|r| r.expected_value)),
        float("actual_value", order.iter().map(|r| r.actual_value)),
        float("surprise", order.iter().map(|r| r.surprise)),
        float("surprise_pct", order.iter().map(|r| r.surprise_pct)),
    ];
    for metric in metrics {
        for sector in &sectors {
            columns.push(float(
                &format!("{metric}__{sector}"),
                order.iter().map(|rep| {
                    cells
                        .get(&event_key(rep))
                        .and_then(|by_sector| by_sector.get(sector))
                        .and_then(|r| r.metric(metric))
                }),
            ));
        }
    }
    Ok(DataFrame::new(columns)?)
}

/// Sector momentum and rank table.
pub fn momentum_frame(ranks: &[MomentumRankRecord], windows: &[usize]) -> Result<DataFrame> {
    let mut columns = vec![
        date("date", ranks.iter().map(|r| r.date)),
        text("sector", ranks.iter().map(|r| r.sector.as_str())),
    ];
    columns.extend(cycle_columns(ranks, windows, |r, w| {
        r.windows.get(&w).copied().unwrap_or_default()
    }));
    Ok(DataFrame::new(columns)?)
}

/// Sector momentum without the rank columns.
pub fn cycle_momentum_frame(ranks: &[MomentumRankRecord], windows: &[usize]) -> Result<DataFrame> {
    let mut keep = vec!["date".to_string(), "sector".to_string()];
    keep.extend(windows.iter().map(|w| format!("mom_{w}")));
    Ok(momentum_frame(ranks, windows)?.select(keep)?)
}

/// Per-event standardised surprises. Always carries a `surprise_z` column,
/// even when there are no events.
pub fn surprise_z_frame(records: &[SurpriseZRecord]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        text("event_id", records.iter().map(|r| r.event_id.as_str())),
        text("event_type", records.iter().map(|r| r.event_type.as_str())),
        float("surprise", records.iter().map(|r| r.surprise)),
        float("surprise_z", records.iter().map(|r| r.surprise_z)),
    ])?)
}

/// Impact regression table.
pub fn impact_frame(records: &[ImpactRecord]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        text("event_type", records.iter().map(|r| r.event_type.as_str())),
        text("sector", records.iter().map(|r| r.sector.as_str())),
        text("metric", records.iter().map(|r| r.metric.as_str())),
        count("n", records.iter().map(|r| r.n)),
        float("beta", records.iter().map(|r| r.beta)),
        float("t_stat", records.iter().map(|r| r.t_stat)),
        float("beta_pos", records.iter().map(|r| r.beta_pos)),
        float("t_pos", records.iter().map(|r| r.t_pos)),
        count("n_pos", records.iter().map(|r| r.n_pos)),
        float("beta_neg", records.iter().map(|r| r.beta_neg)),
        float("t_neg", records.iter().map(|r| r.t_neg)),
        count("n_neg", records.iter().map(|r| r.n_neg)),
        float("p_value", records.iter().map(|r| r.p_value)),
        float("p_adj_bh", records.iter().map(|r| r.p_adj_bh)),
        Column::new(
            "significant_bh".into(),
            records.iter().map(|r| r.significant_bh).collect::<Vec<Option<bool>>>(),
        ),
    ])?)
}

/// Partial regression table.
pub fn partial_impact_frame(records: &[PartialImpactRecord]) -> Result<DataFrame> {
    let scopes: Vec<String> = records.iter().map(|r| r.scope.to_string()).collect();
    Ok(DataFrame::new(vec![
        text("scope", scopes.iter().map(String::as_str)),
        text("event_type", records.iter().map(|r| r.event_type.as_str())),
        text("sector", records.iter().map(|r| r.sector.as_str())),
        text("metric", records.iter().map(|r| r.metric.as_str())),
        float("beta_partial", records.iter().map(|r| r.beta_partial)),
        float("t_stat", records.iter().map(|r| r.t_stat)),
        count("n", records.iter().map(|r| r.n)),
    ])?)
}

fn bucket_mean(bucket: &QuantileBucket, metric: &str) -> Option<f64> {
    bucket
        .means
        .iter()
        .find(|(m, _)| m == metric)
        .and_then(|(_, v)| *v)
}

fn bucket_columns<'a>(buckets: &[&'a QuantileBucket], metrics: &[String]) -> Vec<Column> {
    let mut columns = vec![count("quantile", buckets.iter().map(|b| b.quantile))];
    columns.extend(
        metrics
            .iter()
            .map(|m| float(m, buckets.iter().map(|b| bucket_mean(b, m)))),
    );
    columns.push(count("n", buckets.iter().map(|b| b.n)));
    columns
}

/// Reaction means by surprise quantile.
pub fn surprise_quantile_frame(records: &[SurpriseQuantileRecord], metrics: &[String]) -> Result<DataFrame> {
    let buckets: Vec<&QuantileBucket> = records.iter().map(|r| &r.bucket).collect();
    let mut columns = vec![
        text("event_type", records.iter().map(|r| r.event_type.as_str())),
        text("sector", records.iter().map(|r| r.sector.as_str())),
    ];
    columns.extend(bucket_columns(&buckets, metrics));
    Ok(DataFrame::new(columns)?)
}

/// Focus family top/bottom sectors.
pub fn focus_top_bottom_frame(records: &[FocusRankRecord]) -> Result<DataFrame> {
    let focus: Vec<String> = records.iter().map(|r| r.focus.to_string()).collect();
    let side: Vec<String> = records.iter().map(|r| r.rank_type.to_string()).collect();
    Ok(DataFrame::new(vec![
        text("focus", focus.iter().map(String::as_str)),
        text("metric", records.iter().map(|r| r.metric.as_str())),
        text("rank_type", side.iter().map(String::as_str)),
        text("sector", records.iter().map(|r| r.sector.as_str())),
        float("value", records.iter().map(|r| Some(r.value))),
    ])?)
}

/// Focus family quantile breakdown.
pub fn focus_quantile_frame(records: &[FocusQuantileRecord], metrics: &[String]) -> Result<DataFrame> {
    let focus: Vec<String> = records.iter().map(|r| r.focus.to_string()).collect();
    let buckets: Vec<&QuantileBucket> = records.iter().map(|r| &r.bucket).collect();
    let mut columns = vec![
        text("focus", focus.iter().map(String::as_str)),
        text("sector", records.iter().map(|r| r.sector.as_str())),
    ];
    columns.extend(bucket_columns(&buckets, metrics));
    Ok(DataFrame::new(columns)?)
}

/// Average daily sector return per regime.
pub fn regime_average_frame(records: &[RegimeAverage]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        text("regime", records.iter().map(|r| r.regime.as_str())),
        date("start_date", records.iter().map(|r| r.start_date)),
        date("end_date", records.iter().map(|r| r.end_date)),
        text("sector", records.iter().map(|r| r.sector.as_str())),
        float("avg_daily_return", records.iter().map(|r| r.avg_daily_return)),
    ])?)
}

/// Write a frame as CSV with a header row, six-decimal floats and empty
/// nulls. Parent directories are created as needed.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_float_precision(Some(FLOAT_PRECISION))
        .with_null_value(String::new())
        .finish(df)?;
    debug!(path = %path.display(), rows = df.height(), "wrote table");
    Ok(())
}
