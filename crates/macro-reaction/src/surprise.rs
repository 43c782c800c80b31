//! Surprise normalisation.
//!
//! A surprise is `actual - expected`, or the change in `actual` versus the
//! previous release of the same event type when no forecast exists. Each
//! event type is standardised on its own:
//!
//! ```text
//! surprise_z[t] = surprise[t] / scale[t]
//! scale[t]      = first usable of
//!                   rolling_std(surprise, window, min_periods)[t]
//!                   std(surprise over the whole group)
//!                   epsilon
//! ```
//!
//! The rolling window depends on the release cadence (12 monthly, 26 weekly,
//! 8 quarterly observations). Shifts and standard deviations run as polars
//! window expressions partitioned by event type.

use crate::config::SurpriseConfig;
use crate::error::Result;
use crate::frame;
use crate::impact::impact_key;
use crate::types::{MacroEvent, ReactionRecord, SurpriseZRecord};
use polars::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info};

/// Where a z-score denominator came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleSource {
    /// Trailing standard deviation over the cadence window
    Rolling,
    /// Standard deviation of the whole event-type group
    Group,
    /// Tiny constant guarding against division by zero
    Epsilon,
}

/// A resolved z-score denominator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    /// Which link of the chain supplied the value
    pub source: ScaleSource,
    /// Denominator
    pub value: f64,
}

/// Walk the fallback chain `rolling -> group -> epsilon` and return the
/// first finite denominator larger than `epsilon`.
pub fn resolve_scale(rolling: Option<f64>, group: Option<f64>, epsilon: f64) -> Scale {
    [(ScaleSource::Rolling, rolling), (ScaleSource::Group, group)]
        .into_iter()
        .find_map(|(source, value)| {
            value
                .filter(|v| v.is_finite() && *v > epsilon)
                .map(|value| Scale { source, value })
        })
        .unwrap_or(Scale {
            source: ScaleSource::Epsilon,
            value: epsilon,
        })
}

/// Distinct `(window, min_periods)` pairs, and the slot of each event in
/// that list.
fn rolling_slots(events: &[MacroEvent], config: &SurpriseConfig) -> (Vec<(usize, usize)>, Vec<usize>) {
    let mut specs: Vec<(usize, usize)> = Vec::new();
    let mut slots = Vec::with_capacity(events.len());
    for ev in events {
        let spec = config.rolling_for(ev.group_key());
        let slot = match specs.iter().position(|s| *s == spec) {
            Some(slot) => slot,
            None => {
                specs.push(spec);
                specs.len() - 1
            }
        };
        slots.push(slot);
    }
    (specs, slots)
}

fn events_frame(events: &[MacroEvent], slots: &[usize]) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        frame::position("pos", 0..events.len()),
        frame::text("group", events.iter().map(MacroEvent::group_key)),
        frame::date("date", events.iter().map(|e| e.event_date)),
        frame::text("name", events.iter().map(|e| e.event_name.as_str())),
        frame::text("id", events.iter().map(|e| e.event_id.as_str())),
        frame::float("expected", events.iter().map(|e| e.expected_value)),
        frame::float("actual", events.iter().map(|e| e.actual_value)),
        frame::position("slot", slots.iter().copied()),
    ])?)
}

/// `actual - expected`, or the change in `actual` when there is no forecast.
fn surprise_expr() -> Expr {
    when(col("expected").is_not_null())
        .then(col("actual") - col("expected"))
        .otherwise(col("actual") - col("actual").shift(lit(1)).over([col("group")]))
        .alias("surprise")
}

/// Rolling std of each row's cadence, picked by its slot.
fn rolling_expr(specs: &[(usize, usize)]) -> Expr {
    specs
        .iter()
        .enumerate()
        .fold(lit(NULL).cast(DataType::Float64), |acc, (slot, &(window, min_periods))| {
            when(col("slot").eq(lit(slot as u32)))
                .then(
                    col("surprise")
                        .rolling_std(RollingOptionsFixedWindow {
                            window_size: window,
                            min_periods,
                            ..Default::default()
                        })
                        .over([col("group")]),
                )
                .otherwise(acc)
        })
        .alias("rolling_std")
}

/// Compute `surprise_z` for every event.
///
/// Returns exactly one record per input event, in input order. Events are
/// grouped by `event_type` (or `event_name` when the type is blank) and
/// ordered by date within each group; groups never influence each other.
pub fn compute_surprise_z(events: &[MacroEvent], config: &SurpriseConfig) -> Result<Vec<SurpriseZRecord>> {
    let mut out: Vec<SurpriseZRecord> = events
        .iter()
        .map(|ev| SurpriseZRecord {
            event_id: ev.event_id.clone(),
            event_type: ev.group_key().to_string(),
            surprise: None,
            surprise_z: None,
        })
        .collect();
    if events.is_empty() {
        return Ok(out);
    }

    let (specs, slots) = rolling_slots(events, config);
    let scored = events_frame(events, &slots)?
        .lazy()
        .sort(
            ["group", "date", "name", "id"],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .with_column(surprise_expr())
        .with_columns([
            rolling_expr(&specs),
            col("surprise").std(1).over([col("group")]).alias("group_std"),
        ])
        .select([col("pos"), col("surprise"), col("rolling_std"), col("group_std")])
        .collect()?;

    let pos = scored.column("pos")?.u32()?;
    let surprise = scored.column("surprise")?.f64()?;
    let rolling = scored.column("rolling_std")?.f64()?;
    let group_std = scored.column("group_std")?.f64()?;
    for i in 0..scored.height() {
        let Some(p) = pos.get(i) else { continue };
        let s = surprise.get(i);
        let record = &mut out[p as usize];
        record.surprise = s;
        record.surprise_z = s.map(|s| s / resolve_scale(rolling.get(i), group_std.get(i), config.epsilon).value);
    }
    debug!(events = events.len(), cadences = specs.len(), "standardised surprises");
    Ok(out)
}

/// How [`ensure_surprise_z`] populated the column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurpriseZSource {
    /// Existing values were complete enough and kept
    Existing,
    /// Recomputed from the events table and joined by `event_id`
    Events,
    /// Row-level surprises standardised within each event type
    RowStandardized,
    /// Nothing usable; values left missing
    Unavailable,
}

fn missing_share(rows: &[ReactionRecord]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().filter(|r| r.surprise_z.is_none()).count() as f64 / rows.len() as f64
}

/// `(surprise - mean) / std` within each event type; `None` where the
/// group has no spread.
fn standardize_rows(rows: &[ReactionRecord]) -> Result<Vec<Option<f64>>> {
    let scored = DataFrame::new(vec![
        frame::text("group", rows.iter().map(impact_key)),
        frame::float("surprise", rows.iter().map(|r| r.surprise)),
    ])?
    .lazy()
    .with_columns([
        col("surprise").mean().over([col("group")]).alias("mean"),
        col("surprise").std(1).over([col("group")]).alias("std"),
    ])
    .select([when(col("std").gt(lit(0.0)))
        .then((col("surprise") - col("mean")) / col("std"))
        .otherwise(lit(NULL))
        .alias("z")])
    .collect()?;
    Ok(scored.column("z")?.f64()?.into_iter().collect())
}

/// Make sure reaction rows carry `surprise_z`.
///
/// Existing values are trusted unless more than `na_threshold` of them are
/// missing. Otherwise they are recomputed from the events table; if that
/// still leaves too many gaps, the rows' own `surprise` is standardised by
/// mean and sample std within each event type.
pub fn ensure_surprise_z(
    rows: &mut [ReactionRecord],
    events: &[MacroEvent],
    config: &SurpriseConfig,
) -> Result<SurpriseZSource> {
    if rows.is_empty() || missing_share(rows) <= config.na_threshold {
        return Ok(SurpriseZSource::Existing);
    }

    let by_id: HashMap<String, Option<f64>> = compute_surprise_z(events, config)?
        .into_iter()
        .map(|r| (r.event_id, r.surprise_z))
        .collect();
    for row in rows.iter_mut() {
        row.surprise_z = by_id.get(&row.event_id).copied().flatten();
    }
    if missing_share(rows) <= config.na_threshold {
        info!(rows = rows.len(), "surprise_z recomputed from events");
        return Ok(SurpriseZSource::Events);
    }

    let z = standardize_rows(rows)?;
    let mut any = false;
    for (row, z) in rows.iter_mut().zip(z) {
        row.surprise_z = z;
        any |= z.is_some();
    }
    if any {
        info!(rows = rows.len(), "surprise_z standardised from row surprises");
        Ok(SurpriseZSource::RowStandardized)
    } else {
        Ok(SurpriseZSource::Unavailable)
    }
}
