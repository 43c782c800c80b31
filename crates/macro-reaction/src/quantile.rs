//! Reactions bucketed by surprise quantile.
//!
//! Bucketing follows the usual quantile cut: edges are linearly
//! interpolated sample quantiles, duplicate edges collapse into one, bins
//! are closed on the right and the first bin also includes its left edge.
//! Edges are computed per group as polars window expressions and the bucket
//! means come from a polars `group_by`.

use crate::error::Result;
use crate::frame;
use crate::impact::impact_key;
use crate::types::ReactionRecord;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Column holding the standardised surprise that drives the cut.
const SURPRISE_Z: &str = "surprise_z";

/// 1-based bucket of `value` against ascending `edges`, duplicates already
/// removed. `None` outside the edges or when fewer than two edges remain.
pub fn bucket_label(value: f64, edges: &[f64]) -> Option<usize> {
    if edges.len() < 2 || !value.is_finite() {
        return None;
    }
    let label = if value == edges[0] {
        1
    } else {
        edges.partition_point(|&e| e < value)
    };
    (1..edges.len()).contains(&label).then_some(label)
}

/// `edge_0 ..= edge_q`: linear-interpolated quantiles of `value` within each
/// partition.
fn edge_exprs(value: &str, q: usize, partition: &[Expr]) -> Vec<Expr> {
    (0..=q)
        .map(|i| {
            col(value)
                .quantile(lit(i as f64 / q as f64), QuantileMethod::Linear)
                .over(partition)
                .alias(format!("edge_{i}"))
        })
        .collect()
}

/// Bucket labels of every row from its `edge_*` columns.
fn labels_from_edges(df: &DataFrame, q: usize) -> Result<Vec<Option<u32>>> {
    let z = df.column(SURPRISE_Z)?.f64()?;
    let edges = (0..=q)
        .map(|i| df.column(&format!("edge_{i}")).and_then(|c| c.f64()))
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok((0..df.height())
        .map(|row| {
            let value = z.get(row)?;
            let mut row_edges: Vec<f64> = edges.iter().filter_map(|e| e.get(row)).collect();
            row_edges.dedup();
            bucket_label(value, &row_edges).map(|l| l as u32)
        })
        .collect())
}

/// Per-bucket `n` and metric means of every group in `keys` with at least
/// `q` non-missing surprises.
///
/// The frame must carry the key columns, `surprise_z` and one float column
/// per metric. Output rows are sorted by keys, then bucket.
pub(crate) fn bucket_means(rows: LazyFrame, keys: &[&str], q: usize, metrics: &[String]) -> Result<DataFrame> {
    let partition: Vec<Expr> = keys.iter().map(|k| col(*k)).collect();
    let mut edged = rows
        .filter(col(SURPRISE_Z).is_not_null())
        .with_column(col(SURPRISE_Z).count().over(&partition).alias("n_present"))
        .filter(col("n_present").gt_eq(lit(q as u32)))
        .with_columns(edge_exprs(SURPRISE_Z, q, &partition))
        .collect()?;

    let labels = labels_from_edges(&edged, q)?;
    edged.with_column(Column::new("quantile".into(), labels))?;

    let mut by = partition;
    by.push(col("quantile"));
    let mut aggs = vec![col(SURPRISE_Z).count().cast(DataType::UInt64).alias("n")];
    aggs.extend(metrics.iter().map(|m| col(m.as_str()).mean()));
    let sort_keys: Vec<&str> = keys.iter().copied().chain(["quantile"]).collect();

    Ok(edged
        .lazy()
        .filter(col("quantile").is_not_null())
        .group_by(by)
        .agg(aggs)
        .sort(sort_keys, Default::default())
        .collect()?)
}

/// `key_columns` followed by `surprise_z` and one column per metric, the
/// layout [`bucket_means`] expects.
pub(crate) fn reaction_frame(
    rows: &[&ReactionRecord],
    key_columns: Vec<Column>,
    metrics: &[String],
) -> Result<DataFrame> {
    let mut columns = key_columns;
    columns.push(frame::float(SURPRISE_Z, rows.iter().map(|r| r.surprise_z)));
    columns.extend(
        metrics
            .iter()
            .map(|m| frame::float(m, rows.iter().map(|r| r.metric(m)))),
    );
    Ok(DataFrame::new(columns)?)
}

/// Mean reaction metrics within one surprise bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileBucket {
    /// 1-based bucket label, low surprises first
    pub quantile: usize,
    /// Rows with a `surprise_z` in the bucket
    pub n: usize,
    /// `(metric, mean)` in the order the metrics were requested
    pub means: Vec<(String, Option<f64>)>,
}

/// Read the buckets out of a [`bucket_means`] frame, one per row.
pub(crate) fn read_buckets(df: &DataFrame, metrics: &[String]) -> Result<Vec<QuantileBucket>> {
    let quantile = df.column("quantile")?.u32()?;
    let n = df.column("n")?.u64()?;
    let means = metrics
        .iter()
        .map(|m| df.column(m.as_str()).and_then(|c| c.f64()))
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok((0..df.height())
        .map(|row| QuantileBucket {
            quantile: quantile.get(row).unwrap_or_default() as usize,
            n: n.get(row).unwrap_or_default() as usize,
            means: metrics
                .iter()
                .zip(&means)
                .map(|(m, values)| (m.clone(), values.get(row)))
                .collect(),
        })
        .collect())
}

/// Surprise buckets of one `(event_type, sector)` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurpriseQuantileRecord {
    /// Event type
    pub event_type: String,
    /// Sector label
    pub sector: String,
    /// Bucket statistics
    pub bucket: QuantileBucket,
}

/// Reaction means per surprise quantile for every `(event_type, sector)`
/// group with at least `q` standardised surprises.
pub fn reaction_by_surprise_quantile(
    reactions: &[ReactionRecord],
    q: usize,
    metrics: &[String],
) -> Result<Vec<SurpriseQuantileRecord>> {
    let rows: Vec<&ReactionRecord> = reactions.iter().collect();
    let keys = vec![
        frame::text("event_type", rows.iter().map(|r| impact_key(r))),
        frame::text("sector", rows.iter().map(|r| r.sector.as_str())),
    ];
    let means = bucket_means(
        reaction_frame(&rows, keys, metrics)?.lazy(),
        &["event_type", "sector"],
        q,
        metrics,
    )?;

    let event_type = means.column("event_type")?.str()?;
    let sector = means.column("sector")?.str()?;
    let out: Vec<SurpriseQuantileRecord> = read_buckets(&means, metrics)?
        .into_iter()
        .enumerate()
        .map(|(row, bucket)| SurpriseQuantileRecord {
            event_type: event_type.get(row).unwrap_or_default().to_string(),
            sector: sector.get(row).unwrap_or_default().to_string(),
            bucket,
        })
        .collect();
    debug!(rows = out.len(), quantiles = q, "bucketed reactions by surprise");
    Ok(out)
}
