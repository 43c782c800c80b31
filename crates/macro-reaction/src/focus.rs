//! Headline release families: best and worst reacting sectors.

use crate::config::CurrentRegime;
use crate::error::Result;
use crate::frame;
use crate::quantile::{QuantileBucket, bucket_means, reaction_frame, read_buckets};
use crate::types::{ReactionRecord, RegimeWindow};
use derive_more::Display;
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Sectors reported on each side of a top/bottom list.
pub const TOP_N: usize = 3;

/// Release families tracked by the focus report.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FocusGroup {
    /// Any `CPI*` event type
    #[display("CPI")]
    Cpi,
    /// `FOMC`
    #[display("FOMC")]
    Fomc,
    /// `NFP`
    #[display("NFP")]
    Nfp,
    /// Any `PCE*` event type
    #[display("PCE")]
    Pce,
}

impl FocusGroup {
    /// Every family, in report order.
    pub const ALL: [Self; 4] = [Self::Cpi, Self::Fomc, Self::Nfp, Self::Pce];

    fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.to_string() == label)
    }

    /// Family of an event type, if it belongs to one.
    pub fn of(event_type: &str) -> Option<Self> {
        if event_type.starts_with("CPI") {
            Some(Self::Cpi)
        } else if event_type.starts_with("PCE") {
            Some(Self::Pce)
        } else if event_type == "NFP" {
            Some(Self::Nfp)
        } else if event_type == "FOMC" {
            Some(Self::Fomc)
        } else {
            None
        }
    }
}

/// Side of a top/bottom list.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankType {
    /// Highest mean reaction
    Top,
    /// Lowest mean reaction
    Bottom,
}

/// One sector on a focus top/bottom list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusRankRecord {
    /// Release family
    pub focus: FocusGroup,
    /// Reaction metric
    pub metric: String,
    /// List side
    pub rank_type: RankType,
    /// Sector label
    pub sector: String,
    /// Mean metric over the family's events
    pub value: f64,
}

/// Reactions that belong to a focus family, with the family labels.
fn focus_rows(reactions: &[ReactionRecord]) -> (Vec<&ReactionRecord>, Vec<String>) {
    reactions
        .iter()
        .filter_map(|r| FocusGroup::of(&r.event_type).map(|f| (r, f.to_string())))
        .unzip()
}

fn focus_frame(reactions: &[ReactionRecord], metrics: &[String]) -> Result<DataFrame> {
    let (rows, labels) = focus_rows(reactions);
    let keys = vec![
        frame::text("focus", labels.iter().map(String::as_str)),
        frame::text("sector", rows.iter().map(|r| r.sector.as_str())),
    ];
    reaction_frame(&rows, keys, metrics)
}

/// Top and bottom sectors by mean reaction, per focus family and metric.
///
/// Sectors whose mean is undefined are left out; a family with fewer than
/// `TOP_N` sectors lists all of them on both sides. Both sides use a stable
/// sort over sectors in name order, so tied sectors appear alphabetically
/// on the top list and on the bottom list alike.
pub fn focus_top_bottom(reactions: &[ReactionRecord], metrics: &[String]) -> Result<Vec<FocusRankRecord>> {
    let sector_means = focus_frame(reactions, metrics)?
        .lazy()
        .group_by([col("focus"), col("sector")])
        .agg(metrics.iter().map(|m| col(m.as_str()).mean()).collect::<Vec<_>>())
        .sort(["focus", "sector"], Default::default())
        .collect()?;

    let mut out = Vec::new();
    for focus in FocusGroup::ALL {
        for metric in metrics {
            let present = sector_means
                .clone()
                .lazy()
                .filter(
                    col("focus")
                        .eq(lit(focus.to_string()))
                        .and(col(metric.as_str()).is_not_null()),
                )
                .select([col("sector"), col(metric.as_str()).alias("value")]);
            for (rank_type, descending) in [(RankType::Top, true), (RankType::Bottom, false)] {
                let side = present
                    .clone()
                    .sort(
                        ["value"],
                        SortMultipleOptions::default()
                            .with_order_descending(descending)
                            .with_maintain_order(true),
                    )
                    .limit(TOP_N as IdxSize)
                    .collect()?;
                let sector = side.column("sector")?.str()?;
                let value = side.column("value")?.f64()?;
                for (sector, value) in sector.into_iter().zip(value) {
                    if let (Some(sector), Some(value)) = (sector, value) {
                        out.push(FocusRankRecord {
                            focus,
                            metric: metric.clone(),
                            rank_type,
                            sector: sector.to_string(),
                            value,
                        });
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Surprise buckets of one `(focus, sector)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusQuantileRecord {
    /// Release family
    pub focus: FocusGroup,
    /// Sector label
    pub sector: String,
    /// Bucket statistics
    pub bucket: QuantileBucket,
}

/// Quantile breakdown of each focus family by sector.
pub fn focus_by_quantile(
    reactions: &[ReactionRecord],
    q: usize,
    metrics: &[String],
) -> Result<Vec<FocusQuantileRecord>> {
    let means = bucket_means(
        focus_frame(reactions, metrics)?.lazy(),
        &["focus", "sector"],
        q,
        metrics,
    )?;
    let focus = means.column("focus")?.str()?;
    let sector = means.column("sector")?.str()?;
    Ok(read_buckets(&means, metrics)?
        .into_iter()
        .enumerate()
        .filter_map(|(row, bucket)| {
            Some(FocusQuantileRecord {
                focus: focus.get(row).and_then(FocusGroup::from_label)?,
                sector: sector.get(row)?.to_string(),
                bucket,
            })
        })
        .collect())
}

/// Regime window chosen for the regime-limited focus tables.
///
/// `Latest` picks the first window containing the latest event date of
/// `reactions`; a name picks the first window with that label.
pub fn select_regime<'a>(
    current: &CurrentRegime,
    regimes: &'a [RegimeWindow],
    reactions: &[ReactionRecord],
) -> Option<&'a RegimeWindow> {
    match current {
        CurrentRegime::Latest => {
            let latest = reactions.iter().map(|r| r.event_date).max()?;
            regimes.iter().find(|w| w.contains(latest))
        }
        CurrentRegime::Named(name) => regimes.iter().find(|w| &w.name == name),
    }
}

/// Reactions whose event date falls inside `window`.
pub fn within_regime(reactions: &[ReactionRecord], window: &RegimeWindow) -> Vec<ReactionRecord> {
    reactions
        .iter()
        .filter(|r| window.contains(r.event_date))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::T0_METRIC;
    use chrono::NaiveDate;
    use rstest::rstest;
    use std::collections::BTreeMap;

    #[rstest]
    #[case("CPI", Some(FocusGroup::Cpi))]
    #[case("CPI_CORE", Some(FocusGroup::Cpi))]
    #[case("PCE YoY", Some(FocusGroup::Pce))]
    #[case("NFP", Some(FocusGroup::Nfp))]
    #[case("NFP_REVISION", None)]
    #[case("FOMC", Some(FocusGroup::Fomc))]
    #[case("GDP", None)]
    #[case("", None)]
    fn test_focus_of(#[case] event_type: &str, #[case] expected: Option<FocusGroup>) {
        assert_eq!(FocusGroup::of(event_type), expected);
    }

    fn reaction(event_type: &str, sector: &str, y: Option<f64>, z: f64) -> ReactionRecord {
        let date = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        ReactionRecord {
            event_id: format!("{event_type}-{sector}-{z}"),
            event_name: event_type.to_string(),
            event_date: date,
            t0_date: date,
            event_type: event_type.to_string(),
            importance: String::new(),
            sector: sector.to_string(),
            t0_return_avg: y,
            window_cum_avg: BTreeMap::new(),
            expected_value: None,
            actual_value: None,
            surprise: None,
            surprise_pct: None,
            surprise_z: Some(z),
            cycle: BTreeMap::new(),
        }
    }

    #[test]
    fn test_top_bottom() {
        let sectors = [("A", 0.03), ("B", 0.01), ("C", -0.02), ("D", 0.00), ("E", 0.02)];
        let mut rows: Vec<ReactionRecord> = sectors
            .iter()
            .flat_map(|&(s, v)| {
                [reaction("CPI", s, Some(v), 1.0), reaction("CPI_CORE", s, Some(v), -1.0)]
            })
            .collect();
        rows.push(reaction("CPI", "F", None, 0.0));
        rows.push(reaction("GDP", "A", Some(1.0), 0.0));

        let out = focus_top_bottom(&rows, &[T0_METRIC.to_string()]).unwrap();
        assert_eq!(out.len(), 6);
        let top: Vec<_> = out
            .iter()
            .filter(|r| r.rank_type == RankType::Top)
            .map(|r| r.sector.as_str())
            .collect();
        let bottom: Vec<_> = out
            .iter()
            .filter(|r| r.rank_type == RankType::Bottom)
            .map(|r| r.sector.as_str())
            .collect();
        assert_eq!(top, vec!["A", "E", "B"]);
        assert_eq!(bottom, vec!["C", "D", "B"]);
        assert!(out.iter().all(|r| r.focus == FocusGroup::Cpi));
    }

    #[test]
    fn test_focus_by_quantile() {
        let rows: Vec<ReactionRecord> = (0..6)
            .map(|i| reaction("NFP", "Tech", Some(i as f64), i as f64))
            .chain((0..6).map(|i| reaction("GDP", "Tech", Some(0.0), i as f64)))
            .collect();
        let out = focus_by_quantile(&rows, 3, &[T0_METRIC.to_string()]).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|r| r.focus == FocusGroup::Nfp));
        assert_eq!(out.iter().map(|r| r.bucket.n).sum::<usize>(), 6);
    }

    #[test]
    fn test_tied_sectors_keep_name_order_on_both_sides() {
        let sectors = [("A", 0.0), ("B", 0.0), ("C", 0.0), ("D", 0.01), ("E", 0.02)];
        let rows: Vec<ReactionRecord> = sectors
            .iter()
            .map(|&(s, v)| reaction("FOMC", s, Some(v), 0.0))
            .collect();
        let out = focus_top_bottom(&rows, &[T0_METRIC.to_string()]).unwrap();
        let side = |rank_type| -> Vec<&str> {
            out.iter()
                .filter(|r| r.rank_type == rank_type)
                .map(|r| r.sector.as_str())
                .collect()
        };
        assert_eq!(side(RankType::Top), vec!["E", "D", "A"]);
        assert_eq!(side(RankType::Bottom), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_families_reported_in_fixed_order() {
        let rows = vec![
            reaction("PCE", "A", Some(0.01), 0.0),
            reaction("NFP", "A", Some(0.02), 0.0),
            reaction("CPI", "A", Some(0.03), 0.0),
        ];
        let out = focus_top_bottom(&rows, &[T0_METRIC.to_string()]).unwrap();
        let families: Vec<FocusGroup> = out.iter().map(|r| r.focus).collect();
        assert_eq!(
            families,
            vec![FocusGroup::Cpi, FocusGroup::Cpi, FocusGroup::Nfp, FocusGroup::Nfp, FocusGroup::Pce, FocusGroup::Pce]
        );
    }

    fn dated(day: u32, sector: &str, y: f64) -> ReactionRecord {
        let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        ReactionRecord {
            event_date: date,
            t0_date: date,
            ..reaction("CPI", sector, Some(y), 0.0)
        }
    }

    fn regimes() -> Vec<RegimeWindow> {
        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        vec![
            RegimeWindow::new(d(1), d(10), "hiking"),
            RegimeWindow::new(d(11), d(31), "pause"),
            RegimeWindow::new(d(15), d(31), "overlap"),
        ]
    }

    #[test]
    fn test_latest_regime_contains_last_event() {
        let rows = vec![dated(5, "A", 0.01), dated(20, "A", 0.02), dated(8, "B", -0.01)];
        let regimes = regimes();
        let window = select_regime(&CurrentRegime::Latest, &regimes, &rows).unwrap();
        assert_eq!(window.name, "pause");

        let inside = within_regime(&rows, window);
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].t0_return_avg, Some(0.02));
    }

    #[test]
    fn test_named_regime_and_misses() {
        let rows = vec![dated(5, "A", 0.01), dated(20, "A", 0.02)];
        let regimes = regimes();
        let hiking = select_regime(&CurrentRegime::from("hiking"), &regimes, &rows).unwrap();
        assert_eq!(within_regime(&rows, hiking).len(), 1);

        assert!(select_regime(&CurrentRegime::from("easing"), &regimes, &rows).is_none());
        assert!(select_regime(&CurrentRegime::Latest, &regimes, &[]).is_none());
        assert!(select_regime(&CurrentRegime::Latest, &regimes[..1], &rows).is_none());
    }
}
