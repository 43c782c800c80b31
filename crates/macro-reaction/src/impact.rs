//! Sector sensitivity to standardised macro surprises.
//!
//! For every `(event_type, sector)` group and reaction metric the engine
//! regresses the metric on `surprise_z`, splits the sample by the sign of
//! the surprise to estimate asymmetric slopes, converts the main robust
//! t-statistic to a p-value and finally controls the false discovery rate
//! across every test in the run.

use crate::config::ImpactConfig;
use crate::group::par_apply_per_group;
use crate::stats::{SlopeFit, bh_correction, ols_slope_t, partial_slope_t, t_to_pvalue};
use crate::types::{ImpactRecord, PartialImpactRecord, ReactionRecord, RegimeWindow, Scope};
use tracing::{debug, info};

/// Grouping key of a reaction: its event type, or the event name when the
/// type is blank.
pub fn impact_key(reaction: &ReactionRecord) -> &str {
    if reaction.event_type.is_empty() {
        &reaction.event_name
    } else {
        &reaction.event_type
    }
}

fn regress_metric(rows: &[&ReactionRecord], metric: &str) -> (SlopeFit, SlopeFit, SlopeFit) {
    let pairs = || rows.iter().map(|r| (r.surprise_z, r.metric(metric)));
    let all = ols_slope_t(pairs());
    let pos = ols_slope_t(pairs().filter(|(x, _)| x.is_some_and(|x| x > 0.0)));
    let neg = ols_slope_t(pairs().filter(|(x, _)| x.is_some_and(|x| x < 0.0)));
    (all, pos, neg)
}

/// Regress every metric on `surprise_z` per `(event_type, sector)`.
///
/// Groups are evaluated in parallel; rows come back ordered by group key,
/// then in `metrics` order. `p_adj_bh` and `significant_bh` are filled in
/// across the whole result.
pub fn compute_impact(
    reactions: &[ReactionRecord],
    metrics: &[String],
    config: &ImpactConfig,
) -> Vec<ImpactRecord> {
    let grouped = par_apply_per_group(
        reactions,
        |r| (impact_key(r).to_string(), r.sector.clone()),
        |(event_type, sector), rows| {
            metrics
                .iter()
                .map(|metric| {
                    let (all, pos, neg) = regress_metric(rows, metric);
                    ImpactRecord {
                        event_type: event_type.clone(),
                        sector: sector.clone(),
                        metric: metric.clone(),
                        n: all.n,
                        beta: all.beta,
                        t_stat: all.t_stat,
                        beta_pos: pos.beta,
                        t_pos: pos.t_stat,
                        n_pos: pos.n,
                        beta_neg: neg.beta,
                        t_neg: neg.t_stat,
                        n_neg: neg.n,
                        p_value: t_to_pvalue(all.t_stat, Some(all.n)),
                        p_adj_bh: None,
                        significant_bh: None,
                    }
                })
                .collect::<Vec<_>>()
        },
    );
    let groups = grouped.len();
    let mut records: Vec<ImpactRecord> = grouped.into_iter().flat_map(|(_, rows)| rows).collect();
    apply_fdr(&mut records, config.fdr_alpha);

    let tested = records.iter().filter(|r| r.p_value.is_some()).count();
    let significant = records
        .iter()
        .filter(|r| r.significant_bh == Some(true))
        .count();
    info!(
        groups,
        records = records.len(),
        tested,
        significant,
        alpha = config.fdr_alpha,
        "computed macro impact"
    );
    records
}

/// Benjamini-Hochberg over the `p_value` column of a finished run.
pub fn apply_fdr(records: &mut [ImpactRecord], alpha: f64) {
    let raw: Vec<Option<f64>> = records.iter().map(|r| r.p_value).collect();
    for (record, adj) in records.iter_mut().zip(bh_correction(&raw)) {
        record.p_adj_bh = adj;
        record.significant_bh = adj.map(|p| p <= alpha);
    }
}

fn partial_for_scope(
    scope: &Scope,
    reactions: &[&ReactionRecord],
    config: &ImpactConfig,
) -> Vec<PartialImpactRecord> {
    let metric = config.partial_metric.as_str();
    let window = config.partial_rank_window;
    par_apply_per_group(
        reactions,
        |r| (impact_key(r).to_string(), r.sector.clone()),
        |(event_type, sector), rows| {
            let usable = rows
                .iter()
                .filter(|r| r.metric(metric).is_some() && r.surprise_z.is_some())
                .count();
            let fit = partial_slope_t(
                rows.iter()
                    .map(|r| (r.metric(metric), r.surprise_z, r.rank(window))),
            );
            let fit = if usable < config.min_sample {
                SlopeFit {
                    beta: None,
                    t_stat: None,
                    n: fit.n,
                }
            } else {
                fit
            };
            PartialImpactRecord {
                scope: scope.clone(),
                event_type: event_type.clone(),
                sector: sector.clone(),
                metric: metric.to_string(),
                beta_partial: fit.beta,
                t_stat: fit.t_stat,
                n: fit.n,
            }
        },
    )
    .into_iter()
    .map(|(_, record)| record)
    .collect()
}

/// Partial regressions `metric ~ 1 + surprise_z + rank_W` per
/// `(event_type, sector)`, over the full sample and then within each regime
/// (reactions whose `t0_date` lies in the window).
///
/// Groups with fewer than `min_sample` rows carrying both the metric and
/// `surprise_z` are reported with empty estimates.
pub fn compute_partial_impact(
    reactions: &[ReactionRecord],
    config: &ImpactConfig,
    regimes: &[RegimeWindow],
) -> Vec<PartialImpactRecord> {
    let all: Vec<&ReactionRecord> = reactions.iter().collect();
    let mut out = partial_for_scope(&Scope::Overall, &all, config);

    for regime in regimes {
        let subset: Vec<&ReactionRecord> = reactions
            .iter()
            .filter(|r| regime.contains(r.t0_date))
            .collect();
        if subset.is_empty() {
            debug!(regime = %regime.name, "no reactions inside regime");
            continue;
        }
        out.extend(partial_for_scope(
            &Scope::Regime(regime.name.clone()),
            &subset,
            config,
        ));
    }

    info!(
        rows = out.len(),
        estimated = out.iter().filter(|r| r.beta_partial.is_some()).count(),
        regimes = regimes.len(),
        "computed partial impact"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reaction::{T0_METRIC, window_metric};
    use crate::types::CycleSnapshot;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn base() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, 15).unwrap()
    }

    fn reaction(
        i: usize,
        event_type: &str,
        sector: &str,
        z: Option<f64>,
        y: Option<f64>,
        rank: Option<usize>,
    ) -> ReactionRecord {
        let date = base() + Duration::days(30 * i as i64);
        ReactionRecord {
            event_id: format!("{event_type}-{i}"),
            event_name: format!("{event_type} release"),
            event_date: date,
            t0_date: date,
            event_type: event_type.to_string(),
            importance: "high".to_string(),
            sector: sector.to_string(),
            t0_return_avg: y,
            window_cum_avg: BTreeMap::from([(1, y.map(|v| 2.0 * v))]),
            expected_value: None,
            actual_value: None,
            surprise: z,
            surprise_pct: None,
            surprise_z: z,
            cycle: BTreeMap::from([(21, CycleSnapshot { momentum: None, rank })]),
        }
    }

    /// CPI drives Tech strongly and Energy not at all; NFP has too few rows.
    fn fixture() -> Vec<ReactionRecord> {
        let mut rng = StdRng::seed_from_u64(42);
        let mut rows = Vec::new();
        for i in 0..40 {
            let z = rng.gen_range(-2.0..2.0);
            let rank = 1 + i % 5;
            rows.push(reaction(
                i,
                "CPI",
                "Tech",
                Some(z),
                Some(-0.01 * z + rng.gen_range(-0.002..0.002)),
                Some(rank),
            ));
            rows.push(reaction(
                i,
                "CPI",
                "Energy",
                Some(z),
                Some(rng.gen_range(-0.01..0.01)),
                Some(rank),
            ));
        }
        for i in 0..2 {
            rows.push(reaction(i, "NFP", "Tech", Some(i as f64), Some(0.01), Some(1)));
        }
        rows
    }

    fn metrics() -> Vec<String> {
        vec![T0_METRIC.to_string(), window_metric(1)]
    }

    #[test]
    fn test_impact_rows_ordered_by_group_then_metric() {
        let out = compute_impact(&fixture(), &metrics(), &ImpactConfig::default());
        let keys: Vec<_> = out
            .iter()
            .map(|r| (r.event_type.as_str(), r.sector.as_str(), r.metric.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("CPI", "Energy", "t0_return_avg"),
                ("CPI", "Energy", "win1_cum_avg"),
                ("CPI", "Tech", "t0_return_avg"),
                ("CPI", "Tech", "win1_cum_avg"),
                ("NFP", "Tech", "t0_return_avg"),
                ("NFP", "Tech", "win1_cum_avg"),
            ]
        );
    }

    #[test]
    fn test_strong_sensitivity_is_significant() {
        let out = compute_impact(&fixture(), &metrics(), &ImpactConfig::default());
        let tech = &out[2];
        assert_eq!(tech.n, 40);
        assert!((tech.beta.unwrap() + 0.01).abs() < 0.001);
        assert!(tech.t_stat.unwrap() < -10.0);
        assert!(tech.p_value.unwrap() < 1e-6);
        assert_eq!(tech.significant_bh, Some(true));
        assert!(tech.p_adj_bh.unwrap() >= tech.p_value.unwrap());
        // asymmetric slopes partition the sample by sign
        assert_eq!(tech.n_pos + tech.n_neg, tech.n);
        assert!(tech.beta_pos.is_some() && tech.beta_neg.is_some());

        let win = &out[3];
        assert_relative_eq!(win.beta.unwrap(), 2.0 * tech.beta.unwrap(), epsilon = 1e-12);
    }

    #[test]
    fn test_small_group_has_no_inference() {
        let out = compute_impact(&fixture(), &metrics(), &ImpactConfig::default());
        let nfp = &out[4];
        assert_eq!(nfp.n, 2);
        assert_eq!(nfp.beta, None);
        assert_eq!(nfp.p_value, None);
        assert_eq!(nfp.p_adj_bh, None);
        assert_eq!(nfp.significant_bh, None);
    }

    #[test]
    fn test_bh_counts_only_tested_rows() {
        let out = compute_impact(&fixture(), &metrics(), &ImpactConfig::default());
        let raw: Vec<Option<f64>> = out.iter().map(|r| r.p_value).collect();
        let adjusted = bh_correction(&raw);
        assert_eq!(out.iter().map(|r| r.p_adj_bh).collect::<Vec<_>>(), adjusted);
        assert_eq!(raw.iter().filter(|p| p.is_some()).count(), 4);
    }

    #[test]
    fn test_missing_surprise_rows_are_dropped() {
        let mut rows = fixture();
        for r in rows.iter_mut().filter(|r| r.sector == "Tech").take(5) {
            r.surprise_z = None;
        }
        let out = compute_impact(&rows, &metrics(), &ImpactConfig::default());
        assert_eq!(out[2].n, 35);
    }

    #[test]
    fn test_event_name_used_when_type_blank() {
        let mut rows = fixture();
        for r in &mut rows {
            r.event_type.clear();
        }
        let out = compute_impact(&rows, &metrics(), &ImpactConfig::default());
        assert!(out.iter().any(|r| r.event_type == "CPI release"));
    }

    #[test]
    fn test_partial_impact_overall_and_regimes() {
        let rows = fixture();
        let regimes = vec![
            RegimeWindow::new(base(), base() + Duration::days(30 * 19), "early"),
            RegimeWindow::new(base() - Duration::days(400), base() - Duration::days(300), "before"),
        ];
        let out = compute_partial_impact(&rows, &ImpactConfig::default(), &regimes);

        let overall: Vec<_> = out.iter().filter(|r| r.scope == Scope::Overall).collect();
        assert_eq!(overall.len(), 3);
        let tech = overall.iter().find(|r| r.event_type == "CPI" && r.sector == "Tech").unwrap();
        assert_eq!(tech.n, 40);
        assert!((tech.beta_partial.unwrap() + 0.01).abs() < 0.002);
        assert!(tech.t_stat.unwrap() < -5.0);
        // NFP has fewer than min_sample rows
        let nfp = overall.iter().find(|r| r.event_type == "NFP").unwrap();
        assert_eq!(nfp.beta_partial, None);

        let early: Vec<_> = out
            .iter()
            .filter(|r| r.scope == Scope::Regime("early".into()))
            .collect();
        assert!(!early.is_empty());
        let tech_early = early.iter().find(|r| r.sector == "Tech").unwrap();
        assert_eq!(tech_early.n, 20);
        assert_eq!(tech_early.scope.to_string(), "regime:early");
        assert!(out.iter().all(|r| r.scope != Scope::Regime("before".into())));
    }

    #[test]
    fn test_partial_impact_without_ranks() {
        let mut rows = fixture();
        for r in &mut rows {
            r.cycle.clear();
        }
        let out = compute_partial_impact(&rows, &ImpactConfig::default(), &[]);
        assert!(out.iter().all(|r| r.beta_partial.is_none() && r.n == 0));
    }
}
