//! End-to-end run: inputs to every output table.

use crate::calendar::{TradingCalendar, adjust_for_benchmark, build_price_series, compute_returns};
use crate::config::AnalysisConfig;
use crate::error::Result;
use crate::focus::{
    FocusQuantileRecord, FocusRankRecord, focus_by_quantile, focus_top_bottom, select_regime, within_regime,
};
use crate::frame;
use crate::impact::{compute_impact, compute_partial_impact};
use crate::io::{self, InputPaths};
use crate::momentum::{RegimeAverage, build_sector_series, compute_momentum, join_momentum, regime_averages};
use crate::quantile::{SurpriseQuantileRecord, reaction_by_surprise_quantile};
use crate::reaction::{ReactionAggregator, SectorBenchmarks, detect_metrics};
use crate::surprise::{SurpriseZSource, compute_surprise_z, ensure_surprise_z};
use crate::types::{
    ImpactRecord, MacroEvent, MomentumRankRecord, PartialImpactRecord, PriceRow, ReactionRecord,
    RegimeWindow, Scope, SectorMembership, SurpriseZRecord,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Raw input tables of one run.
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    /// Adjusted close observations
    pub prices: Vec<PriceRow>,
    /// Ticker to sector mapping
    pub membership: SectorMembership,
    /// Macro events, sorted by `(event_date, event_name)`
    pub events: Vec<MacroEvent>,
    /// Sector benchmark tickers; empty disables momentum
    pub sector_benchmarks: SectorBenchmarks,
    /// Regime windows; may be empty
    pub regimes: Vec<RegimeWindow>,
    /// Market benchmark subtracted from every other instrument
    pub benchmark_ticker: Option<String>,
}

impl PipelineInputs {
    /// Load every table from the standard locations.
    pub fn load(paths: &InputPaths) -> Result<Self> {
        let inputs = Self {
            prices: io::load_prices(&paths.prices)?,
            membership: io::load_tickers(&paths.tickers)?,
            events: io::load_events(&paths.events)?,
            sector_benchmarks: io::load_sector_benchmarks(&paths.sector_benchmarks)?,
            regimes: io::load_regimes(&paths.regimes)?,
            benchmark_ticker: None,
        };
        info!(
            prices = inputs.prices.len(),
            tickers = inputs.membership.len(),
            events = inputs.events.len(),
            sector_benchmarks = inputs.sector_benchmarks.len(),
            regimes = inputs.regimes.len(),
            "loaded inputs"
        );
        Ok(inputs)
    }

    /// Subtract `ticker`'s return from every other instrument.
    pub fn with_benchmark_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.benchmark_ticker = Some(ticker.into());
        self
    }
}

/// Every table produced by a run.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutputs {
    /// Reaction metric names in output order
    pub metrics: Vec<String>,
    /// Momentum lookbacks joined into `reactions_with_cycle`
    pub momentum_windows: Vec<usize>,
    /// Reactions with `surprise_z`
    pub reactions: Vec<ReactionRecord>,
    /// Per-event standardised surprises
    pub surprise_z: Vec<SurpriseZRecord>,
    /// How `surprise_z` was filled on the reactions
    pub surprise_source: Option<SurpriseZSource>,
    /// Sector momentum and ranks; empty without sector benchmarks
    pub momentum: Vec<MomentumRankRecord>,
    /// Reactions with momentum and rank at `t0_date`
    pub reactions_with_cycle: Vec<ReactionRecord>,
    /// Impact regressions with FDR control
    pub impact: Vec<ImpactRecord>,
    /// Partial regressions controlling for momentum rank
    pub partial_impact: Vec<PartialImpactRecord>,
    /// Recent reactions by surprise quantile
    pub surprise_quantiles: Vec<SurpriseQuantileRecord>,
    /// Focus family top/bottom sectors
    pub focus_top_bottom: Vec<FocusRankRecord>,
    /// Focus family quantile breakdown
    pub focus_quantiles: Vec<FocusQuantileRecord>,
    /// Top/bottom sectors inside the current regime; `None` when not requested or unmatched
    pub focus_top_bottom_regime: Option<Vec<FocusRankRecord>>,
    /// Focus quantiles inside the current regime
    pub focus_quantiles_regime: Option<Vec<FocusQuantileRecord>>,
    /// Average sector return per regime
    pub regime_averages: Vec<RegimeAverage>,
}

/// Output switches for [`PipelineOutputs::write`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Also write the one-row-per-event pivot
    pub write_wide: bool,
}

impl PipelineOutputs {
    /// Write every table as CSV under `out_dir`; returns the written paths.
    pub fn write(&self, out_dir: &Path, options: WriteOptions) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let mut written = Vec::new();
        let mut emit = |name: String, mut df: polars::prelude::DataFrame| -> Result<()> {
            let path = out_dir.join(name);
            frame::write_csv(&mut df, &path)?;
            written.push(path);
            Ok(())
        };

        emit(
            "reaction_long.csv".into(),
            frame::reactions_frame(&self.reactions, &self.metrics, &[])?,
        )?;
        for metric in &self.metrics {
            emit(
                format!("reaction_heatmap_{metric}.csv"),
                frame::heatmap_frame(&self.reactions, metric)?,
            )?;
        }
        if options.write_wide {
            emit(
                "reaction_wide.csv".into(),
                frame::wide_frame(&self.reactions, &self.metrics)?,
            )?;
        }
        emit(
            "surprise_z.csv".into(),
            frame::surprise_z_frame(&self.surprise_z)?,
        )?;
        if !self.momentum.is_empty() {
            emit(
                "sector_cycle_momentum.csv".into(),
                frame::cycle_momentum_frame(&self.momentum, &self.momentum_windows)?,
            )?;
            emit(
                "sector_cycle_rank.csv".into(),
                frame::momentum_frame(&self.momentum, &self.momentum_windows)?,
            )?;
        }
        emit(
            "reaction_with_cycle.csv".into(),
            frame::reactions_frame(&self.reactions_with_cycle, &self.metrics, &self.momentum_windows)?,
        )?;
        emit("macro_impact.csv".into(), frame::impact_frame(&self.impact)?)?;
        emit(
            "partial_impact.csv".into(),
            frame::partial_impact_frame(&self.partial_impact)?,
        )?;
        let by_regime: Vec<PartialImpactRecord> = self
            .partial_impact
            .iter()
            .filter(|r| matches!(r.scope, Scope::Regime(_)))
            .cloned()
            .collect();
        if !by_regime.is_empty() {
            emit(
                "partial_impact_by_regime.csv".into(),
                frame::partial_impact_frame(&by_regime)?,
            )?;
        }
        emit(
            "reaction_by_surprise_quantile.csv".into(),
            frame::surprise_quantile_frame(&self.surprise_quantiles, &self.metrics)?,
        )?;
        emit(
            "focus_top_bottom.csv".into(),
            frame::focus_top_bottom_frame(&self.focus_top_bottom)?,
        )?;
        emit(
            "focus_by_quantile.csv".into(),
            frame::focus_quantile_frame(&self.focus_quantiles, &self.metrics)?,
        )?;
        if let Some(records) = &self.focus_top_bottom_regime {
            emit(
                "focus_top_bottom_regime.csv".into(),
                frame::focus_top_bottom_frame(records)?,
            )?;
        }
        if let Some(records) = &self.focus_quantiles_regime {
            emit(
                "focus_by_quantile_regime.csv".into(),
                frame::focus_quantile_frame(records, &self.metrics)?,
            )?;
        }
        if !self.regime_averages.is_empty() {
            emit(
                "sector_cycle_regime_avg.csv".into(),
                frame::regime_average_frame(&self.regime_averages)?,
            )?;
        }

        info!(files = written.len(), out_dir = %out_dir.display(), "wrote outputs");
        Ok(written)
    }
}

/// Runs every stage in order over one immutable configuration.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AnalysisConfig,
    regime_partials: bool,
}

impl Pipeline {
    /// Validate `config` and build a pipeline.
    pub fn new(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            regime_partials: false,
        })
    }

    /// Also fit partial regressions inside each regime window.
    pub const fn with_regime_partials(mut self, enabled: bool) -> Self {
        self.regime_partials = enabled;
        self
    }

    /// Configuration in use.
    pub const fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run every stage.
    pub fn run(&self, inputs: &PipelineInputs) -> Result<PipelineOutputs> {
        let config = &self.config;

        let calendar = TradingCalendar::from_prices(&inputs.prices);
        let mut returns = compute_returns(&build_price_series(&inputs.prices));
        if let Some(bench) = inputs.benchmark_ticker.as_deref() {
            if returns.contains_key(bench) {
                returns = adjust_for_benchmark(&returns, bench);
            } else {
                warn!(benchmark = bench, "benchmark ticker has no returns, using raw returns");
            }
        }

        let half_windows = config.all_half_windows();
        let mut aggregator = ReactionAggregator::new(&calendar, &inputs.membership, &returns);
        if !inputs.sector_benchmarks.is_empty() {
            aggregator = aggregator.with_sector_benchmarks(&inputs.sector_benchmarks);
        }
        let mut reactions = aggregator.compute(&inputs.events, &half_windows);

        let surprise_z = compute_surprise_z(&inputs.events, &config.surprise)?;
        let by_id: HashMap<&str, Option<f64>> = surprise_z
            .iter()
            .map(|r| (r.event_id.as_str(), r.surprise_z))
            .collect();
        for row in &mut reactions {
            row.surprise_z = by_id.get(row.event_id.as_str()).copied().flatten();
        }
        let surprise_source = ensure_surprise_z(&mut reactions, &inputs.events, &config.surprise)?;

        let sector_series = build_sector_series(&returns, &inputs.sector_benchmarks);
        let (momentum, momentum_windows) = if sector_series.is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let windows = config.momentum_windows.clone();
            (compute_momentum(&calendar, &sector_series, &windows)?, windows)
        };
        let mut reactions_with_cycle = reactions.clone();
        if !momentum.is_empty() {
            join_momentum(&mut reactions_with_cycle, &momentum, &momentum_windows);
        }

        let metrics = detect_metrics(&reactions);
        let impact = compute_impact(&reactions_with_cycle, &metrics, &config.impact);
        let regimes: &[RegimeWindow] = if self.regime_partials {
            &inputs.regimes
        } else {
            &[]
        };
        let partial_impact = compute_partial_impact(&reactions_with_cycle, &config.impact, regimes);

        let recent = config.recent.apply(&reactions_with_cycle);
        let surprise_quantiles = reaction_by_surprise_quantile(&recent, config.quantiles, &metrics)?;

        let current = config.regime_current.as_ref().and_then(|current| {
            let window = select_regime(current, &inputs.regimes, &recent);
            if window.is_none() {
                warn!(regime = ?current, "no regime window matches, skipping regime focus tables");
            }
            window
        });
        let (focus_top_bottom_regime, focus_quantiles_regime) = match current {
            Some(window) => {
                let rows = within_regime(&recent, window);
                info!(regime = %window.name, rows = rows.len(), "regime focus breakdown");
                (
                    Some(focus_top_bottom(&rows, &metrics)?),
                    Some(focus_by_quantile(&rows, config.quantiles, &metrics)?),
                )
            }
            None => (None, None),
        };
        let focus_top_bottom = focus_top_bottom(&recent, &metrics)?;
        let focus_quantiles = focus_by_quantile(&recent, config.quantiles, &metrics)?;
        let regime_averages = regime_averages(&calendar, &sector_series, &inputs.regimes)?;

        info!(
            trading_days = calendar.len(),
            reactions = reactions.len(),
            impact = impact.len(),
            partial = partial_impact.len(),
            recent = recent.len(),
            ?surprise_source,
            "pipeline finished"
        );

        Ok(PipelineOutputs {
            metrics,
            momentum_windows,
            reactions,
            surprise_z,
            surprise_source: Some(surprise_source),
            momentum,
            reactions_with_cycle,
            impact,
            partial_impact,
            surprise_quantiles,
            focus_top_bottom,
            focus_quantiles,
            focus_top_bottom_regime,
            focus_quantiles_regime,
            regime_averages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CurrentRegime;
    use chrono::{Datelike, Duration, NaiveDate, Weekday};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn business_days(n: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(n);
        let mut day = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
        while out.len() < n {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                out.push(day);
            }
            day += Duration::days(1);
        }
        out
    }

    /// Tech members fall on positive CPI surprises, Energy is noise.
    fn inputs() -> PipelineInputs {
        let mut rng = StdRng::seed_from_u64(42);
        let days = business_days(520);
        let events: Vec<MacroEvent> = (0..24)
            .map(|i| {
                let expected = 3.0 + 0.1 * (i % 4) as f64;
                MacroEvent {
                    event_id: format!("cpi-{i}"),
                    event_name: "CPI YoY".into(),
                    event_date: days[10 + i * 21],
                    event_type: "CPI".into(),
                    importance: "high".into(),
                    expected_value: Some(expected),
                    actual_value: Some(expected + rng.gen_range(-0.3..0.3)),
                }
            })
            .collect();
        let shock: HashMap<NaiveDate, f64> = events
            .iter()
            .map(|e| (e.event_date, e.surprise().unwrap_or(0.0)))
            .collect();

        let mut prices = Vec::new();
        let mut level: HashMap<&str, f64> = HashMap::new();
        for day in &days {
            for ticker in ["AAA", "BBB", "XOM", "XLK", "XLE"] {
                let mut r: f64 = rng.gen_range(-0.01..0.01);
                if matches!(ticker, "AAA" | "BBB") {
                    r -= 0.1 * shock.get(day).copied().unwrap_or(0.0);
                }
                let px = level.entry(ticker).or_insert(100.0);
                *px *= 1.0 + r;
                prices.push(PriceRow::new(*day, ticker, *px));
            }
        }

        PipelineInputs {
            prices,
            membership: [("AAA", "Tech"), ("BBB", "Tech"), ("XOM", "Energy")]
                .into_iter()
                .collect(),
            events,
            sector_benchmarks: SectorBenchmarks::from([
                ("Tech".to_string(), "XLK".to_string()),
                ("Energy".to_string(), "XLE".to_string()),
            ]),
            regimes: vec![RegimeWindow::new(days[0], days[259], "first-half")],
            benchmark_ticker: None,
        }
    }

    #[test]
    fn test_run_produces_every_stage() {
        let pipeline = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .with_regime_partials(true);
        let out = pipeline.run(&inputs()).unwrap();

        assert_eq!(out.reactions.len(), 24 * 2);
        assert_eq!(
            out.metrics,
            vec![
                "t0_return_avg",
                "win1_cum_avg",
                "win3_cum_avg",
                "win5_cum_avg",
                "win10_cum_avg",
                "win21_cum_avg"
            ]
        );
        assert_eq!(out.surprise_source, Some(SurpriseZSource::Existing));
        assert!(out.reactions.iter().all(|r| r.surprise_z.is_some()));
        assert_eq!(out.momentum.len(), 520 * 2);
        assert!(out.reactions_with_cycle.iter().any(|r| r.rank(21).is_some()));
        assert_eq!(out.impact.len(), 2 * out.metrics.len());
        assert!(out.partial_impact.iter().any(|r| r.scope == Scope::Overall));
        assert!(out.partial_impact.iter().any(|r| matches!(r.scope, Scope::Regime(_))));
        assert_eq!(out.regime_averages.len(), 2);
        assert!(!out.focus_top_bottom.is_empty());
    }

    #[test]
    fn test_tech_sensitivity_detected() {
        let out = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs())
            .unwrap();
        let tech = out
            .impact
            .iter()
            .find(|r| r.sector == "Tech" && r.metric == "t0_return_avg")
            .unwrap();
        assert_eq!(tech.n, 24);
        assert!(tech.beta.unwrap() < 0.0);
        assert_eq!(tech.significant_bh, Some(true));
    }

    #[test]
    fn test_without_sector_benchmarks_reactions_pass_through() {
        let mut inputs = inputs();
        inputs.sector_benchmarks.clear();
        let out = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs)
            .unwrap();
        assert!(out.momentum.is_empty());
        assert_eq!(out.reactions_with_cycle, out.reactions);
        assert!(out.regime_averages.is_empty());
        assert!(out.partial_impact.iter().all(|r| r.beta_partial.is_none()));
    }

    #[test]
    fn test_benchmark_ticker_adjusts_reactions() {
        let raw = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs())
            .unwrap();
        let excess = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs().with_benchmark_ticker("XLE"))
            .unwrap();

        assert_eq!(excess.reactions.len(), raw.reactions.len());
        let t0 = |out: &PipelineOutputs, sector: &str| -> Vec<Option<f64>> {
            out.reactions
                .iter()
                .filter(|r| r.sector == sector)
                .map(|r| r.t0_return_avg)
                .collect()
        };
        assert_ne!(t0(&excess, "Tech"), t0(&raw, "Tech"));
        assert_ne!(t0(&excess, "Energy"), t0(&raw, "Energy"));

        let tech = excess
            .impact
            .iter()
            .find(|r| r.sector == "Tech" && r.metric == "t0_return_avg")
            .unwrap();
        assert!(tech.beta.unwrap() < 0.0);
        assert_eq!(tech.significant_bh, Some(true));
    }

    #[test]
    fn test_missing_benchmark_ticker_keeps_raw_returns() {
        let raw = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs())
            .unwrap();
        let out = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs().with_benchmark_ticker("SPY"))
            .unwrap();
        assert_eq!(out.reactions, raw.reactions);
    }

    #[test]
    fn test_regime_focus_tables() {
        let mut inputs = inputs();
        let last = inputs.events.last().unwrap().event_date;
        inputs.regimes.push(RegimeWindow::new(last - Duration::days(90), last, "current"));

        let config = AnalysisConfig {
            regime_current: Some(CurrentRegime::Latest),
            ..AnalysisConfig::default()
        };
        let out = Pipeline::new(config).unwrap().run(&inputs).unwrap();
        let regime = out.focus_top_bottom_regime.as_ref().unwrap();
        assert!(!regime.is_empty());
        assert!(out.focus_quantiles_regime.is_some());

        let config = AnalysisConfig {
            regime_current: Some(CurrentRegime::from("missing")),
            ..AnalysisConfig::default()
        };
        let out = Pipeline::new(config).unwrap().run(&inputs).unwrap();
        assert!(out.focus_top_bottom_regime.is_none());

        let out = Pipeline::new(AnalysisConfig::default())
            .unwrap()
            .run(&inputs)
            .unwrap();
        assert!(out.focus_top_bottom_regime.is_none());
        assert!(out.focus_quantiles_regime.is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = AnalysisConfig {
            quantiles: 0,
            ..AnalysisConfig::default()
        };
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_write_outputs() {
        let mut inputs = inputs();
        let last = inputs.events.last().unwrap().event_date;
        inputs.regimes.push(RegimeWindow::new(last - Duration::days(90), last, "current"));
        let config = AnalysisConfig {
            regime_current: Some(CurrentRegime::Latest),
            ..AnalysisConfig::default()
        };
        let out = Pipeline::new(config)
            .unwrap()
            .with_regime_partials(true)
            .run(&inputs)
            .unwrap();
        let dir = std::env::temp_dir().join(format!("macro-reaction-pipeline-{}", std::process::id()));
        let written = out.write(&dir, WriteOptions { write_wide: true }).unwrap();
        for name in [
            "reaction_long.csv",
            "reaction_heatmap_t0_return_avg.csv",
            "reaction_wide.csv",
            "sector_cycle_rank.csv",
            "sector_cycle_momentum.csv",
            "partial_impact_by_regime.csv",
            "focus_top_bottom_regime.csv",
            "focus_by_quantile_regime.csv",
            "focus_by_quantile.csv",
            "surprise_z.csv",
            "reaction_with_cycle.csv",
            "macro_impact.csv",
            "partial_impact.csv",
            "reaction_by_surprise_quantile.csv",
            "focus_top_bottom.csv",
            "sector_cycle_regime_avg.csv",
        ] {
            assert!(written.contains(&dir.join(name)), "missing {name}");
            assert!(dir.join(name).exists());
        }
        let by_regime = std::fs::read_to_string(dir.join("partial_impact_by_regime.csv")).unwrap();
        assert!(by_regime.lines().skip(1).all(|l| l.starts_with("regime:")));
        std::fs::remove_dir_all(&dir).ok();
    }
}
