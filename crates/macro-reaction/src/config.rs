//! Run configuration.
//!
//! All tunable constants live in [`AnalysisConfig`], which is built once
//! and handed to each stage by reference.

use crate::{ReactionError, Result};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

/// Release cadence of a macro indicator.
///
/// The cadence decides how many past surprises feed the rolling standard
/// deviation used for z-scores.
///
/// Config files accept the same tags as [`FromStr`]: `m`/`monthly`,
/// `w`/`weekly`, `q`/`quarterly`, case-insensitive.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Frequency {
    /// Monthly releases (CPI, NFP, ...)
    #[default]
    #[display("monthly")]
    Monthly,
    /// Weekly releases (jobless claims, ...)
    #[display("weekly")]
    Weekly,
    /// Quarterly releases (GDP, ...)
    #[display("quarterly")]
    Quarterly,
}

impl Frequency {
    /// Rolling window, in observations.
    pub const fn window(self) -> usize {
        match self {
            Self::Monthly => 12,
            Self::Weekly => 26,
            Self::Quarterly => 8,
        }
    }

    /// Minimum observations before the rolling estimate is defined.
    pub const fn min_periods(self) -> usize {
        3
    }

    /// `(window, min_periods)` pair.
    pub const fn rolling(self) -> (usize, usize) {
        (self.window(), self.min_periods())
    }
}

impl FromStr for Frequency {
    type Err = ReactionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m" | "monthly" => Ok(Self::Monthly),
            "w" | "weekly" => Ok(Self::Weekly),
            "q" | "quarterly" => Ok(Self::Quarterly),
            other => Err(ReactionError::InvalidConfig(format!(
                "unknown frequency `{other}`"
            ))),
        }
    }
}

impl TryFrom<String> for Frequency {
    type Error = ReactionError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Frequency> for String {
    fn from(freq: Frequency) -> Self {
        freq.to_string()
    }
}

/// Surprise normalisation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurpriseConfig {
    /// Cadence for event types without an explicit entry.
    pub default_frequency: Frequency,
    /// Per event type cadence overrides.
    pub frequencies: BTreeMap<String, Frequency>,
    /// Minimum observations for the rolling standard deviation.
    pub min_periods: usize,
    /// Denominator used when both rolling and whole-group std are unusable.
    pub epsilon: f64,
    /// Share of missing `surprise_z` values above which they are recomputed.
    pub na_threshold: f64,
}

impl Default for SurpriseConfig {
    fn default() -> Self {
        Self {
            default_frequency: Frequency::Monthly,
            frequencies: BTreeMap::new(),
            min_periods: 3,
            epsilon: 1e-9,
            na_threshold: 0.8,
        }
    }
}

impl SurpriseConfig {
    /// Cadence of an event type.
    pub fn frequency_of(&self, event_type: &str) -> Frequency {
        self.frequencies
            .get(event_type)
            .copied()
            .unwrap_or(self.default_frequency)
    }

    /// Rolling `(window, min_periods)` for an event type.
    pub fn rolling_for(&self, event_type: &str) -> (usize, usize) {
        (self.frequency_of(event_type).window(), self.min_periods)
    }
}

/// Regression and multiple-testing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpactConfig {
    /// Benjamini-Hochberg false discovery rate.
    pub fdr_alpha: f64,
    /// Minimum complete rows for a partial regression.
    pub min_sample: usize,
    /// Response metric of the partial regression.
    pub partial_metric: String,
    /// Momentum window whose rank is the control variable.
    pub partial_rank_window: usize,
}

impl Default for ImpactConfig {
    fn default() -> Self {
        Self {
            fdr_alpha: 0.05,
            min_sample: 5,
            partial_metric: crate::reaction::T0_METRIC.to_string(),
            partial_rank_window: 21,
        }
    }
}

/// Limits applied before the recent-event breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecentFilter {
    /// Keep events within this many calendar days of the latest event (0 = off).
    pub last_days: i64,
    /// Keep only this many latest distinct event dates (0 = off).
    pub last_events: usize,
}

impl Default for RecentFilter {
    fn default() -> Self {
        Self {
            last_days: 180,
            last_events: 100,
        }
    }
}

/// Regime whose recent events get their own focus breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CurrentRegime {
    /// Regime containing the latest recent event
    Latest,
    /// Regime with this name
    Named(String),
}

impl From<&str> for CurrentRegime {
    fn from(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("latest") {
            Self::Latest
        } else {
            Self::Named(s.to_string())
        }
    }
}

impl From<String> for CurrentRegime {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<CurrentRegime> for String {
    fn from(regime: CurrentRegime) -> Self {
        match regime {
            CurrentRegime::Latest => "latest".to_string(),
            CurrentRegime::Named(name) => name,
        }
    }
}

/// Complete configuration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Primary reaction half-windows in trading days.
    pub half_windows: Vec<usize>,
    /// Extra half-windows merged into the reaction table.
    pub additional_windows: Vec<usize>,
    /// Trailing momentum lookbacks in trading days.
    pub momentum_windows: Vec<usize>,
    /// Surprise normalisation.
    pub surprise: SurpriseConfig,
    /// Regression settings.
    pub impact: ImpactConfig,
    /// Number of surprise quantile buckets.
    pub quantiles: usize,
    /// Recent-event limits for the breakdown tables.
    pub recent: RecentFilter,
    /// Regime for the `*_regime` focus tables; `None` skips them.
    pub regime_current: Option<CurrentRegime>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            half_windows: vec![1, 3],
            additional_windows: vec![5, 10, 21],
            momentum_windows: vec![21, 63, 126],
            surprise: SurpriseConfig::default(),
            impact: ImpactConfig::default(),
            quantiles: 5,
            recent: RecentFilter::default(),
            regime_current: None,
        }
    }
}

impl AnalysisConfig {
    /// Load a config from a JSON file; absent keys take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.half_windows.is_empty() {
            return Err(ReactionError::InvalidConfig(
                "half_windows must not be empty".to_string(),
            ));
        }
        if self.momentum_windows.contains(&0) {
            return Err(ReactionError::InvalidConfig(
                "momentum windows must be positive".to_string(),
            ));
        }
        if !(self.impact.fdr_alpha > 0.0 && self.impact.fdr_alpha < 1.0) {
            return Err(ReactionError::InvalidConfig(format!(
                "fdr_alpha must be in (0, 1), got {}",
                self.impact.fdr_alpha
            )));
        }
        if self.quantiles == 0 {
            return Err(ReactionError::InvalidConfig(
                "quantiles must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.surprise.na_threshold) {
            return Err(ReactionError::InvalidConfig(format!(
                "na_threshold must be in [0, 1], got {}",
                self.surprise.na_threshold
            )));
        }
        let smallest_window = Frequency::Quarterly.window();
        if !(1..=smallest_window).contains(&self.surprise.min_periods) {
            return Err(ReactionError::InvalidConfig(format!(
                "min_periods must be in [1, {smallest_window}], got {}",
                self.surprise.min_periods
            )));
        }
        if self.recent.last_days < 0 {
            return Err(ReactionError::InvalidConfig(format!(
                "recent.last_days must not be negative, got {}",
                self.recent.last_days
            )));
        }
        Ok(())
    }

    /// Every reaction half-window, primary first, without duplicates.
    pub fn all_half_windows(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.half_windows.len() + self.additional_windows.len());
        for &w in self.half_windows.iter().chain(&self.additional_windows) {
            if !out.contains(&w) {
                out.push(w);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("M", Frequency::Monthly, 12)]
    #[case("weekly", Frequency::Weekly, 26)]
    #[case(" q ", Frequency::Quarterly, 8)]
    fn test_frequency_windows(#[case] tag: &str, #[case] freq: Frequency, #[case] window: usize) {
        let parsed: Frequency = tag.parse().unwrap();
        assert_eq!(parsed, freq);
        assert_eq!(parsed.rolling(), (window, 3));
    }

    #[test]
    fn test_unknown_frequency_rejected() {
        assert!("daily".parse::<Frequency>().is_err());
    }

    #[test]
    fn test_defaults_validate() {
        let config = AnalysisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.all_half_windows(), vec![1, 3, 5, 10, 21]);
        assert_eq!(config.surprise.rolling_for("CPI"), (12, 3));
    }

    #[test]
    fn test_frequency_override() {
        let mut config = SurpriseConfig::default();
        config
            .frequencies
            .insert("CLAIMS".to_string(), Frequency::Weekly);
        assert_eq!(config.rolling_for("CLAIMS"), (26, 3));
        assert_eq!(config.rolling_for("CPI"), (12, 3));
    }

    #[test]
    fn test_invalid_alpha_rejected() {
        let mut config = AnalysisConfig::default();
        config.impact.fdr_alpha = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ReactionError::InvalidConfig(_))
        ));
    }

    #[rstest]
    #[case(r#"{"recent": {"last_days": -1}}"#)]
    #[case(r#"{"surprise": {"min_periods": 9}}"#)]
    #[case(r#"{"surprise": {"min_periods": 0}}"#)]
    fn test_out_of_range_settings_rejected(#[case] json: &str) {
        let config: AnalysisConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ReactionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_zero_last_days_disables_filter() {
        let mut config = AnalysisConfig::default();
        config.recent.last_days = 0;
        config.validate().unwrap();
    }

    #[test]
    fn test_frequency_json_accepts_short_tags() {
        let config: AnalysisConfig = serde_json::from_str(
            r#"{"surprise": {"default_frequency": "Quarterly", "frequencies": {"CLAIMS": "w", "CPI": "monthly"}}}"#,
        )
        .unwrap();
        assert_eq!(config.surprise.default_frequency, Frequency::Quarterly);
        assert_eq!(config.surprise.frequency_of("CLAIMS"), Frequency::Weekly);
        assert_eq!(config.surprise.frequency_of("CPI"), Frequency::Monthly);

        let json = serde_json::to_string(&config.surprise).unwrap();
        assert!(json.contains(r#""CLAIMS":"weekly""#), "{json}");
        assert!(serde_json::from_str::<SurpriseConfig>(r#"{"default_frequency": "daily"}"#).is_err());
    }

    #[rstest]
    #[case("latest", CurrentRegime::Latest)]
    #[case(" LATEST ", CurrentRegime::Latest)]
    #[case("Tightening", CurrentRegime::Named("Tightening".to_string()))]
    fn test_current_regime_from_str(#[case] raw: &str, #[case] expected: CurrentRegime) {
        assert_eq!(CurrentRegime::from(raw), expected);
    }

    #[test]
    fn test_regime_current_json() {
        let config: AnalysisConfig = serde_json::from_str(r#"{"regime_current": "latest"}"#).unwrap();
        assert_eq!(config.regime_current, Some(CurrentRegime::Latest));
        assert_eq!(AnalysisConfig::default().regime_current, None);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"momentum_windows": [10, 20], "impact": {"fdr_alpha": 0.1}}"#)
                .unwrap();
        assert_eq!(config.momentum_windows, vec![10, 20]);
        assert_eq!(config.impact.fdr_alpha, 0.1);
        assert_eq!(config.impact.min_sample, 5);
        assert_eq!(config.half_windows, vec![1, 3]);
    }
}
