#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/macro-reaction/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod calendar;
pub mod config;
pub mod dates;
pub mod error;
pub mod focus;
pub mod frame;
pub mod group;
pub mod impact;
pub mod io;
pub mod momentum;
pub mod pipeline;
pub mod quantile;
pub mod reaction;
pub mod stats;
pub mod surprise;
pub mod types;

// Re-export core types
pub use calendar::TradingCalendar;
pub use config::{AnalysisConfig, CurrentRegime, Frequency, ImpactConfig, RecentFilter, SurpriseConfig};
pub use error::{ReactionError, Result};
pub use io::InputPaths;
pub use pipeline::{Pipeline, PipelineInputs, PipelineOutputs, WriteOptions};
pub use reaction::{ReactionAggregator, compute_reactions};
pub use types::{
    ImpactRecord, MacroEvent, MomentumRankRecord, PartialImpactRecord, PriceRow, ReactionRecord,
    RegimeWindow, Scope, SectorMembership, SurpriseZRecord,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
