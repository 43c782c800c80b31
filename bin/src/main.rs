//! CLI for the macro-reaction sector event study.
//!
//! `run` loads one market's input tables, runs every analysis stage and
//! writes the output tables as CSV. `config` prints the default
//! configuration as JSON, ready to be edited and passed back with
//! `--config`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use macro_reaction::{AnalysisConfig, CurrentRegime, InputPaths, Pipeline, PipelineInputs, WriteOptions};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "macro-reaction")]
#[command(about = "Sector reactions to macroeconomic releases", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Market {
    /// United States
    Us,
    /// Korea
    Kr,
}

impl Market {
    const fn dir_name(self) -> &'static str {
        match self {
            Self::Us => "us",
            Self::Kr => "kr",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis for one market
    Run {
        /// Market whose tables are analysed
        #[arg(long, value_enum)]
        market: Market,
        /// Directory holding the input tables [default: data/<market>]
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Directory receiving the output tables [default: out/<market>]
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// JSON configuration file; defaults are used when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Ticker whose return is subtracted from every other instrument
        #[arg(long)]
        benchmark_ticker: Option<String>,
        /// Also write the one-row-per-event pivot
        #[arg(long)]
        write_wide: bool,
        /// Also fit partial regressions within each macro regime
        #[arg(long)]
        by_regime: bool,
        /// Also write focus tables limited to one regime window
        /// (a regime name, or `latest` for the window holding the latest event)
        #[arg(long, value_name = "NAME|latest")]
        regime_current: Option<String>,
    },
    /// Print the default configuration as JSON
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            market,
            data_dir,
            out_dir,
            config,
            benchmark_ticker,
            write_wide,
            by_regime,
            regime_current,
        } => {
            let data_dir = data_dir.unwrap_or_else(|| PathBuf::from("data").join(market.dir_name()));
            let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("out").join(market.dir_name()));
            run(RunArgs {
                data_dir,
                out_dir,
                config,
                benchmark_ticker,
                write_wide,
                by_regime,
                regime_current,
            })
        }
        Commands::Config => print_default_config(),
    }
}

struct RunArgs {
    data_dir: PathBuf,
    out_dir: PathBuf,
    config: Option<PathBuf>,
    benchmark_ticker: Option<String>,
    write_wide: bool,
    by_regime: bool,
    regime_current: Option<String>,
}

/// Load inputs, run the pipeline and write every table.
fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };
    if let Some(regime) = args.regime_current.as_deref() {
        config.regime_current = Some(CurrentRegime::from(regime));
    }

    let mut inputs = PipelineInputs::load(&InputPaths::in_dir(&args.data_dir))
        .with_context(|| format!("loading inputs from {}", args.data_dir.display()))?;
    if let Some(ticker) = args.benchmark_ticker {
        inputs = inputs.with_benchmark_ticker(ticker);
    }

    let pipeline = Pipeline::new(config)?.with_regime_partials(args.by_regime);
    let outputs = pipeline.run(&inputs)?;

    let written = outputs
        .write(
            &args.out_dir,
            WriteOptions {
                write_wide: args.write_wide,
            },
        )
        .with_context(|| format!("writing outputs to {}", args.out_dir.display()))?;

    let significant = outputs
        .impact
        .iter()
        .filter(|r| r.significant_bh == Some(true))
        .count();
    info!(
        out_dir = %args.out_dir.display(),
        files = written.len(),
        impact_tests = outputs.impact.len(),
        significant,
        "done"
    );
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

/// Print the default configuration.
fn print_default_config() -> Result<()> {
    let json = serde_json::to_string_pretty(&AnalysisConfig::default())?;
    println!("{json}");
    Ok(())
}
