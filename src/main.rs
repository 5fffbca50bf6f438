mod config;
mod data;
mod engine;
mod policy;
mod regime;
mod report;
mod risk;
mod strategies;
mod types;
mod validation;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::AppConfig;
use engine::{BacktestEngine, PerformanceReport};
use policy::ThresholdTable;
use regime::RegimeClassifier;
use report::ReportWriter;
use risk::CapitalRiskValidator;
use strategies::SimulatedLlmDecisionMaker;
use types::BarSeries;
use validation::run_alignment;

#[derive(Parser)]
#[command(name = "adaptive-backtester")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Regime-adaptive strategy backtester and parity validator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay historical data through the full decision pipeline
    Backtest {
        /// CSV file with bars and indicators; synthetic data when omitted
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Override the configured decision-maker seed
        #[arg(short, long)]
        seed: Option<u64>,
    },
    /// Check batch/streaming decision parity over the same bars
    Validate {
        /// CSV file with bars and indicators; synthetic data when omitted
        #[arg(short, long)]
        data: Option<PathBuf>,
    },
    /// Write a synthetic three-regime series as CSV
    Generate {
        /// Output file
        #[arg(short, long, default_value = "synthetic.csv")]
        output: PathBuf,

        /// Generator seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to initialize logging");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let app_config = load_config(&cli.config)?;

    match cli.command {
        Commands::Backtest { data, seed } => {
            let mut config = app_config.backtest.clone();
            if let Some(seed) = seed {
                config.seed = seed;
            }
            let series = load_series(data.as_deref(), config.seed)?;

            let mut engine = BacktestEngine::new(
                config.clone(),
                RegimeClassifier::new(app_config.regime.clone()),
                CapitalRiskValidator::new(app_config.risk.clone()),
                Box::new(SimulatedLlmDecisionMaker::new(
                    ThresholdTable::default(),
                    config.seed,
                )),
            );
            let result = engine.run(&series)?;
            let report = PerformanceReport::from_result(&result);
            report.print_summary();

            let writer = ReportWriter::new(&app_config.report_dir)?;
            writer.write("backtest", &result)?;
            writer.write("performance", &report)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Validate { data } => {
            let config = app_config.backtest.clone();
            let series = load_series(data.as_deref(), config.seed)?;
            let report = run_alignment(&config, &app_config.risk, &app_config.regime, &series)?;

            let threshold = validation::ALIGNMENT_ACCEPTANCE;
            let check = |ok: bool| if ok { "PASS" } else { "FAIL" };
            println!("bars compared:          {}", report.bars);
            println!(
                "decision match rate:    {:.2}%  [{}, need {:.0}%]",
                report.decision_match_rate * 100.0,
                check(report.decision_match_rate >= threshold),
                threshold * 100.0
            );
            println!(
                "regime match rate:      {:.2}%  [{}]",
                report.regime_match_rate * 100.0,
                check(report.regime_match_rate >= threshold)
            );
            println!(
                "mean confidence delta:  {:.3}",
                report.mean_confidence_delta
            );

            let writer = ReportWriter::new(&app_config.report_dir)?;
            writer.write("alignment", &report)?;

            if report.accepted {
                info!(
                    "parity accepted ({:.1}% >= {:.0}%)",
                    report.decision_match_rate * 100.0,
                    validation::ALIGNMENT_ACCEPTANCE * 100.0
                );
                Ok(ExitCode::SUCCESS)
            } else {
                error!(
                    "parity rejected ({:.1}% < {:.0}%)",
                    report.decision_match_rate * 100.0,
                    validation::ALIGNMENT_ACCEPTANCE * 100.0
                );
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Generate { output, seed } => {
            let series = data::generate_synthetic_series(seed);
            data::write_csv(&output, &series)?;
            println!("wrote {} bars to {}", series.len(), output.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: &str) -> Result<AppConfig> {
    let path = Path::new(path);
    if path.exists() {
        AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
    } else {
        warn!("{} not found, using defaults", path.display());
        Ok(AppConfig::default())
    }
}

fn load_series(data: Option<&Path>, seed: u64) -> Result<BarSeries> {
    match data {
        Some(path) => {
            data::load_csv(path).with_context(|| format!("loading {}", path.display()))
        }
        None => {
            info!("no data file given, generating synthetic series (seed {})", seed);
            Ok(data::generate_synthetic_series(seed))
        }
    }
}
