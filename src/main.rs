mod analysis;
mod app;
mod backtest;
mod config;
mod data;
mod features;
mod models;
mod nn;
mod pipeline;
mod ui;

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::ForecastDashboardApp;
use config::ForecastConfig;
use data::{cache, returns};
use models::ModelKind;

#[derive(Parser, Debug)]
#[command(name = "etf-forecaster", version, about = "Multi-step ETF price forecasting")]
struct Cli {
    /// JSON configuration file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Forecasting model used by `train` and `backtest`
    #[arg(long, global = true, value_enum, default_value_t = ModelKind::BoostedTrees)]
    model: ModelKind,

    /// Forecast horizon in business days (defaults to the configured value)
    #[arg(long, global = true)]
    n_steps_predict: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download daily returns for the configured symbols into the cache
    Extract {
        /// Download even when the cache is fresh
        #[arg(long)]
        overwrite_cache: bool,
    },
    /// Retrain on fresh data and write the prediction artifact
    Train,
    /// Walk-forward evaluation on the cached returns
    Backtest {
        #[arg(long)]
        test_fraction: Option<f64>,
        /// Also write the report as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Plot the latest forecasts
    Dashboard,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("etf_forecaster=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = ForecastConfig::load(cli.config.as_deref())?;
    let model = cli.model;
    let n_steps = cli.n_steps_predict.unwrap_or(cfg.n_steps_predict);
    ensure!(n_steps > 0, "--n-steps-predict must be positive");

    match cli.command {
        Command::Extract { overwrite_cache } => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            let extraction = rt.block_on(pipeline::extract(&cfg, overwrite_cache))?;
            tracing::info!(
                "Return cache holds {} rows x {} symbols",
                extraction.returns.n_rows(),
                extraction.returns.n_symbols()
            );
        }
        Command::Train => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            let extraction = rt.block_on(pipeline::extract(&cfg, true))?;
            let summary = pipeline::run_training(&cfg, model, n_steps, extraction)?;
            tracing::info!(
                "Forecast {} through {} written to {}",
                summary.model,
                summary.last_forecast_date,
                cfg.predictions_path().display()
            );
        }
        Command::Backtest {
            test_fraction,
            output,
        } => {
            let test_fraction = test_fraction.unwrap_or(cfg.test_fraction);
            let raw = returns::read_cache(&cfg.returns_cache_path())?;
            let table = returns::clean(&raw, &cfg.excluded_symbols)?;
            let report = backtest::run_backtest(&table, model, &cfg, n_steps, test_fraction)?;
            println!(
                "{} over origins {}..={} ({} train rows)\n{}",
                report.model, report.first_origin, report.last_origin, report.n_train, report.evaluation
            );
            if let Some(path) = output {
                cache::save_json(&path, &report)?;
                tracing::info!("Backtest report saved to {}", path.display());
            }
        }
        Command::Dashboard => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            let options = eframe::NativeOptions {
                viewport: eframe::egui::ViewportBuilder::default()
                    .with_inner_size([1280.0, 800.0])
                    .with_min_inner_size([800.0, 600.0]),
                ..Default::default()
            };
            eframe::run_native(
                "ETF Forecaster",
                options,
                Box::new(move |cc| Ok(Box::new(ForecastDashboardApp::new(cc, &cfg, rt)))),
            )
            .map_err(|e| anyhow::anyhow!("Dashboard failed: {}", e))?;
        }
    }
    Ok(())
}
