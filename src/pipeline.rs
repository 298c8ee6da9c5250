use std::collections::HashMap;

use anyhow::{bail, ensure, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use ndarray::{concatenate, Array2, Axis};

use crate::config::ForecastConfig;
use crate::data::models::{PriceTable, ReturnTable, TrainingSummary};
use crate::data::yahoo::{PriceHistory, YahooClient};
use crate::data::{artifact, cache, returns, symbols};
use crate::models::{build_model, ForecastArray, ModelKind};

/// Output of the extraction stage. `histories` is empty when the return
/// cache was reused instead of downloading.
#[derive(Debug)]
pub struct Extraction {
    pub returns: ReturnTable,
    pub histories: Vec<PriceHistory>,
    pub skipped: Vec<String>,
}

/// Download adjusted closes for every listed symbol and write the return
/// cache. A fresh cache is reused unless `overwrite_cache` is set.
pub async fn extract(cfg: &ForecastConfig, overwrite_cache: bool) -> Result<Extraction> {
    let cache_path = cfg.returns_cache_path();
    if !overwrite_cache && cache::is_cache_fresh(&cache_path, cfg.cache_max_age_hours) {
        match returns::read_cache(&cache_path) {
            Ok(table) => {
                tracing::info!("Loading data from cache: {}", cache_path.display());
                return Ok(Extraction {
                    returns: table,
                    histories: Vec::new(),
                    skipped: Vec::new(),
                });
            }
            Err(e) => tracing::warn!("Ignoring unreadable cache {}: {:#}", cache_path.display(), e),
        }
    }

    let symbols = symbols::read_symbols(&cfg.symbols_path())?;
    tracing::info!("Extracting data for {} symbols", symbols.len());

    let client = YahooClient::new()?;
    let (histories, skipped) = client.fetch_histories(&symbols).await?;
    ensure!(
        !histories.is_empty(),
        "No price history downloaded for any of {} symbols",
        symbols.len()
    );

    let series: Vec<(String, Vec<(NaiveDate, f64)>)> = histories
        .iter()
        .map(|h| (h.symbol.clone(), h.returns()))
        .collect();
    let table = returns::assemble_table(&series)?;
    returns::write_cache(&cache_path, &table)?;
    tracing::info!("All symbols data extracted ({} skipped)", skipped.len());

    Ok(Extraction {
        returns: table,
        histories,
        skipped,
    })
}

/// Cleaned returns restricted to the anchored symbols and dates, with the
/// matching absolute price levels.
#[derive(Debug)]
pub struct AnchoredPrices {
    pub returns: ReturnTable,
    pub prices: PriceTable,
    pub dropped: Vec<String>,
}

/// Turn returns into price levels whose last row equals the last adjusted
/// close of each symbol.
///
/// The anchor row is the latest row on which every symbol has a close; rows
/// after it are clipped. Symbols with no close history are dropped.
pub fn anchor_prices(table: &ReturnTable, histories: &[PriceHistory]) -> Result<AnchoredPrices> {
    let by_symbol: HashMap<&str, HashMap<NaiveDate, f64>> = histories
        .iter()
        .map(|h| (h.symbol.as_str(), h.valid_closes().collect::<HashMap<_, _>>()))
        .filter(|(_, closes)| !closes.is_empty())
        .collect();

    let mut kept = Vec::new();
    let mut dropped = Vec::new();
    for symbol in table.symbols() {
        if by_symbol.contains_key(symbol.as_str()) {
            kept.push(symbol.clone());
        } else {
            tracing::warn!("Dropping {}: no closing prices to anchor to", symbol);
            dropped.push(symbol.clone());
        }
    }
    if kept.is_empty() {
        bail!("No symbol has closing prices to anchor returns to");
    }
    let selected = table.select_symbols(&kept)?;
    let closes: Vec<&HashMap<NaiveDate, f64>> = kept
        .iter()
        .filter_map(|s| by_symbol.get(s.as_str()))
        .collect();

    let anchor = (0..selected.n_rows())
        .rev()
        .find(|&i| closes.iter().all(|c| c.contains_key(&selected.dates()[i])))
        .context("No date on which every symbol has a closing price")?;
    if anchor + 1 < selected.n_rows() {
        tracing::info!(
            "Clipping {} rows after {}, the last date with closes for all symbols",
            selected.n_rows() - anchor - 1,
            selected.dates()[anchor]
        );
    }
    let clipped = selected.slice_rows(0..anchor + 1);
    let anchor_date = clipped.dates()[anchor];

    let mut prices = clipped.cumulative();
    for (mut col, close) in prices.columns_mut().into_iter().zip(&closes) {
        let last = col[anchor];
        let target = close.get(&anchor_date).copied().unwrap_or(f64::NAN);
        col.mapv_inplace(|v| v * target / last);
    }

    let n = clipped.n_rows();
    let prices = PriceTable::new(clipped.dates().to_vec(), kept, prices, vec![false; n])?;
    Ok(AnchoredPrices {
        returns: clipped,
        prices,
        dropped,
    })
}

/// The next `n` weekdays strictly after `date`.
pub fn business_days_after(date: NaiveDate, n: usize) -> Vec<NaiveDate> {
    date.iter_days()
        .skip(1)
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .take(n)
        .collect()
}

/// Append forecast rows, scaling compounded growth `forecast[0, s, k]` by
/// the last observed price of each symbol.
pub fn forecast_price_rows(observed: &PriceTable, forecast: &ForecastArray) -> Result<PriceTable> {
    let (n_origins, n_symbols, n_steps) = forecast.dim();
    ensure!(
        n_origins == 1 && n_symbols == observed.symbols.len(),
        "Expected a single-origin forecast for {} symbols, got shape {:?}",
        observed.symbols.len(),
        forecast.dim()
    );
    let last_date = observed
        .last_observed_date()
        .context("No observed rows to forecast from")?;
    let last_row = observed.prices.row(observed.n_rows() - 1);

    let predicted = Array2::from_shape_fn((n_steps, n_symbols), |(k, s)| forecast[[0, s, k]] * last_row[s]);
    let mut dates = observed.dates.clone();
    dates.extend(business_days_after(last_date, n_steps));
    let mut flags = observed.is_predicted.clone();
    flags.extend(std::iter::repeat(true).take(n_steps));

    PriceTable::new(
        dates,
        observed.symbols.clone(),
        concatenate(Axis(0), &[observed.prices.view(), predicted.view()])?,
        flags,
    )
}

/// Daily retraining: clean, anchor, fit, forecast from the final row, and
/// write the artifact plus its summary.
pub fn run_training(
    cfg: &ForecastConfig,
    kind: ModelKind,
    n_steps: usize,
    extraction: Extraction,
) -> Result<TrainingSummary> {
    if extraction.histories.is_empty() {
        bail!("Training needs freshly downloaded closing prices; rerun extraction with the cache overwritten");
    }
    let cleaned = returns::clean(&extraction.returns, &cfg.excluded_symbols)?;
    let anchored = anchor_prices(&cleaned, &extraction.histories)?;
    let table = &anchored.returns;
    tracing::info!(
        "Dataset loaded with {} samples and {} symbols",
        table.n_rows(),
        table.n_symbols()
    );

    let mut model = build_model(kind, cfg, n_steps);
    tracing::info!("Fitting {} ({})", kind, model.name());
    model
        .fit(table)
        .with_context(|| format!("Failed to fit {}", kind))?;

    let n = table.n_rows();
    let forecast = model
        .predict(table, n_steps, Some(n - 1..n))
        .with_context(|| format!("Failed to forecast with {}", kind))?;
    tracing::info!(
        "Predictions made for {} days with {} symbols",
        n_steps,
        table.n_symbols()
    );

    let output = forecast_price_rows(&anchored.prices, &forecast)?;
    artifact::write_predictions(&cfg.predictions_path(), &output)?;

    let last_observed_date = table.dates()[n - 1];
    let forecast_dates = &output.dates[n..];
    let mut dropped_symbols = extraction.skipped;
    dropped_symbols.extend(anchored.dropped);
    let summary = TrainingSummary {
        trained_at: Utc::now().naive_utc(),
        model: kind.to_string(),
        n_symbols: table.n_symbols(),
        n_steps_predict: n_steps,
        n_observations: n,
        last_observed_date,
        first_forecast_date: forecast_dates.first().copied().unwrap_or(last_observed_date),
        last_forecast_date: forecast_dates.last().copied().unwrap_or(last_observed_date),
        dropped_symbols,
    };
    cache::save_json(&cfg.training_summary_path(), &summary)?;
    Ok(summary)
}
