use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use serde::Deserialize;

use crate::config;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Daily adjusted closes of one ticker, sorted by date. `None` marks a
/// session the API listed without a usable close.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceHistory {
    pub symbol: String,
    pub closes: Vec<(NaiveDate, Option<f64>)>,
}

impl PriceHistory {
    /// `adj_close[t] / adj_close[t - 1] - 1`, dated at `t`.
    pub fn returns(&self) -> Vec<(NaiveDate, f64)> {
        returns_from_closes(&self.closes)
    }

    /// Sessions that carry a close.
    pub fn valid_closes(&self) -> impl Iterator<Item = (NaiveDate, f64)> + '_ {
        self.closes.iter().filter_map(|(d, c)| c.map(|c| (*d, c)))
    }
}

/// Returns against the last available close. A session without a close
/// yields `NaN` and the next close is compared with the one before the gap.
pub fn returns_from_closes(closes: &[(NaiveDate, Option<f64>)]) -> Vec<(NaiveDate, f64)> {
    let mut out = Vec::with_capacity(closes.len());
    let mut last: Option<f64> = None;
    for (date, close) in closes {
        match (close, last) {
            (Some(c), Some(prev)) => {
                out.push((*date, c / prev - 1.0));
                last = Some(*c);
            }
            (Some(c), None) => last = Some(*c),
            (None, _) => out.push((*date, f64::NAN)),
        }
    }
    out
}

/// Extract adjusted closes from a chart API payload. Falls back to the raw
/// close when the payload carries no adjusted series. Missing or
/// non-positive values become `None`.
fn parse_chart(text: &str) -> Result<Vec<(NaiveDate, Option<f64>)>> {
    let response: ChartResponse =
        serde_json::from_str(text).context("Failed to parse chart response")?;
    if let Some(error) = response.chart.error {
        bail!("Yahoo API error: {} - {}", error.code, error.description);
    }
    let data = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .context("No data in response")?;

    let closes = match data.indicators.adjclose.into_iter().next() {
        Some(adj) => adj.adjclose,
        None => data
            .indicators
            .quote
            .into_iter()
            .next()
            .map(|q| q.close)
            .unwrap_or_default(),
    };

    // keyed by date so repeated intraday stamps for the last session collapse
    let mut by_date = BTreeMap::new();
    for (ts, close) in data.timestamp.iter().zip(closes) {
        let Some(date) = DateTime::from_timestamp(*ts, 0) else {
            continue;
        };
        let close = close.filter(|c| c.is_finite() && *c > 0.0);
        match by_date.get(&date.date_naive()) {
            Some(Some(_)) if close.is_none() => {}
            _ => {
                by_date.insert(date.date_naive(), close);
            }
        }
    }
    Ok(by_date.into_iter().collect())
}

/// Client for the Yahoo Finance chart API.
pub struct YahooClient {
    base_url: String,
    client: reqwest::Client,
}

impl YahooClient {
    pub fn new() -> Result<Self> {
        Ok(Self {
            base_url: config::YAHOO_CHART_URL.to_string(),
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0")
                .build()
                .context("Failed to build HTTP client")?,
        })
    }

    /// Full daily adjusted-close history of `symbol`.
    pub async fn fetch_adj_closes(&self, symbol: &str) -> Result<Vec<(NaiveDate, Option<f64>)>> {
        let url = format!(
            "{}/{}?range={}&interval=1d&events=div%2Csplit",
            self.base_url,
            symbol,
            config::YAHOO_HISTORY_RANGE
        );
        tracing::debug!("Fetching {}", url);
        let text = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Request for {} failed", symbol))?
            .text()
            .await
            .with_context(|| format!("Failed to read response for {}", symbol))?;
        parse_chart(&text).with_context(|| format!("No price history for {}", symbol))
    }

    /// Download every symbol one after another. Symbols the API has no data
    /// for are skipped with a warning; transport failures abort.
    pub async fn fetch_histories(&self, symbols: &[String]) -> Result<(Vec<PriceHistory>, Vec<String>)> {
        let mut histories = Vec::with_capacity(symbols.len());
        let mut skipped = Vec::new();
        for (i, symbol) in symbols.iter().enumerate() {
            tracing::info!("Downloading {} ({}/{})", symbol, i + 1, symbols.len());
            match self.fetch_adj_closes(symbol).await {
                Ok(closes) if closes.iter().filter(|(_, c)| c.is_some()).count() >= 2 => {
                    let gaps = closes.iter().filter(|(_, c)| c.is_none()).count();
                    if gaps > 0 {
                        tracing::warn!("{} has {} sessions without a close", symbol, gaps);
                    }
                    histories.push(PriceHistory {
                        symbol: symbol.clone(),
                        closes,
                    })
                }
                Ok(_) => {
                    tracing::warn!("Skipping {}: fewer than two closes", symbol);
                    skipped.push(symbol.clone());
                }
                Err(e) if e.chain().any(|c| c.is::<reqwest::Error>()) => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping {}: {:#}", symbol, e);
                    skipped.push(symbol.clone());
                }
            }
        }
        Ok((histories, skipped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    const CHART: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "SPY"},
                "timestamp": [1704205800, 1704292200, 1704378600, 1704465000],
                "indicators": {
                    "quote": [{"close": [472.6, 468.8, null, 467.9]}],
                    "adjclose": [{"adjclose": [100.0, 110.0, null, 99.0]}]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_prefers_adjusted_close() {
        let closes = parse_chart(CHART).unwrap();
        assert_eq!(
            closes,
            vec![(day(2), Some(100.0)), (day(3), Some(110.0)), (day(4), None), (day(5), Some(99.0))]
        );
    }

    #[test]
    fn test_parse_chart_api_error() {
        let text = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(text).unwrap_err().to_string();
        assert!(err.contains("Not Found"));
    }

    #[test]
    fn test_returns_mark_null_close_as_gap() {
        let closes = parse_chart(CHART).unwrap();
        let returns = returns_from_closes(&closes);
        assert_eq!(returns.iter().map(|(d, _)| *d).collect::<Vec<_>>(), vec![day(3), day(4), day(5)]);
        assert!((returns[0].1 - 0.1).abs() < 1e-12);
        assert!(returns[1].1.is_nan());
        // 99 against the 110 before the gap
        assert!((returns[2].1 + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_leading_gap_yields_nan_without_return() {
        let closes = vec![(day(2), None), (day(3), Some(50.0)), (day(4), Some(55.0))];
        let returns = returns_from_closes(&closes);
        assert_eq!(returns.len(), 2);
        assert!(returns[0].1.is_nan());
        assert_eq!(returns[1].0, day(4));
        assert!((returns[1].1 - 0.1).abs() < 1e-12);
    }
}
