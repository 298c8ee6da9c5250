use std::path::Path;

use anyhow::{Context, Result};

use crate::config;
use crate::data::DataError;

/// Ticker list from the `fund_symbol` column of the symbols CSV, in file
/// order with duplicates and blanks removed.
pub fn read_symbols(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(DataError::missing(
            path,
            format!(
                "provide a CSV with a `{}` column listing the ETF tickers to forecast",
                config::SYMBOLS_COLUMN
            ),
        )
        .into());
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers().context("Missing CSV headers")?.clone();
    let idx = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(config::SYMBOLS_COLUMN))
        .with_context(|| format!("No {} column in {}", config::SYMBOLS_COLUMN, path.display()))?;

    let mut symbols: Vec<String> = Vec::new();
    for result in reader.records() {
        let record = result.context("Invalid CSV row")?;
        let symbol = record.get(idx).unwrap_or("").trim();
        if !symbol.is_empty() && !symbols.iter().any(|s| s == symbol) {
            symbols.push(symbol.to_string());
        }
    }
    tracing::info!("Read {} symbols from {}", symbols.len(), path.display());
    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reads_fund_symbol_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("top_etfs.csv");
        std::fs::write(
            &path,
            "fund_long_name,fund_symbol,net_assets\nSPDR S&P 500,SPY,1\nInvesco QQQ,QQQ,2\n,,3\nDup,SPY,4\n",
        )
        .unwrap();
        assert_eq!(read_symbols(&path).unwrap(), vec!["SPY", "QQQ"]);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = read_symbols(&dir.path().join("nope.csv")).unwrap_err();
        assert!(err.downcast_ref::<DataError>().is_some());
        assert!(err.to_string().contains("fund_symbol"));
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "ticker\nSPY\n").unwrap();
        assert!(read_symbols(&path).is_err());
    }
}
