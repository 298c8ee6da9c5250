use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use ndarray::Array2;

use crate::data::cache;
use crate::data::models::ReturnTable;
use crate::data::DataError;

pub const DATE_COLUMN: &str = "Date";

/// Parse date from various formats (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS, M/D/YYYY)
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            // pandas writes timestamps as "2024-01-02 00:00:00"
            s.get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        })
        .or_else(|| NaiveDate::parse_from_str(s, "%m/%d/%Y").ok())
}

/// Write the return cache: a `Date` column then one column per symbol,
/// empty cells for missing values.
pub fn write_cache(path: &Path, table: &ReturnTable) -> Result<()> {
    cache::ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header = vec![DATE_COLUMN.to_string()];
    header.extend(table.symbols().iter().cloned());
    writer.write_record(&header)?;

    for (date, row) in table.dates().iter().zip(table.values().rows()) {
        let mut record = vec![date.format("%Y-%m-%d").to_string()];
        record.extend(row.iter().map(|v| {
            if v.is_finite() {
                v.to_string()
            } else {
                String::new()
            }
        }));
        writer.write_record(&record)?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(
        "Wrote {} rows x {} symbols to {}",
        table.n_rows(),
        table.n_symbols(),
        path.display()
    );
    Ok(())
}

/// Read the return cache written by [`write_cache`]. Rows come back sorted
/// by date.
pub fn read_cache(path: &Path) -> Result<ReturnTable> {
    if !path.exists() {
        return Err(DataError::missing(path, "run `etf-forecaster extract` to download returns").into());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader.headers().context("Missing CSV headers")?.clone();
    let date_idx = headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(DATE_COLUMN))
        .with_context(|| format!("No {} column in {}", DATE_COLUMN, path.display()))?;
    let symbols: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, h)| *i != date_idx && !h.trim().is_empty())
        .map(|(i, h)| (i, h.trim().to_string()))
        .collect();

    let mut rows: Vec<(NaiveDate, Vec<f64>)> = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("Invalid CSV row {}", line + 2))?;
        let raw_date = record.get(date_idx).unwrap_or("");
        let date = parse_date(raw_date)
            .with_context(|| format!("Unparseable date {:?} on row {}", raw_date, line + 2))?;
        let values = symbols
            .iter()
            .map(|(i, symbol)| {
                let cell = record.get(*i).unwrap_or("").trim();
                if cell.is_empty() {
                    Ok(f64::NAN)
                } else {
                    cell.parse::<f64>()
                        .with_context(|| format!("Invalid {} value {:?} on {}", symbol, cell, date))
                }
            })
            .collect::<Result<Vec<f64>>>()?;
        rows.push((date, values));
    }
    rows.sort_by_key(|(d, _)| *d);

    let n_symbols = symbols.len();
    let dates: Vec<NaiveDate> = rows.iter().map(|(d, _)| *d).collect();
    let flat: Vec<f64> = rows.into_iter().flat_map(|(_, v)| v).collect();
    let values = Array2::from_shape_vec((dates.len(), n_symbols), flat)?;
    ReturnTable::new(dates, symbols.into_iter().map(|(_, s)| s).collect(), values)
        .with_context(|| format!("Invalid return cache {}", path.display()))
}

/// Outer-join per-symbol series on date. Dates a symbol lacks become `NaN`.
pub fn assemble_table(series: &[(String, Vec<(NaiveDate, f64)>)]) -> Result<ReturnTable> {
    let dates: Vec<NaiveDate> = series
        .iter()
        .flat_map(|(_, obs)| obs.iter().map(|(d, _)| *d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let row_of: HashMap<NaiveDate, usize> = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();

    let mut values = Array2::from_elem((dates.len(), series.len()), f64::NAN);
    for (s, (_, obs)) in series.iter().enumerate() {
        for (date, r) in obs {
            if let Some(&row) = row_of.get(date) {
                values[[row, s]] = *r;
            }
        }
    }
    ReturnTable::new(dates, series.iter().map(|(s, _)| s.clone()).collect(), values)
}

/// Clip to the first row where every symbol has data, drop excluded
/// symbols, and fill the remaining gaps with a zero return.
///
/// A zero return carries the last price forward; the return after the gap
/// already spans it. Symbols with no observations at all are dropped with a
/// warning.
pub fn clean(table: &ReturnTable, excluded: &[String]) -> Result<ReturnTable> {
    let first_valid = table.first_valid_rows();
    let mut keep = Vec::new();
    for (symbol, first) in table.symbols().iter().zip(&first_valid) {
        match first {
            Some(_) => keep.push(symbol.clone()),
            None => tracing::warn!("Dropping {}: no observations", symbol),
        }
    }
    if keep.is_empty() {
        bail!("No symbol in the return table has any observation");
    }

    let start = first_valid.iter().flatten().copied().max().unwrap_or(0);
    let clipped = table.slice_rows(start..table.n_rows());

    let kept: Vec<String> = keep
        .into_iter()
        .filter(|s| !excluded.contains(s))
        .collect();
    let selected = clipped.select_symbols(&kept)?;

    let mut values = selected.values().clone();
    for (symbol, mut col) in kept.iter().zip(values.columns_mut()) {
        let gaps: Vec<usize> = col
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_finite())
            .map(|(i, _)| i)
            .collect();
        if let Some(&first) = gaps.first() {
            tracing::warn!(
                "Carrying {} forward over {} missing sessions (first on {})",
                symbol,
                gaps.len(),
                selected.dates()[first]
            );
            for i in gaps {
                col[i] = 0.0;
            }
        }
    }
    let cleaned = ReturnTable::new(selected.dates().to_vec(), kept, values)?;
    tracing::info!(
        "Cleaned dataset: {} rows x {} symbols starting {}",
        cleaned.n_rows(),
        cleaned.n_symbols(),
        cleaned.dates().first().map(|d| d.to_string()).unwrap_or_default()
    );
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("2024-01-05"), Some(day(5)));
        assert_eq!(parse_date("2024-01-05 00:00:00"), Some(day(5)));
        assert_eq!(parse_date("1/5/2024"), Some(day(5)));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_cache_round_trip_keeps_missing_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etl/returns.csv");
        let table = ReturnTable::new(
            vec![day(2), day(3), day(4)],
            vec!["SPY".into(), "QQQ".into()],
            array![[f64::NAN, 0.01], [0.02, -0.01], [0.0, 0.5]],
        )
        .unwrap();
        write_cache(&path, &table).unwrap();

        let back = read_cache(&path).unwrap();
        assert_eq!(back.dates(), table.dates());
        assert_eq!(back.symbols(), table.symbols());
        assert!(back.values()[[0, 0]].is_nan());
        assert_eq!(back.values()[[1, 0]], 0.02);
        assert_eq!(back.values()[[2, 1]], 0.5);
    }

    #[test]
    fn test_missing_cache_names_remediation() {
        let dir = tempdir().unwrap();
        let err = read_cache(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DataError>(),
            Some(DataError::MissingInput { .. })
        ));
        assert!(err.to_string().contains("extract"));
    }

    #[test]
    fn test_assemble_fills_gaps_with_nan() {
        let table = assemble_table(&[
            ("A".into(), vec![(day(3), 0.1), (day(4), 0.2)]),
            ("B".into(), vec![(day(2), 0.3), (day(4), 0.4)]),
        ])
        .unwrap();
        assert_eq!(table.dates(), &[day(2), day(3), day(4)]);
        assert!(table.values()[[0, 0]].is_nan());
        assert!(table.values()[[1, 1]].is_nan());
        assert_eq!(table.values()[[2, 1]], 0.4);
    }

    #[test]
    fn test_clean_clips_to_latest_start_and_drops_excluded() {
        let nan = f64::NAN;
        let table = ReturnTable::new(
            vec![day(2), day(3), day(4), day(5)],
            vec!["SPY".into(), "LATE".into(), "RGI".into(), "EMPTY".into()],
            array![
                [0.1, nan, nan, nan],
                [0.2, 0.1, nan, nan],
                [0.3, 0.2, nan, nan],
                [0.4, 0.3, 0.1, nan]
            ],
        )
        .unwrap();
        let cleaned = clean(&table, &["RGI".to_string()]).unwrap();
        // RGI still drives the clip before it is dropped
        assert_eq!(cleaned.dates(), &[day(5)]);
        assert_eq!(cleaned.symbols(), &["SPY".to_string(), "LATE".to_string()]);
    }

    #[test]
    fn test_clean_carries_price_over_interior_gap() {
        use crate::data::yahoo::returns_from_closes;

        let spy = returns_from_closes(&[
            (day(2), Some(100.0)),
            (day(3), Some(101.0)),
            (day(5), Some(99.0)),
            (day(8), Some(102.0)),
        ]);
        let qqq = returns_from_closes(&[
            (day(2), Some(400.0)),
            (day(3), Some(404.0)),
            (day(4), Some(408.0)),
            (day(5), Some(402.0)),
            (day(8), Some(410.0)),
        ]);
        let table = assemble_table(&[("SPY".into(), spy), ("QQQ".into(), qqq)]).unwrap();
        assert!(table.values()[[1, 0]].is_nan());

        let cleaned = clean(&table, &[]).unwrap();
        assert_eq!(cleaned.dates(), &[day(3), day(4), day(5), day(8)]);
        assert_eq!(cleaned.symbols(), &["SPY".to_string(), "QQQ".to_string()]);
        assert!(cleaned.values().iter().all(|v| v.is_finite()));
        assert_eq!(cleaned.values()[[1, 0]], 0.0);

        // compounding still lands on the last close
        let growth = cleaned.cumulative();
        assert!((growth[[3, 0]] * 100.0 - 102.0).abs() < 1e-9);
        assert!((growth[[3, 1]] * 400.0 - 410.0).abs() < 1e-9);
    }
}
