use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, BooleanArray, Date32Array, Float64Array};
use arrow::datatypes::{DataType, Date32Type, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use ndarray::Array2;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::data::cache;
use crate::data::models::PriceTable;
use crate::data::DataError;

pub const DATE_FIELD: &str = "Date";
pub const PREDICTED_FIELD: &str = "is_predicted";

fn schema_for(symbols: &[String]) -> Schema {
    let mut fields = vec![Field::new(DATE_FIELD, DataType::Date32, false)];
    fields.extend(
        symbols
            .iter()
            .map(|s| Field::new(s.as_str(), DataType::Float64, true)),
    );
    fields.push(Field::new(PREDICTED_FIELD, DataType::Boolean, false));
    Schema::new(fields)
}

/// Write observed and forecast prices as a single Parquet file.
pub fn write_predictions(path: &Path, table: &PriceTable) -> Result<()> {
    cache::ensure_parent(path)?;
    let schema = Arc::new(schema_for(&table.symbols));

    let dates: Vec<i32> = table
        .dates
        .iter()
        .map(|d| Date32Type::from_naive_date(*d))
        .collect();
    let mut columns: Vec<ArrayRef> = vec![Arc::new(Date32Array::from(dates))];
    for col in table.prices.columns() {
        columns.push(Arc::new(Float64Array::from(col.to_vec())));
    }
    columns.push(Arc::new(BooleanArray::from(table.is_predicted.clone())));

    let batch = RecordBatch::try_new(schema.clone(), columns).context("Failed to build record batch")?;
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;

    tracing::info!(
        "Predictions saved to {} ({} rows, {} symbols)",
        path.display(),
        table.n_rows(),
        table.symbols.len()
    );
    Ok(())
}

/// Read a prediction artifact written by [`write_predictions`].
pub fn read_predictions(path: &Path) -> Result<PriceTable> {
    if !path.exists() {
        return Err(DataError::missing(path, "run `etf-forecaster train` to produce forecasts").into());
    }
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("Invalid Parquet file {}", path.display()))?;

    let schema = builder.schema().clone();
    let symbols: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|n| n != DATE_FIELD && n != PREDICTED_FIELD)
        .collect();

    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut is_predicted: Vec<bool> = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); symbols.len()];

    for batch in builder.build()? {
        let batch = batch?;
        let date_col = batch
            .column_by_name(DATE_FIELD)
            .and_then(|c| c.as_any().downcast_ref::<Date32Array>())
            .with_context(|| format!("{} has no Date32 {} column", path.display(), DATE_FIELD))?;
        for i in 0..date_col.len() {
            let date = date_col
                .value_as_date(i)
                .with_context(|| format!("Invalid date at row {}", dates.len() + 1))?;
            dates.push(date);
        }

        let flags = batch
            .column_by_name(PREDICTED_FIELD)
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
            .with_context(|| format!("{} has no boolean {} column", path.display(), PREDICTED_FIELD))?;
        is_predicted.extend((0..flags.len()).map(|i| flags.value(i)));

        for (symbol, values) in symbols.iter().zip(columns.iter_mut()) {
            let col = batch
                .column_by_name(symbol)
                .and_then(|c| c.as_any().downcast_ref::<Float64Array>())
                .with_context(|| format!("Column {} is not Float64", symbol))?;
            values.extend((0..col.len()).map(|i| if col.is_null(i) { f64::NAN } else { col.value(i) }));
        }
    }

    let prices = Array2::from_shape_fn((dates.len(), symbols.len()), |(i, s)| columns[s][i]);
    PriceTable::new(dates, symbols, prices, is_predicted)
}
