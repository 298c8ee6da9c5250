use std::collections::HashMap;
use std::ops::Range;

use ndarray::Array3;

use crate::data::models::ReturnTable;
use crate::models::arima::{Arima, ArimaError, ArimaOrder, ArimaParams};
use crate::models::{compound, require_symbols, resolve_range, ForecastArray, ForecastModel, ModelError};

/// One ARIMA per symbol with walk-forward prediction.
///
/// Parameters are estimated once in `fit` and held fixed while predicting:
/// for each origin the model state absorbs the observed row and forecasts
/// the following `n_steps` returns.
#[derive(Debug, Clone)]
pub struct UnivariateArimas {
    order: ArimaOrder,
    models: HashMap<String, Arima>,
}

impl UnivariateArimas {
    pub fn new(order: ArimaOrder) -> Self {
        Self {
            order,
            models: HashMap::new(),
        }
    }

    pub fn models(&self) -> &HashMap<String, Arima> {
        &self.models
    }
}

fn fit_error(symbol: &str, err: ArimaError) -> ModelError {
    ModelError::Fit {
        symbol: symbol.to_string(),
        reason: err.to_string(),
    }
}

impl ForecastModel for UnivariateArimas {
    fn name(&self) -> &'static str {
        "arima"
    }

    fn fit(&mut self, train: &ReturnTable) -> Result<(), ModelError> {
        // Re-fits start from each symbol's previous parameters. A first fit
        // seeds every later symbol with the first symbol's estimate.
        let refit = train
            .symbols()
            .iter()
            .all(|s| self.models.contains_key(s));
        let mut seed: Option<ArimaParams> = None;
        let mut fitted = HashMap::with_capacity(train.n_symbols());

        for (idx, symbol) in train.symbols().iter().enumerate() {
            if refit {
                seed = self.models.get(symbol).map(|m| m.params().clone());
            }
            let series = train.column(idx).to_vec();
            let model = Arima::fit(self.order, &series, seed.as_ref())
                .map_err(|e| fit_error(symbol, e))?;
            tracing::info!(
                "Fitted ARIMA({}, {}, {}) for {}{}",
                self.order.p,
                self.order.d,
                self.order.q,
                symbol,
                if seed.is_some() { " (warm start)" } else { "" }
            );
            if seed.is_none() {
                seed = Some(model.params().clone());
            }
            fitted.insert(symbol.clone(), model);
        }

        self.models = fitted;
        Ok(())
    }

    fn predict(
        &self,
        table: &ReturnTable,
        n_steps: usize,
        range: Option<Range<usize>>,
    ) -> Result<ForecastArray, ModelError> {
        if self.models.is_empty() {
            return Err(ModelError::NotFitted);
        }
        require_symbols(table, |s| self.models.contains_key(s))?;
        let range = resolve_range(table.n_rows(), n_steps, range)?;

        let mut out = Array3::zeros((range.len(), table.n_symbols(), n_steps));
        for (s, symbol) in table.symbols().iter().enumerate() {
            let model = self
                .models
                .get(symbol)
                .ok_or_else(|| ModelError::UnknownSymbol(symbol.clone()))?;
            let series = table.column(s).to_vec();

            let mut state = model
                .filter(&series[..range.start])
                .map_err(|e| fit_error(symbol, e))?;
            for (i, origin) in range.clone().enumerate() {
                state
                    .append(series[origin])
                    .map_err(|e| fit_error(symbol, e))?;
                for (k, v) in compound(&state.forecast(n_steps)).into_iter().enumerate() {
                    out[[i, s, k]] = v;
                }
            }
        }
        Ok(out)
    }
}
