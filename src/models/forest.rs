use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::models::regressor::{check_shapes, mean_squared_error, to_dense, Regressor, RegressorSpec};
use crate::models::ModelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<u16>,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: Some(10),
            min_samples_leaf: 1,
            min_samples_split: 2,
        }
    }
}

impl RegressorSpec for ForestParams {
    type Model = RandomForest;

    fn build(&self) -> RandomForest {
        RandomForest {
            params: self.clone(),
            model: None,
        }
    }
}

/// Bagged regression trees (smartcore random forest)
#[derive(Debug)]
pub struct RandomForest {
    params: ForestParams,
    model: Option<RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>>,
}

impl Regressor for RandomForest {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        eval_set: Option<(&Array2<f64>, &[f64])>,
    ) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let mut parameters = RandomForestRegressorParameters::default()
            .with_n_trees(self.params.n_trees)
            .with_min_samples_leaf(self.params.min_samples_leaf)
            .with_min_samples_split(self.params.min_samples_split);
        if let Some(depth) = self.params.max_depth {
            parameters = parameters.with_max_depth(depth);
        }

        let model = RandomForestRegressor::fit(&to_dense(x)?, &y.to_vec(), parameters)
            .map_err(|e| ModelError::Regressor(format!("{:?}", e)))?;
        self.model = Some(model);

        if let Some((ex, ey)) = eval_set.filter(|(ex, _)| ex.nrows() > 0) {
            let predicted = self.predict(ex)?;
            tracing::debug!(valid_mse = mean_squared_error(&predicted, ey), "Random forest validation");
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        let model = self.model.as_ref().ok_or(ModelError::NotFitted)?;
        model
            .predict(&to_dense(x)?)
            .map_err(|e| ModelError::Regressor(format!("{:?}", e)))
    }
}
