use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};

use crate::models::regressor::{check_shapes, mean_squared_error, to_dense, Regressor, RegressorSpec};
use crate::models::ModelError;

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Gradient boosting hyperparameters (squared loss)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingParams {
    /// Maximum number of trees
    pub n_rounds: usize,
    /// Shrinkage applied to every tree
    pub learning_rate: f64,
    pub max_depth: u16,
    pub min_samples_leaf: usize,
    /// Fraction of rows drawn (without replacement) for each tree
    pub subsample: f64,
    /// Stop when the validation error has not improved for this many rounds
    pub early_stopping_rounds: Option<usize>,
    pub seed: u64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.01,
            max_depth: 3,
            min_samples_leaf: 20,
            subsample: 1.0,
            early_stopping_rounds: Some(10),
            seed: 42,
        }
    }
}

impl RegressorSpec for BoostingParams {
    type Model = GradientBoostedTrees;

    fn build(&self) -> GradientBoostedTrees {
        GradientBoostedTrees::new(self.clone())
    }
}

/// Additive ensemble of shallow regression trees, each fitted to the
/// residuals of the ensemble before it.
#[derive(Debug)]
pub struct GradientBoostedTrees {
    params: BoostingParams,
    base_score: f64,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.params.max_depth)
            .with_min_samples_leaf(self.params.min_samples_leaf)
    }
}

fn smartcore_error(e: smartcore::error::Failed) -> ModelError {
    ModelError::Regressor(format!("{:?}", e))
}

impl Regressor for GradientBoostedTrees {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        eval_set: Option<(&Array2<f64>, &[f64])>,
    ) -> Result<(), ModelError> {
        check_shapes(x, y)?;
        let n = y.len();
        let lr = self.params.learning_rate;

        self.base_score = y.iter().sum::<f64>() / n as f64;
        self.trees.clear();

        let x_dense = to_dense(x)?;
        let mut fitted = vec![self.base_score; n];

        let eval = match eval_set {
            Some((ex, ey)) if ex.nrows() > 0 => {
                check_shapes(ex, ey)?;
                Some((to_dense(ex)?, ey))
            }
            _ => None,
        };
        let mut eval_fitted = eval
            .as_ref()
            .map(|(_, ey)| vec![self.base_score; ey.len()])
            .unwrap_or_default();

        let n_sample = ((n as f64 * self.params.subsample).round() as usize).clamp(1, n);
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let tree_params = self.tree_parameters();

        let mut best_error = f64::INFINITY;
        let mut best_rounds = 0;
        let mut stale_rounds = 0;

        for round in 0..self.params.n_rounds {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();

            let tree = if n_sample < n {
                let rows = rand::seq::index::sample(&mut rng, n, n_sample).into_vec();
                let xs = to_dense(&x.select(Axis(0), &rows))?;
                let rs: Vec<f64> = rows.iter().map(|&i| residuals[i]).collect();
                Tree::fit(&xs, &rs, tree_params.clone())
            } else {
                Tree::fit(&x_dense, &residuals, tree_params.clone())
            }
            .map_err(smartcore_error)?;

            let update = tree.predict(&x_dense).map_err(smartcore_error)?;
            for (f, u) in fitted.iter_mut().zip(&update) {
                *f += lr * u;
            }

            if let Some((ex, ey)) = eval.as_ref() {
                let update = tree.predict(ex).map_err(smartcore_error)?;
                for (f, u) in eval_fitted.iter_mut().zip(&update) {
                    *f += lr * u;
                }
                let error = mean_squared_error(&eval_fitted, ey);
                tracing::debug!(round, train_mse = mean_squared_error(&fitted, y), valid_mse = error);

                self.trees.push(tree);
                if error < best_error {
                    best_error = error;
                    best_rounds = self.trees.len();
                    stale_rounds = 0;
                } else {
                    stale_rounds += 1;
                    if self.params.early_stopping_rounds.is_some_and(|p| stale_rounds >= p) {
                        tracing::debug!("Early stopping after {} rounds (best {})", round + 1, best_rounds);
                        break;
                    }
                }
            } else {
                self.trees.push(tree);
            }
        }

        if eval.is_some() && best_rounds > 0 {
            self.trees.truncate(best_rounds);
        }
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }
        let x_dense = to_dense(x)?;
        let mut out = vec![self.base_score; x.nrows()];
        for tree in &self.trees {
            let update = tree.predict(&x_dense).map_err(smartcore_error)?;
            for (o, u) in out.iter_mut().zip(&update) {
                *o += self.params.learning_rate * u;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data(n: usize) -> (Array2<f64>, Vec<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 / n as f64 } else { 0.5 });
        let y = (0..n).map(|i| if i < n / 2 { -1.0 } else { 1.0 }).collect();
        (x, y)
    }

    fn fast_params() -> BoostingParams {
        BoostingParams {
            n_rounds: 50,
            learning_rate: 0.3,
            max_depth: 2,
            min_samples_leaf: 1,
            ..BoostingParams::default()
        }
    }

    #[test]
    fn test_fits_step_function() {
        let (x, y) = step_data(200);
        let mut model = fast_params().build();
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.n_trees(), 50);
        let pred = model.predict(&x).unwrap();
        let mse = mean_squared_error(&pred, &y);
        assert!(mse < 0.01, "Boosting should fit a step function, mse = {}", mse);
    }

    #[test]
    fn test_early_stopping_truncates() {
        let (x, y) = step_data(200);
        // Validation targets are pure noise around zero, so extra rounds stop helping
        let valid_y: Vec<f64> = (0..200).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        let mut model = BoostingParams {
            early_stopping_rounds: Some(3),
            ..fast_params()
        }
        .build();
        model.fit(&x, &y, Some((&x, &valid_y))).unwrap();
        assert!(model.n_trees() < 50, "expected early stop, got {} trees", model.n_trees());
    }

    #[test]
    fn test_subsampling_still_fits() {
        let (x, y) = step_data(200);
        let mut model = BoostingParams {
            subsample: 0.5,
            ..fast_params()
        }
        .build();
        model.fit(&x, &y, None).unwrap();
        let mse = mean_squared_error(&model.predict(&x).unwrap(), &y);
        assert!(mse < 0.05, "mse = {}", mse);
    }

    #[test]
    fn test_predict_before_fit() {
        let (x, _) = step_data(10);
        assert!(matches!(fast_params().build().predict(&x), Err(ModelError::NotFitted)));
    }
}
