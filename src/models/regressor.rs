use ndarray::Array2;
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::models::ModelError;

/// Single-output regressor over a dense feature matrix.
pub trait Regressor {
    /// Fit on `(x, y)`. `eval_set` is held-out data the regressor may use
    /// for monitoring or early stopping.
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[f64],
        eval_set: Option<(&Array2<f64>, &[f64])>,
    ) -> Result<(), ModelError>;

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, ModelError>;
}

/// Hyperparameters that build fresh, unfitted regressors: one per symbol.
pub trait RegressorSpec {
    type Model: Regressor;

    fn build(&self) -> Self::Model;
}

/// Convert to the smartcore matrix type.
pub(crate) fn to_dense(x: &Array2<f64>) -> Result<DenseMatrix<f64>, ModelError> {
    let rows: Vec<Vec<f64>> = x.rows().into_iter().map(|r| r.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows).map_err(|e| ModelError::Regressor(format!("{:?}", e)))
}

pub(crate) fn check_shapes(x: &Array2<f64>, y: &[f64]) -> Result<(), ModelError> {
    if x.nrows() == 0 {
        return Err(ModelError::Regressor("empty training set".into()));
    }
    if x.nrows() != y.len() {
        return Err(ModelError::Regressor(format!(
            "{} feature rows but {} targets",
            x.nrows(),
            y.len()
        )));
    }
    Ok(())
}

pub(crate) fn mean_squared_error(predicted: &[f64], actual: &[f64]) -> f64 {
    if actual.is_empty() {
        return f64::NAN;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a).powi(2))
        .sum::<f64>()
        / actual.len() as f64
}
