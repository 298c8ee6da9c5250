//! ARIMA(p, d, q) estimation and state-space style filtering.
//!
//! Parameters are estimated with the two-stage Hannan-Rissanen procedure:
//!
//! 1. innovations are approximated by the residuals of a long AR fit (or,
//!    when warm-started, by filtering with the previous parameters);
//! 2. the differenced series is regressed on its own lags and the lagged
//!    innovations by least squares.
//!
//! A fitted [`Arima`] is immutable. Walk-forward prediction runs through an
//! [`ArimaState`] that is extended one observation at a time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ridge term added to the normal equations, relative to their mean diagonal
const RIDGE: f64 = 1e-8;

/// Extra observations required beyond the number of estimated coefficients
const MIN_EXTRA_OBSERVATIONS: usize = 10;

/// MA shrink attempts before the MA part is dropped
const MAX_MA_SHRINKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArimaParams {
    pub constant: f64,
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
}

#[derive(Debug, Error)]
pub enum ArimaError {
    #[error("need at least {required} observations, got {actual}")]
    InsufficientData { required: usize, actual: usize },
    #[error("non-finite observation at position {0}")]
    NonFinite(usize),
    #[error("least-squares system is singular")]
    Singular,
}

#[derive(Debug, Clone)]
pub struct Arima {
    order: ArimaOrder,
    params: ArimaParams,
}

impl ArimaOrder {
    /// Order of the long autoregression used to approximate innovations
    fn long_ar_order(&self) -> usize {
        if self.q == 0 {
            0
        } else {
            2 * self.p.max(self.q)
        }
    }

    fn include_constant(&self) -> bool {
        self.d == 0
    }

    fn n_coefficients(&self) -> usize {
        self.p + self.q + usize::from(self.include_constant())
    }

    /// Smallest series length [`Arima::fit`] accepts.
    pub fn min_observations(&self) -> usize {
        self.d
            + self.long_ar_order()
            + self.p.max(self.q)
            + self.n_coefficients()
            + MIN_EXTRA_OBSERVATIONS
    }
}

impl Arima {
    pub fn from_params(order: ArimaOrder, params: ArimaParams) -> Self {
        Self { order, params }
    }

    pub fn order(&self) -> ArimaOrder {
        self.order
    }

    pub fn params(&self) -> &ArimaParams {
        &self.params
    }

    /// Estimate parameters on `data`. `warm_start` replaces the long AR
    /// stage when its dimensions match the order.
    pub fn fit(
        order: ArimaOrder,
        data: &[f64],
        warm_start: Option<&ArimaParams>,
    ) -> Result<Self, ArimaError> {
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(ArimaError::NonFinite(pos));
        }
        let required = order.min_observations();
        if data.len() < required {
            return Err(ArimaError::InsufficientData {
                required,
                actual: data.len(),
            });
        }

        let w = difference(data, order.d);
        let lags = order.p.max(order.q);

        let warm = warm_start.filter(|p| p.ar.len() == order.p && p.ma.len() == order.q);
        let (innovations, valid_from) = if order.q == 0 {
            (vec![0.0; w.len()], 0)
        } else if let Some(params) = warm {
            (css_residuals(&w, params), lags)
        } else {
            let m = order.long_ar_order();
            let long_ar = fit_autoregression(&w, m, order.include_constant())?;
            (css_residuals(&w, &long_ar), m)
        };

        let first = valid_from + lags;
        let k = order.n_coefficients();
        let mut normal = NormalEquations::new(k);
        let mut x = Vec::with_capacity(k);
        for t in first..w.len() {
            x.clear();
            if order.include_constant() {
                x.push(1.0);
            }
            x.extend((1..=order.p).map(|j| w[t - j]));
            x.extend((1..=order.q).map(|j| innovations[t - j]));
            normal.add(&x, w[t]);
        }
        let beta = normal.solve()?;

        let offset = usize::from(order.include_constant());
        let mut params = ArimaParams {
            constant: if order.include_constant() { beta[0] } else { 0.0 },
            ar: beta[offset..offset + order.p].to_vec(),
            ma: beta[offset + order.p..].to_vec(),
        };
        stabilize_ma(&w, &mut params);

        Ok(Self { order, params })
    }

    /// Run the recursion over `history` and return the resulting state.
    pub fn filter(&self, history: &[f64]) -> Result<ArimaState<'_>, ArimaError> {
        let mut state = ArimaState {
            model: self,
            levels: Vec::with_capacity(self.order.d),
            diffed: Vec::with_capacity(history.len()),
            residuals: Vec::with_capacity(history.len()),
            seen: 0,
        };
        for &obs in history {
            state.append(obs)?;
        }
        Ok(state)
    }
}

/// Filtered model state: the differenced history, its one-step innovations
/// and the last value of every differencing level.
#[derive(Debug, Clone)]
pub struct ArimaState<'a> {
    model: &'a Arima,
    levels: Vec<f64>,
    diffed: Vec<f64>,
    residuals: Vec<f64>,
    seen: usize,
}

impl ArimaState<'_> {
    pub fn observations(&self) -> usize {
        self.seen
    }

    pub fn append(&mut self, obs: f64) -> Result<(), ArimaError> {
        if !obs.is_finite() {
            return Err(ArimaError::NonFinite(self.seen));
        }
        self.seen += 1;

        let mut value = obs;
        for level in 0..self.model.order.d {
            if level == self.levels.len() {
                self.levels.push(value);
                return Ok(());
            }
            let prev = self.levels[level];
            self.levels[level] = value;
            value -= prev;
        }

        let order = self.model.order;
        let residual = if self.diffed.len() < order.p.max(order.q) {
            0.0
        } else {
            value - one_step(&self.model.params, &self.diffed, &self.residuals)
        };
        self.diffed.push(value);
        self.residuals.push(residual);
        Ok(())
    }

    /// Point forecasts for the next `steps` observations on the original scale.
    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        let params = &self.model.params;
        let mut w = tail(&self.diffed, params.ar.len());
        let mut e = tail(&self.residuals, params.ma.len());

        let mut out = Vec::with_capacity(steps);
        for _ in 0..steps {
            let next = one_step(params, &w, &e);
            w.push(next);
            e.push(0.0);
            out.push(next);
        }

        for level in (0..self.levels.len()).rev() {
            let mut last = self.levels[level];
            for v in out.iter_mut() {
                last += *v;
                *v = last;
            }
        }
        out
    }
}

fn tail(data: &[f64], n: usize) -> Vec<f64> {
    data[data.len().saturating_sub(n)..].to_vec()
}

/// One-step prediction of the next differenced value. Lags before the start
/// of `w` or `e` count as zero.
fn one_step(params: &ArimaParams, w: &[f64], e: &[f64]) -> f64 {
    let ar: f64 = params
        .ar
        .iter()
        .zip(w.iter().rev())
        .map(|(phi, v)| phi * v)
        .sum();
    let ma: f64 = params
        .ma
        .iter()
        .zip(e.iter().rev())
        .map(|(theta, v)| theta * v)
        .sum();
    params.constant + ar + ma
}

fn difference(data: &[f64], order: usize) -> Vec<f64> {
    let mut result = data.to_vec();
    for _ in 0..order {
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Conditional-sum-of-squares innovations: zero until enough lags exist.
fn css_residuals(w: &[f64], params: &ArimaParams) -> Vec<f64> {
    let lags = params.ar.len().max(params.ma.len());
    let mut residuals = Vec::with_capacity(w.len());
    for t in 0..w.len() {
        let r = if t < lags {
            0.0
        } else {
            w[t] - one_step(params, &w[..t], &residuals)
        };
        residuals.push(r);
    }
    residuals
}

/// Least-squares AR(m) fit returned as MA-free parameters.
fn fit_autoregression(w: &[f64], m: usize, constant: bool) -> Result<ArimaParams, ArimaError> {
    let k = m + usize::from(constant);
    let mut normal = NormalEquations::new(k);
    let mut x = Vec::with_capacity(k);
    for t in m..w.len() {
        x.clear();
        if constant {
            x.push(1.0);
        }
        x.extend((1..=m).map(|j| w[t - j]));
        normal.add(&x, w[t]);
    }
    let beta = normal.solve()?;
    let offset = usize::from(constant);
    Ok(ArimaParams {
        constant: if constant { beta[0] } else { 0.0 },
        ar: beta[offset..].to_vec(),
        ma: vec![],
    })
}

/// Shrink MA coefficients until the innovation recursion stays bounded.
fn stabilize_ma(w: &[f64], params: &mut ArimaParams) {
    if params.ma.is_empty() {
        return;
    }
    let scale = rms(w).max(f64::EPSILON);
    for _ in 0..MAX_MA_SHRINKS {
        let residuals = css_residuals(w, params);
        if residuals.iter().all(|r| r.is_finite()) && rms(&residuals) <= 10.0 * scale {
            return;
        }
        params.ma.iter_mut().for_each(|theta| *theta *= 0.5);
    }
    tracing::warn!("MA recursion unstable after shrinking; dropping MA terms");
    params.ma.iter_mut().for_each(|theta| *theta = 0.0);
}

fn rms(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    (data.iter().map(|v| v * v).sum::<f64>() / data.len() as f64).sqrt()
}

/// Accumulated `X'X` and `X'y`
struct NormalEquations {
    k: usize,
    xtx: Vec<f64>,
    xty: Vec<f64>,
}

impl NormalEquations {
    fn new(k: usize) -> Self {
        Self {
            k,
            xtx: vec![0.0; k * k],
            xty: vec![0.0; k],
        }
    }

    fn add(&mut self, x: &[f64], y: f64) {
        for i in 0..self.k {
            self.xty[i] += x[i] * y;
            for j in 0..=i {
                self.xtx[i * self.k + j] += x[i] * x[j];
            }
        }
    }

    /// Cholesky solve of the ridge-regularized system.
    fn solve(mut self) -> Result<Vec<f64>, ArimaError> {
        let k = self.k;
        if k == 0 {
            return Ok(vec![]);
        }
        let mean_diag = (0..k).map(|i| self.xtx[i * k + i]).sum::<f64>() / k as f64;
        let ridge = RIDGE * mean_diag.max(f64::MIN_POSITIVE);
        for i in 0..k {
            self.xtx[i * k + i] += ridge;
        }

        // Lower-triangular factor in place
        let a = &mut self.xtx;
        for j in 0..k {
            let mut diag = a[j * k + j];
            for p in 0..j {
                diag -= a[j * k + p] * a[j * k + p];
            }
            if diag <= 0.0 || !diag.is_finite() {
                return Err(ArimaError::Singular);
            }
            let diag = diag.sqrt();
            a[j * k + j] = diag;
            for i in (j + 1)..k {
                let mut v = a[i * k + j];
                for p in 0..j {
                    v -= a[i * k + p] * a[j * k + p];
                }
                a[i * k + j] = v / diag;
            }
        }

        // L z = b, then L' beta = z
        let mut z = self.xty.clone();
        for i in 0..k {
            for p in 0..i {
                z[i] -= a[i * k + p] * z[p];
            }
            z[i] /= a[i * k + i];
        }
        for i in (0..k).rev() {
            for p in (i + 1)..k {
                z[i] -= a[p * k + i] * z[p];
            }
            z[i] /= a[i * k + i];
        }
        Ok(z)
    }
}
