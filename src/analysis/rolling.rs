use serde::{Deserialize, Serialize};

/// Summary statistic computed over a trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollingStat {
    Mean,
    Std,
    Min,
    Max,
}

impl RollingStat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Std => "std",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    pub fn apply(self, window: &[f64]) -> f64 {
        match self {
            Self::Mean => mean(window),
            Self::Std => sample_std(window),
            Self::Min => window.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => window.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Compute the mean of a slice
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return f64::NAN;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Mean of the finite values; NaN when there are none
pub fn finite_mean(data: &[f64]) -> f64 {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    mean(&finite)
}

/// Sample standard deviation (n - 1 denominator); NaN below two points
pub fn sample_std(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return f64::NAN;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (data.len() - 1) as f64;
    variance.sqrt()
}

/// Median of the finite values; NaN when there are none
pub fn median(data: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Rolling statistic over a given window.
/// Element `j` covers `data[j..j + window]`, so the value for the window
/// ending at index `t` sits at `t + 1 - window`.
pub fn rolling(data: &[f64], window: usize, stat: RollingStat) -> Vec<f64> {
    if window == 0 || data.len() < window {
        return vec![];
    }
    (0..=(data.len() - window))
        .map(|i| stat.apply(&data[i..i + window]))
        .collect()
}

/// Geometric mean of `1 + r` over the window: `(prod(1 + r))^(1 / n)`
pub fn geometric_mean_growth(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return f64::NAN;
    }
    let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
    growth.powf(1.0 / returns.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_std_uses_n_minus_one() {
        let s = sample_std(&[1.0, 2.0, 3.0, 4.0]);
        assert!((s - 1.2909944487358056).abs() < 1e-12, "got {}", s);
    }

    #[test]
    fn test_rolling_alignment() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        let means = rolling(&data, 3, RollingStat::Mean);
        assert_eq!(means, vec![2.0, 3.0, 4.0]);
        let maxes = rolling(&data, 2, RollingStat::Max);
        assert_eq!(maxes, vec![2.0, 3.0, 4.0, 5.0]);
        assert!(rolling(&data, 6, RollingStat::Min).is_empty());
    }

    #[test]
    fn test_finite_mean_skips_nan_and_inf() {
        assert_eq!(finite_mean(&[1.0, f64::INFINITY, 3.0, f64::NAN]), 2.0);
        assert!(finite_mean(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_geometric_mean_of_constant_return() {
        let g = geometric_mean_growth(&[0.01; 20]);
        assert!((g - 1.01).abs() < 1e-12, "got {}", g);
    }
}
