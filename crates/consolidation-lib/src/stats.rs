//! Statistics over utilization histories
//!
//! Descriptive statistics, robust spread estimators (MAD, IQR), local
//! regression (LOESS) trend estimates and least-squares fits used by the
//! overload detectors and correlation-based selection.
//!
//! Percentiles follow the `(n + 1)`-position interpolation convention, and
//! the quartile indices of [`iqr`] are rounded rather than interpolated.

use crate::error::StatsError;
use std::cmp::Ordering;

/// Fewest points a two-parameter regression accepts
const MIN_REGRESSION_POINTS: usize = 3;

/// Share of zero weights above which the weighted fit rescales its inputs
const ZERO_WEIGHT_SHARE: f64 = 0.4;

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean(values);
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (values.len() - 1) as f64
}

/// Percentile `p` in (0, 100] with interpolation at position `p (n + 1) / 100`
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted(values);
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = p * (n as f64 + 1.0) / 100.0;
    let floor = pos.floor();
    let dif = pos - floor;
    if pos < 1.0 {
        return sorted[0];
    }
    if pos >= n as f64 {
        return sorted[n - 1];
    }
    let lower = sorted[floor as usize - 1];
    let upper = sorted[floor as usize];
    lower + dif * (upper - lower)
}

pub fn median(values: &[f64]) -> f64 {
    percentile(values, 50.0)
}

/// Median absolute deviation from the median. Zero for empty input.
pub fn mad(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let center = median(values);
    let deviations: Vec<f64> = values.iter().map(|v| (center - v).abs()).collect();
    median(&deviations)
}

/// Inter-quartile range using rounded quartile positions
pub fn iqr(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let n = sorted.len() as f64;
    let q1 = ((0.25 * (n + 1.0)).round() as usize).saturating_sub(1);
    let q3 = ((0.75 * (n + 1.0)).round() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[q3] - sorted[q1]
}

/// Length of `values` once trailing zeros are trimmed.
///
/// Histories are newest first, so trailing zeros are the oldest samples,
/// recorded before the guest had any load.
pub fn count_non_zero_beginning(values: &[f64]) -> usize {
    values
        .iter()
        .rposition(|v| *v != 0.0)
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// Pearson correlation over the common prefix of `a` and `b`
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let (a, b) = (&a[..n], &b[..n]);
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for i in 0..n {
        let da = a[i] - ma;
        let db = b[i] - mb;
        cov += da * db;
        va += da * da;
        vb += db * db;
    }
    cov / (va.sqrt() * vb.sqrt())
}

/// Result of a straight-line least-squares fit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub intercept: f64,
    pub slope: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Ordinary least squares of `y` on `x` with an intercept
pub fn simple_regression(x: &[f64], y: &[f64]) -> Result<LinearFit, StatsError> {
    let n = x.len().min(y.len());
    if n < MIN_REGRESSION_POINTS {
        return Err(StatsError::InsufficientData {
            needed: MIN_REGRESSION_POINTS,
            got: n,
        });
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    let syy: f64 = y.iter().map(|v| (v - my).powi(2)).sum();
    let sxy: f64 = x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum();
    if sxx.abs() < f64::EPSILON || !sxx.is_finite() {
        return Err(StatsError::Degenerate);
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let r_squared = if syy.abs() < f64::EPSILON {
        1.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(StatsError::Degenerate);
    }
    Ok(LinearFit {
        intercept,
        slope,
        r_squared,
    })
}

/// Weighted straight-line fit.
///
/// Inputs are scaled by `sqrt(weight)` only when at least 40% of the weights
/// are zero; otherwise the weights do not alter the fit.
pub fn weighted_regression(x: &[f64], y: &[f64], weights: &[f64]) -> Result<LinearFit, StatsError> {
    let zero_weights = weights.iter().filter(|w| **w <= 0.0).count();
    if zero_weights as f64 >= ZERO_WEIGHT_SHARE * weights.len() as f64 && !weights.is_empty() {
        let xw: Vec<f64> = x.iter().zip(weights).map(|(v, w)| w.sqrt() * v).collect();
        let yw: Vec<f64> = y.iter().zip(weights).map(|(v, w)| w.sqrt() * v).collect();
        simple_regression(&xw, &yw)
    } else {
        simple_regression(x, y)
    }
}

/// Inverse tricube weights over `n` evenly spaced points.
///
/// The first three weights are equal.
pub fn tricube_weights(n: usize) -> Vec<f64> {
    let mut weights = vec![0.0; n];
    if n < 3 {
        return weights;
    }
    let top = (n - 1) as f64;
    let spread = top;
    for (i, w) in weights.iter_mut().enumerate().skip(2) {
        let k = (1.0 - ((top - i as f64) / spread).powi(3)).powi(3);
        *w = if k > 0.0 { 1.0 / k } else { f64::MAX };
    }
    weights[0] = weights[2];
    weights[1] = weights[2];
    weights
}

/// Tricube weights combined with bisquare weights of the residuals
pub fn tricube_bisquare_weights(residuals: &[f64]) -> Vec<f64> {
    let n = residuals.len();
    let tricube = tricube_weights(n);
    let mut weights = vec![0.0; n];
    if n < 3 {
        return weights;
    }
    let abs: Vec<f64> = residuals.iter().map(|r| r.abs()).collect();
    let s6 = median(&abs) * 6.0;
    for i in 2..n {
        let k = (1.0 - (residuals[i] / s6).powi(2)).powi(2);
        weights[i] = if k > 0.0 { (1.0 / k) * tricube[i] } else { f64::MAX };
    }
    weights[0] = weights[2];
    weights[1] = weights[2];
    weights
}

fn unit_positions(n: usize) -> Vec<f64> {
    (1..=n).map(|i| i as f64).collect()
}

/// LOESS trend of `y` sampled at x = 1..=n; returns `(intercept, slope)`
pub fn loess_estimates(y: &[f64]) -> Result<(f64, f64), StatsError> {
    let x = unit_positions(y.len());
    let fit = weighted_regression(&x, y, &tricube_weights(y.len()))?;
    Ok((fit.intercept, fit.slope))
}

/// Robust LOESS: a second pass reweighted by the residuals of the first.
///
/// Falls back to the first-pass estimate when the second pass is degenerate.
pub fn robust_loess_estimates(y: &[f64]) -> Result<(f64, f64), StatsError> {
    let x = unit_positions(y.len());
    let first = weighted_regression(&x, y, &tricube_weights(y.len()))?;
    let residuals: Vec<f64> = x.iter().zip(y).map(|(xi, yi)| yi - first.predict(*xi)).collect();
    match weighted_regression(&x, y, &tricube_bisquare_weights(&residuals)) {
        Ok(fit) if !fit.intercept.is_nan() && !fit.slope.is_nan() => Ok((fit.intercept, fit.slope)),
        _ => Ok((first.intercept, first.slope)),
    }
}

/// Coefficient of determination of an OLS fit of `y` on `columns` (with an
/// intercept), solved through the normal equations.
pub fn multiple_regression_r_squared(y: &[f64], columns: &[Vec<f64>]) -> Result<f64, StatsError> {
    let n = y.len();
    let p = columns.len() + 1;
    if columns.is_empty() || columns.iter().any(|c| c.len() != n) {
        return Err(StatsError::Degenerate);
    }
    if n <= p {
        return Err(StatsError::InsufficientData { needed: p + 1, got: n });
    }

    let row = |i: usize| -> Vec<f64> {
        let mut r = Vec::with_capacity(p);
        r.push(1.0);
        r.extend(columns.iter().map(|c| c[i]));
        r
    };

    // Augmented system [XᵀX | Xᵀy]
    let mut system = vec![vec![0.0; p + 1]; p];
    for i in 0..n {
        let r = row(i);
        for a in 0..p {
            for b in 0..p {
                system[a][b] += r[a] * r[b];
            }
            system[a][p] += r[a] * y[i];
        }
    }
    let beta = solve(system)?;

    let my = mean(y);
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..n {
        let predicted: f64 = row(i).iter().zip(&beta).map(|(a, b)| a * b).sum();
        ss_res += (y[i] - predicted).powi(2);
        ss_tot += (y[i] - my).powi(2);
    }
    if ss_tot.abs() < f64::EPSILON {
        return Err(StatsError::Degenerate);
    }
    let r_squared = 1.0 - ss_res / ss_tot;
    if r_squared.is_finite() {
        Ok(r_squared)
    } else {
        Err(StatsError::Degenerate)
    }
}

/// Gaussian elimination with partial pivoting on an augmented matrix
fn solve(mut m: Vec<Vec<f64>>) -> Result<Vec<f64>, StatsError> {
    let p = m.len();
    let scale = m
        .iter()
        .flat_map(|r| r[..p].iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    for col in 0..p {
        let pivot = (col..p)
            .max_by(|a, b| {
                m[*a][col]
                    .abs()
                    .partial_cmp(&m[*b][col].abs())
                    .unwrap_or(Ordering::Equal)
            })
            .unwrap_or(col);
        if m[pivot][col].abs() < 1e-10 * scale {
            return Err(StatsError::Degenerate);
        }
        m.swap(col, pivot);
        for r in col + 1..p {
            let factor = m[r][col] / m[col][col];
            for c in col..=p {
                m[r][c] -= factor * m[col][c];
            }
        }
    }
    let mut beta = vec![0.0; p];
    for r in (0..p).rev() {
        let tail: f64 = (r + 1..p).map(|c| m[r][c] * beta[c]).sum();
        beta[r] = (m[r][p] - tail) / m[r][r];
    }
    Ok(beta)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: [f64; 12] = [10.0, 12.0, 9.0, 11.0, 50.0, 10.0, 11.0, 9.0, 12.0, 10.0, 11.0, 12.0];

    #[test]
    fn test_median_interpolates() {
        assert_eq!(median(&REFERENCE), 11.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[7.0]), 7.0);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_mad_reference_values() {
        assert!((mad(&REFERENCE) - 1.0).abs() < 1e-12);
        assert_eq!(mad(&[]), 0.0);
    }

    #[test]
    fn test_iqr_reference_values() {
        assert!((iqr(&REFERENCE) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_calculation() {
        let v = variance(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((v - 32.0 / 7.0).abs() < 1e-12);
        assert_eq!(variance(&[1.0]), 0.0);
    }

    #[test]
    fn test_count_non_zero_beginning() {
        assert_eq!(count_non_zero_beginning(&[0.5, 0.4, 0.0, 0.3, 0.0, 0.0]), 4);
        assert_eq!(count_non_zero_beginning(&[0.0, 0.0]), 0);
        assert_eq!(count_non_zero_beginning(&[]), 0);
        assert_eq!(count_non_zero_beginning(&[0.1; 5]), 5);
    }

    #[test]
    fn test_simple_regression_exact_line() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = simple_regression(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_simple_regression_rejects_constant_x() {
        let err = simple_regression(&[2.0; 5], &[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap_err();
        assert_eq!(err, StatsError::Degenerate);
        assert!(matches!(
            simple_regression(&[1.0, 2.0], &[1.0, 2.0]),
            Err(StatsError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_tricube_weights_shape() {
        let w = tricube_weights(10);
        assert_eq!(w.len(), 10);
        assert_eq!(w[0], w[2]);
        assert_eq!(w[1], w[2]);
        assert!((w[9] - 1.0).abs() < 1e-12);
        // Inverse weights shrink towards the newest point
        assert!(w[3] > w[8]);
    }

    #[test]
    fn test_loess_recovers_linear_trend() {
        let y: Vec<f64> = (1..=10).map(|i| 0.1 + 0.05 * i as f64).collect();
        let (intercept, slope) = loess_estimates(&y).unwrap();
        assert!((intercept - 0.1).abs() < 1e-9);
        assert!((slope - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_robust_loess_handles_flat_series() {
        let y = [0.5; 10];
        let (intercept, slope) = robust_loess_estimates(&y).unwrap();
        assert!((intercept - 0.5).abs() < 1e-9);
        assert!(slope.abs() < 1e-9);
    }

    #[test]
    fn test_correlation() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0, 100.0];
        assert!((correlation(&a, &b) - 1.0).abs() < 1e-12);
        assert!(correlation(&[1.0, 1.0, 1.0], &a).is_nan());
    }

    #[test]
    fn test_multiple_regression_r_squared() {
        let x1 = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let x2 = vec![2.0, 1.0, 4.0, 3.0, 6.0, 5.0];
        let y: Vec<f64> = x1.iter().zip(&x2).map(|(a, b)| 1.0 + 2.0 * a - b).collect();
        let r2 = multiple_regression_r_squared(&y, &[x1, x2]).unwrap();
        assert!((r2 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_multiple_regression_degenerate_inputs() {
        let x = vec![1.0, 1.0, 1.0, 1.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            multiple_regression_r_squared(&y, &[x]),
            Err(StatsError::Degenerate)
        );
        assert!(multiple_regression_r_squared(&[1.0, 2.0], &[vec![1.0, 2.0]]).is_err());
        assert!(multiple_regression_r_squared(&y, &[]).is_err());
    }
}
