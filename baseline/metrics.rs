//! Regression metrics comparing original-scale predictions with observed yields.

use ndarray::ArrayView1;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    #[error("Cannot score an empty prediction set.")]
    Empty,
    #[error("Got {predictions} predictions for {targets} observed values.")]
    LengthMismatch { targets: usize, predictions: usize },
}

/// The four metrics reported per split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub mse: f64,
    pub r2: f64,
    /// Pearson correlation coefficient, NaN when either side is constant.
    pub pearson: f64,
}

impl RegressionMetrics {
    pub fn compute(
        y_true: ArrayView1<f64>,
        y_pred: ArrayView1<f64>,
    ) -> Result<Self, MetricError> {
        Ok(Self {
            mae: mean_absolute_error(y_true, y_pred)?,
            mse: mean_squared_error(y_true, y_pred)?,
            r2: r2_score(y_true, y_pred)?,
            pearson: pearson_r(y_true, y_pred)?,
        })
    }
}

fn check(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Result<usize, MetricError> {
    if y_true.len() != y_pred.len() {
        return Err(MetricError::LengthMismatch {
            targets: y_true.len(),
            predictions: y_pred.len(),
        });
    }
    if y_true.is_empty() {
        return Err(MetricError::Empty);
    }
    Ok(y_true.len())
}

pub fn mean_absolute_error(
    y_true: ArrayView1<f64>,
    y_pred: ArrayView1<f64>,
) -> Result<f64, MetricError> {
    let n = check(y_true, y_pred)?;
    let total: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).abs())
        .sum();
    Ok(total / n as f64)
}

pub fn mean_squared_error(
    y_true: ArrayView1<f64>,
    y_pred: ArrayView1<f64>,
) -> Result<f64, MetricError> {
    let n = check(y_true, y_pred)?;
    let total: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    Ok(total / n as f64)
}

/// Coefficient of determination. Undefined (NaN) for fewer than two samples. For a
/// constant `y_true` the score is 1.0 when the predictions are exact and 0.0 otherwise.
pub fn r2_score(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Result<f64, MetricError> {
    let n = check(y_true, y_pred)?;
    if n < 2 {
        log::warn!("R2 score is not well-defined with less than two samples; reporting NaN");
        return Ok(f64::NAN);
    }
    let mean = y_true.sum() / n as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p).powi(2))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}

/// Pearson correlation coefficient. Undefined (NaN) when either input is constant.
pub fn pearson_r(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> Result<f64, MetricError> {
    let n = check(y_true, y_pred)? as f64;
    if is_constant(y_true) || is_constant(y_pred) {
        log::warn!("Pearson correlation is undefined for a constant input; reporting NaN");
        return Ok(f64::NAN);
    }
    let mean_true = y_true.sum() / n;
    let mean_pred = y_pred.sum() / n;

    let mut covariance = 0.0;
    let mut var_true = 0.0;
    let mut var_pred = 0.0;
    for (t, p) in y_true.iter().zip(y_pred.iter()) {
        let dt = t - mean_true;
        let dp = p - mean_pred;
        covariance += dt * dp;
        var_true += dt * dt;
        var_pred += dp * dp;
    }
    let r = covariance / (var_true.sqrt() * var_pred.sqrt());
    Ok(r.clamp(-1.0, 1.0))
}

// Compared exactly: a mean over identical values need not reproduce the value itself.
fn is_constant(values: ArrayView1<f64>) -> bool {
    values.iter().all(|&v| v == values[0])
}
