//! # Cross-Validated Lasso
//!
//! L1-regularised least squares with the regularisation strength chosen by internal
//! K-fold cross-validation, the capability the baseline fits once per split.
//!
//! The objective for a fixed `alpha` is
//!
//! ```text
//! (1 / (2n)) * ||y - Xw - b||^2 + alpha * ||w||_1
//! ```
//!
//! and is minimised by cyclic coordinate descent with soft-thresholding. The search:
//!
//! 1.  **Alpha grid:** `alpha_max = max_j |x_j . y| / n` is the smallest alpha for
//!     which every coefficient is zero. The grid holds `n_alphas` values spaced
//!     geometrically from `alpha_max` down to `alpha_max * eps`, computed once on the
//!     full training data.
//!
//! 2.  **Internal CV:** the rows are cut into `cv_folds` contiguous folds. For every
//!     fold the whole path is fitted on the remaining rows (warm-started from the
//!     previous alpha) and the held-out mean squared error is recorded per alpha.
//!
//! 3.  **Refit:** the alpha with the lowest fold-averaged error is refitted on all rows.
//!
//! Folds are fitted in parallel and collected in fold order, so the result does not
//! depend on scheduling.

use crate::config::ConfigurationError;
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Alphas at or below this are indistinguishable from zero regularisation.
const ALPHA_RESOLUTION: f64 = 1e-15;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Design matrix has {rows} rows but the target vector has {targets} entries.")]
    ShapeMismatch { rows: usize, targets: usize },
    #[error(
        "Cannot run {folds}-fold cross-validation on {samples} samples; at least one sample per fold is required."
    )]
    TooFewSamples { samples: usize, folds: usize },
    #[error("Non-finite values (NaN or Infinity) reached the regression fit in the {0}.")]
    NonFiniteInput(&'static str),
    #[error("Model has {expected} coefficients but the prediction matrix has {found} columns.")]
    WidthMismatch { expected: usize, found: usize },
    #[error("Invalid lasso settings: {0}")]
    InvalidSettings(String),
}

/// Settings of the cross-validated lasso.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LassoCvConfig {
    /// Number of candidate regularisation strengths on the path.
    pub n_alphas: usize,
    /// Ratio between the smallest and the largest alpha on the path.
    pub eps: f64,
    /// Number of internal cross-validation folds.
    pub cv_folds: usize,
    /// Maximum number of coordinate descent sweeps per alpha.
    pub max_iter: usize,
    /// Convergence tolerance, relative to `||y||^2` for the duality gap.
    pub tol: f64,
    pub fit_intercept: bool,
}

impl Default for LassoCvConfig {
    fn default() -> Self {
        Self {
            n_alphas: 40,
            eps: 1e-3,
            cv_folds: 5,
            max_iter: 1000,
            tol: 1e-4,
            fit_intercept: true,
        }
    }
}

impl LassoCvConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.n_alphas == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "model.n_alphas must be at least 1".to_string(),
            ));
        }
        if !(self.eps > 0.0 && self.eps < 1.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "model.eps must lie in (0, 1), got {}",
                self.eps
            )));
        }
        if self.cv_folds < 2 {
            return Err(ConfigurationError::InvalidSetting(format!(
                "model.cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if self.max_iter == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "model.max_iter must be at least 1".to_string(),
            ));
        }
        if !(self.tol > 0.0) {
            return Err(ConfigurationError::InvalidSetting(format!(
                "model.tol must be positive, got {}",
                self.tol
            )));
        }
        Ok(())
    }
}

/// A fitted linear model `y = Xw + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    pub coefficients: Array1<f64>,
    pub intercept: f64,
    /// Regularisation strength the model was fitted with.
    pub alpha: f64,
}

impl LinearModel {
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>, FitError> {
        if x.ncols() != self.coefficients.len() {
            return Err(FitError::WidthMismatch {
                expected: self.coefficients.len(),
                found: x.ncols(),
            });
        }
        Ok(x.dot(&self.coefficients) + self.intercept)
    }

    /// Number of coefficients the L1 penalty left non-zero.
    pub fn n_nonzero(&self) -> usize {
        self.coefficients.iter().filter(|&&c| c != 0.0).count()
    }
}

/// Fits a regularised linear regression, choosing its own hyperparameters.
pub trait RegressionFitter {
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearModel, FitError>;
}

/// Everything the cross-validated search produced.
#[derive(Debug, Clone)]
pub struct LassoCvFit {
    pub model: LinearModel,
    /// The alpha path, strongest regularisation first.
    pub alphas: Array1<f64>,
    /// Held-out mean squared error, shape `[n_alphas, cv_folds]`.
    pub mse_path: Array2<f64>,
    pub best_index: usize,
}

impl LassoCvFit {
    /// Fold-averaged held-out error per alpha.
    pub fn mean_mse(&self) -> Array1<f64> {
        self.mse_path.sum_axis(Axis(1)) / self.mse_path.ncols() as f64
    }
}

#[derive(Debug, Clone, Default)]
pub struct LassoCv {
    config: LassoCvConfig,
}

impl LassoCv {
    pub fn new(config: LassoCvConfig) -> Self {
        Self { config }
    }

    /// Runs the full search and returns the refitted model with its CV diagnostics.
    pub fn cross_validate(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
    ) -> Result<LassoCvFit, FitError> {
        self.config
            .validate()
            .map_err(|e| FitError::InvalidSettings(e.to_string()))?;
        check_inputs(x, y)?;
        let folds_count = self.config.cv_folds;
        if x.nrows() < folds_count {
            return Err(FitError::TooFewSamples {
                samples: x.nrows(),
                folds: folds_count,
            });
        }

        let alphas = alpha_grid(
            x,
            y,
            self.config.n_alphas,
            self.config.eps,
            self.config.fit_intercept,
        );
        log::debug!(
            "Lasso path: {} alphas from {:.4e} to {:.4e}, {}-fold CV on {} samples",
            alphas.len(),
            alphas[0],
            alphas[alphas.len() - 1],
            folds_count,
            x.nrows()
        );

        let folds = kfold_indices(x.nrows(), folds_count);
        let fold_errors: Vec<Array1<f64>> = folds
            .par_iter()
            .map(|(train, held_out)| self.fold_errors(x, y, train, held_out, &alphas))
            .collect();

        let mut mse_path = Array2::zeros((alphas.len(), folds_count));
        for (fold, errors) in fold_errors.iter().enumerate() {
            log::debug!(
                "Fold {fold}: best held-out MSE {:.4}",
                errors.iter().copied().fold(f64::INFINITY, f64::min)
            );
            mse_path.column_mut(fold).assign(errors);
        }

        let mean_mse = mse_path.sum_axis(Axis(1)) / folds_count as f64;
        // First minimum on ties, which is the strongest regularisation.
        let best_index = mean_mse
            .iter()
            .copied()
            .position_min_by(|a, b| a.total_cmp(b))
            .unwrap_or(0);
        let model = fit_lasso(x, y, alphas[best_index], &self.config);

        Ok(LassoCvFit {
            model,
            alphas,
            mse_path,
            best_index,
        })
    }

    fn fold_errors(
        &self,
        x: ArrayView2<f64>,
        y: ArrayView1<f64>,
        train: &[usize],
        held_out: &[usize],
        alphas: &Array1<f64>,
    ) -> Array1<f64> {
        let x_train = x.select(Axis(0), train);
        let y_train = y.select(Axis(0), train);
        let x_held_out = x.select(Axis(0), held_out);
        let y_held_out = y.select(Axis(0), held_out);

        let centered = Centered::new(x_train.view(), y_train.view(), self.config.fit_intercept);
        let column_norms = squared_column_norms(centered.x.view());
        let mut weights = Array1::zeros(x.ncols());

        alphas.mapv(|alpha| {
            coordinate_descent(
                centered.x.view(),
                centered.y.view(),
                alpha,
                &mut weights,
                &column_norms,
                &self.config,
            );
            let intercept = centered.intercept(&weights);
            let predictions = x_held_out.dot(&weights) + intercept;
            let residual = &y_held_out - &predictions;
            residual.dot(&residual) / residual.len() as f64
        })
    }
}

impl RegressionFitter for LassoCv {
    fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearModel, FitError> {
        let fit = self.cross_validate(x, y)?;
        log::debug!(
            "Selected alpha {:.4e} (index {} of {}), {} non-zero coefficients",
            fit.model.alpha,
            fit.best_index,
            fit.alphas.len(),
            fit.model.n_nonzero()
        );
        Ok(fit.model)
    }
}

/// Fits the lasso at a single `alpha` on all rows, starting from zero coefficients.
pub fn fit_lasso(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    alpha: f64,
    config: &LassoCvConfig,
) -> LinearModel {
    let centered = Centered::new(x, y, config.fit_intercept);
    let column_norms = squared_column_norms(centered.x.view());
    let mut weights = Array1::zeros(x.ncols());
    coordinate_descent(
        centered.x.view(),
        centered.y.view(),
        alpha,
        &mut weights,
        &column_norms,
        config,
    );
    let intercept = centered.intercept(&weights);
    LinearModel {
        coefficients: weights,
        intercept,
        alpha,
    }
}

/// The descending alpha path for `(x, y)`.
pub fn alpha_grid(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    n_alphas: usize,
    eps: f64,
    fit_intercept: bool,
) -> Array1<f64> {
    let centered = Centered::new(x, y, fit_intercept);
    let xy = centered.x.t().dot(&centered.y);
    let n = x.nrows().max(1) as f64;
    let alpha_max = xy.iter().fold(0.0_f64, |m, v| m.max(v.abs())) / n;

    if alpha_max <= ALPHA_RESOLUTION {
        return Array1::from_elem(n_alphas, ALPHA_RESOLUTION);
    }
    if n_alphas == 1 {
        return Array1::from_elem(1, alpha_max * eps);
    }
    let log_max = alpha_max.ln();
    let log_step = eps.ln() / (n_alphas - 1) as f64;
    Array1::from_iter((0..n_alphas).map(|k| (log_max + k as f64 * log_step).exp()))
}

/// Contiguous, unshuffled K-fold split of `0..n_samples` into `(train, held_out)`
/// index pairs. The first `n_samples % n_folds` folds hold one extra row.
pub fn kfold_indices(n_samples: usize, n_folds: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
    let n_folds = n_folds.max(1);
    let fold_size = n_samples / n_folds;
    let remainder = n_samples % n_folds;

    let mut folds = Vec::with_capacity(n_folds);
    let mut start = 0;
    for fold in 0..n_folds {
        let size = if fold < remainder {
            fold_size + 1
        } else {
            fold_size
        };
        let end = start + size;
        let held_out: Vec<usize> = (start..end).collect();
        let train: Vec<usize> = (0..start).chain(end..n_samples).collect();
        folds.push((train, held_out));
        start = end;
    }
    folds
}

fn check_inputs(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<(), FitError> {
    if x.nrows() != y.len() {
        return Err(FitError::ShapeMismatch {
            rows: x.nrows(),
            targets: y.len(),
        });
    }
    if x.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput("feature matrix"));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(FitError::NonFiniteInput("target vector"));
    }
    Ok(())
}

/// Training data shifted to zero column means, so the intercept drops out of the
/// coordinate updates and is recovered afterwards.
struct Centered {
    x: Array2<f64>,
    y: Array1<f64>,
    x_mean: Array1<f64>,
    y_mean: f64,
}

impl Centered {
    fn new(x: ArrayView2<f64>, y: ArrayView1<f64>, fit_intercept: bool) -> Self {
        if !fit_intercept {
            return Self {
                x: x.to_owned(),
                y: y.to_owned(),
                x_mean: Array1::zeros(x.ncols()),
                y_mean: 0.0,
            };
        }
        let x_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let y_mean = y.mean().unwrap_or(0.0);
        Self {
            x: &x - &x_mean,
            y: &y - y_mean,
            x_mean,
            y_mean,
        }
    }

    fn intercept(&self, weights: &Array1<f64>) -> f64 {
        self.y_mean - self.x_mean.dot(weights)
    }
}

fn squared_column_norms(x: ArrayView2<f64>) -> Array1<f64> {
    x.map_axis(Axis(0), |column| column.dot(&column))
}

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// Minimises the lasso objective for one alpha, updating `weights` in place.
///
/// Sweeps stop once the duality gap falls below `tol * ||y||^2`. The gap is only
/// evaluated when the largest coefficient step is small relative to the largest
/// coefficient, or on the final sweep. Returns whether the gap criterion was met.
fn coordinate_descent(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    alpha: f64,
    weights: &mut Array1<f64>,
    column_norms: &Array1<f64>,
    config: &LassoCvConfig,
) -> bool {
    let n = x.nrows() as f64;
    let penalty = alpha * n;
    let gap_tolerance = config.tol * y.dot(&y);
    let mut residual = &y - &x.dot(&*weights);
    let mut gap = f64::INFINITY;

    for sweep in 0..config.max_iter {
        let mut w_max = 0.0_f64;
        let mut step_max = 0.0_f64;

        for j in 0..weights.len() {
            let norm = column_norms[j];
            if norm == 0.0 {
                continue;
            }
            let column = x.column(j);
            let previous = weights[j];
            if previous != 0.0 {
                residual.scaled_add(previous, &column);
            }
            let updated = soft_threshold(column.dot(&residual), penalty) / norm;
            weights[j] = updated;
            if updated != 0.0 {
                residual.scaled_add(-updated, &column);
            }
            step_max = step_max.max((updated - previous).abs());
            w_max = w_max.max(updated.abs());
        }

        let last_sweep = sweep + 1 == config.max_iter;
        if w_max == 0.0 || step_max / w_max < config.tol || last_sweep {
            gap = duality_gap(x, y, weights.view(), residual.view(), penalty);
            if gap <= gap_tolerance {
                return true;
            }
        }
    }

    log::warn!(
        "Coordinate descent did not converge within {} sweeps at alpha={:.4e} (duality gap {:.3e}, tolerance {:.3e})",
        config.max_iter,
        alpha,
        gap,
        gap_tolerance
    );
    false
}

fn duality_gap(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    weights: ArrayView1<f64>,
    residual: ArrayView1<f64>,
    penalty: f64,
) -> f64 {
    let xt_residual = x.t().dot(&residual);
    let dual_norm = xt_residual.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let residual_norm2 = residual.dot(&residual);

    let (scale, mut gap) = if dual_norm > penalty {
        let scale = penalty / dual_norm;
        (scale, 0.5 * residual_norm2 * (1.0 + scale * scale))
    } else {
        (1.0, residual_norm2)
    };
    let l1_norm: f64 = weights.iter().map(|w| w.abs()).sum();
    gap += penalty * l1_norm - scale * residual.dot(&y);
    gap
}
