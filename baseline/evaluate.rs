//! # Baseline Evaluator
//!
//! Fits and scores the genotype baseline on one split:
//!
//! 1.  Resolve the plot-level split and map it to genotype partitions, subtracting the
//!     full exclusion set.
//! 2.  Row-select the genotype table per label and stack train on top of validation;
//!     the regularisation strength is chosen by the fitter's own cross-validation, so
//!     the validation rows are training data here.
//! 3.  Standardise features and target with statistics of the training rows only, fit,
//!     predict the test rows and map the predictions back to the yield scale.
//! 4.  Score against the untouched test targets.

use crate::aggregate::{GenotypeTable, build_genotype_table};
use crate::config::ConfigurationError;
use crate::data::{DataFormatError, Gid, GenotypeFeatures, PlotTable};
use crate::exclusions::ExclusionRegistry;
use crate::lasso::{FitError, RegressionFitter};
use crate::metrics::{MetricError, RegressionMetrics};
use crate::partition::{
    GenotypePartition, GenotypeSubset, LookupError, overlapping_genotypes, partition_genotypes,
    select_rows,
};
use crate::scaling::{ScalingError, StandardScaler};
use crate::splits::{ResolveError, SplitArtifact, resolve_plot_split};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    DataFormat(#[from] DataFormatError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("Regression fit failed: {0}")]
    Fit(#[from] FitError),
    #[error("Standardisation failed: {0}")]
    Scaling(#[from] ScalingError),
    #[error("Scoring failed: {0}")]
    Metric(#[from] MetricError),
}

impl From<ResolveError> for EvaluationError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Configuration(e) => Self::Configuration(e),
            ResolveError::DataFormat(e) => Self::DataFormat(e),
        }
    }
}

/// One line of the result table. Field names are the column names; an undefined
/// (NaN) metric is an empty cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub method: String,
    pub split_id: usize,
    #[serde(with = "undefined_as_empty")]
    pub mae: f64,
    #[serde(with = "undefined_as_empty")]
    pub mse: f64,
    #[serde(with = "undefined_as_empty")]
    pub r2_sc: f64,
    #[serde(with = "undefined_as_empty")]
    pub pears: f64,
}

mod undefined_as_empty {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_none()
        } else {
            serializer.serialize_some(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

impl ResultRow {
    pub fn new(method: &str, split_id: usize, metrics: &RegressionMetrics) -> Self {
        Self {
            method: method.to_string(),
            split_id,
            mae: metrics.mae,
            mse: metrics.mse,
            r2_sc: metrics.r2,
            pears: metrics.pearson,
        }
    }
}

/// Everything a run reads from disk, loaded once and shared by all splits.
#[derive(Debug, Clone)]
pub struct BaselineInputs {
    pub plots: PlotTable,
    pub splits: SplitArtifact,
    pub genotypes: GenotypeTable,
    /// Subtracted from every genotype partition.
    pub exclude: BTreeSet<Gid>,
}

impl BaselineInputs {
    pub fn new(
        plots: PlotTable,
        splits: SplitArtifact,
        features: &GenotypeFeatures,
        exclusions: &ExclusionRegistry,
    ) -> Result<Self, LookupError> {
        let genotypes = build_genotype_table(&plots, features, exclusions)?;
        Ok(Self {
            plots,
            splits,
            genotypes,
            exclude: exclusions.gids_to_exclude.clone(),
        })
    }

    /// Genotype partition of one split, after exclusions. Labels may be empty.
    pub fn genotype_partition(&self, split: usize) -> Result<GenotypePartition, ResolveError> {
        let plot_split = resolve_plot_split(&self.plots, &self.splits, split)?;
        let partition = partition_genotypes(&self.plots, &plot_split, &self.exclude);
        log::debug!(
            "Split {split}: {} train, {} val, {} test genotypes",
            partition.train.len(),
            partition.val.len(),
            partition.test.len()
        );
        Ok(partition)
    }
}

/// Evaluates splits against shared inputs with one fitting procedure.
pub struct SplitEvaluator<'a, F> {
    inputs: &'a BaselineInputs,
    fitter: F,
    method: &'a str,
}

impl<'a, F: RegressionFitter> SplitEvaluator<'a, F> {
    pub fn new(inputs: &'a BaselineInputs, fitter: F, method: &'a str) -> Self {
        Self {
            inputs,
            fitter,
            method,
        }
    }

    /// Combined train + validation rows and the test rows of one split.
    pub fn training_and_test_sets(
        &self,
        split: usize,
    ) -> Result<(GenotypeSubset, GenotypeSubset), EvaluationError> {
        let partition = self.inputs.genotype_partition(split)?;
        for (label, gids) in partition.iter() {
            if gids.is_empty() {
                return Err(ConfigurationError::EmptyPartition { split, label }.into());
            }
        }
        let overlap = overlapping_genotypes(&partition);
        if !overlap.is_empty() {
            log::warn!(
                "Split {split}: {} genotypes occur in more than one of train/val/test",
                overlap.len()
            );
        }

        let table = &self.inputs.genotypes;
        let train = select_rows(table, &partition.train)?;
        let val = select_rows(table, &partition.val)?;
        let test = select_rows(table, &partition.test)?;
        Ok((train.concat(&val)?, test))
    }

    pub fn evaluate_split(&self, split: usize) -> Result<ResultRow, EvaluationError> {
        log::info!("Genotype baseline - Split {split}");
        let (train, test) = self.training_and_test_sets(split)?;
        let (x_train, y_train) = train.into_xy()?;
        let (x_test, y_test) = test.into_xy()?;
        log::info!("{} training examples.", x_train.nrows());

        let x_scaler = StandardScaler::fit(x_train.view())?;
        let x_train = x_scaler.transform(x_train.view())?;
        let x_test = x_scaler.transform(x_test.view())?;

        let y_column = y_train.view().insert_axis(Axis(1));
        let y_scaler = StandardScaler::fit(y_column)?;
        let y_train = y_scaler.transform(y_column)?.column(0).to_owned();

        let model = self.fitter.fit(x_train.view(), y_train.view())?;
        log::info!(
            "Model fitted. (alpha = {:.4e}, {} of {} coefficients non-zero)",
            model.alpha,
            model.n_nonzero(),
            model.coefficients.len()
        );

        let scaled_predictions = model.predict(x_test.view())?;
        let predictions = y_scaler
            .inverse_transform(scaled_predictions.view().insert_axis(Axis(1)))?
            .column(0)
            .to_owned();

        let metrics = RegressionMetrics::compute(y_test.view(), predictions.view())?;
        log::info!("MSE: {:.4}, R2_SCORE: {:.4}", metrics.mse, metrics.r2);
        Ok(ResultRow::new(self.method, split, &metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_METHOD;
    use crate::lasso::{LassoCv, LassoCvConfig, LinearModel};
    use crate::splits::SplitLabel;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
    use serde_json::json;

    const GENOTYPES: Gid = 12;

    fn marker(gid: Gid) -> f64 {
        ((gid * 7) % 5) as f64
    }

    fn true_yield(gid: Gid) -> f64 {
        2.0 * gid as f64 + 1.0 - 0.5 * marker(gid)
    }

    /// Row positions of the two plots of each genotype.
    fn rows_of(gids: &[Gid]) -> Vec<usize> {
        gids.iter()
            .flat_map(|&gid| {
                let first = 2 * (gid as usize - 1);
                [first, first + 1]
            })
            .collect()
    }

    /// Two replicate plots per genotype whose yields average to `true_yield`.
    fn inputs_with(grain_yield: impl Fn(Gid, usize) -> Option<f64>) -> BaselineInputs {
        let mut plot_ids = Vec::new();
        let mut gids = Vec::new();
        let mut yields = Vec::new();
        for gid in 1..=GENOTYPES {
            for replicate in 0..2 {
                plot_ids.push(format!("p{gid}_{replicate}"));
                gids.push(gid);
                yields.push(grain_yield(gid, replicate));
            }
        }
        let plots = PlotTable::new(plot_ids, gids, yields).unwrap();

        let artifact = json!({
            "0": {
                "train": rows_of(&[1, 2, 4, 6, 8, 10, 12]),
                "val": rows_of(&[5, 9]),
                "test": rows_of(&[3, 7, 11]),
            },
            "1": {
                "train": rows_of(&[1, 2, 3, 4, 5, 6]),
                "val": rows_of(&[7, 8]),
                "test": [],
            },
        });
        let splits = SplitArtifact::from_json_str(&artifact.to_string()).unwrap();

        let gid_column: Vec<Gid> = (1..=GENOTYPES).collect();
        let features = Array2::from_shape_fn((GENOTYPES as usize, 2), |(row, col)| {
            let gid = row as Gid + 1;
            if col == 0 { gid as f64 } else { marker(gid) }
        });
        let features =
            GenotypeFeatures::new(gid_column, vec!["m1".into(), "m2".into()], features).unwrap();
        BaselineInputs::new(plots, splits, &features, &ExclusionRegistry::empty()).unwrap()
    }

    fn inputs() -> BaselineInputs {
        inputs_with(|gid, replicate| {
            let offset = if replicate == 0 { -0.5 } else { 0.5 };
            Some(true_yield(gid) + offset)
        })
    }

    fn lasso() -> LassoCv {
        LassoCv::new(LassoCvConfig::default())
    }

    /// Predicts zero on the standardised scale, i.e. the training mean.
    struct MeanFitter;

    impl RegressionFitter for MeanFitter {
        fn fit(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<LinearModel, FitError> {
            assert_abs_diff_eq!(y.sum(), 0.0, epsilon = 1e-9);
            Ok(LinearModel {
                coefficients: Array1::zeros(x.ncols()),
                intercept: 0.0,
                alpha: 0.0,
            })
        }
    }

    #[test]
    fn train_and_validation_rows_are_combined() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        let (train, test) = evaluator.training_and_test_sets(0).unwrap();
        assert_eq!(train.gids, vec![1, 2, 4, 6, 8, 10, 12, 5, 9]);
        assert_eq!(test.gids, vec![3, 7, 11]);
        assert_eq!(train.features.nrows(), 9);
        assert_eq!(train.target[0], Some(true_yield(1)));
    }

    #[test]
    fn lasso_recovers_a_linear_relationship() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        let row = evaluator.evaluate_split(0).unwrap();
        assert_eq!(row.method, "genotype_lassocv");
        assert_eq!(row.split_id, 0);
        assert!(row.r2_sc > 0.9, "r2 = {}", row.r2_sc);
        assert!(row.pears > 0.95, "pearson = {}", row.pears);
        assert!(row.mse >= 0.0 && row.mae >= 0.0);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        assert_eq!(
            evaluator.evaluate_split(0).unwrap(),
            evaluator.evaluate_split(0).unwrap()
        );
    }

    #[test]
    fn predictions_are_scored_on_the_original_scale() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, MeanFitter, "mean");
        let row = evaluator.evaluate_split(0).unwrap();

        let train: [Gid; 9] = [1, 2, 4, 6, 8, 10, 12, 5, 9];
        let mean = train.iter().map(|&gid| true_yield(gid)).sum::<f64>() / 9.0;
        let errors: Vec<f64> = [3, 7, 11]
            .iter()
            .map(|&gid| true_yield(gid) - mean)
            .collect();
        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / 3.0;
        let mse = errors.iter().map(|e| e * e).sum::<f64>() / 3.0;

        assert_eq!(row.method, "mean");
        assert_abs_diff_eq!(row.mae, mae, epsilon = 1e-9);
        assert_abs_diff_eq!(row.mse, mse, epsilon = 1e-9);
        assert!(row.pears.is_nan());
    }

    #[test]
    fn empty_test_partition_is_a_configuration_error() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        let err = evaluator.evaluate_split(1).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::Configuration(ConfigurationError::EmptyPartition {
                split: 1,
                label: SplitLabel::Test
            })
        ));
    }

    #[test]
    fn unknown_split_is_a_configuration_error() {
        let inputs = inputs();
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        let err = evaluator.evaluate_split(4).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::Configuration(ConfigurationError::UnknownSplit { split: 4, .. })
        ));
    }

    #[test]
    fn undefined_target_aborts_the_split() {
        let inputs = inputs_with(|gid, _| (gid != 6).then(|| true_yield(gid)));
        let evaluator = SplitEvaluator::new(&inputs, lasso(), DEFAULT_METHOD);
        let err = evaluator.evaluate_split(0).unwrap_err();
        assert!(matches!(
            err,
            EvaluationError::DataFormat(DataFormatError::UndefinedTarget { gid: 6 })
        ));
    }
}
