//! Runs the baseline over every split and persists the result table.

use crate::config::{BaselineConfig, ConfigurationError};
use crate::data::{DataFormatError, load_genotype_features, load_plot_table};
use crate::evaluate::{BaselineInputs, EvaluationError, ResultRow, SplitEvaluator};
use crate::lasso::{LassoCv, RegressionFitter};
use crate::partition::{LookupError, overlapping_genotypes, partition_genotypes};
use crate::progress::{NoopRunProgress, RunProgressObserver};
use crate::splits::{BySplit, SplitArtifact, resolve_plot_split};
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Column order of the result table.
pub const RESULT_COLUMNS: [&str; 6] = ["method", "split_id", "mae", "mse", "r2_sc", "pears"];

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("Failed to load '{path}': {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: DataFormatError,
    },
    #[error("The genotype table disagrees with the exclusion list: {0}")]
    Lookup(#[from] LookupError),
    #[error("Split {split} failed: {source}")]
    Split {
        split: usize,
        #[source]
        source: EvaluationError,
    },
    #[error("Failed to write the result table to '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result rows in split order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes the table as CSV, replacing any existing file at `path` only once the
    /// whole table has been written.
    pub fn write_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let temp_path = temporary_sibling(path)?;
        if let Err(err) = self.write_csv_to(&temp_path) {
            let _ = fs::remove_file(&temp_path);
            return Err(err);
        }
        fs::rename(&temp_path, path).map_err(|err| {
            let _ = fs::remove_file(&temp_path);
            csv::Error::from(err)
        })
    }

    fn write_csv_to(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(File::create(path)?);
        writer.write_record(RESULT_COLUMNS)?;
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

impl FromIterator<ResultRow> for ResultTable {
    fn from_iter<I: IntoIterator<Item = ResultRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

fn temporary_sibling(path: &Path) -> io::Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output path '{}' has no file name.", path.display()),
        )
    })?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(dir.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        std::process::id()
    )))
}

/// Reads the plot table, the genotype table and the split artifact named by `config`
/// and builds the genotype table shared by every split.
pub fn load_inputs(config: &BaselineConfig) -> Result<BaselineInputs, RunError> {
    let data = &config.data;
    let plots = load_plot_table(&data.plot_table, &config.columns)
        .map_err(input_error(&data.plot_table))?;
    let features = load_genotype_features(&data.genotype_table, &config.columns)
        .map_err(input_error(&data.genotype_table))?;
    let splits = SplitArtifact::load(&data.splits).map_err(input_error(&data.splits))?;
    Ok(BaselineInputs::new(plots, splits, &features, &config.exclusions)?)
}

fn input_error(path: &Path) -> impl FnOnce(DataFormatError) -> RunError {
    let path = path.to_path_buf();
    move |source| RunError::Input { path, source }
}

/// Evaluates splits `0..num_splits` in order. The first failing split aborts the run.
pub fn run_splits<F, P>(
    evaluator: &SplitEvaluator<'_, F>,
    num_splits: usize,
    progress: &mut P,
) -> Result<ResultTable, RunError>
where
    F: RegressionFitter,
    P: RunProgressObserver,
{
    progress.on_run_start(num_splits);
    let mut rows = Vec::with_capacity(num_splits);
    for split in 0..num_splits {
        progress.on_split_start(split);
        let row = evaluator
            .evaluate_split(split)
            .map_err(|source| RunError::Split { split, source })?;
        progress.on_split_finish(&row);
        rows.push(row);
    }
    progress.on_run_finish();
    Ok(ResultTable { rows })
}

/// Loads the inputs, evaluates every configured split with the cross-validated lasso
/// and writes the result table. Nothing is written unless every split succeeds.
pub fn run(config: &BaselineConfig) -> Result<ResultTable, RunError> {
    run_with_progress(config, &mut NoopRunProgress)
}

pub fn run_with_progress<P>(
    config: &BaselineConfig,
    progress: &mut P,
) -> Result<ResultTable, RunError>
where
    P: RunProgressObserver,
{
    config.validate()?;
    let inputs = load_inputs(config)?;
    let evaluator = SplitEvaluator::new(
        &inputs,
        LassoCv::new(config.model.clone()),
        &config.run.method,
    );
    let table = run_splits(&evaluator, config.run.num_splits, progress)?;

    let path = &config.output.results;
    table.write_csv(path).map_err(|source| RunError::Output {
        path: path.clone(),
        source,
    })?;
    log::info!("Wrote {} result rows to '{}'", table.len(), path.display());
    Ok(table)
}

/// Sizes of one split's partitions, as reported by `inspect`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SplitSummary {
    pub split: usize,
    /// Distinct plots per label.
    pub plots: BySplit<usize>,
    /// Genotypes per label after exclusions.
    pub genotypes: BySplit<usize>,
    /// Genotypes that occur under more than one label.
    pub overlapping: usize,
}

impl SplitSummary {
    pub fn for_split(inputs: &BaselineInputs, split: usize) -> Result<Self, EvaluationError> {
        let plot_split = resolve_plot_split(&inputs.plots, &inputs.splits, split)?;
        let partition = partition_genotypes(&inputs.plots, &plot_split, &inputs.exclude);
        Ok(Self {
            split,
            plots: BySplit {
                train: plot_split.train.len(),
                val: plot_split.val.len(),
                test: plot_split.test.len(),
            },
            genotypes: BySplit {
                train: partition.train.len(),
                val: partition.val.len(),
                test: partition.test.len(),
            },
            overlapping: overlapping_genotypes(&partition).len(),
        })
    }
}

/// Partition sizes of `split`, or of every configured split when `split` is `None`.
/// Never fits a model and never writes a file.
pub fn inspect(
    config: &BaselineConfig,
    split: Option<usize>,
) -> Result<Vec<SplitSummary>, RunError> {
    config.validate()?;
    let inputs = load_inputs(config)?;
    let splits: Vec<usize> = match split {
        Some(split) => vec![split],
        None => (0..config.run.num_splits).collect(),
    };
    splits
        .into_iter()
        .map(|split| {
            SplitSummary::for_split(&inputs, split)
                .map_err(|source| RunError::Split { split, source })
        })
        .collect()
}
