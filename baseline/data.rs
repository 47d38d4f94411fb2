//! # Input Tables
//!
//! Reads the two tabular inputs of the baseline, the plot table and the genotype
//! feature table, validates them against a fixed schema and converts them into
//! typed structures. The split-configuration artifact lives in `splits`.
//!
//! - Plot table: one row per field plot. Only the plot identifier, the genotype
//!   identifier and the grain yield are read. Row order is preserved because the
//!   split artifact addresses plots by row position.
//! - Genotype table: one row per genotype, an identifier column (the first column
//!   unless configured otherwise) and a block of numeric feature columns.
//!
//! Every failure here is a `DataFormatError`: the inputs are produced elsewhere and
//! a schema violation means they cannot be used as they are.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView1, ArrayView2, ShapeBuilder};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Genotype identifier (`gid`).
pub type Gid = i64;

/// Column names used to read the input tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub plot_id: String,
    pub gid: String,
    pub grain_yield: String,
    /// Identifier column of the genotype table. `None` selects the first column,
    /// which is how the table's index is written out.
    pub genotype_id: Option<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            plot_id: "PlotID".to_string(),
            gid: "gid".to_string(),
            grain_yield: "GRYLD".to_string(),
            genotype_id: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum DataFormatError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse the split configuration artifact: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Internal error: feature matrix has inconsistent dimensions: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
    #[error("The required column '{column}' was not found in '{table}'. Please check spelling and case.")]
    ColumnNotFound { column: String, table: String },
    #[error(
        "The column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the required column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("The table '{0}' contains no data rows.")]
    EmptyTable(String),
    #[error("The genotype table has no feature columns besides its identifier column.")]
    NoFeatureColumns,
    #[error("Genotype identifier {0} appears more than once in the genotype table.")]
    DuplicateGenotype(Gid),
    #[error("Column lengths disagree: '{what}' has {found} entries, expected {expected}.")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Split {split} has a malformed entry in the split configuration artifact: {source}")]
    MalformedSplitEntry {
        split: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(
        "Split {split} references plot row {position} in '{label}', but the plot table has only {rows} rows."
    )]
    PositionOutOfRange {
        split: usize,
        label: &'static str,
        position: usize,
        rows: usize,
    },
    #[error(
        "Genotype {gid} has no plot observations with a grain yield, so its regression target is undefined."
    )]
    UndefinedTarget { gid: Gid },
}

/// The plot-level observations, in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotTable {
    plot_ids: Vec<String>,
    gids: Vec<Gid>,
    grain_yield: Vec<Option<f64>>,
}

impl PlotTable {
    pub fn new(
        plot_ids: Vec<String>,
        gids: Vec<Gid>,
        grain_yield: Vec<Option<f64>>,
    ) -> Result<Self, DataFormatError> {
        let expected = plot_ids.len();
        if gids.len() != expected {
            return Err(DataFormatError::LengthMismatch {
                what: "gid",
                expected,
                found: gids.len(),
            });
        }
        if grain_yield.len() != expected {
            return Err(DataFormatError::LengthMismatch {
                what: "grain yield",
                expected,
                found: grain_yield.len(),
            });
        }
        Ok(Self {
            plot_ids,
            gids,
            grain_yield,
        })
    }

    pub fn len(&self) -> usize {
        self.plot_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plot_ids.is_empty()
    }

    pub fn plot_ids(&self) -> &[String] {
        &self.plot_ids
    }

    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    /// Observed yields. `None` marks a plot without a recorded yield.
    pub fn grain_yield(&self) -> &[Option<f64>] {
        &self.grain_yield
    }

    /// Iterates `(plot_id, gid, grain_yield)` in row order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, Gid, Option<f64>)> + '_ {
        self.plot_ids
            .iter()
            .zip(&self.gids)
            .zip(&self.grain_yield)
            .map(|((plot_id, &gid), &grain_yield)| (plot_id.as_str(), gid, grain_yield))
    }
}

/// Genotype feature matrix keyed by a unique genotype identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct GenotypeFeatures {
    gids: Vec<Gid>,
    feature_names: Vec<String>,
    features: Array2<f64>,
}

impl GenotypeFeatures {
    /// Builds the table, rejecting duplicate identifiers and shape mismatches.
    pub fn new(
        gids: Vec<Gid>,
        feature_names: Vec<String>,
        features: Array2<f64>,
    ) -> Result<Self, DataFormatError> {
        if features.nrows() != gids.len() {
            return Err(DataFormatError::LengthMismatch {
                what: "feature rows",
                expected: gids.len(),
                found: features.nrows(),
            });
        }
        if features.ncols() != feature_names.len() {
            return Err(DataFormatError::LengthMismatch {
                what: "feature columns",
                expected: feature_names.len(),
                found: features.ncols(),
            });
        }
        let mut seen: HashSet<Gid> = HashSet::with_capacity(gids.len());
        for &gid in &gids {
            if !seen.insert(gid) {
                return Err(DataFormatError::DuplicateGenotype(gid));
            }
        }
        Ok(Self {
            gids,
            feature_names,
            features,
        })
    }

    pub fn len(&self) -> usize {
        self.gids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gids.is_empty()
    }

    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.features.row(index)
    }

    /// Maps each identifier to its row position.
    pub fn index(&self) -> AHashMap<Gid, usize> {
        self.gids
            .iter()
            .enumerate()
            .map(|(row, &gid)| (gid, row))
            .collect()
    }
}

/// Loads the plot table from a comma-separated file.
pub fn load_plot_table(
    path: impl AsRef<Path>,
    columns: &ColumnNames,
) -> Result<PlotTable, DataFormatError> {
    let path = path.as_ref();
    let df = internal::read_csv(path)?;
    let table = path.display().to_string();
    if df.height() == 0 {
        return Err(DataFormatError::EmptyTable(table));
    }

    let required = [
        columns.plot_id.as_str(),
        columns.gid.as_str(),
        columns.grain_yield.as_str(),
    ];
    internal::require_columns(&df, &required, &table)?;

    let plot_ids = internal::extract_string_column(&df, &columns.plot_id)?;
    let gids = internal::extract_gid_column(&df, &columns.gid)?;
    let grain_yield = internal::extract_optional_numeric_column(&df, &columns.grain_yield)?;

    log::info!("Loaded {} plot records from '{}'", df.height(), table);
    PlotTable::new(plot_ids, gids, grain_yield)
}

/// Loads the genotype feature table from a comma-separated file.
pub fn load_genotype_features(
    path: impl AsRef<Path>,
    columns: &ColumnNames,
) -> Result<GenotypeFeatures, DataFormatError> {
    let path = path.as_ref();
    let df = internal::read_csv(path)?;
    let table = path.display().to_string();
    if df.height() == 0 {
        return Err(DataFormatError::EmptyTable(table));
    }

    let id_column = match &columns.genotype_id {
        Some(name) => {
            internal::require_columns(&df, &[name.as_str()], &table)?;
            name.clone()
        }
        None => match df.get_columns().first() {
            Some(column) => column.name().to_string(),
            None => return Err(DataFormatError::EmptyTable(table)),
        },
    };

    let feature_names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|name| name.to_string())
        .filter(|name| name != &id_column)
        .collect();
    if feature_names.is_empty() {
        return Err(DataFormatError::NoFeatureColumns);
    }

    let gids = internal::extract_gid_column(&df, &id_column)?;

    // Column-major buffer: one numeric column at a time.
    let n = gids.len();
    let mut buffer = Vec::with_capacity(n * feature_names.len());
    for name in &feature_names {
        let mut column = internal::extract_numeric_column(&df, name)?;
        buffer.append(&mut column);
    }
    let features = Array2::from_shape_vec((n, feature_names.len()).f(), buffer)?;

    log::info!(
        "Loaded {} genotypes with {} features from '{}'",
        n,
        feature_names.len(),
        table
    );
    GenotypeFeatures::new(gids, feature_names, features)
}

/// Shared column extraction helpers.
mod internal {
    use super::*;

    pub(super) fn read_csv(path: &Path) -> Result<DataFrame, DataFormatError> {
        let df = CsvReader::new(File::open(path)?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_infer_schema_length(None)
                    .with_parse_options(CsvParseOptions::default().with_separator(b',')),
            )
            .finish()?;
        Ok(df)
    }

    pub(super) fn require_columns(
        df: &DataFrame,
        required: &[&str],
        table: &str,
    ) -> Result<(), DataFormatError> {
        let present: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for &column in required {
            if !present.contains(column) {
                return Err(DataFormatError::ColumnNotFound {
                    column: column.to_string(),
                    table: table.to_string(),
                });
            }
        }
        Ok(())
    }

    fn cast_column(
        df: &DataFrame,
        column_name: &str,
        target: &DataType,
        expected_type: &'static str,
    ) -> Result<Column, DataFormatError> {
        let series = df.column(column_name)?;
        let casted = series
            .cast(target)
            .map_err(|_| DataFormatError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type,
                found_type: format!("{:?}", series.dtype()),
            })?;
        // A non-strict cast turns unparsable cells into nulls.
        if casted.null_count() > series.null_count() {
            return Err(DataFormatError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type,
                found_type: format!("{:?}", series.dtype()),
            });
        }
        Ok(casted)
    }

    pub(super) fn extract_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<f64>, DataFormatError> {
        let values = extract_optional_numeric_column(df, column_name)?;
        values
            .into_iter()
            .map(|value| {
                value.ok_or_else(|| DataFormatError::MissingValuesFound(column_name.to_string()))
            })
            .collect()
    }

    /// Numeric column where nulls and NaN mark missing observations. Infinite values
    /// are rejected.
    pub(super) fn extract_optional_numeric_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<Option<f64>>, DataFormatError> {
        let casted = cast_column(df, column_name, &DataType::Float64, "f64 (numeric)")?;
        let mut values = Vec::with_capacity(casted.len());
        for value in casted.f64()?.into_iter() {
            match value {
                Some(v) if v.is_nan() => values.push(None),
                Some(v) if !v.is_finite() => {
                    return Err(DataFormatError::NonFiniteValuesFound(
                        column_name.to_string(),
                    ));
                }
                other => values.push(other),
            }
        }
        Ok(values)
    }

    pub(super) fn extract_gid_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<Gid>, DataFormatError> {
        let column = df.column(column_name)?;
        if column.null_count() > 0 {
            return Err(DataFormatError::MissingValuesFound(column_name.to_string()));
        }
        // Casting a float column to integers truncates, so fractional identifiers
        // would merge with other genotypes.
        if column.dtype().is_float() {
            let values = column.cast(&DataType::Float64)?;
            if values
                .f64()?
                .into_iter()
                .flatten()
                .any(|v| !v.is_finite() || v.fract() != 0.0)
            {
                return Err(DataFormatError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "i64 (integer)",
                    found_type: format!("{:?}", column.dtype()),
                });
            }
        }
        let casted = cast_column(df, column_name, &DataType::Int64, "i64 (integer)")?;
        casted
            .i64()?
            .into_iter()
            .map(|value| {
                value.ok_or_else(|| DataFormatError::MissingValuesFound(column_name.to_string()))
            })
            .collect()
    }

    pub(super) fn extract_string_column(
        df: &DataFrame,
        column_name: &str,
    ) -> Result<Vec<String>, DataFormatError> {
        if df.column(column_name)?.null_count() > 0 {
            return Err(DataFormatError::MissingValuesFound(column_name.to_string()));
        }
        let casted = cast_column(df, column_name, &DataType::String, "string")?;
        casted
            .str()?
            .into_iter()
            .map(|value| {
                value
                    .map(str::to_string)
                    .ok_or_else(|| DataFormatError::MissingValuesFound(column_name.to_string()))
            })
            .collect()
    }
}
