//! Run configuration, read once at start-up from a TOML file.
//!
//! ```toml
//! [data]
//! plot_table = "csv/plots.csv"
//! genotype_table = "genotypes/genotypes.csv"
//! splits = "csv/plots_splits.json"
//!
//! [output]
//! results = "results/genotype_results.csv"
//!
//! [run]
//! num_splits = 5
//!
//! [model]
//! n_alphas = 40
//! ```

use crate::data::ColumnNames;
use crate::exclusions::ExclusionRegistry;
use crate::lasso::LassoCvConfig;
use crate::splits::SplitLabel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Method name written to the `method` column of the result table.
pub const DEFAULT_METHOD: &str = "genotype_lassocv";
pub const DEFAULT_NUM_SPLITS: usize = 5;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error(
        "Split {split} is not present in the split configuration artifact ({available} splits available)."
    )]
    UnknownSplit { split: usize, available: usize },
    #[error("Split {split} leaves the '{label}' genotype partition empty after exclusions.")]
    EmptyPartition { split: usize, label: SplitLabel },
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
    #[error("Failed to read configuration file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPaths {
    /// Plot-level table with `PlotID`, `gid` and `GRYLD` columns.
    pub plot_table: PathBuf,
    /// Genotype feature table, one row per genotype.
    pub genotype_table: PathBuf,
    /// JSON split-configuration artifact.
    pub splits: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub results: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results: PathBuf::from("genotype_results.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub num_splits: usize,
    pub method: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_splits: DEFAULT_NUM_SPLITS,
            method: DEFAULT_METHOD.to_string(),
        }
    }
}

/// The complete configuration of one baseline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    pub data: DataPaths,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub model: LassoCvConfig,
    #[serde(default)]
    pub columns: ColumnNames,
    #[serde(default)]
    pub exclusions: ExclusionRegistry,
}

impl BaselineConfig {
    /// Default settings for the given input files.
    pub fn new(data: DataPaths) -> Self {
        Self {
            data,
            output: OutputConfig::default(),
            run: RunConfig::default(),
            model: LassoCvConfig::default(),
            columns: ColumnNames::default(),
            exclusions: ExclusionRegistry::default(),
        }
    }

    /// Reads and validates a TOML configuration file. Relative data and output paths
    /// are resolved against the directory containing the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        for path in [
            &mut self.data.plot_table,
            &mut self.data.genotype_table,
            &mut self.data.splits,
            &mut self.output.results,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.run.num_splits == 0 {
            return Err(ConfigurationError::InvalidSetting(
                "run.num_splits must be at least 1".to_string(),
            ));
        }
        if self.run.method.trim().is_empty() {
            return Err(ConfigurationError::InvalidSetting(
                "run.method must not be empty".to_string(),
            ));
        }
        self.model.validate()?;

        let stray = self.exclusions.missing_not_excluded();
        if !stray.is_empty() {
            return Err(ConfigurationError::InvalidSetting(format!(
                "exclusions.missing_genotype_gids must be a subset of exclusions.gids_to_exclude; not excluded: {stray:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [data]
        plot_table = "plots.csv"
        genotype_table = "genotypes.csv"
        splits = "splits.json"
    "#;

    #[test]
    fn minimal_config_takes_the_published_defaults() {
        let config = BaselineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.run.num_splits, 5);
        assert_eq!(config.run.method, "genotype_lassocv");
        assert_eq!(config.model.n_alphas, 40);
        assert_eq!(config.model.cv_folds, 5);
        assert_eq!(config.columns.grain_yield, "GRYLD");
        assert_eq!(config.exclusions, ExclusionRegistry::default());
    }

    #[test]
    fn sections_override_defaults() {
        let text = format!(
            "{MINIMAL}\n[run]\nnum_splits = 2\n[model]\nn_alphas = 10\ncv_folds = 3\n\
             [exclusions]\ngids_to_exclude = [1, 2]\nmissing_genotype_gids = [2]\n\
             [columns]\ngenotype_id = \"gid\"\n"
        );
        let config = BaselineConfig::from_toml_str(&text).unwrap();
        assert_eq!(config.run.num_splits, 2);
        assert_eq!(config.model.n_alphas, 10);
        assert_eq!(config.model.cv_folds, 3);
        assert_eq!(config.model.max_iter, 1000);
        assert_eq!(config.exclusions.genotypes_to_exclude().len(), 1);
        assert_eq!(config.columns.genotype_id.as_deref(), Some("gid"));
        assert_eq!(config.columns.plot_id, "PlotID");
    }

    #[test]
    fn zero_splits_are_rejected() {
        let text = format!("{MINIMAL}\n[run]\nnum_splits = 0\n");
        let err = BaselineConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSetting(_)));
    }

    #[test]
    fn missing_genotypes_must_be_excluded() {
        let text = format!(
            "{MINIMAL}\n[exclusions]\ngids_to_exclude = [1]\nmissing_genotype_gids = [3]\n"
        );
        let err = BaselineConfig::from_toml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidSetting(_)));
    }

    #[test]
    fn missing_data_section_is_a_parse_error() {
        let err = BaselineConfig::from_toml_str("[run]\nnum_splits = 3\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::TomlParseError(_)));
    }

    #[test]
    fn relative_paths_are_resolved_against_the_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baseline.toml");
        fs::write(&path, MINIMAL).unwrap();
        let config = BaselineConfig::load(&path).unwrap();
        assert_eq!(config.data.plot_table, dir.path().join("plots.csv"));
        assert_eq!(
            config.output.results,
            dir.path().join("genotype_results.csv")
        );
    }
}
