//! Split resolution: from row positions in the split-configuration artifact to the
//! distinct plot identifiers of each train / validation / test label.

use crate::config::ConfigurationError;
use crate::data::{DataFormatError, PlotTable};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// The three roles a plot or genotype can play within one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SplitLabel {
    Train,
    Val,
    Test,
}

impl SplitLabel {
    pub const ALL: [SplitLabel; 3] = [SplitLabel::Train, SplitLabel::Val, SplitLabel::Test];

    /// The key used for this label in the split-configuration artifact.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Val => "val",
            Self::Test => "test",
        }
    }
}

impl fmt::Display for SplitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One value per split label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BySplit<T> {
    pub train: T,
    pub val: T,
    pub test: T,
}

impl<T> BySplit<T> {
    pub fn get(&self, label: SplitLabel) -> &T {
        match label {
            SplitLabel::Train => &self.train,
            SplitLabel::Val => &self.val,
            SplitLabel::Test => &self.test,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SplitLabel, &T)> + '_ {
        SplitLabel::ALL
            .into_iter()
            .map(move |label| (label, self.get(label)))
    }

    /// Applies `f` to every label in train, val, test order, stopping at the first error.
    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(SplitLabel, &T) -> Result<U, E>,
    ) -> Result<BySplit<U>, E> {
        Ok(BySplit {
            train: f(SplitLabel::Train, &self.train)?,
            val: f(SplitLabel::Val, &self.val)?,
            test: f(SplitLabel::Test, &self.test)?,
        })
    }
}

/// Distinct plot identifiers per label for one split.
pub type PlotSplit = BySplit<BTreeSet<String>>;

/// The split-configuration artifact: split index (as text) to per-label row positions.
///
/// Entries are kept undecoded; only the entry of the requested split is parsed, so a
/// malformed entry elsewhere in the file does not affect it.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitArtifact {
    entries: BTreeMap<String, serde_json::Value>,
}

impl SplitArtifact {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DataFormatError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let artifact = Self::from_json_str(&text)?;
        log::info!(
            "Loaded split configuration with {} splits from '{}'",
            artifact.len(),
            path.display()
        );
        Ok(artifact)
    }

    pub fn from_json_str(text: &str) -> Result<Self, DataFormatError> {
        let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decodes the row positions of one split.
    pub fn positions(&self, split: usize) -> Result<BySplit<Vec<usize>>, ResolveError> {
        let entry = self
            .entries
            .get(&split.to_string())
            .ok_or(ConfigurationError::UnknownSplit {
                split,
                available: self.entries.len(),
            })?;
        let positions = BySplit::<Vec<usize>>::deserialize(entry)
            .map_err(|source| DataFormatError::MalformedSplitEntry { split, source })?;
        Ok(positions)
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    DataFormat(#[from] DataFormatError),
}

/// Maps the row positions of split `split` to the distinct plot identifiers per label.
pub fn resolve_plot_split(
    plots: &PlotTable,
    artifact: &SplitArtifact,
    split: usize,
) -> Result<PlotSplit, ResolveError> {
    let positions = artifact.positions(split)?;
    let plot_ids = plots.plot_ids();
    let resolved = positions.try_map(|label, rows| {
        rows.iter()
            .map(|&position| {
                plot_ids.get(position).cloned().ok_or(
                    DataFormatError::PositionOutOfRange {
                        split,
                        label: label.as_str(),
                        position,
                        rows: plot_ids.len(),
                    },
                )
            })
            .collect::<Result<BTreeSet<String>, DataFormatError>>()
    })?;

    log::debug!(
        "Split {split}: {} train, {} val, {} test plots",
        resolved.train.len(),
        resolved.val.len(),
        resolved.test.len()
    );
    Ok(resolved)
}
