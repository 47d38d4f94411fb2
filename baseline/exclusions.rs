//! Genotype identifiers held out of the evaluation.
//!
//! Two sets are tracked. `gids_to_exclude` is the full list of genotypes that must
//! never reach a train, validation or test partition. `missing_genotype_gids` is the
//! subset of those that have no row in the genotype feature table at all. The
//! aggregator only drops the difference of the two (the others are structurally
//! absent already) while the partitioner subtracts the full set again.

use crate::data::Gid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Genotypes dropped from every evaluation (corrupted or duplicated entries).
pub const GIDS_TO_EXCLUDE: [Gid; 4] = [4755014, 7806808, 8242572, 8243873];

/// Genotypes from `GIDS_TO_EXCLUDE` that were never genotyped.
pub const MISSING_GENOTYPES_GIDS: [Gid; 2] = [8242572, 8243873];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRegistry {
    #[serde(default = "default_gids_to_exclude")]
    pub gids_to_exclude: BTreeSet<Gid>,
    #[serde(default = "default_missing_genotype_gids")]
    pub missing_genotype_gids: BTreeSet<Gid>,
}

fn default_gids_to_exclude() -> BTreeSet<Gid> {
    GIDS_TO_EXCLUDE.into_iter().collect()
}

fn default_missing_genotype_gids() -> BTreeSet<Gid> {
    MISSING_GENOTYPES_GIDS.into_iter().collect()
}

impl Default for ExclusionRegistry {
    fn default() -> Self {
        Self {
            gids_to_exclude: default_gids_to_exclude(),
            missing_genotype_gids: default_missing_genotype_gids(),
        }
    }
}

impl ExclusionRegistry {
    /// A registry that excludes nothing.
    pub fn empty() -> Self {
        Self {
            gids_to_exclude: BTreeSet::new(),
            missing_genotype_gids: BTreeSet::new(),
        }
    }

    pub fn new(
        gids_to_exclude: impl IntoIterator<Item = Gid>,
        missing_genotype_gids: impl IntoIterator<Item = Gid>,
    ) -> Self {
        Self {
            gids_to_exclude: gids_to_exclude.into_iter().collect(),
            missing_genotype_gids: missing_genotype_gids.into_iter().collect(),
        }
    }

    /// `GIDS_TO_EXCLUDE - MISSING_GENOTYPES_GIDS`: the identifiers that are present in
    /// the genotype feature table and have to be dropped from it.
    pub fn genotypes_to_exclude(&self) -> BTreeSet<Gid> {
        self.gids_to_exclude
            .difference(&self.missing_genotype_gids)
            .copied()
            .collect()
    }

    /// Identifiers listed as missing but not as excluded. A non-empty result means the
    /// registry is inconsistent: such genotypes would leak into the partitions.
    pub fn missing_not_excluded(&self) -> BTreeSet<Gid> {
        self.missing_genotype_gids
            .difference(&self.gids_to_exclude)
            .copied()
            .collect()
    }
}
