//! Genotype-level partitioning of one split and row selection from the genotype table.

use crate::aggregate::GenotypeTable;
use crate::data::{DataFormatError, Gid, PlotTable};
use crate::splits::{BySplit, PlotSplit};
use ndarray::{Array1, Array2, Axis, concatenate};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LookupError {
    #[error("Genotype {gid} has no row in the genotype table ({context}).")]
    GenotypeNotFound { gid: Gid, context: &'static str },
}

/// Distinct genotype identifiers per label for one split.
pub type GenotypePartition = BySplit<BTreeSet<Gid>>;

/// Maps the plot-level split to genotypes and removes `exclude` from every label.
///
/// A genotype whose plots fall under more than one label appears in each of them;
/// see [`overlapping_genotypes`].
pub fn partition_genotypes(
    plots: &PlotTable,
    plot_split: &PlotSplit,
    exclude: &BTreeSet<Gid>,
) -> GenotypePartition {
    let genotypes_of = |plot_ids: &BTreeSet<String>| -> BTreeSet<Gid> {
        plots
            .rows()
            .filter(|(plot_id, _, _)| plot_ids.contains(*plot_id))
            .map(|(_, gid, _)| gid)
            .filter(|gid| !exclude.contains(gid))
            .collect()
    };
    BySplit {
        train: genotypes_of(&plot_split.train),
        val: genotypes_of(&plot_split.val),
        test: genotypes_of(&plot_split.test),
    }
}

/// Genotypes that belong to more than one label of the partition.
pub fn overlapping_genotypes(partition: &GenotypePartition) -> BTreeSet<Gid> {
    let mut seen = BTreeSet::new();
    let mut repeated = BTreeSet::new();
    for (_, gids) in partition.iter() {
        for &gid in gids {
            if !seen.insert(gid) {
                repeated.insert(gid);
            }
        }
    }
    repeated
}

/// Rows of the genotype table selected for one label, ordered by genotype identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct GenotypeSubset {
    pub gids: Vec<Gid>,
    pub features: Array2<f64>,
    pub target: Vec<Option<f64>>,
}

impl GenotypeSubset {
    pub fn len(&self) -> usize {
        self.gids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gids.is_empty()
    }

    /// Stacks `other` below `self`.
    pub fn concat(&self, other: &GenotypeSubset) -> Result<GenotypeSubset, DataFormatError> {
        let features = concatenate(Axis(0), &[self.features.view(), other.features.view()])?;
        Ok(GenotypeSubset {
            gids: self.gids.iter().chain(&other.gids).copied().collect(),
            features,
            target: self.target.iter().chain(&other.target).copied().collect(),
        })
    }

    /// Splits into the feature matrix and the target vector. Every target must be
    /// defined at this point.
    pub fn into_xy(self) -> Result<(Array2<f64>, Array1<f64>), DataFormatError> {
        let target = self
            .gids
            .iter()
            .zip(&self.target)
            .map(|(&gid, value)| value.ok_or(DataFormatError::UndefinedTarget { gid }))
            .collect::<Result<Vec<f64>, _>>()?;
        Ok((self.features, Array1::from(target)))
    }
}

/// Row-selects `table` by `gids`. Every identifier must have a row.
pub fn select_rows(
    table: &GenotypeTable,
    gids: &BTreeSet<Gid>,
) -> Result<GenotypeSubset, LookupError> {
    let rows = gids
        .iter()
        .map(|&gid| {
            table.row_of(gid).ok_or(LookupError::GenotypeNotFound {
                gid,
                context: "genotype partition",
            })
        })
        .collect::<Result<Vec<usize>, _>>()?;
    Ok(GenotypeSubset {
        gids: gids.iter().copied().collect(),
        features: table.features().select(Axis(0), &rows),
        target: rows.iter().map(|&row| table.target()[row]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_genotype_table;
    use crate::data::GenotypeFeatures;
    use crate::exclusions::ExclusionRegistry;
    use ndarray::array;

    const A: Gid = 10;
    const B: Gid = 20;
    const C: Gid = 30;
    const D: Gid = 40;

    fn plots() -> PlotTable {
        PlotTable::new(
            ["a1", "a2", "b1", "c1", "d1", "d2"].map(String::from).to_vec(),
            vec![A, A, B, C, D, D],
            vec![Some(1.0), Some(3.0), Some(4.0), Some(5.0), Some(6.0), Some(8.0)],
        )
        .unwrap()
    }

    fn table(registry: &ExclusionRegistry) -> GenotypeTable {
        let features = GenotypeFeatures::new(
            vec![A, B, C, D],
            vec!["m1".into(), "m2".into()],
            array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
        )
        .unwrap();
        build_genotype_table(&plots(), &features, registry).unwrap()
    }

    fn plot_split(train: &[&str], val: &[&str], test: &[&str]) -> PlotSplit {
        let set = |ids: &[&str]| -> BTreeSet<String> {
            ids.iter().map(|id| id.to_string()).collect()
        };
        BySplit {
            train: set(train),
            val: set(val),
            test: set(test),
        }
    }

    #[test]
    fn four_genotype_scenario() {
        let split = plot_split(&["a1", "a2", "b1"], &["c1"], &["d1", "d2"]);
        let partition = partition_genotypes(&plots(), &split, &BTreeSet::new());
        assert_eq!(partition.train, BTreeSet::from([A, B]));
        assert_eq!(partition.val, BTreeSet::from([C]));
        assert_eq!(partition.test, BTreeSet::from([D]));
        assert!(overlapping_genotypes(&partition).is_empty());

        let table = table(&ExclusionRegistry::empty());
        let train = select_rows(&table, &partition.train).unwrap();
        let val = select_rows(&table, &partition.val).unwrap();
        let combined = train.concat(&val).unwrap();
        assert_eq!(combined.len(), 3);
        assert_eq!(combined.gids, vec![A, B, C]);

        let (x, y) = combined.into_xy().unwrap();
        assert_eq!(x, array![[0.0, 1.0], [1.0, 0.0], [1.0, 1.0]]);
        assert_eq!(y, array![2.0, 4.0, 5.0]);
    }

    #[test]
    fn excluded_genotypes_never_reach_a_partition() {
        let split = plot_split(&["a1", "b1"], &["c1"], &["d1"]);
        let exclude = BTreeSet::from([B, D]);
        let partition = partition_genotypes(&plots(), &split, &exclude);
        for (_, gids) in partition.iter() {
            assert!(gids.is_disjoint(&exclude));
        }
        assert!(partition.test.is_empty());
    }

    #[test]
    fn genotype_split_across_labels_is_reported() {
        let split = plot_split(&["a1"], &[], &["a2", "d1"]);
        let partition = partition_genotypes(&plots(), &split, &BTreeSet::new());
        assert_eq!(overlapping_genotypes(&partition), BTreeSet::from([A]));
    }

    #[test]
    fn absent_genotype_is_a_lookup_error() {
        let table = table(&ExclusionRegistry::empty());
        let err = select_rows(&table, &BTreeSet::from([A, 99])).unwrap_err();
        assert_eq!(
            err,
            LookupError::GenotypeNotFound {
                gid: 99,
                context: "genotype partition"
            }
        );
    }

    #[test]
    fn missing_genotype_is_removed_at_partition_time() {
        // 77 has plots but no feature row, like the genotypes with missing marker data.
        let plots = PlotTable::new(
            ["a1", "m1", "d1"].map(String::from).to_vec(),
            vec![A, 77, D],
            vec![Some(1.0), Some(2.0), Some(3.0)],
        )
        .unwrap();
        let registry = ExclusionRegistry::new([77], [77]);
        let table = table(&registry);
        let split = plot_split(&["a1", "m1"], &[], &["d1"]);

        let partition = partition_genotypes(&plots, &split, &registry.gids_to_exclude);
        assert_eq!(partition.train, BTreeSet::from([A]));
        assert!(select_rows(&table, &partition.train).is_ok());

        let unfiltered = partition_genotypes(&plots, &split, &BTreeSet::new());
        assert!(matches!(
            select_rows(&table, &unfiltered.train),
            Err(LookupError::GenotypeNotFound { gid: 77, .. })
        ));
    }

    #[test]
    fn undefined_target_is_a_data_format_error() {
        let subset = GenotypeSubset {
            gids: vec![A, B],
            features: array![[0.0], [1.0]],
            target: vec![Some(1.0), None],
        };
        assert!(matches!(
            subset.into_xy(),
            Err(DataFormatError::UndefinedTarget { gid: B })
        ));
    }
}
