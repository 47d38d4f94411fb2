//! Genotype-level regression table: genotype features plus the mean grain yield of
//! every plot that carries the genotype.

use crate::data::{Gid, GenotypeFeatures, PlotTable};
use crate::exclusions::ExclusionRegistry;
use crate::partition::LookupError;
use ahash::AHashMap;
use ndarray::{Array2, ArrayView2, Axis};

/// Genotype features with the mean-yield target attached, indexed by genotype.
#[derive(Debug, Clone, PartialEq)]
pub struct GenotypeTable {
    gids: Vec<Gid>,
    index: AHashMap<Gid, usize>,
    features: Array2<f64>,
    target: Vec<Option<f64>>,
}

impl GenotypeTable {
    pub fn len(&self) -> usize {
        self.gids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gids.is_empty()
    }

    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    pub fn features(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// Row position of `gid`, if the genotype is in the table.
    pub fn row_of(&self, gid: Gid) -> Option<usize> {
        self.index.get(&gid).copied()
    }

    /// Mean grain yield per row; `None` when the genotype has no yield observation.
    pub fn target(&self) -> &[Option<f64>] {
        &self.target
    }
}

/// Mean of the observed yields per genotype over the whole plot table. Plots without
/// a yield are skipped; a genotype whose plots all lack one is absent from the map.
pub fn mean_yield_by_genotype(plots: &PlotTable) -> AHashMap<Gid, f64> {
    let mut sums: AHashMap<Gid, (f64, usize)> = AHashMap::new();
    for (_, gid, grain_yield) in plots.rows() {
        if let Some(value) = grain_yield {
            let entry = sums.entry(gid).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }
    sums.into_iter()
        .map(|(gid, (sum, count))| (gid, sum / count as f64))
        .collect()
}

/// Builds the genotype table used by every split.
///
/// Rows listed in `registry.genotypes_to_exclude()` are dropped from the feature
/// table; each of them has to be present, otherwise the exclusion list and the
/// genotype table disagree and a `LookupError` is returned. The target is looked up
/// in the mean yields of the unfiltered plot table.
pub fn build_genotype_table(
    plots: &PlotTable,
    features: &GenotypeFeatures,
    registry: &ExclusionRegistry,
) -> Result<GenotypeTable, LookupError> {
    let drop = registry.genotypes_to_exclude();
    let feature_index = features.index();
    if let Some(&gid) = drop.iter().find(|gid| !feature_index.contains_key(*gid)) {
        return Err(LookupError::GenotypeNotFound {
            gid,
            context: "genotype exclusion list",
        });
    }

    let kept_rows: Vec<usize> = features
        .gids()
        .iter()
        .enumerate()
        .filter(|(_, gid)| !drop.contains(*gid))
        .map(|(row, _)| row)
        .collect();

    let mean_yield = mean_yield_by_genotype(plots);
    let gids: Vec<Gid> = kept_rows.iter().map(|&row| features.gids()[row]).collect();
    let target: Vec<Option<f64>> = gids.iter().map(|gid| mean_yield.get(gid).copied()).collect();
    let index = gids
        .iter()
        .enumerate()
        .map(|(row, &gid)| (gid, row))
        .collect();
    let table = GenotypeTable {
        features: features.features().select(Axis(0), &kept_rows),
        gids,
        index,
        target,
    };

    let undefined = table.target.iter().filter(|t| t.is_none()).count();
    log::info!(
        "Genotype table: {} genotypes x {} features ({} dropped by exclusion)",
        table.len(),
        table.features.ncols(),
        drop.len()
    );
    if undefined > 0 {
        log::warn!("{undefined} genotypes have no plot observations and an undefined target");
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn plots() -> PlotTable {
        PlotTable::new(
            ["a", "b", "c", "d", "e", "f"].map(String::from).to_vec(),
            vec![1, 1, 2, 3, 3, 9],
            vec![Some(4.0), Some(6.0), Some(3.0), None, Some(7.5), Some(1.0)],
        )
        .unwrap()
    }

    fn features() -> GenotypeFeatures {
        GenotypeFeatures::new(
            vec![1, 2, 3, 4],
            vec!["m1".into(), "m2".into()],
            array![[0.0, 1.0], [1.0, 1.0], [2.0, 0.0], [1.0, 2.0]],
        )
        .unwrap()
    }

    #[test]
    fn mean_yield_skips_missing_observations() {
        let means = mean_yield_by_genotype(&plots());
        assert_abs_diff_eq!(means[&1], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(means[&3], 7.5, epsilon = 1e-12);
        assert_abs_diff_eq!(means[&9], 1.0, epsilon = 1e-12);
        assert_eq!(means.len(), 4);
    }

    #[test]
    fn excluded_genotypes_are_dropped_and_targets_attached() {
        let registry = ExclusionRegistry::new([2, 9], [9]);
        let table = build_genotype_table(&plots(), &features(), &registry).unwrap();

        assert_eq!(table.gids(), &[1, 3, 4]);
        assert_eq!(table.row_of(2), None);
        assert_eq!(table.features().row(1).to_vec(), vec![2.0, 0.0]);
        // Genotype 4 has no plots.
        assert_eq!(table.target(), &[Some(5.0), Some(7.5), None]);
    }

    #[test]
    fn missing_genotypes_absent_from_features_are_not_an_error() {
        // 9 is listed as missing and indeed has no feature row; it still counts toward
        // the plot-level yield means.
        let registry = ExclusionRegistry::new([9], [9]);
        let table = build_genotype_table(&plots(), &features(), &registry).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.row_of(9), None);
    }

    #[test]
    fn excluding_an_absent_genotype_is_a_lookup_error() {
        let registry = ExclusionRegistry::new([42], []);
        let err = build_genotype_table(&plots(), &features(), &registry).unwrap_err();
        assert!(matches!(err, LookupError::GenotypeNotFound { gid: 42, .. }));
    }

    #[test]
    fn mean_yield_uses_plots_of_excluded_genotypes_too() {
        let registry = ExclusionRegistry::new([1], []);
        let table = build_genotype_table(&plots(), &features(), &registry).unwrap();
        assert_eq!(table.row_of(2), Some(0));
        assert_eq!(table.target()[table.row_of(3).unwrap()], Some(7.5));
    }
}
