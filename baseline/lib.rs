#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Genotype-only baseline for grain yield (GRYLD) prediction.
//!
//! Plot-level train/validation/test splits are mapped onto genotypes, a
//! cross-validated lasso is fitted per split on standardized genotype features,
//! and regression metrics are collected into a result table that can be compared
//! against richer models evaluated on the same splits.

pub mod aggregate;
pub mod config;
pub mod data;
pub mod evaluate;
pub mod exclusions;
pub mod lasso;
pub mod metrics;
pub mod partition;
pub mod progress;
pub mod runner;
pub mod scaling;
pub mod splits;
