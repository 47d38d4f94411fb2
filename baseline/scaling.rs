//! Per-column standardisation to zero mean and unit variance.

use ndarray::{Array1, Array2, ArrayView2, Axis};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScalingError {
    #[error("Cannot fit a scaler on an empty matrix.")]
    EmptyInput,
    #[error("Scaler was fitted on {expected} columns but received {found}.")]
    WidthMismatch { expected: usize, found: usize },
}

/// Column means and population standard deviations learned from one matrix.
///
/// Columns whose standard deviation is (numerically) zero keep a scale of 1, so a
/// constant column transforms to zeros rather than NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    pub fn fit(x: ArrayView2<f64>) -> Result<Self, ScalingError> {
        let mean = x.mean_axis(Axis(0)).ok_or(ScalingError::EmptyInput)?;
        let scale = x.std_axis(Axis(0), 0.0).mapv(|std| {
            // Relative to the float resolution; a few ulps of rounding are not variance.
            if std < 10.0 * f64::EPSILON {
                1.0
            } else {
                std
            }
        });
        Ok(Self { mean, scale })
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }

    pub fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ScalingError> {
        self.check_width(x.ncols())?;
        Ok((&x - &self.mean) / &self.scale)
    }

    pub fn inverse_transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ScalingError> {
        self.check_width(x.ncols())?;
        Ok(&x * &self.scale + &self.mean)
    }

    fn check_width(&self, found: usize) -> Result<(), ScalingError> {
        if found != self.mean.len() {
            return Err(ScalingError::WidthMismatch {
                expected: self.mean.len(),
                found,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn transformed_columns_have_zero_mean_and_unit_variance() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [6.0, 40.0]];
        let scaler = StandardScaler::fit(x.view()).unwrap();
        let z = scaler.transform(x.view()).unwrap();
        for column in z.columns() {
            assert_abs_diff_eq!(column.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(column.std(0.0), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(scaler.mean()[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn target_round_trip_reproduces_the_input() {
        let y = array![5.1, 4.7, 6.3, 5.9, 4.2];
        let column = y.view().insert_axis(Axis(1));
        let scaler = StandardScaler::fit(column).unwrap();
        let scaled = scaler.transform(column).unwrap();
        let restored = scaler.inverse_transform(scaled.view()).unwrap();
        for (a, b) in restored.column(0).iter().zip(y.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn constant_column_maps_to_zero() {
        let x = array![[1.0, 7.0], [2.0, 7.0], [3.0, 7.0]];
        let scaler = StandardScaler::fit(x.view()).unwrap();
        assert_eq!(scaler.scale()[1], 1.0);
        let z = scaler.transform(x.view()).unwrap();
        assert!(z.column(1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_rows_use_training_statistics() {
        let train = array![[0.0], [2.0]];
        let scaler = StandardScaler::fit(train.view()).unwrap();
        let z = scaler.transform(array![[4.0]].view()).unwrap();
        assert_abs_diff_eq!(z[[0, 0]], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn width_and_emptiness_are_checked() {
        let empty = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            StandardScaler::fit(empty.view()).unwrap_err(),
            ScalingError::EmptyInput
        );
        let scaler = StandardScaler::fit(array![[1.0, 2.0]].view()).unwrap();
        assert_eq!(
            scaler.transform(array![[1.0]].view()).unwrap_err(),
            ScalingError::WidthMismatch {
                expected: 2,
                found: 1
            }
        );
    }
}
