use ndarray::{Array1, Array2, Axis};

use crate::{Error, Result};

/// Column-wise standardisation of a feature matrix.
///
/// The mean and standard deviation are computed once over a training set and must be reused
/// unchanged for every later prediction, so they are kept together in this value rather than
/// recomputed from whatever data is at hand.
#[derive(Clone, Debug, PartialEq)]
pub struct Standardizer {
    mean: Array1<f64>,
    standard_deviation: Array1<f64>,
}

impl Standardizer {
    /// Learn the scaling of `features`, one sample per row.
    ///
    /// Constant columns get unit scale so they map to zero rather than `NaN`.
    ///
    /// # Errors
    /// Returns [`Error::DimensionMismatch`] for a matrix without rows.
    pub fn fit(features: &Array2<f64>) -> Result<Self> {
        let mean = features.mean_axis(Axis(0)).ok_or(Error::DimensionMismatch {
            expected: 1,
            got: 0,
        })?;
        let standard_deviation = features
            .std_axis(Axis(0), 0.)
            .mapv(|s| if s > 0. { s } else { 1. });
        Ok(Self {
            mean,
            standard_deviation,
        })
    }

    #[must_use]
    pub const fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    #[must_use]
    pub const fn standard_deviation(&self) -> &Array1<f64> {
        &self.standard_deviation
    }

    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `features` has a different number of columns than
    /// the training set.
    pub fn transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        self.check(features)?;
        Ok((features - &self.mean) / &self.standard_deviation)
    }

    /// # Errors
    /// Returns [`Error::DimensionMismatch`] if `features` has a different number of columns than
    /// the training set.
    pub fn inverse_transform(&self, features: &Array2<f64>) -> Result<Array2<f64>> {
        self.check(features)?;
        Ok(features * &self.standard_deviation + &self.mean)
    }

    fn check(&self, features: &Array2<f64>) -> Result<()> {
        if features.ncols() == self.mean.len() {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                expected: self.mean.len(),
                got: features.ncols(),
            })
        }
    }
}
