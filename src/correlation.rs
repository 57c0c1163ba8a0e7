//! Statistics relating fitted circuit parameters to capacity fade.
//!
//! Series are always aligned by cycle id. Cycles present in only one of the two series are
//! ignored.
use std::collections::BTreeMap;

use num_traits::Float;

use crate::capacity::CapacitySeries;
use crate::spectrum::CycleId;
use crate::sweep::SweepResult;
use crate::{Error, Result};

/// Pearson correlation of a parameter series with capacity
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correlation {
    pub coefficient: f64,
    /// Number of cycles present in both series
    pub samples: usize,
}

/// Pairs of values for the cycles present in both series, in ascending cycle order
#[must_use]
pub fn align<A: Copy, B: Copy>(
    left: &BTreeMap<CycleId, A>,
    right: &BTreeMap<CycleId, B>,
) -> Vec<(CycleId, A, B)> {
    left.iter()
        .filter_map(|(cycle, a)| right.get(cycle).map(|b| (*cycle, *a, *b)))
        .collect()
}

/// Sample Pearson correlation coefficient of two equally long sequences
///
/// # Errors
/// Returns [`Error::UndefinedCorrelation`] for sequences of different length, fewer than two
/// samples, or a sequence without variance.
pub fn pearson<E: Float>(x: &[E], y: &[E]) -> Result<E> {
    if x.len() != y.len() {
        return Err(Error::UndefinedCorrelation(format!(
            "sequences have lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(Error::UndefinedCorrelation(
            "at least two samples are required".to_owned(),
        ));
    }

    let n: E = num_traits::cast(x.len()).ok_or_else(|| {
        Error::UndefinedCorrelation("sample count is not representable".to_owned())
    })?;
    let mean_x = x.iter().fold(E::zero(), |acc, v| acc + *v) / n;
    let mean_y = y.iter().fold(E::zero(), |acc, v| acc + *v) / n;

    let (sxy, sxx, syy) = x.iter().zip(y).fold(
        (E::zero(), E::zero(), E::zero()),
        |(sxy, sxx, syy), (xi, yi)| {
            let dx = *xi - mean_x;
            let dy = *yi - mean_y;
            (sxy + dx * dy, sxx + dx * dx, syy + dy * dy)
        },
    );

    if sxx.is_zero() || syy.is_zero() {
        return Err(Error::UndefinedCorrelation(
            "a sequence has zero variance".to_owned(),
        ));
    }

    // Rounding can push perfectly correlated data a hair past unity
    Ok((sxy / (sxx.sqrt() * syy.sqrt())).max(-E::one()).min(E::one()))
}

/// Correlate a parameter trend with the capacity series over their common cycles
///
/// # Errors
/// Returns [`Error::AlignmentMismatch`] when the series share no cycle, and
/// [`Error::UndefinedCorrelation`] when the overlap is too small or constant.
pub fn correlate(
    parameter: &BTreeMap<CycleId, f64>,
    capacity: &CapacitySeries,
) -> Result<Correlation> {
    let aligned = align(parameter, capacity.as_map());
    if aligned.is_empty() {
        return Err(Error::AlignmentMismatch);
    }

    let (x, y): (Vec<f64>, Vec<f64>) = aligned.iter().map(|(_, p, c)| (*p, *c)).unzip();
    Ok(Correlation {
        coefficient: pearson(&x, &y)?,
        samples: aligned.len(),
    })
}

/// Correlation of every fitted parameter with capacity, in circuit parameter order
#[must_use]
pub fn correlate_all(
    sweep: &SweepResult,
    capacity: &CapacitySeries,
) -> Vec<(String, Result<Correlation>)> {
    sweep
        .parameter_names()
        .iter()
        .filter_map(|name| {
            sweep
                .parameter_series(name)
                .map(|series| (name.clone(), correlate(&series, capacity)))
        })
        .collect()
}

/// Mean absolute difference between two series over their common cycles
///
/// # Errors
/// Returns [`Error::AlignmentMismatch`] when the series share no cycle.
pub fn mean_absolute_error(
    estimated: &BTreeMap<CycleId, f64>,
    measured: &BTreeMap<CycleId, f64>,
) -> Result<f64> {
    let aligned = align(estimated, measured);
    if aligned.is_empty() {
        return Err(Error::AlignmentMismatch);
    }

    #[allow(clippy::cast_precision_loss)]
    let n = aligned.len() as f64;
    Ok(aligned.iter().map(|(_, a, b)| (a - b).abs()).sum::<f64>() / n)
}
