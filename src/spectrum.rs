use std::collections::BTreeMap;
use std::fmt;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Index of a charge/discharge cycle of the battery under test
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleId(pub u32);

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CycleId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A single row of an impedance measurement
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpectrumSample {
    pub cycle: CycleId,
    /// Excitation frequency in Hz
    pub frequency: f64,
    pub impedance: Complex64,
}

impl SpectrumSample {
    /// Build a sample from the raw columns of a measurement file.
    ///
    /// Instruments record the reactive part as `-Im(Z)`, so the sign is flipped back here.
    #[must_use]
    pub fn from_raw(cycle: CycleId, frequency: f64, real: f64, imag_raw: f64) -> Self {
        Self {
            cycle,
            frequency,
            impedance: Complex64::new(real, -imag_raw),
        }
    }
}

/// The impedance spectrum recorded during one cycle, in recorded order
#[derive(Clone, Debug, PartialEq)]
pub struct CycleSpectrum {
    cycle: CycleId,
    frequencies: Vec<f64>,
    impedance: Vec<Complex64>,
}

impl CycleSpectrum {
    /// # Panics
    /// If `frequencies` and `impedance` have different lengths.
    #[must_use]
    pub fn new(cycle: CycleId, frequencies: Vec<f64>, impedance: Vec<Complex64>) -> Self {
        assert_eq!(
            frequencies.len(),
            impedance.len(),
            "each frequency needs exactly one impedance"
        );
        Self {
            cycle,
            frequencies,
            impedance,
        }
    }

    #[must_use]
    pub const fn cycle(&self) -> CycleId {
        self.cycle
    }

    #[must_use]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    #[must_use]
    pub fn impedance(&self) -> &[Complex64] {
        &self.impedance
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    fn push(&mut self, frequency: f64, impedance: Complex64) {
        self.frequencies.push(frequency);
        self.impedance.push(impedance);
    }

    /// Drop every sample outside the capacitive first quadrant of the Nyquist plane.
    ///
    /// A sample is kept when its resistive part is non-negative and its reactive part is
    /// strictly negative, which excludes inductive and otherwise non-physical readings. The
    /// relative order of the kept samples is preserved.
    ///
    /// # Errors
    /// Returns [`Error::EmptySpectrumAfterFilter`] when no sample survives.
    pub fn first_quadrant(&self) -> Result<Self> {
        let (frequencies, impedance): (Vec<f64>, Vec<Complex64>) = self
            .frequencies
            .iter()
            .zip(&self.impedance)
            .filter(|(_, z)| is_physical(z))
            .map(|(f, z)| (*f, *z))
            .unzip();

        if frequencies.is_empty() {
            return Err(Error::EmptySpectrumAfterFilter { cycle: self.cycle });
        }

        Ok(Self {
            cycle: self.cycle,
            frequencies,
            impedance,
        })
    }
}

fn is_physical(z: &Complex64) -> bool {
    z.re >= 0. && z.im < 0.
}

/// All spectra of a measurement campaign, grouped by cycle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Spectra(BTreeMap<CycleId, CycleSpectrum>);

impl Spectra {
    /// Group samples by cycle, keeping the order in which rows of each cycle were recorded
    #[must_use]
    pub fn from_samples(samples: impl IntoIterator<Item = SpectrumSample>) -> Self {
        let mut spectra: BTreeMap<CycleId, CycleSpectrum> = BTreeMap::new();
        for sample in samples {
            spectra
                .entry(sample.cycle)
                .or_insert_with(|| CycleSpectrum::new(sample.cycle, vec![], vec![]))
                .push(sample.frequency, sample.impedance);
        }
        Self(spectra)
    }

    /// Cycle ids in ascending numeric order
    pub fn cycles(&self) -> impl Iterator<Item = CycleId> + '_ {
        self.0.keys().copied()
    }

    #[must_use]
    pub fn get(&self, cycle: CycleId) -> Option<&CycleSpectrum> {
        self.0.get(&cycle)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CycleSpectrum> {
        self.0.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<CycleSpectrum> for Spectra {
    fn from_iter<T: IntoIterator<Item = CycleSpectrum>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|spectrum| (spectrum.cycle, spectrum))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use num_complex::Complex64;
    use proptest::prelude::*;

    use super::{CycleId, CycleSpectrum, Spectra, SpectrumSample};
    use crate::Error;

    #[test]
    fn raw_reactance_is_sign_flipped() {
        let sample = SpectrumSample::from_raw(CycleId(3), 10., 0.4, 0.02);
        assert_eq!(sample.impedance, Complex64::new(0.4, -0.02));
    }

    #[test]
    fn inductive_and_negative_resistance_points_are_removed() {
        let spectrum = CycleSpectrum::new(
            CycleId(1),
            vec![1e4, 1e3, 1e2, 1e1, 1.],
            vec![
                Complex64::new(0.40, 0.03),
                Complex64::new(-0.01, -0.01),
                Complex64::new(0.45, -0.02),
                Complex64::new(0.50, 0.),
                Complex64::new(0.60, -0.08),
            ],
        );

        let filtered = spectrum.first_quadrant().unwrap();

        assert_eq!(filtered.frequencies(), &[1e2, 1.]);
        assert_eq!(
            filtered.impedance(),
            &[Complex64::new(0.45, -0.02), Complex64::new(0.60, -0.08)]
        );
        assert_eq!(filtered.cycle(), CycleId(1));
    }

    #[test]
    fn spectrum_without_physical_points_is_rejected() {
        let spectrum = CycleSpectrum::new(
            CycleId(7),
            vec![1e3, 1e2],
            vec![Complex64::new(0.4, 0.1), Complex64::new(-0.2, -0.1)],
        );

        match spectrum.first_quadrant() {
            Err(Error::EmptySpectrumAfterFilter { cycle }) => assert_eq!(cycle, CycleId(7)),
            other => panic!("expected an empty spectrum error, got {other:?}"),
        }
    }

    #[test]
    fn samples_are_grouped_by_ascending_cycle_in_recorded_order() {
        let samples = [
            SpectrumSample::from_raw(CycleId(10), 100., 0.5, 0.1),
            SpectrumSample::from_raw(CycleId(2), 100., 0.4, 0.1),
            SpectrumSample::from_raw(CycleId(10), 10., 0.6, 0.2),
            SpectrumSample::from_raw(CycleId(2), 10., 0.5, 0.2),
        ];

        let spectra = Spectra::from_samples(samples);

        assert_eq!(
            spectra.cycles().collect::<Vec<_>>(),
            vec![CycleId(2), CycleId(10)]
        );
        assert_eq!(spectra.get(CycleId(10)).unwrap().frequencies(), &[100., 10.]);
    }

    proptest! {
        #[test]
        fn filtering_is_idempotent(
            points in prop::collection::vec((0.01f64..1e5, -1.0f64..1.0, -1.0f64..1.0), 1..64)
        ) {
            let (frequencies, impedance): (Vec<f64>, Vec<Complex64>) = points
                .into_iter()
                .map(|(f, re, im)| (f, Complex64::new(re, im)))
                .unzip();
            let spectrum = CycleSpectrum::new(CycleId(1), frequencies, impedance);

            if let Ok(once) = spectrum.first_quadrant() {
                let twice = once.first_quadrant().unwrap();
                prop_assert_eq!(once, twice);
            }
        }
    }
}
