use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::fit::{fit_spectrum, FitConfig, FittedParameters};
use crate::spectrum::{CycleId, CycleSpectrum, Spectra};
use crate::{Error, Result};

/// How the fit of each cycle is seeded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Seeding {
    /// Every cycle starts from the configured initial guess
    #[default]
    Fixed,
    /// Each cycle starts from the most recent successful fit. A cycle which fails from the warm
    /// start is retried once from the configured initial guess.
    WarmStart,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SweepConfig {
    /// Fit every `stride`th cycle of the ascending cycle list, starting with the first
    pub stride: usize,
    pub seeding: Seeding,
    pub initial_guess: Vec<f64>,
    pub fit: FitConfig,
}

/// Result of fitting one cycle: the parameters, or why the cycle was skipped
pub type CycleOutcome = Result<FittedParameters>;

/// Fitted parameters of every visited cycle, keyed by cycle id
#[derive(Debug)]
pub struct SweepResult {
    parameter_names: Vec<String>,
    outcomes: BTreeMap<CycleId, CycleOutcome>,
}

impl SweepResult {
    #[must_use]
    pub fn parameter_names(&self) -> &[String] {
        &self.parameter_names
    }

    #[must_use]
    pub const fn outcomes(&self) -> &BTreeMap<CycleId, CycleOutcome> {
        &self.outcomes
    }

    #[must_use]
    pub fn get(&self, cycle: CycleId) -> Option<&CycleOutcome> {
        self.outcomes.get(&cycle)
    }

    /// Successfully fitted cycles in ascending order
    pub fn fitted(&self) -> impl Iterator<Item = (CycleId, &FittedParameters)> {
        self.outcomes
            .iter()
            .filter_map(|(cycle, outcome)| outcome.as_ref().ok().map(|params| (*cycle, params)))
    }

    /// Skipped cycles in ascending order, with the reason
    pub fn failures(&self) -> impl Iterator<Item = (CycleId, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|(cycle, outcome)| outcome.as_ref().err().map(|err| (*cycle, err)))
    }

    /// Trend of one parameter across the fitted cycles, or `None` for an unknown name
    #[must_use]
    pub fn parameter_series(&self, name: &str) -> Option<BTreeMap<CycleId, f64>> {
        let index = self.parameter_names.iter().position(|n| n == name)?;
        Some(
            self.fitted()
                .map(|(cycle, params)| (cycle, params.values()[index]))
                .collect(),
        )
    }

    /// Fitted cycles as a feature matrix, one row per cycle in ascending order
    #[must_use]
    pub fn feature_matrix(&self) -> (Vec<CycleId>, Array2<f64>) {
        let fitted: Vec<_> = self.fitted().collect();
        let mut matrix = Array2::zeros((fitted.len(), self.parameter_names.len()));
        for (mut row, (_, params)) in matrix.rows_mut().into_iter().zip(&fitted) {
            row.assign(&ArrayView1::from(params.values()));
        }
        (fitted.iter().map(|(cycle, _)| *cycle).collect(), matrix)
    }

    #[must_use]
    pub fn summary(&self) -> SweepSummary {
        let fitted = self.fitted().count();
        SweepSummary {
            fitted,
            skipped: self.outcomes.len() - fitted,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepSummary {
    pub fitted: usize,
    pub skipped: usize,
}

impl fmt::Display for SweepSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fitted, {} skipped", self.fitted, self.skipped)
    }
}

/// Fit `circuit` to the spectrum of every visited cycle.
///
/// Cycles are visited in ascending id order. Failures of individual cycles are recorded in the
/// result and never stop the sweep.
///
/// # Errors
/// Returns [`Error::Config`] for a zero stride and [`Error::ParameterCountMismatch`] when the
/// initial guess does not match the circuit. Solver and linear algebra failures, which do not
/// belong to any one cycle, abort the sweep.
pub fn sweep(spectra: &Spectra, circuit: &Circuit, config: &SweepConfig) -> Result<SweepResult> {
    if config.stride == 0 {
        return Err(Error::Config("sweep stride must be at least 1".to_owned()));
    }
    circuit.check_params(&config.initial_guess)?;

    let mut outcomes = BTreeMap::new();
    let mut previous: Option<Vec<f64>> = None;

    for spectrum in spectra.iter().step_by(config.stride) {
        let warm = match config.seeding {
            Seeding::Fixed => None,
            Seeding::WarmStart => previous.as_deref(),
        };

        let outcome = match warm {
            Some(seed) => match fit_cycle(spectrum, circuit, seed, &config.fit) {
                // Only the solve depends on the seed
                Err(err @ Error::FitDidNotConverge { .. }) => {
                    log::debug!(
                        "cycle {} failed from warm start ({err}), retrying from the initial guess",
                        spectrum.cycle()
                    );
                    fit_cycle(spectrum, circuit, &config.initial_guess, &config.fit)
                }
                other => other,
            },
            None => fit_cycle(spectrum, circuit, &config.initial_guess, &config.fit),
        };

        let outcome = match outcome {
            Ok(params) => {
                log::debug!(
                    "cycle {} fitted in {} iterations, rms residual {:e}",
                    spectrum.cycle(),
                    params.iterations(),
                    params.rms_residual()
                );
                previous = Some(params.values().to_vec());
                Ok(params)
            }
            Err(err) if err.is_per_cycle() => {
                log::warn!("skipping cycle {}: {err}", spectrum.cycle());
                Err(err)
            }
            Err(err) => return Err(err),
        };
        outcomes.insert(spectrum.cycle(), outcome);
    }

    let result = SweepResult {
        parameter_names: circuit.parameter_names().to_vec(),
        outcomes,
    };
    log::info!("{circuit} sweep: {}", result.summary());
    Ok(result)
}

fn fit_cycle(
    spectrum: &CycleSpectrum,
    circuit: &Circuit,
    initial_guess: &[f64],
    config: &FitConfig,
) -> CycleOutcome {
    let filtered = spectrum.first_quadrant()?;
    fit_spectrum(&filtered, circuit, initial_guess, config)
}
