use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, Topology};
use crate::fit::FitConfig;
use crate::sweep::{Seeding, SweepConfig};
use crate::{Error, Result};

/// Where the reference capacity of each cycle is read from
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CapacitySource {
    pub path: PathBuf,
    /// Zero-based column holding the capacity, which differs between test benches
    pub column: usize,
}

/// Description of one analysis run, usually read from a TOML file
///
/// ```toml
/// spectra = "EIS_state_V_45C02.txt"
/// circuit = "randles"
/// stride = 10
///
/// [capacity]
/// path = "Data_Capacity_45C02.txt"
/// column = 3
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Impedance log
    pub spectra: PathBuf,
    /// Preset name (`randles`, `randles-with-rc`) or a circuit string
    #[serde(default = "default_circuit")]
    pub circuit: String,
    /// Required for custom circuits, presets fall back to their own starting point
    #[serde(default)]
    pub initial_guess: Option<Vec<f64>>,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub seeding: Seeding,
    #[serde(default)]
    pub fit: FitConfig,
    /// Capacity log, without it only parameter trends are produced
    #[serde(default)]
    pub capacity: Option<CapacitySource>,
}

fn default_circuit() -> String {
    "randles".to_owned()
}

const fn default_stride() -> usize {
    1
}

impl AnalysisConfig {
    /// Read a configuration file. Relative data paths are resolved against the directory of the
    /// configuration file.
    ///
    /// # Errors
    /// Returns [`Error::DataLoad`] if the file cannot be read and [`Error::Config`] if it is not
    /// a valid configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::data_load(path, e))?;
        let mut config: Self = toml::from_str(&contents)?;

        if let Some(base) = path.parent() {
            config.spectra = base.join(&config.spectra);
            if let Some(capacity) = config.capacity.as_mut() {
                capacity.path = base.join(&capacity.path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that deserialise but cannot describe a run
    ///
    /// # Errors
    /// Returns [`Error::Config`] for a zero stride, non-positive tolerances or an iteration
    /// budget of zero, and propagates circuit and initial guess errors.
    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::Config("stride must be at least 1".to_owned()));
        }
        if self.fit.max_iters == 0 {
            return Err(Error::Config("fit.max_iters must be at least 1".to_owned()));
        }
        if !(self.fit.ftol > 0. && self.fit.xtol > 0. && self.fit.gtol > 0.) {
            return Err(Error::Config(
                "fit.ftol, fit.xtol and fit.gtol must be positive".to_owned(),
            ));
        }
        if let Some(tolerance) = self.fit.residual_tolerance {
            if tolerance.is_nan() || tolerance <= 0. {
                return Err(Error::Config(
                    "fit.residual_tolerance must be positive".to_owned(),
                ));
            }
        }
        let circuit = self.circuit()?;
        self.sweep_config(&circuit).map(|_| ())
    }

    /// # Errors
    /// Returns [`Error::CircuitSyntax`] when the circuit string does not parse.
    pub fn circuit(&self) -> Result<Circuit> {
        self.circuit.parse()
    }

    /// # Errors
    /// Returns [`Error::Config`] when a custom circuit has no initial guess and
    /// [`Error::ParameterCountMismatch`] when the guess does not fit the circuit.
    pub fn sweep_config(&self, circuit: &Circuit) -> Result<SweepConfig> {
        let initial_guess = match &self.initial_guess {
            Some(guess) => guess.clone(),
            None => preset(circuit)
                .map(Topology::initial_guess)
                .ok_or_else(|| {
                    Error::Config(format!("circuit `{circuit}` needs an initial_guess"))
                })?,
        };
        circuit.check_params(&initial_guess)?;

        Ok(SweepConfig {
            stride: self.stride,
            seeding: self.seeding,
            initial_guess,
            fit: self.fit.clone(),
        })
    }
}

fn preset(circuit: &Circuit) -> Option<Topology> {
    [Topology::Randles, Topology::RandlesWithRc]
        .into_iter()
        .find(|topology| topology.description() == circuit.description())
}
