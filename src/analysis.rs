use ndarray::Array2;

use crate::capacity::CapacitySeries;
use crate::config::AnalysisConfig;
use crate::correlation::{correlate_all, Correlation};
use crate::io::{load_capacity, load_spectra};
use crate::scaling::Standardizer;
use crate::spectrum::CycleId;
use crate::sweep::{sweep, SweepResult};
use crate::Result;

/// Everything produced by one analysis run
#[derive(Debug)]
pub struct Analysis {
    pub sweep: SweepResult,
    pub capacity: Option<CapacitySeries>,
    /// Correlation of each circuit parameter with capacity, empty without a capacity log
    pub correlations: Vec<(String, Result<Correlation>)>,
}

/// Standardised circuit parameters, ready for a regression back end
#[derive(Clone, Debug)]
pub struct FeatureSet {
    pub cycles: Vec<CycleId>,
    pub scaled: Array2<f64>,
    /// Scaling learnt from this set, to be applied unchanged to test data
    pub standardizer: Standardizer,
}

impl Analysis {
    /// # Errors
    /// Returns [`crate::Error::DimensionMismatch`] when no cycle was fitted.
    pub fn features(&self) -> Result<FeatureSet> {
        let (cycles, features) = self.sweep.feature_matrix();
        let standardizer = Standardizer::fit(&features)?;
        let scaled = standardizer.transform(&features)?;
        Ok(FeatureSet {
            cycles,
            scaled,
            standardizer,
        })
    }
}

/// Load the inputs named in `config`, fit every visited cycle, and correlate the parameter
/// trends with capacity.
///
/// # Errors
/// Invalid configuration and unreadable input files abort the run. Failures of individual
/// cycles or correlations are kept in the returned [`Analysis`].
pub fn run(config: &AnalysisConfig) -> Result<Analysis> {
    config.validate()?;
    let circuit = config.circuit()?;
    let sweep_config = config.sweep_config(&circuit)?;

    let spectra = load_spectra(&config.spectra)?;
    let capacity = config
        .capacity
        .as_ref()
        .map(|source| load_capacity(&source.path, source.column))
        .transpose()?;
    log::info!(
        "loaded {} spectra from {}",
        spectra.len(),
        config.spectra.display()
    );

    let sweep = sweep(&spectra, &circuit, &sweep_config)?;

    let correlations = capacity
        .as_ref()
        .map(|capacity| correlate_all(&sweep, capacity))
        .unwrap_or_default();
    for (name, correlation) in &correlations {
        match correlation {
            Ok(c) => log::info!(
                "{name}: correlation with capacity {:.4} over {} cycles",
                c.coefficient,
                c.samples
            ),
            Err(err) => log::warn!("{name}: {err}"),
        }
    }

    Ok(Analysis {
        sweep,
        capacity,
        correlations,
    })
}
