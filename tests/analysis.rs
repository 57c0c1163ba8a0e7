use std::path::{Path, PathBuf};

use serde::Serialize;
use tempdir::TempDir;

use eis_health::analysis;
use eis_health::circuit::Topology;
use eis_health::config::{AnalysisConfig, CapacitySource};
use eis_health::fit::FitConfig;
use eis_health::spectrum::CycleId;
use eis_health::sweep::Seeding;
use eis_health::{Error, Result};

#[derive(Serialize)]
struct SpectrumRow {
    index: usize,
    cycle_number: f64,
    frequency: f64,
    real: f64,
    imag: f64,
}

#[derive(Serialize)]
struct CapacityRow {
    index: usize,
    cycle_number: u32,
    control: u8,
    discharge: f64,
}

/// Randles parameters of a cell whose resistances grow and capacitances shrink by 1 % per cycle
fn aged_parameters(cycle: u32) -> Vec<f64> {
    let ageing = 1. + 0.01 * f64::from(cycle);
    Topology::Randles
        .initial_guess()
        .into_iter()
        .enumerate()
        .map(|(ii, p)| if ii == 2 || ii == 6 { p / ageing } else { p * ageing })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn frequencies(points: usize) -> Vec<f64> {
    (0..points)
        .map(|n| 10f64.powf(4. - 8. * n as f64 / (points - 1) as f64))
        .collect()
}

/// Write an impedance log. Cycles in `inductive` only contain non-physical readings.
fn write_spectra(dir: &Path, cycles: &[u32], inductive: &[u32]) -> PathBuf {
    let path = dir.join("eis.txt");
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .unwrap();

    let circuit = Topology::Randles.circuit();
    let mut index = 0;
    for &cycle in cycles {
        let frequencies = frequencies(80);
        let impedance = circuit.predict(&aged_parameters(cycle), &frequencies);
        for (frequency, z) in frequencies.into_iter().zip(impedance) {
            let imag = if inductive.contains(&cycle) {
                -z.im.abs() - 1e-3
            } else {
                -z.im
            };
            wtr.serialize(SpectrumRow {
                index,
                cycle_number: f64::from(cycle),
                frequency,
                real: z.re,
                imag,
            })
            .unwrap();
            index += 1;
        }
    }
    wtr.flush().unwrap();
    path
}

/// Write a capacity log with a linear fade and a few partial readings per cycle
fn write_capacity(dir: &Path, cycles: &[u32]) -> PathBuf {
    let path = dir.join("capacity.txt");
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .unwrap();

    let mut index = 0;
    for &cycle in cycles {
        let full = 0.1f64.mul_add(-f64::from(cycle), 50.);
        for (control, fraction) in [(0, 0.2), (1, 1.0), (0, 0.7)] {
            wtr.serialize(CapacityRow {
                index,
                cycle_number: cycle,
                control,
                discharge: full * fraction,
            })
            .unwrap();
            index += 1;
        }
    }
    wtr.flush().unwrap();
    path
}

fn write_config(dir: &Path, config: &AnalysisConfig) -> PathBuf {
    let path = dir.join("analysis.toml");
    std::fs::write(&path, toml::to_string(config).unwrap()).unwrap();
    path
}

fn config(spectra: &str, capacity: Option<&str>) -> AnalysisConfig {
    AnalysisConfig {
        spectra: PathBuf::from(spectra),
        circuit: "randles".to_owned(),
        initial_guess: None,
        stride: 1,
        seeding: Seeding::Fixed,
        fit: FitConfig::default(),
        capacity: capacity.map(|path| CapacitySource {
            path: PathBuf::from(path),
            column: 3,
        }),
    }
}

#[test]
fn resistance_trend_tracks_capacity_fade() -> Result<()> {
    let dir = TempDir::new("resistance_trend").unwrap();
    let cycles = [1, 2, 3, 4, 5, 6];
    write_spectra(dir.path(), &cycles, &[4]);
    write_capacity(dir.path(), &cycles);
    let config_path = write_config(dir.path(), &config("eis.txt", Some("capacity.txt")));

    let config = AnalysisConfig::from_file(&config_path)?;
    let analysis = analysis::run(&config)?;

    let summary = analysis.sweep.summary();
    assert_eq!(summary.to_string(), "5 fitted, 1 skipped");
    assert!(matches!(
        analysis.sweep.get(CycleId(4)).unwrap(),
        Err(Error::EmptySpectrumAfterFilter { cycle: CycleId(4) })
    ));

    let capacity = analysis.capacity.as_ref().unwrap();
    approx::assert_relative_eq!(capacity.get(CycleId(2)).unwrap(), 49.8);

    assert_eq!(analysis.correlations.len(), 7);
    let (name, r0) = &analysis.correlations[0];
    assert_eq!(name, "R0");
    let r0 = r0.as_ref().unwrap();
    assert_eq!(r0.samples, 5);
    assert!(r0.coefficient < -0.999);

    let c1 = analysis
        .correlations
        .iter()
        .find(|(name, _)| name == "C1")
        .and_then(|(_, c)| c.as_ref().ok())
        .unwrap();
    assert!(c1.coefficient > 0.99);

    let features = analysis.features()?;
    assert_eq!(features.cycles.len(), 5);
    assert_eq!(features.scaled.dim(), (5, 7));
    Ok(())
}

#[test]
fn strided_trend_analysis_runs_without_capacity() -> Result<()> {
    let dir = TempDir::new("strided").unwrap();
    let cycles: Vec<u32> = (0..12).map(|n| n * 5).collect();
    write_spectra(dir.path(), &cycles, &[]);

    let mut config = config("eis.txt", None);
    config.stride = 5;
    config.seeding = Seeding::WarmStart;
    let config_path = write_config(dir.path(), &config);

    let analysis = analysis::run(&AnalysisConfig::from_file(&config_path)?)?;

    assert_eq!(
        analysis.sweep.outcomes().keys().copied().collect::<Vec<_>>(),
        vec![CycleId(0), CycleId(25), CycleId(50)]
    );
    assert!(analysis.correlations.is_empty());
    let tau = analysis.sweep.parameter_series("Ws1_1").unwrap();
    for (cycle, value) in tau {
        approx::assert_relative_eq!(value, aged_parameters(cycle.0)[5], max_relative = 1e-4);
    }
    Ok(())
}

#[test]
fn missing_input_files_abort_the_run() {
    let dir = TempDir::new("missing_inputs").unwrap();
    let config_path = write_config(dir.path(), &config("absent.txt", None));

    let config = AnalysisConfig::from_file(&config_path).unwrap();
    let result = analysis::run(&config);

    assert!(matches!(result, Err(Error::DataLoad { .. })));
}

#[test]
fn missing_capacity_file_aborts_before_fitting() {
    let dir = TempDir::new("missing_capacity").unwrap();
    write_spectra(dir.path(), &[1, 2], &[]);
    let config_path = write_config(dir.path(), &config("eis.txt", Some("absent.txt")));

    let result = analysis::run(&AnalysisConfig::from_file(&config_path).unwrap());

    assert!(matches!(result, Err(Error::DataLoad { .. })));
}

#[test]
fn capacity_without_common_cycles_reports_alignment_mismatch() -> Result<()> {
    let dir = TempDir::new("misaligned").unwrap();
    write_spectra(dir.path(), &[1, 2, 3], &[]);
    write_capacity(dir.path(), &[10, 11, 12]);
    let config_path = write_config(dir.path(), &config("eis.txt", Some("capacity.txt")));

    let analysis = analysis::run(&AnalysisConfig::from_file(&config_path)?)?;

    assert_eq!(analysis.sweep.summary().fitted, 3);
    for (_, correlation) in &analysis.correlations {
        assert!(matches!(correlation, Err(Error::AlignmentMismatch)));
    }
    Ok(())
}
