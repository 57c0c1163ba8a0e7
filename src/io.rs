//! Readers for the tab-delimited measurement logs.
//!
//! Both file kinds start with a single header row. Impedance logs hold one row per frequency
//! point with columns `[index, cycle, frequency, Re(Z), -Im(Z), ...]`. Capacity logs hold
//! `[index, cycle, ...]` with the capacity in a column that differs between test benches.
use std::fs;
use std::path::Path;

use csv::StringRecord;

use crate::capacity::CapacitySeries;
use crate::spectrum::{CycleId, Spectra, SpectrumSample};
use crate::{Error, Result};

const DELIMITER: u8 = b'\t';

const CYCLE_COLUMN: usize = 1;
const FREQUENCY_COLUMN: usize = 2;
const REAL_COLUMN: usize = 3;
const IMAG_COLUMN: usize = 4;

/// Read an impedance log and group its rows by cycle
///
/// # Errors
/// Returns [`Error::DataLoad`] if the file is missing, a row is short, a value does not parse,
/// a cycle id is not a non-negative integer, or a frequency is not positive.
pub fn load_spectra(path: &Path) -> Result<Spectra> {
    let samples = read_rows(path, |record, line| {
        let frequency = field(path, record, line, FREQUENCY_COLUMN)?;
        if !(frequency.is_finite() && frequency > 0.) {
            return Err(Error::data_load(
                path,
                format!("line {line}: frequency {frequency} must be positive"),
            ));
        }
        Ok(SpectrumSample::from_raw(
            cycle(path, record, line)?,
            frequency,
            field(path, record, line, REAL_COLUMN)?,
            field(path, record, line, IMAG_COLUMN)?,
        ))
    })?;
    Ok(Spectra::from_samples(samples))
}

/// Read a capacity log, keeping the highest reading of each cycle
///
/// # Errors
/// Returns [`Error::DataLoad`] if the file is missing, a row has no `capacity_column`, a value
/// does not parse, or a cycle id is not a non-negative integer.
pub fn load_capacity(path: &Path, capacity_column: usize) -> Result<CapacitySeries> {
    if capacity_column == CYCLE_COLUMN {
        return Err(Error::Config(format!(
            "capacity column {capacity_column} is the cycle column"
        )));
    }
    let readings = read_rows(path, |record, line| {
        Ok((
            cycle(path, record, line)?,
            field(path, record, line, capacity_column)?,
        ))
    })?;
    Ok(CapacitySeries::from_readings(readings))
}

fn read_rows<T>(
    path: &Path,
    mut parse: impl FnMut(&StringRecord, u64) -> Result<T>,
) -> Result<Vec<T>> {
    if !path.exists() {
        return Err(Error::data_load(path, "file not found"));
    }

    let file = fs::read(path).map_err(|e| Error::data_load(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(&file[..]);

    let mut rows = vec![];
    for result in rdr.records() {
        let record = result.map_err(|e| Error::data_load(path, e))?;
        let line = record.position().map_or(0, csv::Position::line);
        rows.push(parse(&record, line)?);
    }
    Ok(rows)
}

fn field(path: &Path, record: &StringRecord, line: u64, column: usize) -> Result<f64> {
    let raw = record.get(column).ok_or_else(|| {
        Error::data_load(
            path,
            format!("line {line}: expected at least {} columns", column + 1),
        )
    })?;
    raw.parse().map_err(|_| {
        Error::data_load(
            path,
            format!("line {line}, column {column}: `{raw}` is not a number"),
        )
    })
}

/// Cycle ids are often logged as floats, `12.0` is accepted for cycle 12
fn cycle(path: &Path, record: &StringRecord, line: u64) -> Result<CycleId> {
    let value = field(path, record, line, CYCLE_COLUMN)?;
    if value.is_finite() && value >= 0. && value.fract() == 0. && value <= f64::from(u32::MAX) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Ok(CycleId(value as u32))
    } else {
        Err(Error::data_load(
            path,
            format!("line {line}: `{value}` is not a cycle number"),
        ))
    }
}
