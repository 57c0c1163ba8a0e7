use std::collections::BTreeMap;

use crate::spectrum::CycleId;

/// Reference capacity of the cell at each cycle
///
/// Several readings are usually logged per cycle; only the highest is kept.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapacitySeries(BTreeMap<CycleId, f64>);

impl CapacitySeries {
    #[must_use]
    pub fn from_readings(readings: impl IntoIterator<Item = (CycleId, f64)>) -> Self {
        let mut series: BTreeMap<CycleId, f64> = BTreeMap::new();
        for (cycle, capacity) in readings {
            series
                .entry(cycle)
                .and_modify(|highest| *highest = highest.max(capacity))
                .or_insert(capacity);
        }
        Self(series)
    }

    #[must_use]
    pub fn get(&self, cycle: CycleId) -> Option<f64> {
        self.0.get(&cycle).copied()
    }

    #[must_use]
    pub const fn as_map(&self) -> &BTreeMap<CycleId, f64> {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Capacity relative to the earliest cycle, the usual state-of-health measure
    ///
    /// Returns an empty series when the first capacity is zero.
    #[must_use]
    pub fn normalised(&self) -> Self {
        match self.0.values().next() {
            Some(&first) if first != 0. => {
                Self(self.0.iter().map(|(cycle, c)| (*cycle, c / first)).collect())
            }
            _ => Self::default(),
        }
    }
}

impl FromIterator<(CycleId, f64)> for CapacitySeries {
    fn from_iter<T: IntoIterator<Item = (CycleId, f64)>>(iter: T) -> Self {
        Self::from_readings(iter)
    }
}
