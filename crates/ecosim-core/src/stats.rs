//! Population statistics and history tracking.

use crate::types::Species;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Number of samples kept by [`PopulationHistory`]
pub const HISTORY_CAPACITY: usize = 100;

/// One counter per species
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesTally {
    pub grass: u64,
    pub cow: u64,
    pub tiger: u64,
}

impl SpeciesTally {
    pub fn get(&self, species: Species) -> u64 {
        match species {
            Species::Grass => self.grass,
            Species::Cow => self.cow,
            Species::Tiger => self.tiger,
        }
    }

    pub fn get_mut(&mut self, species: Species) -> &mut u64 {
        match species {
            Species::Grass => &mut self.grass,
            Species::Cow => &mut self.cow,
            Species::Tiger => &mut self.tiger,
        }
    }

    pub fn increment(&mut self, species: Species) {
        *self.get_mut(species) += 1;
    }

    pub fn total(&self) -> u64 {
        self.grass + self.cow + self.tiger
    }
}

/// Cumulative births and deaths since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub births: u64,
    pub deaths: u64,
}

/// Which species currently have no living members
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtinctionFlags {
    pub grass: bool,
    pub cow: bool,
    pub tiger: bool,
}

impl ExtinctionFlags {
    pub fn from_counts(counts: &SpeciesTally) -> Self {
        Self {
            grass: counts.grass == 0,
            cow: counts.cow == 0,
            tiger: counts.tiger == 0,
        }
    }

    pub fn is_extinct(&self, species: Species) -> bool {
        match species {
            Species::Grass => self.grass,
            Species::Cow => self.cow,
            Species::Tiger => self.tiger,
        }
    }

    pub fn extinct(&self) -> Vec<Species> {
        Species::ALL
            .into_iter()
            .filter(|s| self.is_extinct(*s))
            .collect()
    }
}

/// Mean energy and age of one species
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeciesStats {
    pub avg_energy: f64,
    pub avg_age: f64,
    pub max_age: u64,
}

impl SpeciesStats {
    /// Aggregate `(energy, age)` pairs.
    pub fn from_samples(samples: impl IntoIterator<Item = (i32, u64)>) -> Self {
        let mut count = 0u64;
        let mut energy = 0i64;
        let mut age = 0u64;
        let mut max_age = 0u64;

        for (e, a) in samples {
            count += 1;
            energy += e as i64;
            age += a;
            max_age = max_age.max(a);
        }

        if count == 0 {
            return Self::default();
        }

        Self {
            avg_energy: energy as f64 / count as f64,
            avg_age: age as f64 / count as f64,
            max_age,
        }
    }
}

/// Per-species aggregates included in every snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationStats {
    pub grass: SpeciesStats,
    pub cow: SpeciesStats,
    pub tiger: SpeciesStats,
}

impl PopulationStats {
    pub fn get(&self, species: Species) -> &SpeciesStats {
        match species {
            Species::Grass => &self.grass,
            Species::Cow => &self.cow,
            Species::Tiger => &self.tiger,
        }
    }
}

/// Species counts after a completed tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopulationSample {
    pub step: u64,
    pub counts: SpeciesTally,
}

/// Bounded ring of the most recent population samples, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PopulationHistory {
    samples: VecDeque<PopulationSample>,
}

impl PopulationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, sample: PopulationSample) {
        if self.samples.len() == HISTORY_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&PopulationSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PopulationSample> + '_ {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<PopulationSample> {
        self.samples.iter().copied().collect()
    }
}
