//! Immutable per-tick view of the world handed to external consumers.

use crate::entity::EntityView;
use crate::registry::Registry;
use ecosim_core::{ExtinctionFlags, PopulationStats, Species, SpeciesStats, SpeciesTally};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Completed ticks since the last reset
    pub step_count: u64,
    pub world_width: i32,
    pub world_height: i32,
    pub species_counts: SpeciesTally,
    pub cumulative_births: u64,
    pub cumulative_deaths: u64,
    pub births_by_species: SpeciesTally,
    pub deaths_by_species: SpeciesTally,
    /// Every live entity in id order
    pub entities: Vec<EntityView>,
    pub extinction: ExtinctionFlags,
    /// Spawns skipped during the last tick for lack of a free cell
    pub saturation_warnings: u64,
    pub stats: PopulationStats,
}

impl Snapshot {
    pub(crate) fn capture(registry: &Registry, step_count: u64, saturation_warnings: u64) -> Self {
        let counts = registry.counts();
        let totals = registry.totals();
        let stats_for = |species: Species| {
            SpeciesStats::from_samples(registry.entities_of(species).map(|e| (e.energy, e.age)))
        };

        Self {
            step_count,
            world_width: registry.grid().width(),
            world_height: registry.grid().height(),
            species_counts: counts,
            cumulative_births: totals.births,
            cumulative_deaths: totals.deaths,
            births_by_species: registry.births(),
            deaths_by_species: registry.deaths(),
            entities: registry.iter().map(EntityView::from).collect(),
            extinction: ExtinctionFlags::from_counts(&counts),
            saturation_warnings,
            stats: PopulationStats {
                grass: stats_for(Species::Grass),
                cow: stats_for(Species::Cow),
                tiger: stats_for(Species::Tiger),
            },
        }
    }

    pub fn entities_of(&self, species: Species) -> impl Iterator<Item = &EntityView> + '_ {
        self.entities.iter().filter(move |e| e.species == species)
    }
}
