//! Population registry: owns every entity and keeps the grid index in sync.

use crate::entity::Entity;
use crate::grid::Grid;
use ecosim_core::{DeathCause, EntityId, Error, Position, Result, Species, SpeciesTally, Totals};
use std::collections::BTreeMap;
use tracing::error;

/// Owner of all entities of a run.
///
/// Ids are handed out in increasing order and entities are keyed by id, so
/// iterating the map is insertion order. The grid is only ever mutated from
/// here, which keeps "alive in the registry" and "indexed in the grid" the
/// same set.
#[derive(Debug, Clone)]
pub struct Registry {
    grid: Grid,
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
    live: SpeciesTally,
    births: SpeciesTally,
    deaths: SpeciesTally,
}

impl Registry {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            grid: Grid::new(width, height),
            entities: BTreeMap::new(),
            next_id: 1,
            live: SpeciesTally::default(),
            births: SpeciesTally::default(),
            deaths: SpeciesTally::default(),
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Add a live entity at `position`. Fails if the cell is outside the
    /// world or already holds this species.
    pub fn spawn(
        &mut self,
        species: Species,
        position: Position,
        energy: i32,
        birth_step: u64,
    ) -> Result<EntityId> {
        if !self.grid.contains(position) {
            return Err(Error::Validation(format!(
                "{species} spawn outside the world at {position}"
            )));
        }
        if self.grid.is_occupied_by(position, species) {
            return Err(Error::NotFound(format!(
                "{position} already holds a {species}"
            )));
        }

        let id = EntityId(self.next_id);
        self.next_id += 1;

        self.grid.insert(position, species, id)?;
        self.entities
            .insert(id, Entity::new(id, species, position, energy, birth_step));
        self.live.increment(species);
        Ok(id)
    }

    /// Spawn as a birth, counted in the cumulative totals.
    pub fn spawn_birth(
        &mut self,
        species: Species,
        position: Position,
        energy: i32,
        birth_step: u64,
    ) -> Result<EntityId> {
        let id = self.spawn(species, position, energy, birth_step)?;
        self.births.increment(species);
        Ok(id)
    }

    /// Mark an entity dead and drop it from the grid right away. The record
    /// stays until [`Registry::purge_dead`]. Unknown or already dead ids are
    /// ignored.
    pub fn kill(&mut self, id: EntityId, cause: DeathCause) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        if !entity.is_alive() {
            return;
        }

        entity.mark_dead(cause);
        let (position, species) = (entity.position(), entity.species);
        if let Err(e) = self.grid.remove(position, species, id) {
            error!(error = %e, "Grid index out of sync while removing a dead entity");
        }
        *self.live.get_mut(species) -= 1;
        self.deaths.increment(species);
    }

    /// Move a live entity. Returns false, changing nothing, if the
    /// destination is outside the world or holds the same species.
    pub fn move_entity(&mut self, id: EntityId, new_position: Position) -> bool {
        let Some(entity) = self.entities.get(&id) else {
            return false;
        };
        if !entity.is_alive() {
            return false;
        }

        let (from, species) = (entity.position(), entity.species);
        if from == new_position {
            return true;
        }
        if !self.grid.contains(new_position) || self.grid.is_occupied_by(new_position, species) {
            return false;
        }

        if self.grid.remove(from, species, id).is_err() || self.grid.insert(new_position, species, id).is_err() {
            return false;
        }
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.move_to(new_position);
        }
        true
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutable access for energy and counters. Position and liveness can
    /// only change through the registry.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn is_alive(&self, id: EntityId) -> bool {
        self.entities.get(&id).is_some_and(Entity::is_alive)
    }

    /// Live entities of a species in insertion order
    pub fn entities_of(&self, species: Species) -> impl Iterator<Item = &Entity> + '_ {
        self.entities
            .values()
            .filter(move |e| e.species == species && e.is_alive())
    }

    /// Ids of the live entities of a species, in insertion order
    pub fn ids_of(&self, species: Species) -> Vec<EntityId> {
        self.entities_of(species).map(|e| e.id).collect()
    }

    /// All live entities in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values().filter(|e| e.is_alive())
    }

    pub fn counts(&self) -> SpeciesTally {
        self.live
    }

    pub fn count(&self, species: Species) -> usize {
        self.live.get(species) as usize
    }

    pub fn totals(&self) -> Totals {
        Totals {
            births: self.births.total(),
            deaths: self.deaths.total(),
        }
    }

    pub fn births(&self) -> SpeciesTally {
        self.births
    }

    pub fn deaths(&self) -> SpeciesTally {
        self.deaths
    }

    /// Remove dead records, returning them in id order.
    pub fn purge_dead(&mut self) -> Vec<Entity> {
        let dead: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| !e.is_alive())
            .map(|e| e.id)
            .collect();

        dead.into_iter()
            .filter_map(|id| self.entities.remove(&id))
            .collect()
    }

    /// Drop every entity and counter and start a new run on a fresh grid.
    pub fn clear(&mut self, width: i32, height: i32) {
        *self = Self::new(width, height);
    }

    /// Verify that the live set and the grid index agree.
    pub fn check_invariants(&self) -> Result<()> {
        let mut live = SpeciesTally::default();

        for entity in self.iter() {
            live.increment(entity.species);
            let indexed = self.grid.occupant(entity.position(), entity.species);
            if indexed != Some(entity.id) {
                return Err(Error::InvariantViolation(format!(
                    "{} {} at {} indexed as {:?}",
                    entity.species,
                    entity.id,
                    entity.position(),
                    indexed
                )));
            }
        }

        if live != self.live {
            return Err(Error::InvariantViolation(format!(
                "live counts {:?} disagree with tracked {:?}",
                live, self.live
            )));
        }

        for species in Species::ALL {
            if self.grid.occupied_count(species) as u64 != live.get(species) {
                return Err(Error::InvariantViolation(format!(
                    "grid indexes {} {} but {} are alive",
                    self.grid.occupied_count(species),
                    species,
                    live.get(species)
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::new(20, 20)
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut reg = registry();
        let a = reg.spawn(Species::Cow, Position::new(1, 1), 10, 0).unwrap();
        let b = reg.spawn(Species::Cow, Position::new(2, 1), 10, 0).unwrap();
        reg.kill(a, DeathCause::Starvation);
        reg.purge_dead();
        let c = reg.spawn(Species::Cow, Position::new(1, 1), 10, 0).unwrap();

        assert!(a < b && b < c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_spawn_rejects_same_species_on_cell() {
        let mut reg = registry();
        let pos = Position::new(4, 4);
        reg.spawn(Species::Grass, pos, 0, 0).unwrap();
        reg.spawn(Species::Cow, pos, 10, 0).unwrap();
        assert!(reg.spawn(Species::Cow, pos, 10, 0).is_err());
        assert!(reg.spawn(Species::Tiger, Position::new(20, 0), 10, 0).is_err());
        assert_eq!(reg.counts().total(), 2);
        reg.check_invariants().unwrap();
    }

    #[test]
    fn test_kill_removes_from_grid_immediately() {
        let mut reg = registry();
        let pos = Position::new(3, 3);
        let id = reg.spawn(Species::Cow, pos, 10, 0).unwrap();

        reg.kill(id, DeathCause::Predation);
        assert!(!reg.grid().is_occupied_by(pos, Species::Cow));
        assert!(!reg.is_alive(id));
        assert_eq!(reg.count(Species::Cow), 0);
        // Record still present until purged
        assert!(reg.get(id).is_some());
        reg.check_invariants().unwrap();

        // Killing twice does not double count
        reg.kill(id, DeathCause::Predation);
        assert_eq!(reg.totals().deaths, 1);

        let purged = reg.purge_dead();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].death_cause(), Some(DeathCause::Predation));
        assert!(reg.get(id).is_none());
    }

    #[test]
    fn test_move_entity_is_noop_on_conflict() {
        let mut reg = registry();
        let a = reg.spawn(Species::Tiger, Position::new(0, 0), 10, 0).unwrap();
        reg.spawn(Species::Tiger, Position::new(1, 0), 10, 0).unwrap();
        reg.spawn(Species::Cow, Position::new(0, 1), 10, 0).unwrap();

        assert!(!reg.move_entity(a, Position::new(1, 0)));
        assert!(!reg.move_entity(a, Position::new(-1, 0)));
        assert_eq!(reg.get(a).unwrap().position(), Position::new(0, 0));

        // Sharing a cell with another species is fine
        assert!(reg.move_entity(a, Position::new(0, 1)));
        assert_eq!(reg.get(a).unwrap().position(), Position::new(0, 1));
        assert!(reg.grid().is_occupied_by(Position::new(0, 1), Species::Tiger));
        assert!(!reg.grid().is_occupied_by(Position::new(0, 0), Species::Tiger));
        reg.check_invariants().unwrap();
    }

    #[test]
    fn test_entities_of_preserves_insertion_order() {
        let mut reg = registry();
        let ids: Vec<_> = (0..5)
            .map(|i| reg.spawn(Species::Cow, Position::new(i, 0), 10, 0).unwrap())
            .collect();
        reg.spawn(Species::Tiger, Position::new(9, 9), 10, 0).unwrap();
        reg.kill(ids[2], DeathCause::OldAge);

        let listed = reg.ids_of(Species::Cow);
        assert_eq!(listed, vec![ids[0], ids[1], ids[3], ids[4]]);
    }

    #[test]
    fn test_totals_count_births_and_deaths() {
        let mut reg = registry();
        reg.spawn(Species::Cow, Position::new(0, 0), 10, 0).unwrap();
        let child = reg.spawn_birth(Species::Cow, Position::new(1, 0), 10, 1).unwrap();
        reg.kill(child, DeathCause::Starvation);

        assert_eq!(reg.totals(), Totals { births: 1, deaths: 1 });
        assert_eq!(reg.births().cow, 1);
        assert_eq!(reg.deaths().cow, 1);

        reg.clear(30, 25);
        assert_eq!(reg.totals(), Totals::default());
        assert_eq!(reg.counts().total(), 0);
        assert_eq!((reg.grid().width(), reg.grid().height()), (30, 25));
        assert_eq!(reg.grid().indexed_count(), 0);
    }

    #[test]
    fn test_kill_survives_unindexed_entity() {
        let mut reg = registry();
        let pos = Position::new(5, 5);
        let id = reg.spawn(Species::Tiger, pos, 10, 0).unwrap();
        // Knock the grid out of sync behind the registry's back
        reg.grid.remove(pos, Species::Tiger, id).unwrap();

        reg.kill(id, DeathCause::OldAge);

        assert!(!reg.is_alive(id));
        assert_eq!(reg.count(Species::Tiger), 0);
        assert_eq!(reg.deaths().tiger, 1);
        reg.check_invariants().unwrap();
    }
}
