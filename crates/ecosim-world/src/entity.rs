//! Entity state and lifecycle.

use ecosim_core::{DeathCause, EntityId, Position, Species};
use serde::{Deserialize, Serialize};

/// A grass patch, cow or tiger in the simulation
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub species: Species,
    position: Position,
    pub energy: i32,
    pub age: u64,
    alive: bool,
    pub birth_step: u64,
    /// Ticks left before this animal may reproduce again
    pub reproduction_cooldown: u32,
    /// Ticks left idling after a kill
    pub rest: u32,
    pub offspring: u32,
    pub meals: u32,
    death_cause: Option<DeathCause>,
}

impl Entity {
    pub fn new(id: EntityId, species: Species, position: Position, energy: i32, birth_step: u64) -> Self {
        Self {
            id,
            species,
            position,
            energy: energy.max(0),
            age: 0,
            alive: true,
            birth_step,
            reproduction_cooldown: 0,
            rest: 0,
            offspring: 0,
            meals: 0,
            death_cause: None,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn death_cause(&self) -> Option<DeathCause> {
        self.death_cause
    }

    /// Add energy without exceeding `max`.
    pub fn add_energy(&mut self, amount: i32, max: i32) {
        self.energy = (self.energy + amount).min(max).max(self.energy);
    }

    /// Remove energy, stopping at zero. Returns false if the full amount
    /// was not available.
    pub fn consume_energy(&mut self, amount: i32) -> bool {
        if self.energy >= amount {
            self.energy -= amount;
            true
        } else {
            self.energy = 0;
            false
        }
    }

    pub fn tick(&mut self) {
        self.age += 1;
        self.reproduction_cooldown = self.reproduction_cooldown.saturating_sub(1);
    }

    pub(crate) fn move_to(&mut self, new_position: Position) {
        self.position = new_position;
    }

    pub(crate) fn mark_dead(&mut self, cause: DeathCause) {
        self.alive = false;
        self.death_cause = Some(cause);
    }
}

/// Read-only view of an entity for snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityView {
    pub id: EntityId,
    pub species: Species,
    pub position: Position,
    pub energy: i32,
    pub age: u64,
}

impl From<&Entity> for EntityView {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            species: entity.species,
            position: entity.position,
            energy: entity.energy,
            age: entity.age,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cow(energy: i32) -> Entity {
        Entity::new(EntityId(1), Species::Cow, Position::new(0, 0), energy, 0)
    }

    #[test]
    fn test_entity_creation() {
        let entity = cow(100);
        assert_eq!(entity.position(), Position::new(0, 0));
        assert_eq!(entity.energy, 100);
        assert_eq!(entity.age, 0);
        assert!(entity.is_alive());
        assert_eq!(entity.death_cause(), None);
    }

    #[test]
    fn test_energy_management() {
        let entity = &mut cow(100);

        assert!(entity.consume_energy(50));
        assert_eq!(entity.energy, 50);

        assert!(!entity.consume_energy(100));
        assert_eq!(entity.energy, 0);
    }

    #[test]
    fn test_feeding_is_capped() {
        let mut entity = cow(80);
        entity.add_energy(50, 100);
        assert_eq!(entity.energy, 100);

        // Already above the cap: feeding never lowers energy
        let mut entity = cow(120);
        entity.add_energy(10, 100);
        assert_eq!(entity.energy, 120);
    }

    #[test]
    fn test_tick_counts_down_cooldown() {
        let mut entity = cow(10);
        entity.reproduction_cooldown = 2;
        entity.tick();
        entity.tick();
        entity.tick();
        assert_eq!(entity.age, 3);
        assert_eq!(entity.reproduction_cooldown, 0);
    }

    #[test]
    fn test_death_is_recorded() {
        let mut entity = cow(0);
        entity.mark_dead(DeathCause::Starvation);
        assert!(!entity.is_alive());
        assert_eq!(entity.death_cause(), Some(DeathCause::Starvation));

        let view = EntityView::from(&entity);
        assert_eq!(view.id, EntityId(1));
        assert_eq!(view.species, Species::Cow);
    }
}
