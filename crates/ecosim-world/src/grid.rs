//! Bounded 2D occupancy index for the world.

use ecosim_core::{EntityId, Error, Position, Result, Species, SpeciesTally};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Random probes made before falling back to a scan of the whole grid
const RANDOM_PLACEMENT_ATTEMPTS: usize = 100;

/// Occupants of one cell: at most one entity per species
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell {
    pub grass: Option<EntityId>,
    pub cow: Option<EntityId>,
    pub tiger: Option<EntityId>,
}

impl Cell {
    pub fn get(&self, species: Species) -> Option<EntityId> {
        match species {
            Species::Grass => self.grass,
            Species::Cow => self.cow,
            Species::Tiger => self.tiger,
        }
    }

    fn slot_mut(&mut self, species: Species) -> &mut Option<EntityId> {
        match species {
            Species::Grass => &mut self.grass,
            Species::Cow => &mut self.cow,
            Species::Tiger => &mut self.tiger,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grass.is_none() && self.cow.is_none() && self.tiger.is_none()
    }

    /// Occupant ids in grass, cow, tiger order
    pub fn ids(&self) -> Vec<EntityId> {
        [self.grass, self.cow, self.tiger].into_iter().flatten().collect()
    }
}

/// A bounded (non-wrapping) grid. Only occupied cells are stored.
#[derive(Debug, Clone)]
pub struct Grid {
    width: i32,
    height: i32,
    cells: HashMap<Position, Cell>,
    occupied: SpeciesTally,
}

impl Grid {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            cells: HashMap::new(),
            occupied: SpeciesTally::default(),
        }
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    /// Number of cells in the world
    pub fn capacity(&self) -> usize {
        (self.width.max(0) as usize) * (self.height.max(0) as usize)
    }

    pub fn contains(&self, pos: Position) -> bool {
        pos.in_bounds(self.width, self.height)
    }

    /// Ids of everything on a cell, grass first.
    pub fn cell_at(&self, pos: Position) -> Vec<EntityId> {
        self.cells.get(&pos).map(Cell::ids).unwrap_or_default()
    }

    pub fn occupant(&self, pos: Position, species: Species) -> Option<EntityId> {
        self.cells.get(&pos).and_then(|cell| cell.get(species))
    }

    pub fn is_occupied_by(&self, pos: Position, species: Species) -> bool {
        self.occupant(pos, species).is_some()
    }

    /// Number of cells holding the given species
    pub fn occupied_count(&self, species: Species) -> usize {
        self.occupied.get(species) as usize
    }

    /// Total number of indexed entities
    pub fn indexed_count(&self) -> usize {
        self.occupied.total() as usize
    }

    /// Square neighbourhood of `pos`, centre excluded, clipped to bounds,
    /// in row-major order.
    pub fn neighbors(&self, pos: Position, radius: i32) -> Vec<Position> {
        let mut neighbors = Vec::new();

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                if dx == 0 && dy == 0 {
                    continue;
                }

                let neighbor_pos = pos.add(dx, dy);
                if self.contains(neighbor_pos) {
                    neighbors.push(neighbor_pos);
                }
            }
        }

        neighbors
    }

    /// Neighbours not holding an entity of `species`
    pub fn free_neighbors(&self, pos: Position, radius: i32, species: Species) -> Vec<Position> {
        self.neighbors(pos, radius)
            .into_iter()
            .filter(|p| !self.is_occupied_by(*p, species))
            .collect()
    }

    /// A uniformly chosen cell anywhere in the world not holding `species`.
    pub fn random_free_cell<R: Rng + ?Sized>(&self, species: Species, rng: &mut R) -> Result<Position> {
        let capacity = self.capacity();
        if self.occupied_count(species) >= capacity {
            return Err(Error::NotFound(format!("no free cell for {species}")));
        }

        for _ in 0..RANDOM_PLACEMENT_ATTEMPTS {
            let pos = Position::new(rng.gen_range(0..self.width), rng.gen_range(0..self.height));
            if !self.is_occupied_by(pos, species) {
                return Ok(pos);
            }
        }

        // Nearly saturated: walk the grid from a random offset
        let start = rng.gen_range(0..capacity);
        (0..capacity)
            .map(|offset| self.index_to_pos((start + offset) % capacity))
            .find(|pos| !self.is_occupied_by(*pos, species))
            .ok_or_else(|| Error::NotFound(format!("no free cell for {species}")))
    }

    /// A uniformly chosen cell within `radius` of `center` not holding `species`.
    pub fn random_free_cell_near<R: Rng + ?Sized>(
        &self,
        center: Position,
        radius: i32,
        species: Species,
        rng: &mut R,
    ) -> Result<Position> {
        self.free_neighbors(center, radius, species)
            .choose(rng)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("no free cell for {species} near {center}")))
    }

    pub(crate) fn insert(&mut self, pos: Position, species: Species, id: EntityId) -> Result<()> {
        if !self.contains(pos) {
            return Err(Error::InvariantViolation(format!(
                "{id} placed outside the world at {pos}"
            )));
        }

        let slot = self.cells.entry(pos).or_default().slot_mut(species);
        if let Some(existing) = *slot {
            return Err(Error::InvariantViolation(format!(
                "{id} placed on {pos} already holding {species} {existing}"
            )));
        }

        *slot = Some(id);
        self.occupied.increment(species);
        Ok(())
    }

    pub(crate) fn remove(&mut self, pos: Position, species: Species, id: EntityId) -> Result<()> {
        let cell = self.cells.get_mut(&pos).ok_or_else(|| {
            Error::InvariantViolation(format!("{id} missing from empty cell {pos}"))
        })?;

        let slot = cell.slot_mut(species);
        if *slot != Some(id) {
            return Err(Error::InvariantViolation(format!(
                "{id} not indexed at {pos} (found {:?})",
                slot
            )));
        }

        *slot = None;
        *self.occupied.get_mut(species) -= 1;
        if cell.is_empty() {
            self.cells.remove(&pos);
        }
        Ok(())
    }

    fn index_to_pos(&self, index: usize) -> Position {
        let x = (index as i32) % self.width;
        let y = (index as i32) / self.width;
        Position::new(x, y)
    }

    /// Iterator over occupied cells (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (Position, &Cell)> + '_ {
        self.cells.iter().map(|(pos, cell)| (*pos, cell))
    }
}
