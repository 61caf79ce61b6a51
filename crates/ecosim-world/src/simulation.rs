//! Simulation engine: advances the ecosystem one tick at a time.

use crate::entity::Entity;
use crate::registry::Registry;
use crate::snapshot::Snapshot;
use ecosim_core::{
    AnimalConfig, DeathCause, EcosystemConfig, EntityId, ExtinctionFlags, GrassConfig,
    PopulationHistory, PopulationSample, Position, Result, Species,
};
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, event, info, instrument, trace, warn, Level};

/// Owned state of one ecosystem run.
///
/// Each tick processes the entities alive when it started, in the fixed
/// order grass, cows, tigers, then purges the dead and publishes a new
/// [`Snapshot`].
pub struct Simulation {
    config: EcosystemConfig,
    registry: Registry,
    rng: ChaCha8Rng,
    step: u64,
    saturation_warnings: u64,
    extinct: ExtinctionFlags,
    history: PopulationHistory,
    snapshot: Arc<Snapshot>,
}

impl Simulation {
    /// Validate `config` and seed the initial populations.
    pub fn new(config: EcosystemConfig) -> Result<Self> {
        let mut sim = Self::empty(config)?;
        sim.populate();
        sim.publish();
        Ok(sim)
    }

    /// A validated simulation with an empty world, for scripted scenarios.
    pub fn empty(config: EcosystemConfig) -> Result<Self> {
        config.validate()?;

        let registry = Registry::new(config.world.width, config.world.height);
        let rng = make_rng(config.seed);
        let snapshot = Arc::new(Snapshot::capture(&registry, 0, 0));

        Ok(Self {
            config,
            registry,
            rng,
            step: 0,
            saturation_warnings: 0,
            extinct: ExtinctionFlags::from_counts(&snapshot.species_counts),
            history: PopulationHistory::new(),
            snapshot,
        })
    }

    pub fn config(&self) -> &EcosystemConfig {
        &self.config
    }

    /// Read-only view of the live population. Mutation stays inside the
    /// crate:
    ///
    /// ```compile_fail
    /// let mut sim = ecosim_world::Simulation::new(Default::default()).unwrap();
    /// sim.registry_mut();
    /// ```
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// The snapshot of the last completed tick (or reset)
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.clone()
    }

    pub fn history(&self) -> &PopulationHistory {
        &self.history
    }

    /// Replace the configuration. World size and initial counts take
    /// effect at the next [`Simulation::reset`].
    pub fn reconfigure(&mut self, config: EcosystemConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn set_speed_multiplier(&mut self, multiplier: f64) -> Result<()> {
        ecosim_core::validate_speed(multiplier)?;
        self.config.speed_multiplier = multiplier;
        Ok(())
    }

    /// Place an entity with its species' initial energy, outside of any tick.
    pub fn spawn(&mut self, species: Species, position: Position) -> Result<EntityId> {
        let energy = self.initial_energy(species);
        self.registry.spawn(species, position, energy, self.step)
    }

    /// Discard every entity and counter and reseed from the configuration.
    #[instrument(skip(self), fields(seed = ?self.config.seed))]
    pub fn reset(&mut self) {
        self.registry
            .clear(self.config.world.width, self.config.world.height);
        self.rng = make_rng(self.config.seed);
        self.step = 0;
        self.saturation_warnings = 0;
        self.history.clear();
        self.populate();
        self.extinct = ExtinctionFlags::from_counts(&self.registry.counts());
        self.publish();

        info!(
            event = "simulation_reset",
            width = self.config.world.width,
            height = self.config.world.height,
            grass = self.registry.count(Species::Grass),
            cows = self.registry.count(Species::Cow),
            tigers = self.registry.count(Species::Tiger),
            "Simulation reset"
        );
    }

    /// Execute one tick and return its snapshot.
    pub fn advance(&mut self) -> Result<Arc<Snapshot>> {
        self.saturation_warnings = 0;

        // Only entities alive now act this tick
        let grass = self.registry.ids_of(Species::Grass);
        let cows = self.registry.ids_of(Species::Cow);
        let tigers = self.registry.ids_of(Species::Tiger);

        let grass_config = self.config.grass.clone();
        self.grass_phase(&grass, &grass_config);

        let cow_config = self.config.cow.clone();
        for id in cows {
            self.update_cow(id, &cow_config);
        }

        let tiger_config = self.config.tiger.clone();
        for id in tigers {
            self.update_tiger(id, &tiger_config);
        }

        self.cleanup()?;
        Ok(self.snapshot.clone())
    }

    fn populate(&mut self) {
        for species in Species::ALL {
            let wanted = self.config.population.initial(species);
            for _ in 0..wanted {
                let pos = match self.registry.grid().random_free_cell(species, &mut self.rng) {
                    Ok(pos) => pos,
                    Err(e) => {
                        warn!(species = %species, wanted, error = %e, "World saturated while seeding");
                        self.saturation_warnings += 1;
                        break;
                    }
                };
                let energy = self.initial_energy(species);
                if let Err(e) = self.registry.spawn(species, pos, energy, 0) {
                    warn!(species = %species, error = %e, "Seeding spawn failed");
                }
            }
        }
    }

    fn initial_energy(&self, species: Species) -> i32 {
        self.config
            .animal(species)
            .map(|a| a.initial_energy)
            .unwrap_or(0)
    }

    fn grass_phase(&mut self, patches: &[EntityId], grass: &GrassConfig) {
        for &id in patches {
            if let Some(patch) = self.registry.get_mut(id) {
                patch.tick();
            }
        }

        if patches.is_empty() {
            if self.rng.gen_bool(grass.reseed_chance) {
                match self.registry.grid().random_free_cell(Species::Grass, &mut self.rng) {
                    Ok(pos) => self.give_birth(Species::Grass, pos, 0),
                    Err(_) => self.note_saturation(Species::Grass),
                }
            }
            return;
        }

        for &id in patches {
            if self.registry.count(Species::Grass) >= grass.max_patches {
                break;
            }
            if !self.rng.gen_bool(grass.spread_chance) {
                continue;
            }
            let Some(origin) = self.registry.get(id).map(Entity::position) else {
                continue;
            };

            match self.registry.grid().random_free_cell_near(
                origin,
                grass.spread_radius,
                Species::Grass,
                &mut self.rng,
            ) {
                Ok(pos) => self.give_birth(Species::Grass, pos, 0),
                Err(_) => self.note_saturation(Species::Grass),
            }
        }
    }

    fn update_cow(&mut self, id: EntityId, cow: &AnimalConfig) {
        let Some(entity) = self.registry.get_mut(id).filter(|e| e.is_alive()) else {
            return;
        };
        entity.consume_energy(cow.metabolic_cost);
        let pos = entity.position();

        if let Some(grass_id) = self.registry.grid().occupant(pos, Species::Grass) {
            self.registry.kill(grass_id, DeathCause::Eaten);
            if let Some(entity) = self.registry.get_mut(id) {
                entity.add_energy(cow.feeding_energy, cow.max_energy);
                entity.meals += 1;
                trace!(cow = %id, grass = %grass_id, energy = entity.energy, "Cow grazed");
            }
        } else {
            let target = (cow.sense_radius > 0)
                .then(|| self.nearest(pos, cow.sense_radius, Species::Grass))
                .flatten();
            match target {
                Some((_, grass_pos)) => self.step_toward(id, grass_pos, cow.speed),
                None => self.wander(id, cow.speed),
            }
        }

        self.try_reproduce(id, cow);
        self.end_turn(id, cow);
    }

    fn update_tiger(&mut self, id: EntityId, tiger: &AnimalConfig) {
        let Some(entity) = self.registry.get_mut(id).filter(|e| e.is_alive()) else {
            return;
        };
        entity.consume_energy(tiger.metabolic_cost);
        let pos = entity.position();

        if entity.rest > 0 {
            entity.rest -= 1;
        } else {
            match self.nearest(pos, tiger.sense_radius, Species::Cow) {
                Some((cow_id, cow_pos)) if pos.chebyshev_distance(&cow_pos) <= 1 => {
                    self.attack(id, cow_id, tiger)
                }
                Some((_, cow_pos)) => self.step_toward(id, cow_pos, tiger.speed),
                None => self.wander(id, tiger.speed),
            }
        }

        self.try_reproduce(id, tiger);
        self.end_turn(id, tiger);
    }

    fn attack(&mut self, tiger_id: EntityId, cow_id: EntityId, tiger: &AnimalConfig) {
        let success = tiger.hunt_success_chance >= 1.0 || self.rng.gen_bool(tiger.hunt_success_chance);
        if !success {
            trace!(tiger = %tiger_id, cow = %cow_id, "Hunt failed");
            return;
        }

        self.registry.kill(cow_id, DeathCause::Predation);
        if let Some(entity) = self.registry.get_mut(tiger_id) {
            entity.add_energy(tiger.feeding_energy, tiger.max_energy);
            entity.meals += 1;
            entity.rest = tiger.rest_after_kill;
            debug!(
                event = "predation",
                tiger = %tiger_id,
                cow = %cow_id,
                tiger_energy = entity.energy,
                step = self.step,
                "Tiger killed a cow"
            );
        }
    }

    /// Nearest live entity of `species` within `radius` (the own cell
    /// included), by Chebyshev distance, lowest id on ties.
    fn nearest(&self, pos: Position, radius: i32, species: Species) -> Option<(EntityId, Position)> {
        let grid = self.registry.grid();

        std::iter::once(pos)
            .chain(grid.neighbors(pos, radius))
            .filter_map(|cell| grid.occupant(cell, species).map(|id| (id, cell)))
            .min_by_key(|(id, cell)| (pos.chebyshev_distance(cell), *id))
    }

    /// Move to the free cell within `stride` closest to `target`, if it is
    /// closer than the current one.
    fn step_toward(&mut self, id: EntityId, target: Position, stride: i32) {
        let Some((pos, species)) = self.registry.get(id).map(|e| (e.position(), e.species)) else {
            return;
        };
        let score = |p: &Position| (p.chebyshev_distance(&target), p.euclidean_sq(&target));

        let best = self
            .registry
            .grid()
            .free_neighbors(pos, stride, species)
            .into_iter()
            .min_by_key(|p| score(p));

        if let Some(dest) = best.filter(|dest| score(dest) < score(&pos)) {
            self.registry.move_entity(id, dest);
        }
    }

    /// Move to a uniformly chosen free cell within `stride`, or stay.
    fn wander(&mut self, id: EntityId, stride: i32) {
        let Some((pos, species)) = self.registry.get(id).map(|e| (e.position(), e.species)) else {
            return;
        };

        let free = self.registry.grid().free_neighbors(pos, stride, species);
        if let Some(&dest) = free.choose(&mut self.rng) {
            self.registry.move_entity(id, dest);
        }
    }

    fn try_reproduce(&mut self, id: EntityId, params: &AnimalConfig) {
        let Some(parent) = self.registry.get(id).filter(|e| e.is_alive()) else {
            return;
        };
        if parent.energy < params.reproduction_threshold
            || parent.age < params.min_reproduction_age
            || parent.reproduction_cooldown > 0
        {
            return;
        }
        let (pos, species) = (parent.position(), parent.species);

        let cell = match self
            .registry
            .grid()
            .random_free_cell_near(pos, 1, species, &mut self.rng)
        {
            Ok(cell) => cell,
            Err(_) => {
                self.note_saturation(species);
                return;
            }
        };

        match self
            .registry
            .spawn_birth(species, cell, params.initial_energy, self.step)
        {
            Ok(child) => {
                if let Some(parent) = self.registry.get_mut(id) {
                    parent.consume_energy(params.reproduction_cost);
                    parent.reproduction_cooldown = params.reproduction_cooldown;
                    parent.offspring += 1;
                    debug!(
                        event = "birth",
                        species = %species,
                        parent = %id,
                        child = %child,
                        parent_energy = parent.energy,
                        step = self.step,
                        "Animal reproduced"
                    );
                }
            }
            Err(e) => warn!(species = %species, parent = %id, error = %e, "Offspring spawn failed"),
        }
    }

    /// Death check, then aging for survivors.
    fn end_turn(&mut self, id: EntityId, params: &AnimalConfig) {
        let Some(entity) = self.registry.get(id).filter(|e| e.is_alive()) else {
            return;
        };

        let cause = if entity.energy <= 0 {
            Some(DeathCause::Starvation)
        } else if entity.age >= params.max_age {
            Some(DeathCause::OldAge)
        } else {
            None
        };

        match cause {
            Some(cause) => self.registry.kill(id, cause),
            None => {
                if let Some(entity) = self.registry.get_mut(id) {
                    entity.tick();
                }
            }
        }
    }

    fn give_birth(&mut self, species: Species, pos: Position, energy: i32) {
        if let Err(e) = self.registry.spawn_birth(species, pos, energy, self.step) {
            warn!(species = %species, position = %pos, error = %e, "Spawn failed");
        }
    }

    fn note_saturation(&mut self, species: Species) {
        self.saturation_warnings += 1;
        trace!(species = %species, step = self.step, "No free cell for spawn");
    }

    fn cleanup(&mut self) -> Result<()> {
        for dead in self.registry.purge_dead() {
            debug!(
                event = "entity_death",
                id = %dead.id,
                species = %dead.species,
                cause = ?dead.death_cause(),
                age = dead.age,
                energy = dead.energy,
                offspring = dead.offspring,
                step = self.step,
                "Entity died"
            );
        }

        self.step += 1;
        self.registry.check_invariants()?;

        let counts = self.registry.counts();
        self.history.record(PopulationSample {
            step: self.step,
            counts,
        });

        let extinct = ExtinctionFlags::from_counts(&counts);
        for species in Species::ALL {
            if extinct.is_extinct(species) && !self.extinct.is_extinct(species) {
                info!(event = "extinction", species = %species, step = self.step, "Species went extinct");
            }
        }
        self.extinct = extinct;

        if self.saturation_warnings > 0 {
            debug!(
                step = self.step,
                skipped_spawns = self.saturation_warnings,
                "Spawns skipped for lack of free cells"
            );
        }

        if self.step % self.config.metrics_interval == 0 {
            self.emit_population_metrics();
        }

        self.publish();
        Ok(())
    }

    fn publish(&mut self) {
        self.snapshot = Arc::new(Snapshot::capture(
            &self.registry,
            self.step,
            self.saturation_warnings,
        ));
    }

    /// Emit population metrics
    fn emit_population_metrics(&self) {
        let counts = self.registry.counts();
        let totals = self.registry.totals();

        info!(
            event = "population_metrics",
            step = self.step,
            grass = counts.grass,
            cows = counts.cow,
            tigers = counts.tiger,
            births_total = totals.births,
            deaths_total = totals.deaths,
            "Population metrics snapshot"
        );

        for species in Species::ALL {
            event!(
                Level::INFO,
                gauge_name = "population",
                gauge_value = counts.get(species),
                species = %species,
                step = self.step,
                "Population gauge"
            );
        }
    }
}

fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}
