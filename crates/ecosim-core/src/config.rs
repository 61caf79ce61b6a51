//! Configuration types for the simulation.

use crate::error::{Error, Result};
use crate::types::Species;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use tracing::warn;

/// Accepted world edge length (applies to width and height independently)
pub const WORLD_SIZE_RANGE: RangeInclusive<i32> = 400..=1000;
/// Accepted initial grass count
pub const INITIAL_GRASS_RANGE: RangeInclusive<usize> = 10..=200;
/// Accepted initial cow count
pub const INITIAL_COWS_RANGE: RangeInclusive<usize> = 5..=50;
/// Accepted initial tiger count
pub const INITIAL_TIGERS_RANGE: RangeInclusive<usize> = 1..=20;
/// Accepted speed multiplier
pub const SPEED_RANGE: RangeInclusive<f64> = 0.1..=5.0;

/// World configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Width of the world grid
    pub width: i32,
    /// Height of the world grid
    pub height: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            width: 400,
            height: 400,
        }
    }
}

/// Number of entities seeded per species on reset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationConfig {
    pub initial_grass: usize,
    pub initial_cows: usize,
    pub initial_tigers: usize,
}

impl PopulationConfig {
    pub fn initial(&self, species: Species) -> usize {
        match species {
            Species::Grass => self.initial_grass,
            Species::Cow => self.initial_cows,
            Species::Tiger => self.initial_tigers,
        }
    }
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            initial_grass: 50,
            initial_cows: 10,
            initial_tigers: 2,
        }
    }
}

/// Grass regrowth parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrassConfig {
    /// Chance per patch per tick to seed a new patch nearby
    pub spread_chance: f64,
    /// Radius around a patch in which new grass may appear
    pub spread_radius: i32,
    /// Chance per tick to seed a patch anywhere once all grass is gone
    pub reseed_chance: f64,
    /// Regrowth stops while this many patches exist
    pub max_patches: usize,
}

impl Default for GrassConfig {
    fn default() -> Self {
        Self {
            spread_chance: 0.02,
            spread_radius: 3,
            reseed_chance: 0.1,
            max_patches: 500,
        }
    }
}

/// Behaviour and energy parameters of an animal species
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimalConfig {
    /// Energy of a newly seeded or newborn animal
    pub initial_energy: i32,
    /// Feeding never raises energy above this
    pub max_energy: i32,
    /// Energy lost every tick
    pub metabolic_cost: i32,
    /// Energy gained per grass eaten or cow killed
    pub feeding_energy: i32,
    /// Minimum energy to reproduce
    pub reproduction_threshold: i32,
    /// Energy the parent pays per offspring
    pub reproduction_cost: i32,
    /// Minimum age to reproduce
    pub min_reproduction_age: u64,
    /// Ticks between two births of the same parent
    pub reproduction_cooldown: u32,
    /// Death by old age once reached
    pub max_age: u64,
    /// Cells moved per tick (Chebyshev)
    pub speed: i32,
    /// Radius in which food is sensed; 0 disables targeted movement
    pub sense_radius: i32,
    /// Chance that an attack on an adjacent cow succeeds
    pub hunt_success_chance: f64,
    /// Ticks spent idle after a kill
    pub rest_after_kill: u32,
}

impl AnimalConfig {
    pub fn cow() -> Self {
        Self {
            initial_energy: 100,
            max_energy: 100,
            metabolic_cost: 1,
            feeding_energy: 50,
            reproduction_threshold: 70,
            reproduction_cost: 40,
            min_reproduction_age: 20,
            reproduction_cooldown: 20,
            max_age: 150,
            speed: 1,
            sense_radius: 0,
            hunt_success_chance: 0.0,
            rest_after_kill: 0,
        }
    }

    pub fn tiger() -> Self {
        Self {
            initial_energy: 150,
            max_energy: 150,
            metabolic_cost: 2,
            feeding_energy: 80,
            reproduction_threshold: 105,
            reproduction_cost: 60,
            min_reproduction_age: 30,
            reproduction_cooldown: 30,
            max_age: 120,
            speed: 1,
            sense_radius: 5,
            hunt_success_chance: 1.0,
            rest_after_kill: 0,
        }
    }

    fn validate(&self, species: Species) -> Result<()> {
        let fail = |msg: &str| Err(Error::Validation(format!("{species}: {msg}")));

        if self.initial_energy <= 0 || self.max_energy < self.initial_energy {
            return fail("initial_energy must be positive and not exceed max_energy");
        }
        if self.metabolic_cost < 0 || self.feeding_energy < 0 || self.reproduction_cost < 0 {
            return fail("energy amounts must not be negative");
        }
        // A breeding parent must keep some energy or it starves on the spot
        if self.reproduction_cost >= self.reproduction_threshold {
            return fail("reproduction_cost must be below reproduction_threshold");
        }
        if self.max_age == 0 {
            return fail("max_age must be at least 1");
        }
        if self.speed < 1 || self.sense_radius < 0 {
            return fail("speed must be at least 1 and sense_radius not negative");
        }
        if !(0.0..=1.0).contains(&self.hunt_success_chance) {
            return fail("hunt_success_chance must be within 0.0..=1.0");
        }
        Ok(())
    }
}

/// Complete ecosystem configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcosystemConfig {
    pub world: WorldConfig,
    pub population: PopulationConfig,
    pub grass: GrassConfig,
    pub cow: AnimalConfig,
    pub tiger: AnimalConfig,
    /// External tick cadence multiplier; never read by the engine itself
    pub speed_multiplier: f64,
    /// Fixed seed for reproducible runs; `None` draws a fresh seed per reset
    pub seed: Option<u64>,
    /// Ticks between population metric events
    pub metrics_interval: u64,
}

impl Default for EcosystemConfig {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            population: PopulationConfig::default(),
            grass: GrassConfig::default(),
            cow: AnimalConfig::cow(),
            tiger: AnimalConfig::tiger(),
            speed_multiplier: 1.0,
            seed: None,
            metrics_interval: 100,
        }
    }
}

impl EcosystemConfig {
    /// Parameters of an animal species; `None` for grass.
    pub fn animal(&self, species: Species) -> Option<&AnimalConfig> {
        match species {
            Species::Grass => None,
            Species::Cow => Some(&self.cow),
            Species::Tiger => Some(&self.tiger),
        }
    }

    /// Check every user-facing range and the internal parameter tables.
    pub fn validate(&self) -> Result<()> {
        check_range("world_width", self.world.width, &WORLD_SIZE_RANGE)?;
        check_range("world_height", self.world.height, &WORLD_SIZE_RANGE)?;
        check_range("initial_grass", self.population.initial_grass, &INITIAL_GRASS_RANGE)?;
        check_range("initial_cows", self.population.initial_cows, &INITIAL_COWS_RANGE)?;
        check_range("initial_tigers", self.population.initial_tigers, &INITIAL_TIGERS_RANGE)?;
        validate_speed(self.speed_multiplier)?;

        if !(0.0..=1.0).contains(&self.grass.spread_chance)
            || !(0.0..=1.0).contains(&self.grass.reseed_chance)
        {
            return Err(Error::Validation(
                "grass chances must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.grass.spread_radius < 1 {
            return Err(Error::Validation(
                "grass spread_radius must be at least 1".to_string(),
            ));
        }
        if self.metrics_interval == 0 {
            return Err(Error::Validation(
                "metrics_interval must be at least 1".to_string(),
            ));
        }

        self.cow.validate(Species::Cow)?;
        self.tiger.validate(Species::Tiger)?;
        Ok(())
    }

    /// Return a copy with the user-facing values of `request` applied,
    /// validated as a whole.
    pub fn with_request(&self, request: &ConfigureRequest) -> Result<Self> {
        let mut next = self.clone();
        next.world.width = request.world_width;
        next.world.height = request.world_height;
        next.population.initial_grass = request.initial_grass;
        next.population.initial_cows = request.initial_cows;
        next.population.initial_tigers = request.initial_tigers;
        next.speed_multiplier = request.speed_multiplier;
        next.validate()?;
        Ok(next)
    }
}

/// The user-facing `configure` command arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub world_width: i32,
    pub world_height: i32,
    pub initial_grass: usize,
    pub initial_cows: usize,
    pub initial_tigers: usize,
    pub speed_multiplier: f64,
}

impl From<&EcosystemConfig> for ConfigureRequest {
    fn from(config: &EcosystemConfig) -> Self {
        Self {
            world_width: config.world.width,
            world_height: config.world.height,
            initial_grass: config.population.initial_grass,
            initial_cows: config.population.initial_cows,
            initial_tigers: config.population.initial_tigers,
            speed_multiplier: config.speed_multiplier,
        }
    }
}

/// Reject a speed multiplier outside 0.1..=5.0.
pub fn validate_speed(multiplier: f64) -> Result<()> {
    if SPEED_RANGE.contains(&multiplier) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "speed_multiplier {} outside {}..={}",
            multiplier,
            SPEED_RANGE.start(),
            SPEED_RANGE.end()
        )))
    }
}

fn check_range<T>(name: &str, value: T, range: &RangeInclusive<T>) -> Result<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "{} {} outside {}..={}",
            name,
            value,
            range.start(),
            range.end()
        )))
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// OpenTelemetry endpoint
    pub otel_endpoint: Option<String>,
    /// Start running immediately instead of paused
    pub autostart: bool,
    /// Seed applied to the initial ecosystem configuration
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            otel_endpoint: None,
            autostart: false,
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `ECOSIM_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(bind) = lookup("ECOSIM_BIND") {
            config.bind_address = bind;
        }
        if let Some(port) = lookup("ECOSIM_PORT") {
            match port.parse() {
                Ok(port) => config.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid ECOSIM_PORT"),
            }
        }
        if let Some(endpoint) = lookup("ECOSIM_OTEL_ENDPOINT") {
            config.otel_endpoint = Some(endpoint);
        }
        if let Some(flag) = lookup("ECOSIM_AUTOSTART") {
            config.autostart = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Some(seed) = lookup("ECOSIM_SEED") {
            match seed.parse() {
                Ok(seed) => config.seed = Some(seed),
                Err(_) => warn!(value = %seed, "Ignoring invalid ECOSIM_SEED"),
            }
        }

        config
    }
}
