//! Control surface: the commands a host sends into the engine and the
//! read-only state it gets back.

use crate::simulation::Simulation;
use crate::snapshot::Snapshot;
use ecosim_core::{ConfigureRequest, EcosystemConfig, PopulationHistory, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};

/// Tick interval at speed multiplier 1.0 (30 ticks per second)
pub const BASE_TICK_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Paused,
    Running,
}

/// A control command, applied only between ticks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Configure(ConfigureRequest),
    Start,
    Pause,
    Reset,
    Step,
    SetSpeed { multiplier: f64 },
}

/// Run state reported back after every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub run_state: RunState,
    pub speed_multiplier: f64,
    pub step_count: u64,
    /// A configuration was accepted that the next reset will apply
    pub reset_pending: bool,
}

/// What an applied command left behind
#[derive(Debug, Clone)]
pub struct Applied {
    pub status: Status,
    /// The tick's own snapshot, set for [`Command::Step`]
    pub snapshot: Option<Arc<Snapshot>>,
}

/// Result of one driver frame
#[derive(Debug)]
pub struct Frame {
    /// Outcome of every queued command, in submission order
    pub outcomes: Vec<Result<Applied>>,
    /// The new snapshot if a tick ran
    pub snapshot: Option<Arc<Snapshot>>,
}

pub struct ControlSurface {
    simulation: Simulation,
    state: RunState,
    reset_pending: bool,
    queue: VecDeque<Command>,
}

impl ControlSurface {
    /// Build a paused surface over a freshly seeded simulation.
    pub fn new(config: EcosystemConfig) -> Result<Self> {
        Ok(Self::from_simulation(Simulation::new(config)?))
    }

    pub fn from_simulation(simulation: Simulation) -> Self {
        Self {
            simulation,
            state: RunState::Paused,
            reset_pending: false,
            queue: VecDeque::new(),
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.simulation
    }

    pub fn is_running(&self) -> bool {
        self.state == RunState::Running
    }

    /// Apply one command immediately.
    #[instrument(skip(self))]
    pub fn execute(&mut self, command: Command) -> Result<Applied> {
        let mut snapshot = None;
        match command {
            Command::Configure(request) => self.configure(&request)?,
            Command::Start => self.start(),
            Command::Pause => self.pause(),
            Command::Reset => self.reset(),
            Command::Step => snapshot = Some(self.step()?),
            Command::SetSpeed { multiplier } => self.set_speed(multiplier)?,
        }
        Ok(Applied {
            status: self.status(),
            snapshot,
        })
    }

    /// Validate and stage new settings. The speed applies at once, the
    /// world and population settings at the next reset.
    pub fn configure(&mut self, request: &ConfigureRequest) -> Result<()> {
        let next = self.simulation.config().with_request(request)?;
        self.simulation.reconfigure(next)?;
        self.reset_pending = true;
        info!(?request, "Configuration accepted");
        Ok(())
    }

    pub fn start(&mut self) {
        if self.state != RunState::Running {
            self.state = RunState::Running;
            info!(step = self.simulation.step_count(), "Simulation started");
        }
    }

    pub fn pause(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Paused;
            info!(step = self.simulation.step_count(), "Simulation paused");
        }
    }

    /// Reseed from the current configuration and pause.
    pub fn reset(&mut self) {
        self.simulation.reset();
        self.state = RunState::Paused;
        self.reset_pending = false;
    }

    /// Run exactly one tick whether running or paused.
    pub fn step(&mut self) -> Result<Arc<Snapshot>> {
        self.simulation.advance()
    }

    pub fn set_speed(&mut self, multiplier: f64) -> Result<()> {
        self.simulation.set_speed_multiplier(multiplier)?;
        debug!(multiplier, "Speed changed");
        Ok(())
    }

    /// Time between automatic ticks at the current speed
    pub fn tick_interval(&self) -> Duration {
        BASE_TICK_INTERVAL.div_f64(self.simulation.config().speed_multiplier)
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.simulation.snapshot()
    }

    pub fn history(&self) -> &PopulationHistory {
        self.simulation.history()
    }

    pub fn status(&self) -> Status {
        Status {
            run_state: self.state,
            speed_multiplier: self.simulation.config().speed_multiplier,
            step_count: self.simulation.step_count(),
            reset_pending: self.reset_pending,
        }
    }

    /// Queue a command for the next [`ControlSurface::pump`].
    pub fn submit(&mut self, command: Command) {
        self.queue.push_back(command);
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Apply every queued command in order.
    pub fn pump(&mut self) -> Vec<Result<Applied>> {
        let mut outcomes = Vec::with_capacity(self.queue.len());
        while let Some(command) = self.queue.pop_front() {
            outcomes.push(self.execute(command));
        }
        outcomes
    }

    /// Apply queued commands, then tick once if running. A failed tick
    /// pauses the surface.
    pub fn run_frame(&mut self) -> Result<Frame> {
        let outcomes = self.pump();

        if !self.is_running() {
            return Ok(Frame {
                outcomes,
                snapshot: None,
            });
        }

        match self.simulation.advance() {
            Ok(snapshot) => Ok(Frame {
                outcomes,
                snapshot: Some(snapshot),
            }),
            Err(e) => {
                error!(error = %e, "Tick failed, pausing");
                self.state = RunState::Paused;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecosim_core::Error;

    fn surface() -> ControlSurface {
        ControlSurface::new(EcosystemConfig {
            seed: Some(21),
            ..Default::default()
        })
        .unwrap()
    }

    fn request() -> ConfigureRequest {
        ConfigureRequest {
            world_width: 400,
            world_height: 400,
            initial_grass: 50,
            initial_cows: 10,
            initial_tigers: 2,
            speed_multiplier: 1.0,
        }
    }

    #[test]
    fn test_starts_paused() {
        let surface = surface();
        let status = surface.status();
        assert_eq!(status.run_state, RunState::Paused);
        assert_eq!(status.step_count, 0);
        assert!(!status.reset_pending);
    }

    #[test]
    fn test_state_transitions() {
        let mut surface = surface();
        surface.start();
        assert!(surface.is_running());

        surface.pause();
        assert!(!surface.is_running());

        surface.start();
        surface.step().unwrap();
        surface.reset();
        assert_eq!(surface.status().run_state, RunState::Paused);
        assert_eq!(surface.status().step_count, 0);
    }

    #[test]
    fn test_step_runs_while_paused() {
        let mut surface = surface();
        let snapshot = surface.step().unwrap();
        assert_eq!(snapshot.step_count, 1);
        assert_eq!(surface.status().run_state, RunState::Paused);
    }

    #[test]
    fn test_configure_then_reset() {
        let mut surface = surface();
        let mut req = request();
        req.initial_cows = 40;
        req.world_width = 800;

        surface.configure(&req).unwrap();
        assert!(surface.status().reset_pending);
        assert_eq!(surface.snapshot().species_counts.cow, 10);

        surface.reset();
        let snapshot = surface.snapshot();
        assert_eq!(snapshot.species_counts.cow, 40);
        assert_eq!(snapshot.world_width, 800);
        assert!(!surface.status().reset_pending);

        let snapshot = surface.step().unwrap();
        assert_eq!(snapshot.step_count, 1);
    }

    #[test]
    fn test_invalid_configure_changes_nothing() {
        let mut surface = surface();
        let mut req = request();
        req.initial_tigers = 21;

        let err = surface.configure(&req).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!surface.status().reset_pending);
        assert_eq!(surface.simulation().config().population.initial_tigers, 2);
    }

    #[test]
    fn test_set_speed_bounds() {
        let mut surface = surface();
        surface.set_speed(5.0).unwrap();
        assert_eq!(surface.status().speed_multiplier, 5.0);
        assert_eq!(surface.tick_interval(), BASE_TICK_INTERVAL.div_f64(5.0));

        assert!(surface.set_speed(0.05).is_err());
        assert!(surface.set_speed(5.01).is_err());
        assert_eq!(surface.status().speed_multiplier, 5.0);
    }

    #[test]
    fn test_queued_commands_apply_between_ticks() {
        let mut surface = surface();
        surface.submit(Command::Start);
        surface.submit(Command::SetSpeed { multiplier: 9.0 });
        assert_eq!(surface.pending_commands(), 2);

        let frame = surface.run_frame().unwrap();
        assert_eq!(frame.outcomes.len(), 2);
        assert!(frame.outcomes[0].is_ok());
        assert!(frame.outcomes[1].as_ref().unwrap_err().is_validation());
        assert_eq!(frame.snapshot.map(|s| s.step_count), Some(1));

        surface.submit(Command::Pause);
        let frame = surface.run_frame().unwrap();
        assert!(frame.snapshot.is_none());
        assert_eq!(surface.status().step_count, 1);
    }

    #[test]
    fn test_step_command_carries_its_snapshot() {
        let mut surface = surface();
        surface.start();
        surface.run_frame().unwrap();

        let applied = surface.execute(Command::Step).unwrap();
        let snapshot = applied.snapshot.unwrap();
        assert_eq!(snapshot.step_count, 2);
        assert_eq!(applied.status.step_count, 2);

        // A later automatic tick does not change what the step returned
        surface.run_frame().unwrap();
        assert_eq!(snapshot.step_count, 2);
        assert_eq!(surface.snapshot().step_count, 3);

        let applied = surface.execute(Command::Pause).unwrap();
        assert!(applied.snapshot.is_none());
    }

    #[test]
    fn test_reset_twice_matches() {
        let mut surface = surface();
        for _ in 0..3 {
            surface.step().unwrap();
        }
        surface.execute(Command::Reset).unwrap();
        let first = surface.snapshot();
        surface.execute(Command::Reset).unwrap();
        let second = surface.snapshot();

        assert_eq!(first.species_counts, second.species_counts);
        assert_eq!(second.step_count, 0);
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&Command::SetSpeed { multiplier: 2.0 }).unwrap();
        assert_eq!(json, r#"{"command":"set_speed","multiplier":2.0}"#);

        let cmd: Command = serde_json::from_str(r#"{"command":"reset"}"#).unwrap();
        assert_eq!(cmd, Command::Reset);
    }
}
