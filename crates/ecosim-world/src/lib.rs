//! Grid, population registry and tick engine of the grassland simulator.

pub mod control;
pub mod entity;
pub mod grid;
pub mod registry;
pub mod simulation;
pub mod snapshot;

pub use control::{Applied, Command, ControlSurface, Frame, RunState, Status, BASE_TICK_INTERVAL};
pub use entity::{Entity, EntityView};
pub use grid::{Cell, Grid};
pub use registry::Registry;
pub use simulation::Simulation;
pub use snapshot::Snapshot;
