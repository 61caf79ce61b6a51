//! Tick driver: the single task that owns the control surface.
//!
//! Handlers talk to it through [`DriverHandle`]. Commands travel over an
//! mpsc queue and are applied between ticks, while snapshots, status and
//! history are published on watch channels after every change.

use ecosim_core::{Error, PopulationSample, Result};
use ecosim_world::{Applied, Command, ControlSurface, Snapshot, Status};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 64;

/// A command plus the channel its outcome is returned on
pub struct Request {
    pub command: Command,
    pub reply: oneshot::Sender<Result<Applied>>,
}

#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Request>,
    snapshot: watch::Receiver<Arc<Snapshot>>,
    status: watch::Receiver<Status>,
    history: watch::Receiver<Arc<Vec<PopulationSample>>>,
}

impl DriverHandle {
    /// Queue a command and wait until the driver has applied it.
    pub async fn send(&self, command: Command) -> Result<Applied> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| driver_stopped())?;
        outcome.await.map_err(|_| driver_stopped())?
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.borrow().clone()
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn history(&self) -> Arc<Vec<PopulationSample>> {
        self.history.borrow().clone()
    }
}

fn driver_stopped() -> Error {
    Error::InvalidState("simulation driver has stopped".to_string())
}

struct Driver {
    surface: ControlSurface,
    requests: mpsc::Receiver<Request>,
    snapshot: watch::Sender<Arc<Snapshot>>,
    status: watch::Sender<Status>,
    history: watch::Sender<Arc<Vec<PopulationSample>>>,
}

/// Move `surface` into a new driver task. The task ends once every
/// [`DriverHandle`] has been dropped.
pub fn spawn(surface: ControlSurface) -> (DriverHandle, JoinHandle<()>) {
    let (commands, requests) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (snapshot_tx, snapshot) = watch::channel(surface.snapshot());
    let (status_tx, status) = watch::channel(surface.status());
    let (history_tx, history) = watch::channel(Arc::new(surface.history().to_vec()));

    let driver = Driver {
        surface,
        requests,
        snapshot: snapshot_tx,
        status: status_tx,
        history: history_tx,
    };
    let task = tokio::spawn(driver.run());

    let handle = DriverHandle {
        commands,
        snapshot,
        status,
        history,
    };
    (handle, task)
}

impl Driver {
    async fn run(mut self) {
        info!(
            tick_interval_ms = self.surface.tick_interval().as_secs_f64() * 1000.0,
            "Simulation driver started"
        );
        let mut next_tick = Instant::now() + self.surface.tick_interval();

        loop {
            let running = self.surface.is_running();

            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    self.apply(request);
                    if !running && self.surface.is_running() {
                        next_tick = Instant::now() + self.surface.tick_interval();
                    }
                }
                _ = time::sleep_until(next_tick), if running => {
                    self.tick();
                    let interval = self.surface.tick_interval();
                    let now = Instant::now();
                    next_tick += interval;
                    // Fell behind; drop the missed ticks instead of bursting
                    if next_tick < now {
                        next_tick = now + interval;
                    }
                }
            }
        }

        info!(step = self.surface.status().step_count, "Simulation driver stopped");
    }

    /// Apply `first` and anything else already queued behind it as one batch.
    fn apply(&mut self, first: Request) {
        let mut replies = vec![first.reply];
        self.surface.submit(first.command);
        while let Ok(Request { command, reply }) = self.requests.try_recv() {
            self.surface.submit(command);
            replies.push(reply);
        }

        debug!(commands = replies.len(), "Applying commands");
        let outcomes = self.surface.pump();
        self.publish();

        for (reply, outcome) in replies.into_iter().zip(outcomes) {
            if let Err(e) = &outcome {
                warn!(error = %e, "Command rejected");
            }
            // The caller may have given up waiting
            let _ = reply.send(outcome);
        }
    }

    fn tick(&mut self) {
        if let Err(e) = self.surface.run_frame() {
            error!(error = %e, "Simulation tick failed");
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.surface.snapshot());
        self.status.send_replace(self.surface.status());
        self.history
            .send_replace(Arc::new(self.surface.history().to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecosim_core::EcosystemConfig;
    use ecosim_world::RunState;
    use std::time::Duration;

    fn surface() -> ControlSurface {
        ControlSurface::new(EcosystemConfig {
            seed: Some(5),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_commands_are_applied_and_published() {
        let (handle, _task) = spawn(surface());
        assert_eq!(handle.status().run_state, RunState::Paused);
        assert_eq!(handle.snapshot().step_count, 0);

        let applied = handle.send(Command::Step).await.unwrap();
        assert_eq!(applied.status.step_count, 1);
        assert_eq!(applied.snapshot.unwrap().step_count, 1);
        assert_eq!(handle.snapshot().step_count, 1);
        assert_eq!(handle.history().len(), 1);

        let err = handle
            .send(Command::SetSpeed { multiplier: 0.0 })
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_running_driver_ticks() {
        let (handle, _task) = spawn(surface());
        handle
            .send(Command::SetSpeed { multiplier: 5.0 })
            .await
            .unwrap();
        handle.send(Command::Start).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = handle.send(Command::Pause).await.unwrap().status;
        assert_eq!(status.run_state, RunState::Paused);
        assert!(status.step_count > 0);

        // Paused: no further ticks
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status().step_count, status.step_count);
    }

    #[tokio::test]
    async fn test_step_while_running_returns_its_own_tick() {
        let (handle, _task) = spawn(surface());
        handle
            .send(Command::SetSpeed { multiplier: 5.0 })
            .await
            .unwrap();
        handle.send(Command::Start).await.unwrap();

        for _ in 0..10 {
            let applied = handle.send(Command::Step).await.unwrap();
            let snapshot = applied.snapshot.unwrap();
            assert_eq!(snapshot.step_count, applied.status.step_count);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (handle, task) = spawn(surface());
        task.abort();
        let _ = task.await;

        let err = handle.send(Command::Start).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_driver_exits_when_handles_drop() {
        let (handle, task) = spawn(surface());
        drop(handle);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
