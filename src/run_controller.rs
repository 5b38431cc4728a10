use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::graph_workflow::ConnectedAgents;
use crate::logging::{CanvasLogger, LogLevel};
use crate::workflow_config::AnimationConfig;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Error, PartialEq)]
pub enum RunControlError {
    #[error("Need both Principal Agent and Azure AI Agent to run")]
    MissingPrerequisite,
    #[error("A run is already in progress")]
    AlreadyRunning,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    /// Terminal sub-state after a full sweep, before returning to idle.
    Fading,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// One snapshot of the animation, published per frame for a renderer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimationFrame {
    pub phase: Phase,
    pub direction: Direction,
    pub progress: f32,
}

struct AnimationState {
    phase: Phase,
    direction: Direction,
    progress: f32,
    started_at: Option<Instant>,
    fade_started_at: Option<Instant>,
    cycle: Duration,
    fade: Duration,
}

impl AnimationState {
    fn new(config: &AnimationConfig) -> Self {
        Self {
            phase: Phase::Idle,
            direction: Direction::Forward,
            progress: 0.0,
            started_at: None,
            fade_started_at: None,
            cycle: Duration::from_millis(config.cycle_ms),
            fade: Duration::from_millis(config.fade_ms),
        }
    }

    fn frame(&self) -> AnimationFrame {
        AnimationFrame {
            phase: self.phase,
            direction: self.direction,
            progress: self.progress,
        }
    }

    fn begin(&mut self, now: Instant) {
        self.phase = Phase::Running;
        self.progress = 0.0;
        self.started_at = Some(now);
        self.fade_started_at = None;
    }

    fn advance(&mut self, now: Instant) {
        match self.phase {
            Phase::Idle => {}
            Phase::Running => {
                if let Some(started_at) = self.started_at {
                    let elapsed = now.saturating_duration_since(started_at);
                    self.progress =
                        (elapsed.as_secs_f32() / self.cycle.as_secs_f32()).min(1.0);
                    if self.progress >= 1.0 {
                        self.phase = Phase::Fading;
                        self.fade_started_at = Some(now);
                    }
                }
            }
            Phase::Fading => {
                if let Some(fade_started_at) = self.fade_started_at {
                    if now.saturating_duration_since(fade_started_at) >= self.fade {
                        self.phase = Phase::Idle;
                        self.progress = 0.0;
                        self.direction = self.direction.flipped();
                        self.started_at = None;
                        self.fade_started_at = None;
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        self.phase = Phase::Idle;
        self.progress = 0.0;
        self.direction = Direction::Forward;
        self.started_at = None;
        self.fade_started_at = None;
    }
}

/// Drives the run marker animation: `Idle -> Running -> Fading -> Idle`,
/// flipping the sweep direction after every completed cycle.
///
/// While running, a spawned frame task advances progress on a fixed interval
/// and publishes [`AnimationFrame`]s on a watch channel. The task handle is
/// the cancellation point: `stop()` aborts it before touching state, and
/// dropping the controller aborts it too, so no frame callback can outlive
/// its owner.
pub struct RunController {
    state: Arc<Mutex<AnimationState>>,
    frames_tx: watch::Sender<AnimationFrame>,
    driver: Option<JoinHandle<()>>,
    logger: Arc<dyn CanvasLogger>,
}

impl RunController {
    pub fn new(config: &AnimationConfig, logger: Arc<dyn CanvasLogger>) -> Self {
        let state = AnimationState::new(config);
        let (frames_tx, _) = watch::channel(state.frame());
        Self {
            state: Arc::new(Mutex::new(state)),
            frames_tx,
            driver: None,
            logger,
        }
    }

    /// Observe animation frames. Receivers created before a run see every
    /// subsequent frame of that run.
    pub fn frames(&self) -> watch::Receiver<AnimationFrame> {
        self.frames_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase
    }

    pub fn direction(&self) -> Direction {
        lock(&self.state).direction
    }

    pub fn progress(&self) -> f32 {
        lock(&self.state).progress
    }

    pub fn is_active(&self) -> bool {
        self.phase() != Phase::Idle
    }

    /// Begin a run. Legal only from `Idle`, and only when the projection
    /// names a principal with at least one connected worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        &mut self,
        projection: Option<&ConnectedAgents>,
    ) -> Result<(), RunControlError> {
        if self.is_active() {
            return Err(RunControlError::AlreadyRunning);
        }
        let ready = projection.is_some_and(|p| !p.worker_agent_ids.is_empty());
        if !ready {
            self.logger.log(
                LogLevel::Warning,
                "Need both Principal Agent and Azure AI Agent to run",
            );
            return Err(RunControlError::MissingPrerequisite);
        }

        let frame = {
            let mut state = lock(&self.state);
            state.begin(Instant::now());
            state.frame()
        };
        let _ = self.frames_tx.send(frame);

        let state = Arc::clone(&self.state);
        let frames_tx = self.frames_tx.clone();
        self.driver = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_INTERVAL);
            loop {
                ticker.tick().await;
                let frame = {
                    let mut state = lock(&state);
                    state.advance(Instant::now());
                    state.frame()
                };
                let _ = frames_tx.send(frame);
                if frame.phase == Phase::Idle {
                    break;
                }
            }
        }));
        Ok(())
    }

    /// Force an immediate return to idle: cancel the frame task, zero the
    /// progress and restore the forward direction.
    pub fn stop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let frame = {
            let mut state = lock(&self.state);
            state.stop();
            state.frame()
        };
        let _ = self.frames_tx.send(frame);
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

fn lock(state: &Arc<Mutex<AnimationState>>) -> MutexGuard<'_, AnimationState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}
