//! Load detection for the embedded content area.
//!
//! Every navigation starts a new attempt in `Loading` and arms a countdown.
//! The attempt ends in exactly one of `Loaded` or `Blocked`; whichever signal
//! arrives first wins and every later signal for that attempt is ignored.
//! Signals are tagged with the [`AttemptId`] returned by
//! [`FrameLoader::navigate`], so a countdown or load callback that belongs to
//! a previous address can never touch the current one.

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_millis(8000);

const BLOCKED_MESSAGE: &str =
    "This site doesn't allow embedding. It will open in a new tab instead.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Idle,
    Loading,
    Loaded,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    TimedOut,
    LoadError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Loaded {
        attempt: AttemptId,
        address: String,
    },
    Blocked {
        attempt: AttemptId,
        address: String,
        reason: BlockReason,
    },
}

impl FrameEvent {
    pub fn attempt(&self) -> AttemptId {
        match self {
            Self::Loaded { attempt, .. } | Self::Blocked { attempt, .. } => *attempt,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub attempt: AttemptId,
    pub address: String,
    pub label: String,
    pub phase: FramePhase,
}

/// What the host draws on top of the content area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOverlay {
    None,
    Busy { label: String },
    Blocked { message: String, external_url: String },
}

struct Attempt {
    id: AttemptId,
    address: String,
    label: String,
    phase: FramePhase,
}

#[derive(Default)]
struct FrameState {
    next_attempt: u64,
    current: Option<Attempt>,
    countdown: Option<JoinHandle<()>>,
}

impl FrameState {
    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.countdown.take() {
            handle.abort();
        }
    }

    fn loading_attempt(&mut self, attempt: AttemptId) -> Option<&mut Attempt> {
        self.current
            .as_mut()
            .filter(|current| current.id == attempt && current.phase == FramePhase::Loading)
    }

    fn finish(&mut self, attempt: AttemptId, phase: FramePhase) -> Option<String> {
        let current = self.loading_attempt(attempt)?;
        current.phase = phase;
        Some(current.address.clone())
    }
}

impl Drop for FrameState {
    fn drop(&mut self) {
        self.cancel_countdown();
    }
}

#[derive(Clone)]
pub struct FrameLoader {
    timeout: Duration,
    state: Arc<Mutex<FrameState>>,
    events: mpsc::UnboundedSender<FrameEvent>,
}

impl FrameLoader {
    pub fn new(timeout: Duration) -> (Self, mpsc::UnboundedReceiver<FrameEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let loader = Self {
            timeout,
            state: Arc::new(Mutex::new(FrameState::default())),
            events,
        };
        (loader, rx)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Starts a new attempt for `address`, cancelling whatever attempt was in
    /// flight. Must be called from within a tokio runtime.
    pub fn navigate(&self, address: impl Into<String>, label: impl Into<String>) -> AttemptId {
        let address = address.into();
        let mut state = lock_or_recover(&self.state);
        state.cancel_countdown();

        state.next_attempt += 1;
        let attempt = AttemptId(state.next_attempt);
        debug!(attempt = attempt.0, %address, "frame attempt started");
        state.current = Some(Attempt {
            id: attempt,
            address,
            label: label.into(),
            phase: FramePhase::Loading,
        });
        state.countdown = Some(spawn_countdown(
            Arc::downgrade(&self.state),
            self.events.clone(),
            attempt,
            self.timeout,
        ));
        attempt
    }

    pub fn signal_loaded(&self, attempt: AttemptId) -> bool {
        let address = {
            let mut state = lock_or_recover(&self.state);
            let Some(address) = state.finish(attempt, FramePhase::Loaded) else {
                return false;
            };
            state.cancel_countdown();
            address
        };
        debug!(attempt = attempt.0, %address, "frame loaded");
        self.emit(FrameEvent::Loaded { attempt, address });
        true
    }

    pub fn signal_error(&self, attempt: AttemptId) -> bool {
        let address = {
            let mut state = lock_or_recover(&self.state);
            let Some(address) = state.finish(attempt, FramePhase::Blocked) else {
                return false;
            };
            state.cancel_countdown();
            address
        };
        debug!(attempt = attempt.0, %address, "frame load error");
        self.emit(FrameEvent::Blocked {
            attempt,
            address,
            reason: BlockReason::LoadError,
        });
        true
    }

    pub fn teardown(&self) {
        let mut state = lock_or_recover(&self.state);
        state.cancel_countdown();
        state.current = None;
    }

    pub fn phase(&self) -> FramePhase {
        lock_or_recover(&self.state)
            .current
            .as_ref()
            .map_or(FramePhase::Idle, |current| current.phase)
    }

    pub fn current_attempt(&self) -> Option<AttemptId> {
        lock_or_recover(&self.state)
            .current
            .as_ref()
            .map(|current| current.id)
    }

    pub fn snapshot(&self) -> Option<FrameSnapshot> {
        lock_or_recover(&self.state)
            .current
            .as_ref()
            .map(|current| FrameSnapshot {
                attempt: current.id,
                address: current.address.clone(),
                label: current.label.clone(),
                phase: current.phase,
            })
    }

    pub fn overlay(&self) -> FrameOverlay {
        let state = lock_or_recover(&self.state);
        match state.current.as_ref() {
            Some(current) if current.phase == FramePhase::Loading => FrameOverlay::Busy {
                label: current.label.clone(),
            },
            Some(current) if current.phase == FramePhase::Blocked => FrameOverlay::Blocked {
                message: BLOCKED_MESSAGE.to_string(),
                external_url: current.address.clone(),
            },
            _ => FrameOverlay::None,
        }
    }

    fn emit(&self, event: FrameEvent) {
        send_event(&self.events, event);
    }
}

fn send_event(events: &mpsc::UnboundedSender<FrameEvent>, event: FrameEvent) {
    if events.send(event).is_err() {
        debug!("frame event receiver dropped");
    }
}

fn spawn_countdown(
    state: Weak<Mutex<FrameState>>,
    events: mpsc::UnboundedSender<FrameEvent>,
    attempt: AttemptId,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(state) = state.upgrade() else {
            return;
        };
        let address = {
            let mut state = lock_or_recover(&state);
            let Some(address) = state.finish(attempt, FramePhase::Blocked) else {
                return;
            };
            // This task is the countdown; detach instead of aborting it.
            state.countdown = None;
            address
        };
        debug!(attempt = attempt.0, %address, "frame load timed out");
        send_event(
            &events,
            FrameEvent::Blocked {
                attempt,
                address,
                reason: BlockReason::TimedOut,
            },
        );
    })
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("poisoned frame loader mutex; recovering inner state");
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
#[path = "tests/frame_loader_tests.rs"]
mod tests;
