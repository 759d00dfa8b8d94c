use tokio::sync::watch;

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Starting,
    Ready,
    Failed(String),
}

/// One-way startup gate: commands wait here until the stores are recovered.
///
/// Cloning shares the gate. Once it leaves `Starting` it never changes again.
#[derive(Clone)]
pub struct Readiness {
    tx: watch::Sender<State>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(State::Starting);
        Self { tx }
    }

    pub fn set_ready(&self) {
        self.settle(State::Ready);
    }

    /// Startup failed; every waiter (now and later) gets a connection error.
    pub fn set_failed(&self, reason: impl Into<String>) {
        self.settle(State::Failed(reason.into()));
    }

    fn settle(&self, state: State) {
        self.tx.send_if_modified(|current| {
            if *current != State::Starting {
                return false;
            }
            *current = state;
            true
        });
    }

    /// Resolve once startup has finished; immediately if it already has.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let state = match rx.wait_for(|state| *state != State::Starting).await {
            Ok(state) => state.clone(),
            Err(_) => State::Starting,
        };
        match state {
            State::Ready => Ok(()),
            State::Failed(reason) => Err(SchedulerError::Connection {
                component: "store",
                reason: format!("scheduler failed to start: {reason}"),
            }),
            State::Starting => Err(SchedulerError::Connection {
                component: "store",
                reason: "scheduler is shutting down".to_string(),
            }),
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}
