//! Single-run-at-a-time service boundary.
//!
//! A run executes on a background worker thread while callers drain the
//! event bus. The service guards the one-run invariant with an atomic
//! flag: starting a second run while one is active fails fast with a
//! conflict instead of queuing. Completion publishes `RunCompleted` on
//! the bus (the engine emits it as its final event).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::info;

use crate::core::results::{CategoryResult, RunResult};
use crate::engine::{Engine, EngineError, RunRequest};
use crate::executor::ActionExecutor;
use crate::session::{OperatorGate, SessionProvider};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("a run is already in progress")]
    RunInProgress,
}

/// What to run.
#[derive(Debug, Clone)]
pub enum RunCommand {
    All,
    Category(RunRequest),
}

/// Outcome of a completed run.
#[derive(Debug)]
pub enum RunOutcome {
    Run(RunResult),
    Category(CategoryResult),
}

/// Handle to a run executing on a worker thread. Joining returns the
/// engine for reuse alongside the outcome.
pub struct RunHandle<P: SessionProvider, A, G> {
    join: JoinHandle<(Engine<P, A, G>, Result<RunOutcome, EngineError>)>,
}

impl<P: SessionProvider, A, G> RunHandle<P, A, G> {
    /// Block until the run finishes. A panicking run resolves to an
    /// `EngineError` rather than propagating the panic.
    pub fn join(self) -> (Option<Engine<P, A, G>>, Result<RunOutcome, EngineError>) {
        match self.join.join() {
            Ok((engine, outcome)) => (Some(engine), outcome),
            Err(_) => (
                None,
                Err(EngineError::Storage(anyhow::anyhow!("run thread panicked"))),
            ),
        }
    }
}

/// Resets the active flag when the run ends, panic included.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the one-run-at-a-time invariant.
#[derive(Clone, Default)]
pub struct RunService {
    active: Arc<AtomicBool>,
}

impl RunService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a run on a worker thread, taking ownership of the engine for
    /// the duration. Fails fast when a run is already active.
    pub fn start<P, A, G>(
        &self,
        mut engine: Engine<P, A, G>,
        command: RunCommand,
    ) -> Result<RunHandle<P, A, G>, ServiceError>
    where
        P: SessionProvider + Send + 'static,
        A: ActionExecutor<P::Session> + Send + 'static,
        G: OperatorGate + Send + 'static,
    {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServiceError::RunInProgress);
        }

        let guard = ActiveGuard(Arc::clone(&self.active));
        let join = std::thread::spawn(move || {
            let _guard = guard;
            info!(?command, "run started");
            let outcome = match command {
                RunCommand::All => engine.run_all().map(RunOutcome::Run),
                RunCommand::Category(request) => {
                    engine.run_category(&request).map(RunOutcome::Category)
                }
            };
            (engine, outcome)
        });
        Ok(RunHandle { join })
    }
}
