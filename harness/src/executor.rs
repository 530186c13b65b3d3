//! Action executor boundary.
//!
//! Every unit (setup/test/teardown) is executed by invoking exactly one
//! externally supplied procedure, handed the live session and the run's
//! context. Procedures are resolved through an explicit registry keyed by
//! unit path and phase, populated when the embedding application wires up
//! the engine; there is no runtime introspection.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::core::model::{Phase, ProcedureLookup};
use crate::io::context::RunContext;

/// Failure raised by a procedure.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ActionError {
    pub kind: String,
    pub message: String,
    /// Best-effort screenshot the procedure captured before failing.
    pub screenshot: Option<PathBuf>,
}

impl ActionError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            screenshot: None,
        }
    }

    pub fn with_screenshot(mut self, screenshot: impl Into<PathBuf>) -> Self {
        self.screenshot = Some(screenshot.into());
        self
    }
}

/// Outcome of executing one unit through the boundary.
#[derive(Debug)]
pub enum UnitOutcome {
    Passed,
    /// No artifact/procedure exists for the unit at all; the unit is
    /// recorded as skipped.
    NotFound { message: String },
    /// The unit exists but no procedure matches the requested phase; the
    /// unit is recorded as failed.
    LookupFailed { message: String },
    Failed {
        error: String,
        kind: String,
        screenshot: Option<PathBuf>,
    },
}

/// Boundary trait between the engine and the in-browser procedures.
pub trait ActionExecutor<S> {
    fn execute(
        &self,
        unit_path: &Path,
        phase: Phase,
        session: &mut S,
        context: &mut RunContext,
    ) -> UnitOutcome;
}

type Action<S> = Box<dyn Fn(&mut S, &mut RunContext) -> Result<(), ActionError> + Send + Sync>;

/// Registry of executable procedures keyed by unit path and phase.
pub struct ActionRegistry<S> {
    actions: HashMap<PathBuf, HashMap<Phase, Action<S>>>,
}

impl<S> Default for ActionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ActionRegistry<S> {
    pub fn new() -> Self {
        Self {
            actions: HashMap::new(),
        }
    }

    /// Register the procedure for a unit path and phase, replacing any
    /// previous registration.
    pub fn register<F>(&mut self, unit_path: impl Into<PathBuf>, phase: Phase, action: F)
    where
        F: Fn(&mut S, &mut RunContext) -> Result<(), ActionError> + Send + Sync + 'static,
    {
        self.actions
            .entry(unit_path.into())
            .or_default()
            .insert(phase, Box::new(action));
    }

    pub fn len(&self) -> usize {
        self.actions.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl<S> ProcedureLookup for ActionRegistry<S> {
    fn has_procedure(&self, unit_path: &Path, phase: Phase) -> bool {
        self.actions
            .get(unit_path)
            .is_some_and(|phases| phases.contains_key(&phase))
    }
}

impl<S> ActionExecutor<S> for ActionRegistry<S> {
    fn execute(
        &self,
        unit_path: &Path,
        phase: Phase,
        session: &mut S,
        context: &mut RunContext,
    ) -> UnitOutcome {
        let Some(phases) = self.actions.get(unit_path) else {
            return UnitOutcome::NotFound {
                message: format!("no procedure registered for {}", unit_path.display()),
            };
        };
        let Some(action) = phases.get(&phase) else {
            return UnitOutcome::LookupFailed {
                message: format!(
                    "no {} procedure found for {}",
                    phase.as_str(),
                    unit_path.display()
                ),
            };
        };

        debug!(unit = %unit_path.display(), phase = phase.as_str(), "executing procedure");
        let outcome = catch_unwind(AssertUnwindSafe(|| action(session, context)));
        match outcome {
            Ok(Ok(())) => UnitOutcome::Passed,
            Ok(Err(err)) => UnitOutcome::Failed {
                error: err.to_string(),
                kind: err.kind.clone(),
                screenshot: err.screenshot,
            },
            Err(panic) => UnitOutcome::Failed {
                error: panic_message(&panic),
                kind: "panic".to_string(),
                screenshot: None,
            },
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_string()
    }
}
