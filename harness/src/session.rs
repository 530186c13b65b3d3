//! Session provider boundary.
//!
//! One external browser session is acquired per top-level category run and
//! exclusively owned by it; subcategories borrow it but never acquire their
//! own. The actual browser process lives behind [`SessionProvider`], which
//! the embedding application implements.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Options passed to the provider when acquiring a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub record_video: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: false,
            viewport_width: 1920,
            viewport_height: 1080,
            record_video: true,
        }
    }
}

/// Session acquisition/release failures. These are the only errors besides
/// resolution failures that abort a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session acquisition failed: {0}")]
    Acquire(String),
    #[error("session release failed: {0}")]
    Release(String),
}

/// Provider of the one browser session a run owns.
pub trait SessionProvider {
    type Session;

    fn acquire(&self, options: &SessionOptions) -> Result<Self::Session, SessionError>;
    fn release(&self, session: Self::Session) -> Result<(), SessionError>;
}

/// Blocking wait for operator input before the session is released.
///
/// Used by the until-test stop and keep-open-on-failure modes. This is a
/// deliberate, explicit suspension point, not a timeout.
pub trait OperatorGate {
    fn wait(&self, reason: &str);
}

/// Gate that prompts on stdout and blocks until a line arrives on stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinGate;

impl OperatorGate for StdinGate {
    fn wait(&self, reason: &str) {
        info!(reason, "waiting for operator acknowledgment");
        println!("{reason}");
        print!("Press Enter to close the session... ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }
}

/// Gate that never blocks, for non-interactive callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopGate;

impl OperatorGate for NoopGate {
    fn wait(&self, reason: &str) {
        debug!(reason, "operator gate bypassed");
    }
}

/// Provider for runs without an embedded browser stack.
///
/// Hands out inert sessions so that discovery-only workflows (listing,
/// dry runs against an empty action registry) can exercise the full
/// engine lifecycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSessionProvider;

/// Inert session handle produced by [`DetachedSessionProvider`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedSession;

impl SessionProvider for DetachedSessionProvider {
    type Session = DetachedSession;

    fn acquire(&self, options: &SessionOptions) -> Result<DetachedSession, SessionError> {
        debug!(headless = options.headless, "acquiring detached session");
        Ok(DetachedSession)
    }

    fn release(&self, _session: DetachedSession) -> Result<(), SessionError> {
        debug!("releasing detached session");
        Ok(())
    }
}
