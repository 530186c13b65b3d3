//! Shared helpers for unit and integration tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::model::{Category, PhaseArtifacts, SetupTeardown, Test, TestStatus};
use crate::session::{OperatorGate, SessionError, SessionOptions, SessionProvider};

/// Build a test with `name == id` under the given category path.
pub fn test_named(id: &str, category_path: &str) -> Test {
    let path = PathBuf::from(category_path).join(id);
    let mut artifacts = PhaseArtifacts::for_unit(&path);
    artifacts.has_steps = true;
    Test {
        id: id.to_string(),
        name: id.to_string(),
        path,
        status: TestStatus::Active,
        priority: Default::default(),
        tags: Vec::new(),
        owner: None,
        blocked_reason: None,
        category_path: PathBuf::from(category_path),
        artifacts,
    }
}

/// Build a category populated with simple tests named after the given ids.
pub fn category_with(name: &str, path: &str, test_ids: &[&str]) -> Category {
    let mut category = Category::new(name, path);
    for id in test_ids {
        category.tests.push(test_named(id, path));
    }
    category
}

/// Attach a valid setup folder to a category.
pub fn with_setup(mut category: Category) -> Category {
    let path = category.path.join("_setup");
    let mut artifacts = PhaseArtifacts::for_unit(&path);
    artifacts.has_steps = true;
    category.setup = Some(SetupTeardown { path, artifacts });
    category
}

/// Attach a valid teardown folder to a category.
pub fn with_teardown(mut category: Category) -> Category {
    let path = category.path.join("_teardown");
    let mut artifacts = PhaseArtifacts::for_unit(&path);
    artifacts.has_steps = true;
    category.teardown = Some(SetupTeardown { path, artifacts });
    category
}

/// Opaque stand-in for a live browser session.
#[derive(Debug, Default)]
pub struct FakeSession {
    pub visited: Vec<String>,
}

/// Session provider that hands out [`FakeSession`]s and counts lifecycle
/// calls so tests can assert acquire/release pairing.
#[derive(Debug, Clone, Default)]
pub struct FakeProvider {
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
}

impl SessionProvider for FakeProvider {
    type Session = FakeSession;

    fn acquire(&self, _options: &SessionOptions) -> Result<FakeSession, SessionError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession::default())
    }

    fn release(&self, _session: FakeSession) -> Result<(), SessionError> {
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Provider whose acquisition always fails, for resource-error paths.
#[derive(Debug, Clone, Default)]
pub struct FailingProvider;

impl SessionProvider for FailingProvider {
    type Session = FakeSession;

    fn acquire(&self, _options: &SessionOptions) -> Result<FakeSession, SessionError> {
        Err(SessionError::Acquire("browser unavailable".to_string()))
    }

    fn release(&self, _session: FakeSession) -> Result<(), SessionError> {
        Ok(())
    }
}

/// Operator gate that records every wait reason instead of blocking.
#[derive(Debug, Clone, Default)]
pub struct RecordingGate {
    pub waits: Arc<Mutex<Vec<String>>>,
}

impl OperatorGate for RecordingGate {
    fn wait(&self, reason: &str) {
        self.waits.lock().expect("gate lock").push(reason.to_string());
    }
}
