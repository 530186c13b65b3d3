//! Result records for unit, category and run outcomes.
//!
//! Records are immutable after creation. Category and run statuses are
//! always derived from the contained unit results, never stored directly;
//! reporting and automated triage depend on these derivation rules.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::model::Phase;

/// Outcome of a single unit (test, setup or teardown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Passed,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitStatus::Passed => "passed",
            UnitStatus::Failed => "failed",
            UnitStatus::Skipped => "skipped",
        }
    }
}

/// Derived status of a category run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryStatus {
    Passed,
    Failed,
    Partial,
    Skipped,
}

impl CategoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CategoryStatus::Passed => "passed",
            CategoryStatus::Failed => "failed",
            CategoryStatus::Partial => "partial",
            CategoryStatus::Skipped => "skipped",
        }
    }
}

/// Derived status of a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Passed,
    Failed,
    Partial,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::Partial => "partial",
        }
    }
}

/// Result of a single test, setup or teardown execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub test_path: PathBuf,
    pub test_type: Phase,
    pub status: UnitStatus,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
    /// Context state at time of failure, captured for diagnostics.
    #[serde(default)]
    pub context_snapshot: Option<serde_json::Value>,
}

impl TestResult {
    pub fn passed(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        phase: Phase,
        duration_ms: u64,
    ) -> Self {
        Self {
            test_name: name.into(),
            test_path: path.into(),
            test_type: phase,
            status: UnitStatus::Passed,
            duration_ms,
            error: None,
            error_kind: None,
            screenshot: None,
            context_snapshot: None,
        }
    }

    pub fn skipped(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        phase: Phase,
        error: impl Into<String>,
    ) -> Self {
        Self {
            test_name: name.into(),
            test_path: path.into(),
            test_type: phase,
            status: UnitStatus::Skipped,
            duration_ms: 0,
            error: Some(error.into()),
            error_kind: None,
            screenshot: None,
            context_snapshot: None,
        }
    }

    pub fn failed(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        phase: Phase,
        duration_ms: u64,
        error: impl Into<String>,
        error_kind: impl Into<String>,
    ) -> Self {
        Self {
            test_name: name.into(),
            test_path: path.into(),
            test_type: phase,
            status: UnitStatus::Failed,
            duration_ms,
            error: Some(error.into()),
            error_kind: Some(error_kind.into()),
            screenshot: None,
            context_snapshot: None,
        }
    }
}

/// Result of running all units in a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryResult {
    pub category_name: String,
    pub category_path: PathBuf,
    #[serde(default)]
    pub setup_result: Option<TestResult>,
    #[serde(default)]
    pub test_results: Vec<TestResult>,
    #[serde(default)]
    pub teardown_result: Option<TestResult>,
    /// True when the run stopped before completing the plan (failure or
    /// until-test stop).
    #[serde(default)]
    pub stopped_early: bool,
    /// Identity of the next planned test when an until-test stop occurred.
    #[serde(default)]
    pub next_test: Option<String>,
}

impl CategoryResult {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            category_name: name.into(),
            category_path: path.into(),
            setup_result: None,
            test_results: Vec::new(),
            teardown_result: None,
            stopped_early: false,
            next_test: None,
        }
    }

    /// Count of passed tests (excluding setup/teardown).
    pub fn passed(&self) -> usize {
        self.count(UnitStatus::Passed)
    }

    /// Count of failed tests (excluding setup/teardown).
    pub fn failed(&self) -> usize {
        self.count(UnitStatus::Failed)
    }

    /// Count of skipped tests (excluding setup/teardown).
    pub fn skipped(&self) -> usize {
        self.count(UnitStatus::Skipped)
    }

    /// Total number of test results (excluding setup/teardown).
    pub fn total(&self) -> usize {
        self.test_results.len()
    }

    fn count(&self, status: UnitStatus) -> usize {
        self.test_results
            .iter()
            .filter(|r| r.status == status)
            .count()
    }

    /// Derived category status.
    ///
    /// `skipped` if there are no test results; `failed` if setup failed;
    /// else `failed` when there are failures and no passes, `partial` when
    /// both, `passed` otherwise.
    pub fn status(&self) -> CategoryStatus {
        if self.test_results.is_empty() {
            return CategoryStatus::Skipped;
        }
        if let Some(setup) = &self.setup_result {
            if setup.status == UnitStatus::Failed {
                return CategoryStatus::Failed;
            }
        }
        if self.failed() > 0 {
            if self.passed() == 0 {
                CategoryStatus::Failed
            } else {
                CategoryStatus::Partial
            }
        } else {
            CategoryStatus::Passed
        }
    }

    /// Total duration including setup and teardown.
    pub fn duration_ms(&self) -> u64 {
        let mut total = 0;
        if let Some(setup) = &self.setup_result {
            total += setup.duration_ms;
        }
        for result in &self.test_results {
            total += result.duration_ms;
        }
        if let Some(teardown) = &self.teardown_result {
            total += teardown.duration_ms;
        }
        total
    }

    /// Iterate over every unit result including setup and teardown.
    pub fn all_units(&self) -> impl Iterator<Item = &TestResult> {
        self.setup_result
            .iter()
            .chain(self.test_results.iter())
            .chain(self.teardown_result.iter())
    }
}

/// Result of a complete run across categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub started_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub category_results: Vec<CategoryResult>,
}

impl RunResult {
    pub fn new(started_at: impl Into<String>) -> Self {
        Self {
            started_at: started_at.into(),
            completed_at: None,
            duration_ms: 0,
            category_results: Vec::new(),
        }
    }

    pub fn total_passed(&self) -> usize {
        self.category_results.iter().map(CategoryResult::passed).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.category_results.iter().map(CategoryResult::failed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.category_results.iter().map(CategoryResult::skipped).sum()
    }

    pub fn total_tests(&self) -> usize {
        self.category_results.iter().map(CategoryResult::total).sum()
    }

    /// Derived run status, same rules as [`CategoryResult::status`]
    /// generalized across categories. An empty run is `passed`.
    pub fn status(&self) -> RunStatus {
        if self.category_results.is_empty() {
            return RunStatus::Passed;
        }
        if self.total_failed() > 0 {
            if self.total_passed() == 0 {
                RunStatus::Failed
            } else {
                RunStatus::Partial
            }
        } else {
            RunStatus::Passed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: UnitStatus) -> TestResult {
        TestResult {
            test_name: "unit".to_string(),
            test_path: PathBuf::from("cat/unit"),
            test_type: Phase::Test,
            status,
            duration_ms: 10,
            error: None,
            error_kind: None,
            screenshot: None,
            context_snapshot: None,
        }
    }

    fn category(statuses: &[UnitStatus]) -> CategoryResult {
        let mut cat = CategoryResult::new("cat", "cat");
        cat.test_results = statuses.iter().map(|s| result(*s)).collect();
        cat
    }

    #[test]
    fn category_status_derivation_matrix() {
        use UnitStatus::{Failed, Passed};

        assert_eq!(category(&[Passed, Passed]).status(), CategoryStatus::Passed);
        assert_eq!(category(&[Passed, Failed]).status(), CategoryStatus::Partial);
        assert_eq!(category(&[Failed, Failed]).status(), CategoryStatus::Failed);
        assert_eq!(category(&[]).status(), CategoryStatus::Skipped);
    }

    #[test]
    fn setup_failure_forces_failed_status() {
        let mut cat = category(&[UnitStatus::Skipped, UnitStatus::Skipped]);
        cat.setup_result = Some(result(UnitStatus::Failed));
        assert_eq!(cat.status(), CategoryStatus::Failed);
    }

    #[test]
    fn skipped_tests_alone_do_not_fail_a_category() {
        let cat = category(&[UnitStatus::Passed, UnitStatus::Skipped]);
        assert_eq!(cat.status(), CategoryStatus::Passed);
    }

    #[test]
    fn duration_includes_setup_and_teardown() {
        let mut cat = category(&[UnitStatus::Passed]);
        cat.setup_result = Some(result(UnitStatus::Passed));
        cat.teardown_result = Some(result(UnitStatus::Passed));
        assert_eq!(cat.duration_ms(), 30);
    }

    #[test]
    fn run_status_generalizes_category_rules() {
        let mut run = RunResult::new("2026-01-01T00:00:00");
        assert_eq!(run.status(), RunStatus::Passed);

        run.category_results
            .push(category(&[UnitStatus::Passed, UnitStatus::Failed]));
        assert_eq!(run.status(), RunStatus::Partial);

        run.category_results[0] = category(&[UnitStatus::Failed]);
        assert_eq!(run.status(), RunStatus::Failed);
    }

    #[test]
    fn counts_cover_all_planned_units() {
        let cat = category(&[UnitStatus::Passed, UnitStatus::Failed, UnitStatus::Skipped]);
        assert_eq!(cat.passed() + cat.failed() + cat.skipped(), cat.total());
    }
}
