//! Stress runner: repeat category runs to surface flakiness.

use std::collections::BTreeMap;

use tracing::info;

use crate::core::results::{CategoryStatus, UnitStatus};
use crate::engine::{Engine, EngineError, RunRequest};
use crate::executor::ActionExecutor;
use crate::session::{OperatorGate, SessionProvider};

/// Result of a single stress iteration.
#[derive(Debug, Clone)]
pub struct StressRun {
    pub iteration: usize,
    pub category: String,
    pub status: CategoryStatus,
    pub passed: bool,
    /// First failing unit's error, when the iteration failed.
    pub error: Option<String>,
    pub error_kind: Option<String>,
}

/// Aggregated stress result for one category.
#[derive(Debug, Clone)]
pub struct StressReport {
    pub category: String,
    pub total_iterations: usize,
    pub runs: Vec<StressRun>,
}

impl StressReport {
    pub fn passed_count(&self) -> usize {
        self.runs.iter().filter(|r| r.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.runs.len() - self.passed_count()
    }

    /// Pass rate as a percentage of completed iterations.
    pub fn pass_rate(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        (self.passed_count() as f64 / self.runs.len() as f64) * 100.0
    }

    /// Histogram of failure reasons, keyed by error kind plus the first
    /// line of the error message.
    pub fn failure_reasons(&self) -> BTreeMap<String, usize> {
        let mut reasons = BTreeMap::new();
        for run in &self.runs {
            if run.passed {
                continue;
            }
            let mut key = run.error_kind.clone().unwrap_or_else(|| "Unknown".to_string());
            if let Some(error) = &run.error {
                let first_line = error.lines().next().unwrap_or("").trim();
                let first_line = if first_line.len() > 100 {
                    let mut end = 100;
                    while !first_line.is_char_boundary(end) {
                        end -= 1;
                    }
                    format!("{}...", &first_line[..end])
                } else {
                    first_line.to_string()
                };
                key = format!("{key}: {first_line}");
            }
            *reasons.entry(key).or_insert(0) += 1;
        }
        reasons
    }

    /// Flaky: some iterations pass and some fail.
    pub fn is_flaky(&self) -> bool {
        self.passed_count() > 0 && self.failed_count() > 0
    }
}

/// Run each category `iterations` times and aggregate per-category
/// reports. Iterations run sequentially on the same engine; each one is a
/// complete category run with its own session and context.
pub fn run_stress<P, A, G>(
    engine: &mut Engine<P, A, G>,
    categories: &[String],
    iterations: usize,
) -> Result<Vec<StressReport>, EngineError>
where
    P: SessionProvider,
    A: ActionExecutor<P::Session>,
    G: OperatorGate,
{
    let mut reports = Vec::with_capacity(categories.len());
    for category in categories {
        let mut report = StressReport {
            category: category.clone(),
            total_iterations: iterations,
            runs: Vec::with_capacity(iterations),
        };
        for iteration in 1..=iterations {
            info!(category = %category, iteration, total = iterations, "stress iteration");
            let request = RunRequest {
                category: category.clone(),
                ..RunRequest::default()
            };
            let result = engine.run_category(&request)?;
            let status = result.status();
            let first_failure = result
                .all_units()
                .find(|u| u.status == UnitStatus::Failed);
            report.runs.push(StressRun {
                iteration,
                category: category.clone(),
                status,
                passed: status == CategoryStatus::Passed,
                error: first_failure.and_then(|u| u.error.clone()),
                error_kind: first_failure.and_then(|u| u.error_kind.clone()),
            });
        }
        reports.push(report);
    }
    Ok(reports)
}
