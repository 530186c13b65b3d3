//! CLI event reporter.
//!
//! Subscribes to the event bus and prints one progress line per event to
//! stdout. Kept free of terminal styling so output stays greppable and
//! stable under redirection.

use std::sync::Arc;

use crate::core::model::Phase;
use crate::events::{EventBus, RunnerEvent, SubscriberId};

/// Printing subscriber for interactive runs.
pub struct EventReporter {
    bus: Arc<EventBus>,
    id: SubscriberId,
}

impl EventReporter {
    /// Attach a reporter to the bus. Detaches on drop.
    pub fn attach(bus: Arc<EventBus>) -> Self {
        let id = bus.subscribe(print_event);
        Self { bus, id }
    }
}

impl Drop for EventReporter {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

fn print_event(event: &RunnerEvent) {
    match event {
        RunnerEvent::RunStarted {
            total_categories,
            total_tests,
            ..
        } => {
            println!();
            println!("=== Run started: {total_categories} categories, {total_tests} tests ===");
        }
        RunnerEvent::RunCompleted {
            status,
            passed,
            failed,
            skipped,
            duration_ms,
        } => {
            println!();
            println!(
                "=== Run {}: {passed} passed, {failed} failed, {skipped} skipped ({duration_ms}ms) ===",
                status.as_str()
            );
        }
        RunnerEvent::CategoryStarted {
            category,
            planned_units,
            has_setup,
            ..
        } => {
            let setup_note = if *has_setup { " (has setup)" } else { "" };
            println!();
            println!(">>> Category: {category}{setup_note} [{planned_units} units]");
        }
        RunnerEvent::CategoryCompleted {
            category,
            status,
            passed,
            failed,
            skipped,
        } => {
            println!(
                "    Category {category} {}: {passed} passed, {failed} failed, {skipped} skipped",
                status.as_str()
            );
        }
        RunnerEvent::SessionStarting { .. } => println!("    Session starting..."),
        RunnerEvent::SessionStarted { .. } => println!("    Session ready"),
        RunnerEvent::SessionClosing { .. } => println!("    Session closing..."),
        RunnerEvent::TestStarted {
            test,
            test_type,
            index,
            total,
            ..
        } => match test_type {
            Phase::Setup => println!("    [Setup] {test}"),
            Phase::Teardown => println!("    [Teardown] {test}"),
            Phase::Test => println!("    [{index}/{total}] {test}"),
        },
        RunnerEvent::TestProgress { test, message } => {
            println!("        {test}: {message}");
        }
        RunnerEvent::TestCompleted {
            test,
            status,
            duration_ms,
            ..
        } => {
            println!("        {test} {} ({duration_ms}ms)", status.as_str());
        }
        RunnerEvent::TestFailed { test, error, .. } => {
            println!("        {test} FAILED: {error}");
        }
        RunnerEvent::HealRequestCreated { test, path } => {
            println!("        heal request for {test}: {}", path.display());
        }
        RunnerEvent::ContextUpdated { .. } => {}
    }
}
