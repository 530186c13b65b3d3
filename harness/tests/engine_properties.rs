//! End-to-end engine behavior against a real tests tree on disk.

use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use harness::core::model::Phase;
use harness::core::results::{CategoryStatus, UnitStatus};
use harness::engine::{Engine, RunRequest};
use harness::events::EventBus;
use harness::executor::{ActionError, ActionRegistry};
use harness::io::config::TargetConfig;
use harness::io::discovery::Discovery;
use harness::io::heal::HealGenerator;
use harness::io::storage::RunStorage;
use harness::test_support::{FakeProvider, FakeSession, RecordingGate};

type TestEngine = Engine<FakeProvider, ActionRegistry<FakeSession>, RecordingGate>;

fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

/// `scheduling/{_setup,_teardown,alpha,bravo,charlie}` with steps files.
fn seed_flat_tree(tests_root: &Path) {
    write(&tests_root.join("scheduling/_setup/steps.md"), "# Setup");
    write(&tests_root.join("scheduling/_teardown/steps.md"), "# Teardown");
    for test in ["alpha", "bravo", "charlie"] {
        write(
            &tests_root.join("scheduling").join(test).join("steps.md"),
            "# Steps",
        );
    }
}

struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }

    /// A passing action that appends `label` to the shared log.
    fn pass(&self, label: &str) -> impl Fn(&mut FakeSession, &mut harness::io::context::RunContext) -> Result<(), ActionError> + Send + Sync + 'static {
        let log = Arc::clone(&self.0);
        let label = label.to_string();
        move |_, _| {
            log.lock().expect("log lock").push(label.clone());
            Ok(())
        }
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().expect("log lock").clone()
    }
}

fn register_phase(
    registry: &mut ActionRegistry<FakeSession>,
    recorder: &Recorder,
    path: &str,
    phase: harness::core::model::Phase,
    label: &str,
) {
    registry.register(path, phase, recorder.pass(label));
}

fn build_engine(
    root: &Path,
    registry: ActionRegistry<FakeSession>,
    config: TargetConfig,
) -> (TestEngine, FakeProvider, RecordingGate) {
    let tests_root = root.join("tests");
    let provider = FakeProvider::default();
    let gate = RecordingGate::default();
    let engine = Engine::new(
        Discovery::new(&tests_root).expect("discovery"),
        RunStorage::new(&tests_root, config.max_runs_per_category),
        HealGenerator::new(root.join("heal_requests"), &tests_root),
        Arc::new(EventBus::new()),
        provider.clone(),
        registry,
        gate.clone(),
        config,
    );
    (engine, provider, gate)
}

fn request(category: &str) -> RunRequest {
    RunRequest {
        category: category.to_string(),
        ..RunRequest::default()
    }
}

#[test]
fn full_pass_runs_setup_plan_and_teardown_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/_setup", Phase::Setup, "setup");
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(&mut registry, &recorder, "scheduling/bravo", Phase::Test, "bravo");
    register_phase(&mut registry, &recorder, "scheduling/charlie", Phase::Test, "charlie");
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "teardown");

    let (mut engine, provider, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    assert_eq!(
        recorder.entries(),
        vec!["setup", "alpha", "bravo", "charlie", "teardown"]
    );
    assert_eq!(result.status(), CategoryStatus::Passed);
    assert_eq!(result.passed(), 3);
    assert_eq!(result.setup_result.as_ref().map(|r| r.status), Some(UnitStatus::Passed));
    assert_eq!(result.teardown_result.as_ref().map(|r| r.status), Some(UnitStatus::Passed));
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);

    let run_id = engine.last_run_id().expect("run id").to_string();
    let run_dir = temp.path().join("tests/scheduling/_runs").join(&run_id);
    assert!(run_dir.join("run.json").is_file());
    assert!(run_dir.join("context.json").is_file());
    assert!(run_dir.join("tests/Alpha/result.json").is_file());
    assert!(
        temp.path()
            .join("runs_index")
            .join(format!("{run_id}.json"))
            .is_file()
    );
}

#[test]
fn mid_plan_failure_skips_the_rest_but_still_tears_down() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/_setup", Phase::Setup, "setup");
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    registry.register("scheduling/bravo", Phase::Test, |_, _| {
        Err(ActionError::new("ElementNotFound", "no #save button"))
    });
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "teardown");

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    // charlie never executed, only alpha and lifecycle units did.
    assert_eq!(recorder.entries(), vec!["setup", "alpha", "teardown"]);
    assert_eq!(result.passed(), 1);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.skipped(), 1);
    assert_eq!(result.passed() + result.failed() + result.skipped(), result.total());
    assert_eq!(result.status(), CategoryStatus::Partial);
    assert!(result.stopped_early);
    assert!(result.teardown_result.is_some());

    let charlie = result
        .test_results
        .iter()
        .find(|r| r.test_name == "Charlie")
        .expect("charlie recorded");
    assert_eq!(charlie.status, UnitStatus::Skipped);
    assert_eq!(charlie.error.as_deref(), Some("Skipped due to Bravo failure"));
}

#[test]
fn setup_failure_skips_every_planned_unit_and_releases_the_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    registry.register("scheduling/_setup", Phase::Setup, |_, _| {
        Err(ActionError::new("Timeout", "login page never loaded"))
    });
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "teardown");

    let (mut engine, provider, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    assert_eq!(result.setup_result.as_ref().map(|r| r.status), Some(UnitStatus::Failed));
    assert_eq!(result.status(), CategoryStatus::Failed);
    assert_eq!(result.skipped(), 3);
    assert_eq!(result.passed() + result.failed() + result.skipped(), result.total());
    for unit in &result.test_results {
        assert_eq!(unit.status, UnitStatus::Skipped);
        assert_eq!(
            unit.error.as_deref(),
            Some("Skipped due to Scheduling setup failure")
        );
    }
    // Teardown still ran and the session came back.
    assert_eq!(recorder.entries(), vec!["teardown"]);
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
}

#[test]
fn until_test_stops_before_the_target_and_holds_the_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(&mut registry, &recorder, "scheduling/bravo", Phase::Test, "bravo");
    register_phase(&mut registry, &recorder, "scheduling/charlie", Phase::Test, "charlie");
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "teardown");

    let (mut engine, provider, gate) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine
        .run_category(&RunRequest {
            category: "scheduling".to_string(),
            until_test: Some("charlie".to_string()),
            ..RunRequest::default()
        })
        .expect("run");

    // The target and everything after it are skipped; teardown is not run
    // so the prepared state survives for manual work.
    assert_eq!(recorder.entries(), vec!["alpha", "bravo"]);
    assert_eq!(result.passed(), 2);
    assert_eq!(result.skipped(), 1);
    assert_eq!(result.passed() + result.failed() + result.skipped(), result.total());
    assert!(result.stopped_early);
    assert_eq!(result.next_test.as_deref(), Some("Charlie"));
    assert!(result.teardown_result.is_none());

    let charlie = result
        .test_results
        .iter()
        .find(|r| r.test_name == "Charlie")
        .expect("charlie recorded");
    assert_eq!(
        charlie.error.as_deref(),
        Some("Stopped before Charlie (until-test)")
    );

    let waits = gate.waits.lock().expect("gate lock").clone();
    assert_eq!(waits.len(), 1);
    assert!(waits[0].contains("Stopped before Charlie"));
    // Released after the gate opened.
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
}

#[test]
fn keep_open_on_failure_waits_at_the_gate_before_release() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let mut registry = ActionRegistry::new();
    registry.register("scheduling/alpha", Phase::Test, |_, _| {
        Err(ActionError::new("AssertionFailed", "wrong page title"))
    });

    let (mut engine, _, gate) = build_engine(temp.path(), registry, TargetConfig::default());
    engine
        .run_category(&RunRequest {
            category: "scheduling".to_string(),
            keep_open_on_failure: true,
            ..RunRequest::default()
        })
        .expect("run");

    let waits = gate.waits.lock().expect("gate lock").clone();
    assert_eq!(waits.len(), 1);
    assert!(waits[0].contains("session held open"));
}

#[test]
fn run_all_honors_configured_keep_open_on_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("billing/create_invoice/steps.md"), "# Steps");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    registry.register("billing/create_invoice", Phase::Test, |_, _| {
        Err(ActionError::new("AssertionFailed", "invoice total mismatch"))
    });
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");

    let config = TargetConfig {
        keep_open_on_failure: true,
        ..TargetConfig::default()
    };
    let (mut engine, provider, gate) = build_engine(temp.path(), registry, config);
    let run = engine.run_all().expect("run all");

    assert_eq!(run.total_failed(), 1);
    // Only the failed category's session is held open.
    let waits = gate.waits.lock().expect("gate lock").clone();
    assert_eq!(waits.len(), 1);
    assert!(waits[0].contains("session held open"));
    assert_eq!(provider.released.load(Ordering::SeqCst), 2);
}

#[test]
fn keep_open_on_failure_engages_when_setup_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let mut registry = ActionRegistry::new();
    registry.register("scheduling/_setup", Phase::Setup, |_, _| {
        Err(ActionError::new("Timeout", "login page never loaded"))
    });

    let (mut engine, provider, gate) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine
        .run_category(&RunRequest {
            category: "scheduling".to_string(),
            keep_open_on_failure: true,
            ..RunRequest::default()
        })
        .expect("run");

    // No test unit failed, but the run did; the session stays open for
    // inspection before release.
    assert_eq!(result.failed(), 0);
    assert_eq!(result.status(), CategoryStatus::Failed);
    let waits = gate.waits.lock().expect("gate lock").clone();
    assert_eq!(waits.len(), 1);
    assert!(waits[0].contains("session held open"));
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
}

#[test]
fn execution_order_overrides_discovery_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    seed_flat_tree(&tests_root);
    write(
        &tests_root.join("scheduling/_category.yaml"),
        "execution_order: [charlie, alpha, bravo]\n",
    );

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(&mut registry, &recorder, "scheduling/bravo", Phase::Test, "bravo");
    register_phase(&mut registry, &recorder, "scheduling/charlie", Phase::Test, "charlie");
    register_phase(&mut registry, &recorder, "scheduling/_setup", Phase::Setup, "setup");
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "teardown");

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    engine.run_category(&request("scheduling")).expect("run");

    assert_eq!(
        recorder.entries(),
        vec!["setup", "charlie", "alpha", "bravo", "teardown"]
    );
}

#[test]
fn run_after_interleaves_a_subcategory_and_folds_its_results() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");
    write(&tests_root.join("scheduling/bravo/steps.md"), "# Steps");
    write(
        &tests_root.join("scheduling/events/schedule_event/steps.md"),
        "# Steps",
    );
    write(
        &tests_root.join("scheduling/events/_category.yaml"),
        "run_after: alpha\n",
    );

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(&mut registry, &recorder, "scheduling/bravo", Phase::Test, "bravo");
    register_phase(
        &mut registry,
        &recorder,
        "scheduling/events/schedule_event",
        Phase::Test,
        "schedule_event",
    );

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    assert_eq!(recorder.entries(), vec!["alpha", "schedule_event", "bravo"]);
    let names: Vec<&str> = result
        .test_results
        .iter()
        .map(|r| r.test_name.as_str())
        .collect();
    assert_eq!(names, vec!["Alpha", "Events/Schedule Event", "Bravo"]);

    // The subcategory result is also stored standalone under its own path.
    let run_id = engine.last_run_id().expect("run id");
    assert!(
        tests_root
            .join("scheduling/events/_runs")
            .join(run_id)
            .join("run.json")
            .is_file()
    );
}

#[test]
fn failed_subcategory_does_not_stop_the_parent_plan() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");
    write(&tests_root.join("scheduling/zulu/steps.md"), "# Steps");
    write(
        &tests_root.join("scheduling/events/schedule_event/steps.md"),
        "# Steps",
    );
    write(
        &tests_root.join("scheduling/events/_category.yaml"),
        "run_after: alpha\n",
    );

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(&mut registry, &recorder, "scheduling/zulu", Phase::Test, "zulu");
    registry.register("scheduling/events/schedule_event", Phase::Test, |_, _| {
        Err(ActionError::new("Timeout", "calendar never rendered"))
    });

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    assert_eq!(recorder.entries(), vec!["alpha", "zulu"]);
    assert_eq!(result.passed(), 2);
    assert_eq!(result.failed(), 1);
    assert_eq!(result.status(), CategoryStatus::Partial);
    let failed = result
        .test_results
        .iter()
        .find(|r| r.status == UnitStatus::Failed)
        .expect("failed unit");
    assert_eq!(failed.test_name, "Events/Schedule Event");
}

#[test]
fn nested_chain_runs_ancestor_setup_and_teardown_around_the_leaf() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/_setup/steps.md"), "# Setup");
    write(&tests_root.join("scheduling/_teardown/steps.md"), "# Teardown");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");
    write(
        &tests_root.join("scheduling/events/schedule_event/steps.md"),
        "# Steps",
    );

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/_setup", Phase::Setup, "root_setup");
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "root_teardown");
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");
    register_phase(
        &mut registry,
        &recorder,
        "scheduling/events/schedule_event",
        Phase::Test,
        "schedule_event",
    );

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine
        .run_category(&request("scheduling/events"))
        .expect("run");

    // The sibling test alpha is not part of the chain.
    assert_eq!(
        recorder.entries(),
        vec!["root_setup", "schedule_event", "root_teardown"]
    );
    assert_eq!(result.category_name, "Scheduling");
    let names: Vec<&str> = result
        .test_results
        .iter()
        .map(|r| r.test_name.as_str())
        .collect();
    assert_eq!(names, vec!["Events/Schedule Event"]);
    assert!(result.setup_result.is_some());
    assert!(result.teardown_result.is_some());
}

#[test]
fn chain_setup_failure_skips_the_leaf_and_unwinds_teardowns() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/_setup/steps.md"), "# Setup");
    write(&tests_root.join("scheduling/_teardown/steps.md"), "# Teardown");
    write(
        &tests_root.join("scheduling/events/schedule_event/steps.md"),
        "# Steps",
    );

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    registry.register("scheduling/_setup", Phase::Setup, |_, _| {
        Err(ActionError::new("Timeout", "login page never loaded"))
    });
    register_phase(&mut registry, &recorder, "scheduling/_teardown", Phase::Teardown, "root_teardown");

    let (mut engine, provider, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine
        .run_category(&request("scheduling/events"))
        .expect("run");

    assert_eq!(result.setup_result.as_ref().map(|r| r.status), Some(UnitStatus::Failed));
    assert_eq!(result.status(), CategoryStatus::Failed);
    assert_eq!(result.skipped(), 1);
    assert_eq!(
        result.test_results[0].error.as_deref(),
        Some("Skipped due to Scheduling setup failure")
    );
    assert_eq!(recorder.entries(), vec!["root_teardown"]);
    assert!(result.teardown_result.is_some());
    assert_eq!(provider.released.load(Ordering::SeqCst), 1);
}

#[test]
fn failures_produce_heal_requests_without_leaking_secrets() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_flat_tree(&temp.path().join("tests"));

    let mut registry = ActionRegistry::new();
    registry.register("scheduling/alpha", Phase::Test, |_, ctx| {
        ctx.set("appointment_id", "apt-42");
        Err(ActionError::new("ElementNotFound", "no #save button"))
    });

    let config = TargetConfig {
        username: "qa@example.com".to_string(),
        password: "hunter2".to_string(),
        ..TargetConfig::default()
    };
    let (mut engine, _, _) = build_engine(temp.path(), registry, config);
    let result = engine.run_category(&request("scheduling")).expect("run");

    let failed = result
        .test_results
        .iter()
        .find(|r| r.status == UnitStatus::Failed)
        .expect("failed unit");
    assert!(failed.context_snapshot.is_some());

    let run_id = engine.last_run_id().expect("run id");
    let heal_path = temp
        .path()
        .join("heal_requests")
        .join(format!("Alpha_{run_id}.md"));
    assert!(heal_path.is_file());
    let body = fs::read_to_string(&heal_path).expect("read heal request");
    assert!(body.contains("# Heal Request: Scheduling/Alpha"));
    assert!(body.contains("ElementNotFound"));
    assert!(body.contains("appointment_id"));
    assert!(!body.contains("apt-42"));
    assert!(!body.contains("hunter2"));

    // A copy lands next to the stored unit result.
    let stored = temp
        .path()
        .join("tests/scheduling/_runs")
        .join(run_id)
        .join("tests/Alpha/heal_request.md");
    assert!(stored.is_file());

    // Neither the run record (which embeds the failure's context snapshot)
    // nor the saved context carries the clear-text password.
    let run_dir = temp.path().join("tests/scheduling/_runs").join(run_id);
    let run_json = fs::read_to_string(run_dir.join("run.json")).expect("read run.json");
    assert!(!run_json.contains("hunter2"));
    let context_json =
        fs::read_to_string(run_dir.join("context.json")).expect("read context.json");
    assert!(context_json.contains("password"));
    assert!(!context_json.contains("hunter2"));
}

#[test]
fn run_all_covers_every_top_level_category() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("billing/create_invoice/steps.md"), "# Steps");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "billing/create_invoice", Phase::Test, "invoice");
    register_phase(&mut registry, &recorder, "scheduling/alpha", Phase::Test, "alpha");

    let (mut engine, provider, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let run = engine.run_all().expect("run all");

    assert_eq!(recorder.entries(), vec!["invoice", "alpha"]);
    assert_eq!(run.category_results.len(), 2);
    assert_eq!(run.total_passed(), 2);
    // One session per category.
    assert_eq!(provider.acquired.load(Ordering::SeqCst), 2);
    assert_eq!(provider.released.load(Ordering::SeqCst), 2);
}

#[test]
fn unregistered_units_are_recorded_as_skipped_not_failed() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");
    write(&tests_root.join("scheduling/bravo/steps.md"), "# Steps");

    let recorder = Recorder::new();
    let mut registry = ActionRegistry::new();
    register_phase(&mut registry, &recorder, "scheduling/bravo", Phase::Test, "bravo");

    let (mut engine, _, _) = build_engine(temp.path(), registry, TargetConfig::default());
    let result = engine.run_category(&request("scheduling")).expect("run");

    // alpha has no registered procedure; the plan keeps going.
    assert_eq!(recorder.entries(), vec!["bravo"]);
    assert_eq!(result.passed(), 1);
    assert_eq!(result.skipped(), 1);
    assert_eq!(result.status(), CategoryStatus::Passed);
}

#[test]
fn retention_keeps_only_the_newest_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");

    let mut registry = ActionRegistry::new();
    registry.register("scheduling/alpha", Phase::Test, |_, _| Ok(()));

    let config = TargetConfig {
        max_runs_per_category: 2,
        ..TargetConfig::default()
    };
    let (mut engine, _, _) = build_engine(temp.path(), registry, config);
    for _ in 0..3 {
        engine.run_category(&request("scheduling")).expect("run");
    }

    let runs_dir = tests_root.join("scheduling/_runs");
    let mut kept: Vec<String> = fs::read_dir(&runs_dir)
        .expect("read runs dir")
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    kept.sort();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept.last().map(String::as_str), engine.last_run_id());
}

#[test]
fn unknown_category_is_a_resolution_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let tests_root = temp.path().join("tests");
    write(&tests_root.join("scheduling/alpha/steps.md"), "# Steps");

    let (mut engine, _, _) =
        build_engine(temp.path(), ActionRegistry::new(), TargetConfig::default());
    let err = engine
        .run_category(&request("billing"))
        .expect_err("should fail");
    assert!(err.to_string().contains("cannot resolve category path"));
}
