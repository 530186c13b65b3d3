//! The execution engine.
//!
//! Drives one category run end to end: resolve the requested category (or
//! nested chain), seed a fresh context, acquire one session, run setups,
//! execute the plan with skip-on-failure and until-test semantics, run
//! teardown, release the session and persist everything.
//!
//! A failing unit never raises past the engine; it becomes a result with
//! status `failed`. Only resolution and resource errors abort the call.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::matching::matches_until_target;
use crate::core::model::{Category, Phase};
use crate::core::plan::{PlanItem, PlannedUnit, build_plan, expand_plan_units, plan_unit_count};
use crate::core::results::{CategoryResult, RunResult, TestResult, UnitStatus};
use crate::events::{EventBus, RunnerEvent};
use crate::executor::{ActionExecutor, UnitOutcome};
use crate::io::config::TargetConfig;
use crate::io::context::RunContext;
use crate::io::discovery::Discovery;
use crate::io::heal::HealGenerator;
use crate::io::storage::RunStorage;
use crate::session::{OperatorGate, SessionError, SessionProvider};

/// Errors that abort a run before or outside unit execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot resolve category path: {0}")]
    Resolution(String),
    #[error(transparent)]
    Resource(#[from] SessionError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Parameters of one category run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Category name or nested path (`"scheduling"`, `"scheduling/events"`).
    pub category: String,
    /// Run exactly this subcategory of the resolved category.
    pub subcategory: Option<String>,
    /// Stop just before the first test matching this target and hold the
    /// session open.
    pub until_test: Option<String>,
    /// Hold the session open behind the operator gate when the run fails.
    pub keep_open_on_failure: bool,
}

enum Flow {
    Completed,
    Stopped,
}

/// Orchestrates category runs against live collaborators.
pub struct Engine<P: SessionProvider, A, G> {
    discovery: Discovery,
    storage: RunStorage,
    heal: HealGenerator,
    bus: Arc<EventBus>,
    provider: P,
    executor: A,
    gate: G,
    config: TargetConfig,
}

impl<P, A, G> Engine<P, A, G>
where
    P: SessionProvider,
    A: ActionExecutor<P::Session>,
    G: OperatorGate,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        discovery: Discovery,
        storage: RunStorage,
        heal: HealGenerator,
        bus: Arc<EventBus>,
        provider: P,
        executor: A,
        gate: G,
        config: TargetConfig,
    ) -> Self {
        Self {
            discovery,
            storage,
            heal,
            bus,
            provider,
            executor,
            gate,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn last_run_id(&self) -> Option<&str> {
        self.storage.current_run_id()
    }

    /// Run every top-level category, one session per category run.
    pub fn run_all(&mut self) -> Result<RunResult, EngineError> {
        let categories = self.discovery.scan()?;
        self.storage.start_run();

        let started = Instant::now();
        let mut run = RunResult::new(Local::now().to_rfc3339());
        self.bus.emit(RunnerEvent::RunStarted {
            categories: categories.iter().map(|c| c.name.clone()).collect(),
            total_categories: categories.len(),
            total_tests: categories.iter().map(Category::test_count).sum(),
        });

        for category in &categories {
            let chain = vec![category.clone()];
            let result = self.run_chain(&chain, None, self.config.keep_open_on_failure)?;
            run.category_results.push(result);
        }

        run.completed_at = Some(Local::now().to_rfc3339());
        run.duration_ms = started.elapsed().as_millis() as u64;
        self.storage.finalize_run(&run)?;
        self.emit_run_completed(&run);
        Ok(run)
    }

    /// Run one category (optionally a nested chain or an until-test stop).
    pub fn run_category(&mut self, request: &RunRequest) -> Result<CategoryResult, EngineError> {
        let chain = self.resolve_chain(&request.category, request.subcategory.as_deref())?;
        self.storage.start_run();

        let started = Instant::now();
        let mut run = RunResult::new(Local::now().to_rfc3339());
        let leaf = chain.last().ok_or_else(|| {
            EngineError::Resolution(request.category.clone())
        })?;
        self.bus.emit(RunnerEvent::RunStarted {
            categories: vec![chain[0].name.clone()],
            total_categories: 1,
            total_tests: leaf.test_count(),
        });

        let result = self.run_chain(
            &chain,
            request.until_test.as_deref(),
            request.keep_open_on_failure || self.config.keep_open_on_failure,
        )?;

        run.category_results.push(result.clone());
        run.completed_at = Some(Local::now().to_rfc3339());
        run.duration_ms = started.elapsed().as_millis() as u64;
        self.storage.finalize_run(&run)?;
        self.emit_run_completed(&run);
        Ok(result)
    }

    /// Resolve a category request into a chain `[root, .., leaf]`. Segments
    /// may be separated by `/` or `.` and match folder or display names
    /// case-insensitively.
    fn resolve_chain(
        &self,
        category: &str,
        subcategory: Option<&str>,
    ) -> Result<Vec<Category>, EngineError> {
        let mut segments: Vec<&str> = category
            .split(['/', '.'])
            .filter(|s| !s.is_empty())
            .collect();
        if let Some(sub) = subcategory {
            segments.extend(sub.split(['/', '.']).filter(|s| !s.is_empty()));
        }
        if segments.is_empty() {
            return Err(EngineError::Resolution(category.to_string()));
        }

        let categories = self.discovery.scan()?;
        let root = categories
            .iter()
            .find(|c| {
                c.folder_name().eq_ignore_ascii_case(segments[0])
                    || c.name.eq_ignore_ascii_case(segments[0])
            })
            .ok_or_else(|| EngineError::Resolution(segments.join("/")))?;

        let mut chain = vec![root.clone()];
        for segment in &segments[1..] {
            let current = chain.last().expect("chain is never empty");
            let next = current
                .find_subcategory(segment)
                .ok_or_else(|| EngineError::Resolution(segments.join("/")))?
                .clone();
            chain.push(next);
        }
        Ok(chain)
    }

    fn run_chain(
        &mut self,
        chain: &[Category],
        until: Option<&str>,
        keep_open_on_failure: bool,
    ) -> Result<CategoryResult, EngineError> {
        let root = &chain[0];
        let leaf = &chain[chain.len() - 1];
        let root_key = root.full_path();

        let planned_units = if chain.len() > 1 {
            leaf.test_count()
        } else {
            plan_unit_count(&build_plan(root))
        };
        self.bus.emit(RunnerEvent::CategoryStarted {
            category: root.name.clone(),
            planned_units,
            has_setup: root.setup.is_some(),
            has_teardown: root.teardown.is_some(),
        });

        let run_id = self
            .storage
            .current_run_id()
            .unwrap_or("unknown")
            .to_string();
        let mut context = RunContext::create_fresh(&run_id);
        self.seed_context(&mut context);

        self.bus.emit(RunnerEvent::SessionStarting {
            category: root.name.clone(),
        });
        let mut session = self.provider.acquire(&self.config.session_options())?;
        self.bus.emit(RunnerEvent::SessionStarted {
            category: root.name.clone(),
        });

        let mut result = CategoryResult::new(&root.name, &root.path);
        let mut ran_setups: HashSet<PathBuf> = HashSet::new();

        let flow = if chain.len() > 1 {
            self.run_nested_chain(
                chain,
                until,
                &mut session,
                &mut context,
                &mut ran_setups,
                &mut result,
            )?
        } else {
            let (root_result, flow) =
                self.run_category_body(root, until, &mut session, &mut context, &mut ran_setups)?;
            result = root_result;
            flow
        };

        // Session release: until-test and keep-open-on-failure hold the
        // session behind the operator gate first.
        match flow {
            Flow::Stopped => {
                let next = result.next_test.as_deref().unwrap_or("requested test");
                self.gate
                    .wait(&format!("Stopped before {next}; session held open"));
            }
            Flow::Completed => {
                // Any failed unit counts, setup and teardown included; a
                // setup failure is exactly when the operator needs the
                // browser still open.
                let any_failed = result.all_units().any(|u| u.status == UnitStatus::Failed);
                if keep_open_on_failure && any_failed {
                    self.gate.wait("Run failed; session held open for inspection");
                }
            }
        }
        self.bus.emit(RunnerEvent::SessionClosing {
            category: root.name.clone(),
        });
        self.provider.release(session)?;

        let context_path = self.storage.current_run_dir(&root_key)?.join("context.json");
        context.save_to_file(&context_path)?;
        self.storage
            .save_category_result(&root_key, &result, &self.config)?;

        self.bus.emit(RunnerEvent::CategoryCompleted {
            category: root.name.clone(),
            status: result.status(),
            passed: result.passed(),
            failed: result.failed(),
            skipped: result.skipped(),
        });
        info!(
            category = %root.name,
            status = result.status().as_str(),
            passed = result.passed(),
            failed = result.failed(),
            skipped = result.skipped(),
            "category run finished"
        );
        Ok(result)
    }

    /// Chain execution: setups of every link but the leaf in chain order,
    /// then the leaf runs as an inline subcategory unit. On a chain setup
    /// failure all leaf units are skipped and teardowns run for every link
    /// already set up, in reverse order.
    fn run_nested_chain(
        &mut self,
        chain: &[Category],
        until: Option<&str>,
        session: &mut P::Session,
        context: &mut RunContext,
        ran_setups: &mut HashSet<PathBuf>,
        result: &mut CategoryResult,
    ) -> Result<Flow, EngineError> {
        let root = &chain[0];
        let leaf = &chain[chain.len() - 1];
        let root_key = root.full_path();
        let pre_links = &chain[..chain.len() - 1];
        let leaf_plan = vec![PlanItem::Subcategory(leaf.clone())];

        for (i, link) in pre_links.iter().enumerate() {
            let Some(setup) = &link.setup else { continue };
            if !setup.is_valid() {
                continue;
            }
            let setup_result = self.run_unit(
                &link.full_path(),
                &link.name.clone(),
                &setup.path.clone(),
                "_setup",
                Phase::Setup,
                session,
                context,
                0,
                leaf.test_count(),
            )?;
            let failed = setup_result.status == UnitStatus::Failed;
            if i == 0 || failed {
                result.setup_result = Some(setup_result);
            }
            ran_setups.insert(link.path.clone());

            if failed {
                result.stopped_early = true;
                self.skip_units(
                    &root_key,
                    result,
                    expand_plan_units(&leaf_plan),
                    &format!("Skipped due to {} setup failure", link.name),
                )?;
                // Teardown every link already set up, leaf-first.
                for (j, done) in pre_links[..=i].iter().enumerate().rev() {
                    let teardown_result =
                        self.run_link_teardown(done, session, context)?;
                    if j == 0 {
                        result.teardown_result = teardown_result;
                    }
                }
                return Ok(Flow::Completed);
            }
        }

        let (leaf_result, flow) =
            self.run_category_body(leaf, until, session, context, ran_setups)?;
        self.storage
            .save_category_result(&leaf.full_path(), &leaf_result, &self.config)?;

        result.stopped_early = leaf_result.stopped_early;
        result.next_test = leaf_result
            .next_test
            .as_ref()
            .map(|n| format!("{}/{n}", leaf.name));
        for unit in &leaf_result.test_results {
            let mut folded = unit.clone();
            folded.test_name = format!("{}/{}", leaf.name, folded.test_name);
            result.test_results.push(folded);
        }

        if matches!(flow, Flow::Stopped) {
            return Ok(Flow::Stopped);
        }
        for (j, link) in pre_links.iter().enumerate().rev() {
            let teardown_result = self.run_link_teardown(link, session, context)?;
            if j == 0 {
                result.teardown_result = teardown_result;
            }
        }
        Ok(Flow::Completed)
    }

    fn run_link_teardown(
        &mut self,
        link: &Category,
        session: &mut P::Session,
        context: &mut RunContext,
    ) -> Result<Option<TestResult>, EngineError> {
        let Some(teardown) = &link.teardown else {
            return Ok(None);
        };
        if !teardown.is_valid() {
            return Ok(None);
        }
        let teardown_result = self.run_unit(
            &link.full_path(),
            &link.name,
            &teardown.path.clone(),
            "_teardown",
            Phase::Teardown,
            session,
            context,
            0,
            0,
        )?;
        Ok(Some(teardown_result))
    }

    /// Execute one category's plan on the shared session and context.
    ///
    /// Recurses into subcategory units inline. A failed subcategory does
    /// not stop the parent plan; an until-test stop does, and skips
    /// teardown at every level.
    fn run_category_body(
        &mut self,
        category: &Category,
        until: Option<&str>,
        session: &mut P::Session,
        context: &mut RunContext,
        ran_setups: &mut HashSet<PathBuf>,
    ) -> Result<(CategoryResult, Flow), EngineError> {
        let storage_key = category.full_path();
        let mut result = CategoryResult::new(&category.name, &category.path);
        let plan = build_plan(category);
        let total = plan_unit_count(&plan);

        if let Some(setup) = &category.setup {
            if setup.is_valid() && !ran_setups.contains(&category.path) {
                let setup_result = self.run_unit(
                    &storage_key,
                    &category.name,
                    &setup.path.clone(),
                    "_setup",
                    Phase::Setup,
                    session,
                    context,
                    0,
                    total,
                )?;
                let failed = setup_result.status == UnitStatus::Failed;
                result.setup_result = Some(setup_result);
                ran_setups.insert(category.path.clone());
                if failed {
                    result.stopped_early = true;
                    self.skip_units(
                        &storage_key,
                        &mut result,
                        expand_plan_units(&plan),
                        &format!("Skipped due to {} setup failure", category.name),
                    )?;
                    self.run_body_teardown(category, &storage_key, &mut result, session, context)?;
                    return Ok((result, Flow::Completed));
                }
            }
        }

        let mut executed = 0;
        for (i, item) in plan.iter().enumerate() {
            match item {
                PlanItem::Test(test) => {
                    if let Some(target) = until {
                        if matches_until_target(target, test) {
                            result.stopped_early = true;
                            result.next_test = Some(test.name.clone());
                            self.skip_units(
                                &storage_key,
                                &mut result,
                                expand_plan_units(&plan[i..]),
                                &format!("Stopped before {} (until-test)", test.name),
                            )?;
                            return Ok((result, Flow::Stopped));
                        }
                    }
                    executed += 1;
                    let unit = self.run_unit(
                        &storage_key,
                        &category.name,
                        &test.path.clone(),
                        &test.name.clone(),
                        Phase::Test,
                        session,
                        context,
                        executed,
                        total,
                    )?;
                    let failed = unit.status == UnitStatus::Failed;
                    result.test_results.push(unit);
                    if failed {
                        result.stopped_early = true;
                        self.skip_units(
                            &storage_key,
                            &mut result,
                            expand_plan_units(&plan[i + 1..]),
                            &format!("Skipped due to {} failure", test.name),
                        )?;
                        break;
                    }
                }
                PlanItem::Subcategory(sub) => {
                    let (sub_result, flow) =
                        self.run_category_body(sub, until, session, context, ran_setups)?;
                    executed += sub_result.total();
                    self.storage.save_category_result(
                        &sub.full_path(),
                        &sub_result,
                        &self.config,
                    )?;

                    let sub_next = sub_result.next_test.clone();
                    for unit in &sub_result.test_results {
                        let mut folded = unit.clone();
                        folded.test_name = format!("{}/{}", sub.name, folded.test_name);
                        result.test_results.push(folded);
                    }

                    if matches!(flow, Flow::Stopped) {
                        result.stopped_early = true;
                        let next = sub_next
                            .map(|n| format!("{}/{n}", sub.name))
                            .unwrap_or_else(|| sub.name.clone());
                        self.skip_units(
                            &storage_key,
                            &mut result,
                            expand_plan_units(&plan[i + 1..]),
                            &format!("Stopped before {next} (until-test)"),
                        )?;
                        result.next_test = Some(next);
                        return Ok((result, Flow::Stopped));
                    }
                }
            }
        }

        self.run_body_teardown(category, &storage_key, &mut result, session, context)?;
        Ok((result, Flow::Completed))
    }

    fn run_body_teardown(
        &mut self,
        category: &Category,
        storage_key: &str,
        result: &mut CategoryResult,
        session: &mut P::Session,
        context: &mut RunContext,
    ) -> Result<(), EngineError> {
        let Some(teardown) = &category.teardown else {
            return Ok(());
        };
        if !teardown.is_valid() {
            return Ok(());
        }
        let teardown_result = self.run_unit(
            storage_key,
            &category.name,
            &teardown.path.clone(),
            "_teardown",
            Phase::Teardown,
            session,
            context,
            0,
            0,
        )?;
        result.teardown_result = Some(teardown_result);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_unit(
        &mut self,
        storage_category: &str,
        category_name: &str,
        unit_path: &Path,
        unit_name: &str,
        phase: Phase,
        session: &mut P::Session,
        context: &mut RunContext,
        index: usize,
        total: usize,
    ) -> Result<TestResult, EngineError> {
        self.bus.emit(RunnerEvent::TestStarted {
            test: unit_name.to_string(),
            test_type: phase,
            index,
            total,
            category: category_name.to_string(),
        });

        let started = Instant::now();
        let outcome = self
            .executor
            .execute(unit_path, phase, session, context);
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            UnitOutcome::Passed => TestResult::passed(unit_name, unit_path, phase, duration_ms),
            UnitOutcome::NotFound { message } => {
                TestResult::skipped(unit_name, unit_path, phase, message)
            }
            UnitOutcome::LookupFailed { message } => TestResult::failed(
                unit_name,
                unit_path,
                phase,
                duration_ms,
                message,
                "LookupError",
            ),
            UnitOutcome::Failed {
                error,
                kind,
                screenshot,
            } => {
                let mut failed =
                    TestResult::failed(unit_name, unit_path, phase, duration_ms, error, kind);
                failed.screenshot = screenshot;
                failed.context_snapshot =
                    Some(serde_json::Value::Object(context.snapshot()));
                failed
            }
        };

        self.bus.emit(RunnerEvent::TestCompleted {
            test: unit_name.to_string(),
            test_type: phase,
            status: result.status,
            duration_ms: result.duration_ms,
        });

        if result.status == UnitStatus::Failed {
            self.bus.emit(RunnerEvent::TestFailed {
                test: unit_name.to_string(),
                error: result.error.clone().unwrap_or_default(),
                error_kind: result.error_kind.clone(),
            });
            let run_id = self
                .storage
                .current_run_id()
                .unwrap_or("unknown")
                .to_string();
            match self.heal.generate(
                &result,
                category_name,
                &run_id,
                &context.key_names(),
                &self.config,
            ) {
                Ok(heal_path) => {
                    self.storage
                        .save_heal_request(storage_category, unit_name, &heal_path)?;
                    self.bus.emit(RunnerEvent::HealRequestCreated {
                        test: unit_name.to_string(),
                        path: heal_path,
                    });
                }
                Err(err) => warn!(unit = unit_name, %err, "heal request generation failed"),
            }
        }

        self.storage
            .save_test_result(storage_category, unit_name, &result)?;
        Ok(result)
    }

    fn skip_units(
        &mut self,
        storage_category: &str,
        result: &mut CategoryResult,
        units: Vec<PlannedUnit>,
        reason: &str,
    ) -> Result<(), EngineError> {
        for unit in units {
            let skipped =
                TestResult::skipped(unit.display_name, unit.path, Phase::Test, reason);
            self.storage
                .save_test_result(storage_category, &skipped.test_name, &skipped)?;
            result.test_results.push(skipped);
        }
        Ok(())
    }

    fn seed_context(&self, context: &mut RunContext) {
        context.set("base_url", self.config.base_url.clone());
        context.set("username", self.config.username.clone());
        context.set_secret("password", self.config.password.clone());
        for key in ["base_url", "username", "password"] {
            self.bus.emit(RunnerEvent::ContextUpdated {
                key: key.to_string(),
            });
        }
    }

    fn emit_run_completed(&self, run: &RunResult) {
        self.bus.emit(RunnerEvent::RunCompleted {
            status: run.status(),
            passed: run.total_passed(),
            failed: run.total_failed(),
            skipped: run.total_skipped(),
            duration_ms: run.duration_ms,
        });
    }
}
