//! Harness CLI: discover, run and inspect browser acceptance tests.
//!
//! The stock binary wires the engine to a detached session provider and an
//! empty action registry, so runs exercise the full lifecycle with units
//! skipping as not-found. Embedding applications link the library, register
//! real procedures and provide a live session provider instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use harness::core::model::TestStatus;
use harness::engine::{Engine, RunRequest};
use harness::events::EventBus;
use harness::executor::ActionRegistry;
use harness::exit_codes;
use harness::io::config::{TargetConfig, load_config};
use harness::io::discovery::{Discovery, render_tree};
use harness::io::heal::HealGenerator;
use harness::io::storage::RunStorage;
use harness::reporter::EventReporter;
use harness::session::{DetachedSession, DetachedSessionProvider, StdinGate};
use harness::stress::run_stress;

#[derive(Parser)]
#[command(
    name = "harness",
    version,
    about = "Hierarchical browser acceptance-test harness"
)]
struct Cli {
    /// Path to the target configuration TOML.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the discovered category/test tree.
    List {
        /// Restrict to one category (slash path).
        category: Option<String>,
    },
    /// Summarize test statuses and priorities across the tree.
    Status,
    /// Run one category, a nested subcategory, or everything.
    Run {
        /// Category name or nested path (e.g. `scheduling/events`).
        #[arg(long, conflicts_with = "all")]
        category: Option<String>,
        /// Run exactly this subcategory of the category.
        #[arg(long, requires = "category")]
        subcategory: Option<String>,
        /// Stop just before the first test matching this name and hold the
        /// session open.
        #[arg(long, requires = "category")]
        until: Option<String>,
        /// Force a headless session regardless of the config.
        #[arg(long)]
        headless: bool,
        /// Hold the session open behind an operator prompt when the run
        /// fails.
        #[arg(long)]
        keep_open: bool,
        /// Run every top-level category.
        #[arg(long)]
        all: bool,
    },
    /// Repeat categories to surface flakiness.
    Stress {
        /// Category to stress (repeatable).
        #[arg(long = "category", required = true)]
        categories: Vec<String>,
        #[arg(long, default_value_t = 5)]
        iterations: usize,
        #[arg(long)]
        headless: bool,
    },
    /// Inspect stored run history.
    Runs {
        #[command(subcommand)]
        command: RunsCommand,
    },
    /// Manage heal requests.
    Heal {
        #[command(subcommand)]
        command: HealCommand,
    },
}

#[derive(Subcommand)]
enum RunsCommand {
    /// List runs, newest first.
    List {
        /// Restrict to one category's run history.
        category: Option<String>,
    },
    /// Show full detail of one stored run.
    Show { category: String, run_id: String },
    /// Find runs containing a unit by (fuzzy) name.
    FindUnit { unit: String },
}

#[derive(Subcommand)]
enum HealCommand {
    /// List pending heal requests.
    List,
    /// Move a heal request to the resolved area.
    Resolve { path: PathBuf },
}

fn main() {
    harness::logging::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    match cli.command {
        Command::List { category } => cmd_list(&config, category.as_deref()),
        Command::Status => cmd_status(&config),
        Command::Run {
            category,
            subcategory,
            until,
            headless,
            keep_open,
            all,
        } => cmd_run(config, category, subcategory, until, headless, keep_open, all),
        Command::Stress {
            categories,
            iterations,
            headless,
        } => cmd_stress(config, &categories, iterations, headless),
        Command::Runs { command } => cmd_runs(&config, command),
        Command::Heal { command } => cmd_heal(&config, command),
    }
}

fn cmd_list(config: &TargetConfig, category: Option<&str>) -> Result<i32> {
    let discovery = Discovery::new(&config.tests_root)?;
    let tree = match category {
        Some(path) => {
            let found = discovery
                .find_category(path)?
                .with_context(|| format!("category not found: {path}"))?;
            render_tree(std::slice::from_ref(&found))
        }
        None => render_tree(&discovery.scan()?),
    };
    print!("{tree}");
    Ok(exit_codes::OK)
}

fn cmd_status(config: &TargetConfig) -> Result<i32> {
    let discovery = Discovery::new(&config.tests_root)?;
    let tests = discovery.get_all_tests()?;

    let mut by_status: BTreeMap<&str, usize> = BTreeMap::new();
    let mut by_priority: BTreeMap<u8, (&str, usize)> = BTreeMap::new();
    for test in &tests {
        *by_status.entry(test.status.as_str()).or_insert(0) += 1;
        by_priority
            .entry(test.priority.sort_order())
            .or_insert((test.priority.as_str(), 0))
            .1 += 1;
    }

    println!("{} tests discovered", tests.len());
    println!();
    println!("By status:");
    for (status, count) in &by_status {
        println!("  {status:<10} {count}");
    }
    println!();
    println!("By priority:");
    for (priority, count) in by_priority.values() {
        println!("  {priority:<10} {count}");
    }

    let blocked: Vec<_> = tests
        .iter()
        .filter(|t| t.status == TestStatus::Blocked)
        .collect();
    if !blocked.is_empty() {
        println!();
        println!("Blocked:");
        for test in blocked {
            println!(
                "  {} - {}",
                test.full_id(),
                test.blocked_reason.as_deref().unwrap_or("no reason recorded")
            );
        }
    }

    let needing = discovery.get_tests_needing_exploration()?;
    println!();
    println!("{} tests need exploration (steps without script)", needing.len());
    Ok(exit_codes::OK)
}

fn build_engine(
    config: TargetConfig,
) -> Result<Engine<DetachedSessionProvider, ActionRegistry<DetachedSession>, StdinGate>> {
    let discovery = Discovery::new(&config.tests_root)?;
    let storage = RunStorage::new(&config.tests_root, config.max_runs_per_category);
    let heal_dir = config
        .tests_root
        .parent()
        .unwrap_or(&config.tests_root)
        .join("heal_requests");
    let heal = HealGenerator::new(heal_dir, &config.tests_root);
    Ok(Engine::new(
        discovery,
        storage,
        heal,
        Arc::new(EventBus::new()),
        DetachedSessionProvider,
        ActionRegistry::new(),
        StdinGate,
        config,
    ))
}

fn cmd_run(
    mut config: TargetConfig,
    category: Option<String>,
    subcategory: Option<String>,
    until: Option<String>,
    headless: bool,
    keep_open: bool,
    all: bool,
) -> Result<i32> {
    if headless {
        config.headless = true;
    }
    if keep_open {
        config.keep_open_on_failure = true;
    }

    let mut engine = build_engine(config)?;
    let _reporter = EventReporter::attach(Arc::clone(engine.bus()));

    let failed = if all {
        let run = engine.run_all()?;
        run.total_failed()
    } else {
        let Some(category) = category else {
            bail!("pass --category <name> or --all");
        };
        let result = engine.run_category(&RunRequest {
            category,
            subcategory,
            until_test: until,
            keep_open_on_failure: keep_open,
        })?;
        result.failed()
    };

    Ok(if failed > 0 {
        exit_codes::UNIT_FAILURES
    } else {
        exit_codes::OK
    })
}

fn cmd_stress(
    mut config: TargetConfig,
    categories: &[String],
    iterations: usize,
    headless: bool,
) -> Result<i32> {
    if headless {
        config.headless = true;
    }
    let mut engine = build_engine(config)?;
    let reports = run_stress(&mut engine, categories, iterations)?;

    let mut any_failed = false;
    for report in &reports {
        println!();
        println!(
            "{}: {}/{} passed ({:.1}%){}",
            report.category,
            report.passed_count(),
            report.total_iterations,
            report.pass_rate(),
            if report.is_flaky() { " FLAKY" } else { "" }
        );
        for (reason, count) in report.failure_reasons() {
            println!("  {count}x {reason}");
        }
        any_failed |= report.failed_count() > 0;
    }

    Ok(if any_failed {
        exit_codes::UNIT_FAILURES
    } else {
        exit_codes::OK
    })
}

fn cmd_runs(config: &TargetConfig, command: RunsCommand) -> Result<i32> {
    let storage = RunStorage::new(&config.tests_root, config.max_runs_per_category);
    match command {
        RunsCommand::List { category: Some(category) } => {
            for record in storage.list_category_runs(&category)? {
                println!(
                    "{}  {:<8}  {} passed, {} failed, {} skipped  ({}ms)",
                    record.run_id,
                    record.status.as_str(),
                    record.passed,
                    record.failed,
                    record.skipped,
                    record.duration_ms
                );
            }
        }
        RunsCommand::List { category: None } => {
            for record in storage.list_all_runs()? {
                println!(
                    "{}  {:<8}  [{}]  {} passed, {} failed, {} skipped",
                    record.run_id,
                    record.status.as_str(),
                    record.categories.join(", "),
                    record.summary.passed,
                    record.summary.failed,
                    record.summary.skipped
                );
            }
        }
        RunsCommand::Show { category, run_id } => {
            let details = storage
                .get_run_details(&category, &run_id)?
                .with_context(|| format!("run {run_id} not found for {category}"))?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        RunsCommand::FindUnit { unit } => {
            for found in storage.find_runs_with_unit(&unit)? {
                println!(
                    "{}  {}  {}  {}",
                    found.run_id,
                    found.category,
                    found.unit,
                    found.status.as_str()
                );
            }
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_heal(config: &TargetConfig, command: HealCommand) -> Result<i32> {
    let heal_dir = config
        .tests_root
        .parent()
        .unwrap_or(&config.tests_root)
        .join("heal_requests");
    let generator = HealGenerator::new(heal_dir, &config.tests_root);
    match command {
        HealCommand::List => {
            for request in generator.list_pending()? {
                println!("{}", request.display());
            }
        }
        HealCommand::Resolve { path } => {
            let resolved = generator.mark_resolved(&path)?;
            println!("resolved: {}", resolved.display());
        }
    }
    Ok(exit_codes::OK)
}
