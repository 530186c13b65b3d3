//! Persistent run history.
//!
//! Layout, per category:
//!
//! ```text
//! {tests_root}/{category}/_runs/{run_id}/run.json
//! {tests_root}/{category}/_runs/{run_id}/tests/{unit}/result.json
//! {tests_root}/{category}/_runs/{run_id}/tests/{unit}/screenshot.png
//! {tests_root}/{category}/_runs/{run_id}/tests/{unit}/heal_request.md
//! ```
//!
//! plus a cross-category index at `{tests_root}/../runs_index/{run_id}.json`
//! correlating multi-category runs. Run ids are `YYYYMMDD_HHMMSS`
//! timestamps so lexicographic order is chronological order; retention
//! prunes the oldest entries beyond `max_runs`.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::matching::{flatten_unit_name, result_name_matches};
use crate::core::results::{CategoryResult, CategoryStatus, RunResult, RunStatus, UnitStatus};
use crate::io::config::TargetConfig;

const RUNS_DIR_NAME: &str = "_runs";
const INDEX_DIR_NAME: &str = "runs_index";

/// Serialized category run, written as `run.json`.
///
/// Derived status and counts are inlined so consumers can render listings
/// without re-deriving them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRunRecord {
    pub run_id: String,
    pub saved_at: String,
    pub status: CategoryStatus,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    pub duration_ms: u64,
    /// Target configuration at run time, secrets masked.
    pub config: TargetConfig,
    pub result: CategoryResult,
}

/// A failed unit referenced from the run index, with its category resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedUnitRef {
    pub unit: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

/// Cross-category index entry, written as `runs_index/{run_id}.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIndexRecord {
    pub run_id: String,
    pub started_at: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    pub categories: Vec<String>,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub duration_ms: u64,
    #[serde(default)]
    pub failed_units: Vec<FailedUnitRef>,
}

/// Artifact paths collected for one unit of a stored run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UnitArtifacts {
    pub result: Option<crate::core::results::TestResult>,
    pub screenshot: Option<PathBuf>,
    pub heal_request: Option<PathBuf>,
}

/// Full detail of one stored category run.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetails {
    pub record: CategoryRunRecord,
    pub unit_artifacts: BTreeMap<String, UnitArtifacts>,
}

/// A stored run matching a unit-name query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMatch {
    pub category: String,
    pub run_id: String,
    pub unit: String,
    pub status: UnitStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedTestResult {
    #[serde(flatten)]
    result: crate::core::results::TestResult,
    saved_at: String,
}

/// Manages persistent storage of run history.
pub struct RunStorage {
    tests_root: PathBuf,
    index_dir: PathBuf,
    max_runs: usize,
    current_run_id: Option<String>,
    current_categories: Vec<String>,
    issued_run_ids: HashSet<String>,
}

impl RunStorage {
    pub fn new(tests_root: impl Into<PathBuf>, max_runs: usize) -> Self {
        let tests_root = tests_root.into();
        let index_dir = tests_root
            .parent()
            .unwrap_or(&tests_root)
            .join(INDEX_DIR_NAME);
        Self {
            tests_root,
            index_dir,
            max_runs,
            current_run_id: None,
            current_categories: Vec::new(),
            issued_run_ids: HashSet::new(),
        }
    }

    /// Generate and set the current run id.
    ///
    /// Ids are second-resolution timestamps; a numeric suffix keeps ids
    /// issued within the same second unique and lexicographically
    /// monotonic.
    pub fn start_run(&mut self) -> String {
        let base = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut run_id = base.clone();
        let mut n = 0;
        while self.issued_run_ids.contains(&run_id)
            || self.index_dir.join(format!("{run_id}.json")).is_file()
        {
            n += 1;
            run_id = format!("{base}_{n}");
        }
        self.issued_run_ids.insert(run_id.clone());
        self.current_run_id = Some(run_id.clone());
        self.current_categories.clear();
        run_id
    }

    pub fn current_run_id(&self) -> Option<&str> {
        self.current_run_id.as_deref()
    }

    /// `tests/{category}/_runs/`
    pub fn category_runs_dir(&self, category: &str) -> PathBuf {
        self.tests_root.join(category).join(RUNS_DIR_NAME)
    }

    /// `tests/{category}/_runs/{run_id}/` for the active run.
    pub fn current_run_dir(&self, category: &str) -> Result<PathBuf> {
        let run_id = self
            .current_run_id
            .as_deref()
            .ok_or_else(|| anyhow!("no active run, call start_run first"))?;
        Ok(self.category_runs_dir(category).join(run_id))
    }

    /// Save an individual unit result, copying its screenshot alongside
    /// when one was captured.
    pub fn save_test_result(
        &self,
        category: &str,
        unit_name: &str,
        result: &crate::core::results::TestResult,
    ) -> Result<PathBuf> {
        let test_dir = self
            .current_run_dir(category)?
            .join("tests")
            .join(flatten_unit_name(unit_name));
        fs::create_dir_all(&test_dir)
            .with_context(|| format!("create unit dir {}", test_dir.display()))?;

        let mut saved = SavedTestResult {
            result: result.clone(),
            saved_at: now(),
        };
        if let Some(screenshot) = &result.screenshot {
            if screenshot.is_file() {
                let dest = test_dir.join("screenshot.png");
                fs::copy(screenshot, &dest)
                    .with_context(|| format!("copy screenshot to {}", dest.display()))?;
                saved.result.screenshot = Some(dest);
            }
        }

        let result_path = test_dir.join("result.json");
        write_json(&result_path, &saved)?;
        Ok(result_path)
    }

    /// Copy a heal request into the run storage next to the unit result.
    pub fn save_heal_request(
        &self,
        category: &str,
        unit_name: &str,
        heal_request_path: &Path,
    ) -> Result<Option<PathBuf>> {
        if !heal_request_path.is_file() {
            return Ok(None);
        }
        let test_dir = self
            .current_run_dir(category)?
            .join("tests")
            .join(flatten_unit_name(unit_name));
        fs::create_dir_all(&test_dir)
            .with_context(|| format!("create unit dir {}", test_dir.display()))?;
        let dest = test_dir.join("heal_request.md");
        fs::copy(heal_request_path, &dest)
            .with_context(|| format!("copy heal request to {}", dest.display()))?;
        Ok(Some(dest))
    }

    /// Save the category run record and prune runs beyond the retention cap.
    pub fn save_category_result(
        &mut self,
        category: &str,
        result: &CategoryResult,
        config: &TargetConfig,
    ) -> Result<PathBuf> {
        let run_id = self
            .current_run_id
            .clone()
            .ok_or_else(|| anyhow!("no active run, call start_run first"))?;
        let run_dir = self.current_run_dir(category)?;
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;

        if !self.current_categories.iter().any(|c| c == category) {
            self.current_categories.push(category.to_string());
        }

        let record = CategoryRunRecord {
            run_id,
            saved_at: now(),
            status: result.status(),
            passed: result.passed(),
            failed: result.failed(),
            skipped: result.skipped(),
            total: result.total(),
            duration_ms: result.duration_ms(),
            config: config.sanitized(),
            result: result.clone(),
        };

        let run_json = run_dir.join("run.json");
        write_json(&run_json, &record)?;
        self.cleanup_old_runs(category)?;
        Ok(run_json)
    }

    /// Write the cross-category index entry for the active run and prune
    /// old index files.
    pub fn finalize_run(&mut self, run_result: &RunResult) -> Result<PathBuf> {
        let run_id = self
            .current_run_id
            .clone()
            .ok_or_else(|| anyhow!("no active run to finalize"))?;
        fs::create_dir_all(&self.index_dir)
            .with_context(|| format!("create index dir {}", self.index_dir.display()))?;

        let mut failed_units = Vec::new();
        for category in &run_result.category_results {
            let category_path = category.category_path.to_string_lossy().replace('\\', "/");
            for unit in category.all_units() {
                if unit.status == UnitStatus::Failed {
                    failed_units.push(FailedUnitRef {
                        unit: unit.test_name.clone(),
                        category: category_path.clone(),
                    });
                }
            }
        }

        let record = RunIndexRecord {
            run_id: run_id.clone(),
            started_at: run_result.started_at.clone(),
            completed_at: run_result.completed_at.clone(),
            categories: self.current_categories.clone(),
            status: run_result.status(),
            summary: RunSummary {
                passed: run_result.total_passed(),
                failed: run_result.total_failed(),
                skipped: run_result.total_skipped(),
                total: run_result.total_tests(),
            },
            duration_ms: run_result.duration_ms,
            failed_units,
        };

        let index_path = self.index_dir.join(format!("{run_id}.json"));
        write_json(&index_path, &record)?;
        self.cleanup_old_index_files()?;
        Ok(index_path)
    }

    /// Delete the oldest run directories beyond the retention cap.
    pub fn cleanup_old_runs(&self, category: &str) -> Result<usize> {
        let runs_dir = self.category_runs_dir(category);
        if !runs_dir.is_dir() {
            return Ok(0);
        }
        let mut run_dirs = sorted_entries(&runs_dir, |p| p.is_dir())?;
        let mut deleted = 0;
        while run_dirs.len() > self.max_runs {
            let oldest = run_dirs.remove(0);
            debug!(path = %oldest.display(), "pruning old run");
            fs::remove_dir_all(&oldest)
                .with_context(|| format!("remove old run {}", oldest.display()))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn cleanup_old_index_files(&self) -> Result<usize> {
        if !self.index_dir.is_dir() {
            return Ok(0);
        }
        let mut index_files = sorted_entries(&self.index_dir, |p| {
            p.extension().is_some_and(|ext| ext == "json")
        })?;
        let mut deleted = 0;
        while index_files.len() > self.max_runs {
            let oldest = index_files.remove(0);
            fs::remove_file(&oldest)
                .with_context(|| format!("remove old index {}", oldest.display()))?;
            deleted += 1;
        }
        Ok(deleted)
    }

    /// All stored runs for a category, newest first. Corrupted records are
    /// skipped with a warning.
    pub fn list_category_runs(&self, category: &str) -> Result<Vec<CategoryRunRecord>> {
        let runs_dir = self.category_runs_dir(category);
        if !runs_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut run_dirs = sorted_entries(&runs_dir, |p| p.is_dir())?;
        run_dirs.reverse();

        let mut records = Vec::new();
        for run_dir in run_dirs {
            let run_json = run_dir.join("run.json");
            if !run_json.is_file() {
                continue;
            }
            match read_json::<CategoryRunRecord>(&run_json) {
                Ok(record) => records.push(record),
                Err(err) => warn!(path = %run_json.display(), %err, "skipping corrupted run record"),
            }
        }
        Ok(records)
    }

    /// All runs across categories, newest first: index entries, then
    /// per-category runs the index does not know about (single-category
    /// runs stored before the index existed, or with a pruned index file).
    pub fn list_all_runs(&self) -> Result<Vec<RunIndexRecord>> {
        let mut records = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if self.index_dir.is_dir() {
            for index_file in sorted_entries(&self.index_dir, |p| {
                p.extension().is_some_and(|ext| ext == "json")
            })? {
                match read_json::<RunIndexRecord>(&index_file) {
                    Ok(record) => {
                        seen.insert(record.run_id.clone());
                        records.push(record);
                    }
                    Err(err) => {
                        warn!(path = %index_file.display(), %err, "skipping corrupted index record");
                    }
                }
            }
        }

        for (category, runs_dir) in self.all_runs_dirs()? {
            for run_dir in sorted_entries(&runs_dir, |p| p.is_dir())? {
                let run_json = run_dir.join("run.json");
                if !run_json.is_file() {
                    continue;
                }
                let Ok(record) = read_json::<CategoryRunRecord>(&run_json) else {
                    continue;
                };
                if !seen.insert(record.run_id.clone()) {
                    continue;
                }
                records.push(RunIndexRecord {
                    run_id: record.run_id,
                    started_at: record.saved_at.clone(),
                    completed_at: Some(record.saved_at),
                    categories: vec![category.clone()],
                    status: match record.status {
                        CategoryStatus::Failed => RunStatus::Failed,
                        CategoryStatus::Partial => RunStatus::Partial,
                        _ => RunStatus::Passed,
                    },
                    summary: RunSummary {
                        passed: record.passed,
                        failed: record.failed,
                        skipped: record.skipped,
                        total: record.total,
                    },
                    duration_ms: record.duration_ms,
                    failed_units: Vec::new(),
                });
            }
        }

        records.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        Ok(records)
    }

    /// Full detail of one stored run, including per-unit artifact paths.
    pub fn get_run_details(&self, category: &str, run_id: &str) -> Result<Option<RunDetails>> {
        let run_dir = self.category_runs_dir(category).join(run_id);
        let run_json = run_dir.join("run.json");
        if !run_json.is_file() {
            return Ok(None);
        }
        let record: CategoryRunRecord = read_json(&run_json)?;

        let mut unit_artifacts = BTreeMap::new();
        let tests_dir = run_dir.join("tests");
        if tests_dir.is_dir() {
            for test_dir in sorted_entries(&tests_dir, |p| p.is_dir())? {
                let mut artifacts = UnitArtifacts::default();
                let screenshot = test_dir.join("screenshot.png");
                if screenshot.is_file() {
                    artifacts.screenshot = Some(screenshot);
                }
                let heal_request = test_dir.join("heal_request.md");
                if heal_request.is_file() {
                    artifacts.heal_request = Some(heal_request);
                }
                let result_json = test_dir.join("result.json");
                if result_json.is_file() {
                    match read_json::<SavedTestResult>(&result_json) {
                        Ok(saved) => artifacts.result = Some(saved.result),
                        Err(err) => {
                            warn!(path = %result_json.display(), %err, "skipping corrupted unit result");
                        }
                    }
                }
                if artifacts != UnitArtifacts::default() {
                    let name = test_dir
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    unit_artifacts.insert(name, artifacts);
                }
            }
        }

        Ok(Some(RunDetails {
            record,
            unit_artifacts,
        }))
    }

    /// All stored runs containing a unit matching the query, newest first.
    pub fn find_runs_with_unit(&self, unit_name: &str) -> Result<Vec<RunMatch>> {
        let mut matches = Vec::new();
        for (category, runs_dir) in self.all_runs_dirs()? {
            for run_dir in sorted_entries(&runs_dir, |p| p.is_dir())? {
                let run_json = run_dir.join("run.json");
                if !run_json.is_file() {
                    continue;
                }
                let Ok(record) = read_json::<CategoryRunRecord>(&run_json) else {
                    continue;
                };
                for unit in record.result.all_units() {
                    if result_name_matches(unit_name, &unit.test_name) {
                        matches.push(RunMatch {
                            category: category.clone(),
                            run_id: record.run_id.clone(),
                            unit: unit.test_name.clone(),
                            status: unit.status,
                        });
                    }
                }
            }
        }
        matches.sort_by(|a, b| b.run_id.cmp(&a.run_id));
        Ok(matches)
    }

    /// All `_runs` directories in the tree, with their category paths.
    fn all_runs_dirs(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut out = Vec::new();
        collect_runs_dirs(&self.tests_root, &self.tests_root, &mut out)?;
        out.sort();
        Ok(out)
    }
}

fn collect_runs_dirs(
    dir: &Path,
    tests_root: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name == RUNS_DIR_NAME {
            let category = dir
                .strip_prefix(tests_root)
                .unwrap_or(dir)
                .to_string_lossy()
                .replace('\\', "/");
            out.push((category, path));
        } else if !name.starts_with('.') && !name.starts_with('_') {
            collect_runs_dirs(&path, tests_root, out)?;
        }
    }
    Ok(())
}

fn sorted_entries(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| keep(p))
        .collect();
    entries.sort();
    Ok(entries)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn now() -> String {
    Local::now().to_rfc3339()
}
