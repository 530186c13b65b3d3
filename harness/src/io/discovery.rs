//! Filesystem discovery of the test tree.
//!
//! The tree is convention-driven: any folder containing `steps.md` is a
//! test, `_setup`/`_teardown` folders attach lifecycle units to their
//! category, and an optional `_category.yaml` enriches a category with
//! display metadata and ordering. Discovery holds no cache; every scan
//! re-reads the filesystem so authoring changes are picked up immediately.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use serde::Deserialize;
use std::fmt::Write as _;
use tracing::warn;

use crate::core::model::{
    Category, PhaseArtifacts, SetupTeardown, Test, TestPriority, TestStatus,
};

const CATEGORY_FILE: &str = "_category.yaml";
const STEPS_FILE: &str = "steps.md";
const SCRIPT_FILE: &str = "script.md";
const SETUP_FOLDER: &str = "_setup";
const TEARDOWN_FOLDER: &str = "_teardown";
const FUNCTIONS_FOLDER: &str = "_functions";
/// Run-history directory written by `io/storage`; never authoring content.
const RUNS_FOLDER: &str = "_runs";

/// Per-test metadata entry in `_category.yaml`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
struct TestYaml {
    id: String,
    name: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    tags: Vec<String>,
    owner: Option<String>,
    blocked_reason: Option<String>,
}

/// Parsed `_category.yaml`. Everything is optional; the file only
/// overrides what discovery infers from folder names.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoryYaml {
    name: Option<String>,
    description: Option<String>,
    execution_order: Option<Vec<String>>,
    run_after: Option<String>,
    tests: Vec<TestYaml>,
}

/// Scans a tests root for categories and tests.
pub struct Discovery {
    tests_root: PathBuf,
}

impl Discovery {
    pub fn new(tests_root: impl Into<PathBuf>) -> Result<Self> {
        let tests_root = tests_root.into();
        if !tests_root.is_dir() {
            return Err(anyhow!(
                "tests root does not exist: {}",
                tests_root.display()
            ));
        }
        Ok(Self { tests_root })
    }

    pub fn tests_root(&self) -> &Path {
        &self.tests_root
    }

    /// Scan the tests root and return all top-level categories.
    pub fn scan(&self) -> Result<Vec<Category>> {
        let mut categories = Vec::new();
        for entry in sorted_dirs(&self.tests_root)? {
            let name = folder_name(&entry);
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            if let Some(category) = self.scan_category(&entry)? {
                categories.push(category);
            }
        }
        Ok(categories)
    }

    fn scan_category(&self, path: &Path) -> Result<Option<Category>> {
        let yaml = load_category_yaml(&path.join(CATEGORY_FILE));
        let rel_path = path
            .strip_prefix(&self.tests_root)
            .unwrap_or(path)
            .to_path_buf();

        let mut category = Category::new(
            yaml.name
                .clone()
                .unwrap_or_else(|| display_name(&folder_name(path))),
            rel_path.clone(),
        );
        category.description = yaml.description.clone();
        category.setup = self.discover_setup_teardown(path, SETUP_FOLDER);
        category.teardown = self.discover_setup_teardown(path, TEARDOWN_FOLDER);
        category.execution_order = yaml
            .execution_order
            .clone()
            .filter(|order| !order.is_empty());
        category.run_after = yaml.run_after.clone();

        let mut discovered_tests = Vec::new();
        for entry in sorted_dirs(path)? {
            let name = folder_name(&entry);
            if name.starts_with('.')
                || matches!(
                    name.as_str(),
                    SETUP_FOLDER | TEARDOWN_FOLDER | FUNCTIONS_FOLDER | RUNS_FOLDER
                )
            {
                continue;
            }
            if entry.join(STEPS_FILE).is_file() {
                let meta = yaml.tests.iter().find(|t| t.id == name);
                discovered_tests.push(self.create_test(&entry, meta, &rel_path));
            } else if is_category_folder(&entry) {
                if let Some(sub) = self.scan_category(&entry)? {
                    category.subcategories.push(sub);
                }
            }
        }

        // YAML-declared tests first in declared order, then the rest in
        // alphabetical discovery order.
        let mut ordered = Vec::with_capacity(discovered_tests.len());
        for meta in &yaml.tests {
            if let Some(idx) = discovered_tests.iter().position(|t| t.id == meta.id) {
                ordered.push(discovered_tests.remove(idx));
            }
        }
        ordered.append(&mut discovered_tests);
        category.tests = ordered;

        if category.tests.is_empty() && category.subcategories.is_empty() {
            return Ok(None);
        }
        Ok(Some(category))
    }

    fn discover_setup_teardown(&self, category_path: &Path, folder: &str) -> Option<SetupTeardown> {
        let path = category_path.join(folder);
        if !path.is_dir() {
            return None;
        }
        let rel = path
            .strip_prefix(&self.tests_root)
            .unwrap_or(&path)
            .to_path_buf();
        let unit = SetupTeardown {
            artifacts: scan_artifacts(&path, &rel),
            path: rel,
        };
        unit.is_valid().then_some(unit)
    }

    fn create_test(&self, path: &Path, meta: Option<&TestYaml>, category_path: &Path) -> Test {
        let id = folder_name(path);
        let rel = path
            .strip_prefix(&self.tests_root)
            .unwrap_or(path)
            .to_path_buf();
        let meta = meta.cloned().unwrap_or_default();

        let status = meta
            .status
            .as_deref()
            .and_then(TestStatus::parse)
            .unwrap_or_default();
        let priority = meta
            .priority
            .as_deref()
            .and_then(TestPriority::parse)
            .unwrap_or_default();

        Test {
            name: meta.name.unwrap_or_else(|| display_name(&id)),
            id,
            artifacts: scan_artifacts(path, &rel),
            path: rel,
            status,
            priority,
            tags: meta.tags,
            owner: meta.owner,
            blocked_reason: meta.blocked_reason,
            category_path: category_path.to_path_buf(),
        }
    }

    /// Find a category by slash-separated path, e.g. `"scheduling"` or
    /// `"scheduling/appointments"`. Case-insensitive.
    pub fn find_category(&self, category_path: &str) -> Result<Option<Category>> {
        let categories = self.scan()?;
        Ok(find_category_in(&categories, category_path).cloned())
    }

    /// Find a test by plain id or dotted full id, e.g. `"cancel_appointment"`
    /// or `"scheduling.appointments.cancel_appointment"`.
    pub fn find_test(&self, test_id: &str) -> Result<Option<Test>> {
        let categories = self.scan()?;
        for category in &categories {
            for test in category.all_tests() {
                if test.id == test_id || test.full_id() == test_id {
                    return Ok(Some(test.clone()));
                }
            }
        }
        Ok(None)
    }

    pub fn get_all_tests(&self) -> Result<Vec<Test>> {
        let categories = self.scan()?;
        Ok(categories
            .iter()
            .flat_map(|c| c.all_tests().into_iter().cloned())
            .collect())
    }

    pub fn get_runnable_tests(
        &self,
        procedures: &dyn crate::core::model::ProcedureLookup,
    ) -> Result<Vec<Test>> {
        Ok(self
            .get_all_tests()?
            .into_iter()
            .filter(|t| t.is_runnable(procedures))
            .collect())
    }

    pub fn get_tests_needing_exploration(&self) -> Result<Vec<Test>> {
        Ok(self
            .get_all_tests()?
            .into_iter()
            .filter(Test::needs_exploration)
            .collect())
    }
}

/// Recursive lookup by structural path within a scanned tree.
pub fn find_category_in<'a>(categories: &'a [Category], path: &str) -> Option<&'a Category> {
    let wanted = path.trim_matches('/');
    for category in categories {
        if category.full_path().eq_ignore_ascii_case(wanted) {
            return Some(category);
        }
        if let Some(found) = find_category_in(&category.subcategories, wanted) {
            return Some(found);
        }
    }
    None
}

/// Render the discovered tree as indented text for the CLI.
pub fn render_tree(categories: &[Category]) -> String {
    let mut out = String::new();
    render_level(categories, 0, &mut out);
    out
}

fn render_level(categories: &[Category], indent: usize, out: &mut String) {
    let prefix = "  ".repeat(indent);
    for category in categories {
        let _ = writeln!(out, "{prefix}[DIR] {}", category.name);
        if category.setup.is_some() {
            let _ = writeln!(out, "{prefix}  [SETUP] _setup/");
        }
        for test in &category.tests {
            let _ = writeln!(
                out,
                "{prefix}  [{}] {} [{}]",
                test.status.as_str().to_uppercase(),
                test.name,
                test.priority.as_str()
            );
        }
        if category.teardown.is_some() {
            let _ = writeln!(out, "{prefix}  [TEARDOWN] _teardown/");
        }
        render_level(&category.subcategories, indent + 1, out);
    }
}

fn scan_artifacts(abs_path: &Path, rel_path: &Path) -> PhaseArtifacts {
    let mut artifacts = PhaseArtifacts::for_unit(rel_path);
    artifacts.has_steps = abs_path.join(STEPS_FILE).is_file();
    artifacts.has_script = abs_path.join(SCRIPT_FILE).is_file();
    artifacts
}

fn is_category_folder(path: &Path) -> bool {
    if path.join(CATEGORY_FILE).is_file() {
        return true;
    }
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };
    entries
        .flatten()
        .any(|e| e.path().is_dir() && e.path().join(STEPS_FILE).is_file())
}

fn load_category_yaml(path: &Path) -> CategoryYaml {
    if !path.is_file() {
        return CategoryYaml::default();
    }
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to read category metadata");
            return CategoryYaml::default();
        }
    };
    match serde_yaml::from_str(&contents) {
        Ok(yaml) => yaml,
        Err(err) => {
            warn!(path = %path.display(), %err, "malformed category metadata, ignoring");
            CategoryYaml::default()
        }
    }
}

fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(path)
        .with_context(|| format!("read directory {}", path.display()))?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `cancel_appointment` -> `Cancel Appointment`.
fn display_name(folder: &str) -> String {
    folder
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
