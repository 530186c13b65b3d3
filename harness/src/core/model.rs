//! Entity model for the test tree: categories, tests, setup/teardown.
//!
//! These types define stable contracts between discovery, planning and the
//! execution engine. They are recreated fresh on every scan; nothing here
//! carries state across runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Lifecycle status of a test in the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Not yet explored/generated.
    #[default]
    Pending,
    /// Ready to run.
    Active,
    /// Temporarily turned off.
    Disabled,
    /// Waiting for an external fix.
    Blocked,
}

impl TestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Active => "active",
            TestStatus::Disabled => "disabled",
            TestStatus::Blocked => "blocked",
        }
    }

    /// Lenient parse used for metadata files; unknown values map to `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TestStatus::Pending),
            "active" => Some(TestStatus::Active),
            "disabled" => Some(TestStatus::Disabled),
            "blocked" => Some(TestStatus::Blocked),
            _ => None,
        }
    }
}

/// Advisory priority. Used only for sorting in listings, never for
/// execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestPriority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl TestPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TestPriority::Critical => "critical",
            TestPriority::High => "high",
            TestPriority::Medium => "medium",
            TestPriority::Low => "low",
        }
    }

    /// Numeric order for sorting (lower = higher priority).
    pub fn sort_order(self) -> u8 {
        match self {
            TestPriority::Critical => 0,
            TestPriority::High => 1,
            TestPriority::Medium => 2,
            TestPriority::Low => 3,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(TestPriority::Critical),
            "high" => Some(TestPriority::High),
            "medium" => Some(TestPriority::Medium),
            "low" => Some(TestPriority::Low),
            _ => None,
        }
    }
}

/// Phase of a unit within a category run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Test,
    Setup,
    Teardown,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Test => "test",
            Phase::Setup => "setup",
            Phase::Teardown => "teardown",
        }
    }
}

/// Lookup for executable procedures, implemented by the action registry.
///
/// Discovery records what authoring artifacts exist on disk; whether a unit
/// is actually runnable depends on a procedure being registered for it.
pub trait ProcedureLookup {
    fn has_procedure(&self, unit_path: &Path, phase: Phase) -> bool;
}

/// Authoring artifacts of a unit folder, recorded at discovery time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PhaseArtifacts {
    pub steps_path: PathBuf,
    pub script_path: PathBuf,
    pub changelog_path: PathBuf,
    pub has_steps: bool,
    pub has_script: bool,
}

impl PhaseArtifacts {
    pub fn for_unit(unit_path: &Path) -> Self {
        Self {
            steps_path: unit_path.join("steps.md"),
            script_path: unit_path.join("script.md"),
            changelog_path: unit_path.join("changelog.md"),
            has_steps: false,
            has_script: false,
        }
    }
}

/// A single test case discovered in the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Test {
    /// Stable slug, the unit folder name.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Path of the unit folder, relative to the tests root.
    pub path: PathBuf,
    pub status: TestStatus,
    pub priority: TestPriority,
    pub tags: Vec<String>,
    pub owner: Option<String>,
    pub blocked_reason: Option<String>,
    /// Path of the owning category, relative to the tests root.
    pub category_path: PathBuf,
    pub artifacts: PhaseArtifacts,
}

impl Test {
    /// Dotted qualified id, e.g. `scheduling.appointments.cancel_appointment`.
    pub fn full_id(&self) -> String {
        let category = self
            .category_path
            .to_string_lossy()
            .replace(['/', '\\'], ".");
        if category.is_empty() {
            self.id.clone()
        } else {
            format!("{category}.{}", self.id)
        }
    }

    /// A test is runnable when it is active and an executable procedure is
    /// registered for it.
    pub fn is_runnable(&self, procedures: &dyn ProcedureLookup) -> bool {
        self.status == TestStatus::Active && procedures.has_procedure(&self.path, Phase::Test)
    }

    /// A test needs exploration when a steps document exists but no
    /// detailed script has been derived from it yet.
    pub fn needs_exploration(&self) -> bool {
        self.artifacts.has_steps && !self.artifacts.has_script
    }
}

/// Setup or teardown attached to a category. Has no identity beyond its
/// owning category and phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupTeardown {
    /// Path of the `_setup`/`_teardown` folder, relative to the tests root.
    pub path: PathBuf,
    pub artifacts: PhaseArtifacts,
}

impl SetupTeardown {
    /// Valid iff at minimum a steps document exists.
    pub fn is_valid(&self) -> bool {
        self.artifacts.has_steps
    }
}

/// A named node in the test tree.
///
/// The tree is strictly child-owned: there is no parent back-pointer.
/// Ancestor chains are resolved by re-walking from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    /// Structural path, unique within the tree, relative to the tests root.
    pub path: PathBuf,
    pub description: Option<String>,
    pub tests: Vec<Test>,
    pub subcategories: Vec<Category>,
    pub setup: Option<SetupTeardown>,
    pub teardown: Option<SetupTeardown>,
    /// Explicit full run order for direct children (test ids and
    /// subcategory folder names). Non-empty when present; takes precedence
    /// over `run_after` planning.
    pub execution_order: Option<Vec<String>>,
    /// Deprecated: request insertion of this subcategory immediately after
    /// a named sibling test. Only consulted when the parent has no
    /// `execution_order`.
    pub run_after: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            description: None,
            tests: Vec::new(),
            subcategories: Vec::new(),
            setup: None,
            teardown: None,
            execution_order: None,
            run_after: None,
        }
    }

    /// Slash-separated structural path.
    pub fn full_path(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }

    /// Folder name (last path segment).
    pub fn folder_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }

    /// All tests including nested subcategories, depth-first.
    pub fn all_tests(&self) -> Vec<&Test> {
        let mut tests: Vec<&Test> = self.tests.iter().collect();
        for sub in &self.subcategories {
            tests.extend(sub.all_tests());
        }
        tests
    }

    /// Recursive test count.
    pub fn test_count(&self) -> usize {
        self.tests.len()
            + self
                .subcategories
                .iter()
                .map(Category::test_count)
                .sum::<usize>()
    }

    /// Find a direct subcategory by folder name or display name,
    /// case-insensitively.
    pub fn find_subcategory(&self, segment: &str) -> Option<&Category> {
        self.subcategories.iter().find(|sub| {
            sub.folder_name().eq_ignore_ascii_case(segment)
                || sub.name.eq_ignore_ascii_case(segment)
        })
    }
}
