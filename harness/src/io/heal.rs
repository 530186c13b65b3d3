//! Heal request generation for failed units.
//!
//! A heal request is a standalone markdown bundle with everything a
//! maintainer needs to repair a broken unit: the error, the screenshot,
//! the target configuration (secrets masked), the unit's authoring files
//! and a fixed remediation checklist. Context key names are listed but
//! values are never copied into the document.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, anyhow};
use chrono::Local;
use minijinja::{Environment, context};
use tracing::info;

use crate::core::matching::flatten_unit_name;
use crate::core::results::TestResult;
use crate::io::config::TargetConfig;

const HEAL_REQUEST_TEMPLATE: &str = include_str!("heal_request.md");
const EXCERPT_LIMIT: usize = 4000;

/// Generates heal request files when units fail.
pub struct HealGenerator {
    heal_requests_dir: PathBuf,
    tests_root: PathBuf,
    env: Environment<'static>,
}

impl HealGenerator {
    pub fn new(heal_requests_dir: impl Into<PathBuf>, tests_root: impl Into<PathBuf>) -> Self {
        let mut env = Environment::new();
        env.add_template("heal_request", HEAL_REQUEST_TEMPLATE)
            .expect("heal request template should be valid");
        Self {
            heal_requests_dir: heal_requests_dir.into(),
            tests_root: tests_root.into(),
            env,
        }
    }

    /// Generate a heal request for a failed unit. Returns the path of the
    /// written file, named `{flattened_unit_name}_{run_id}.md`.
    pub fn generate(
        &self,
        result: &TestResult,
        category_name: &str,
        run_id: &str,
        context_keys: &[String],
        config: &TargetConfig,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.heal_requests_dir).with_context(|| {
            format!(
                "create heal requests dir {}",
                self.heal_requests_dir.display()
            )
        })?;

        let unit_dir = self.tests_root.join(&result.test_path);
        let steps = read_excerpt(&unit_dir.join("steps.md"));
        let script = read_excerpt(&unit_dir.join("script.md"));

        let template = self.env.get_template("heal_request")?;
        let rendered = template.render(context! {
            category => category_name,
            unit => result.test_name,
            generated_at => Local::now().to_rfc3339(),
            run_id => run_id,
            unit_type => result.test_type.as_str(),
            duration_ms => result.duration_ms,
            error => result.error.as_deref().unwrap_or("Unknown error"),
            error_kind => result.error_kind.as_deref().unwrap_or("Unknown"),
            screenshot => result.screenshot.as_ref().map(|p| p.display().to_string()),
            config => config.sanitized(),
            context_keys => (!context_keys.is_empty()).then_some(context_keys),
            location => unit_dir.display().to_string(),
            steps => steps,
            script => script,
        })?;

        let filename = format!("{}_{run_id}.md", flatten_unit_name(&result.test_name));
        let path = self.heal_requests_dir.join(filename);
        fs::write(&path, rendered)
            .with_context(|| format!("write heal request {}", path.display()))?;
        info!(path = %path.display(), unit = %result.test_name, "heal request created");
        Ok(path)
    }

    /// All pending heal requests, sorted by filename (oldest first).
    pub fn list_pending(&self) -> Result<Vec<PathBuf>> {
        if !self.heal_requests_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut requests: Vec<PathBuf> = fs::read_dir(&self.heal_requests_dir)
            .with_context(|| format!("read {}", self.heal_requests_dir.display()))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        requests.sort();
        Ok(requests)
    }

    /// Mark a heal request resolved by moving it into `resolved/`. Requests
    /// are never deleted.
    pub fn mark_resolved(&self, request_path: &Path) -> Result<PathBuf> {
        if !request_path.is_file() {
            return Err(anyhow!(
                "heal request not found: {}",
                request_path.display()
            ));
        }
        let resolved_dir = self.heal_requests_dir.join("resolved");
        fs::create_dir_all(&resolved_dir)
            .with_context(|| format!("create {}", resolved_dir.display()))?;
        let file_name = request_path
            .file_name()
            .ok_or_else(|| anyhow!("heal request has no file name"))?;
        let dest = resolved_dir.join(file_name);
        fs::rename(request_path, &dest)
            .with_context(|| format!("move heal request to {}", dest.display()))?;
        Ok(dest)
    }
}

fn read_excerpt(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    if contents.len() <= EXCERPT_LIMIT {
        return Some(contents.trim_end().to_string());
    }
    let mut end = EXCERPT_LIMIT;
    while !contents.is_char_boundary(end) {
        end -= 1;
    }
    Some(format!("{}\n[truncated]", contents[..end].trim_end()))
}
