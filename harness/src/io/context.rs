//! Shared run context.
//!
//! The context is a flat key/value scope that units use to pass data along
//! one category run: a create step records the id it created, a later
//! delete step reads it back. A fresh context is created for every run and
//! never reused; every mutation is recorded in an append-only history used
//! purely for post-mortem inspection.
//!
//! Exactly one in-progress run owns a context at a time and accesses it
//! strictly sequentially, so no locking is required.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context as _, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

const REDACTED: &str = "********";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Set,
    Delete,
}

/// One recorded context mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChange {
    pub timestamp: String,
    pub action: ChangeAction,
    pub key: String,
    #[serde(default)]
    pub old_value: Option<Value>,
    #[serde(default)]
    pub new_value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ContextMeta {
    created_at: String,
    run_id: String,
}

/// The mutable key/value scope shared by all units in one category run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    meta: ContextMeta,
    values: Map<String, Value>,
    history: Vec<ContextChange>,
    /// Keys whose values must never leave the process in clear text.
    #[serde(default)]
    secret_keys: BTreeSet<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContextFile {
    context: RunContext,
    saved_at: String,
}

impl RunContext {
    /// Create a new empty context for a run, discarding any history.
    pub fn create_fresh(run_id: impl Into<String>) -> Self {
        Self {
            meta: ContextMeta {
                created_at: now(),
                run_id: run_id.into(),
            },
            values: Map::new(),
            history: Vec::new(),
            secret_keys: BTreeSet::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.meta.run_id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let old_value = self.values.insert(key.clone(), value.clone());
        let masked = self.secret_keys.contains(&key);
        self.history.push(ContextChange {
            timestamp: now(),
            action: ChangeAction::Set,
            key,
            old_value: old_value.map(|v| mask_if(masked, v)),
            new_value: Some(mask_if(masked, value)),
        });
    }

    /// Set a value that must never be persisted in clear text. Reads through
    /// [`Self::get`] return the real value; snapshots, history and saved
    /// files carry a masked copy.
    pub fn set_secret(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.secret_keys.insert(key.clone());
        self.set(key, value);
    }

    pub fn delete(&mut self, key: &str) {
        let Some(old_value) = self.values.remove(key) else {
            return;
        };
        let masked = self.secret_keys.contains(key);
        self.history.push(ContextChange {
            timestamp: now(),
            action: ChangeAction::Delete,
            key: key.to_string(),
            old_value: Some(mask_if(masked, old_value)),
            new_value: None,
        });
    }

    /// Deep copy of the current values for external inspection, secret
    /// keys masked.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut values = self.values.clone();
        for key in &self.secret_keys {
            if let Some(slot) = values.get_mut(key) {
                *slot = Value::from(REDACTED);
            }
        }
        values
    }

    /// Key names currently present, sorted. Used by diagnostics that must
    /// not leak values.
    pub fn key_names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn history(&self) -> &[ContextChange] {
        &self.history
    }

    /// Persist the context including its full history for post-run
    /// debugging.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), keys = self.values.len(), "saving context");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create context dir {}", parent.display()))?;
        }
        let mut masked = self.clone();
        masked.values = self.snapshot();
        let file = ContextFile {
            context: masked,
            saved_at: now(),
        };
        let mut buf = serde_json::to_string_pretty(&file)?;
        buf.push('\n');
        fs::write(path, buf).with_context(|| format!("write context {}", path.display()))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read context {}", path.display()))?;
        let file: ContextFile = serde_json::from_str(&contents)
            .with_context(|| format!("parse context {}", path.display()))?;
        Ok(file.context)
    }
}

fn now() -> String {
    Local::now().to_rfc3339()
}

fn mask_if(masked: bool, value: Value) -> Value {
    if masked { Value::from(REDACTED) } else { value }
}
