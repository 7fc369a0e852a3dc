//! Host-side mirror of what the scripting child has loaded.
//!
//! The authoritative registration state (plugin objects, function table,
//! visitor list) lives in the child. This registry records just enough on
//! the host side to answer queries without a round trip and to key the load
//! cache by resolved path.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lessr_protocol::LoadPluginResult;
use uuid::Uuid;

/// One loaded plugin as the host remembers it.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    /// Host-side id for logs and diagnostics.
    pub id: Uuid,

    /// Resolved path the load cache is keyed by.
    pub path: PathBuf,

    /// Whether the most recent load was a cache hit.
    pub cached: bool,

    /// When the host first saw this plugin.
    pub loaded_at: DateTime<Utc>,

    /// Function names registered on the child after this load.
    pub functions: Vec<String>,

    /// Visitors registered on the child after this load.
    pub visitors: u32,

    /// Pre-processors registered on the child after this load.
    pub pre_processors: u32,

    /// Post-processors registered on the child after this load.
    pub post_processors: u32,

    /// File managers registered on the child after this load.
    pub file_managers: u32,
}

impl PluginRecord {
    /// Build a record from a `loadPlugin` response.
    #[must_use]
    pub fn from_result(path: PathBuf, result: &LoadPluginResult) -> Self {
        Self {
            id: Uuid::now_v7(),
            path,
            cached: result.cached,
            loaded_at: Utc::now(),
            functions: result.functions.clone(),
            visitors: result.visitors,
            pre_processors: result.pre_processors,
            post_processors: result.post_processors,
            file_managers: result.file_managers,
        }
    }
}

/// Registry of loaded plugins, keyed by resolved path.
pub struct PluginRegistry {
    plugins: DashMap<PathBuf, PluginRecord>,
}

impl PluginRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plugins: DashMap::new(),
        }
    }

    /// Record a load. A cache hit updates the existing record's `cached`
    /// flag but keeps its id and load time.
    pub fn record(&self, record: PluginRecord) {
        self.plugins
            .entry(record.path.clone())
            .and_modify(|existing| {
                existing.cached = record.cached;
                existing.functions = record.functions.clone();
                existing.visitors = record.visitors;
                existing.pre_processors = record.pre_processors;
                existing.post_processors = record.post_processors;
                existing.file_managers = record.file_managers;
            })
            .or_insert(record);
    }

    /// Get a plugin by resolved path.
    #[must_use]
    pub fn get(&self, path: &PathBuf) -> Option<PluginRecord> {
        self.plugins.get(path).map(|entry| entry.value().clone())
    }

    /// Whether a resolved path has been loaded.
    #[must_use]
    pub fn contains(&self, path: &PathBuf) -> bool {
        self.plugins.contains_key(path)
    }

    /// List all loaded plugins.
    #[must_use]
    pub fn list(&self) -> Vec<PluginRecord> {
        self.plugins.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Every function name any plugin has registered, deduplicated, in
    /// first-seen order.
    #[must_use]
    pub fn function_names(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut names = Vec::new();
        for entry in &self.plugins {
            for name in &entry.value().functions {
                if seen.insert(name.clone()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Number of loaded plugins.
    #[must_use]
    pub fn count(&self) -> usize {
        self.plugins.len()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}
