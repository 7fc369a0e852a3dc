//! Plugin path resolution and the `loadPlugin` round trip.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lessr_core::{Error, Result};
use lessr_protocol::{LoadPluginParams, LoadPluginResult, VisitorInfo, cmd};
use serde_json::Value;

use crate::registry::{PluginRecord, PluginRegistry};
use crate::runtime::JsRuntime;

/// Resolves plugin paths and drives plugin loads on the scripting child.
pub struct PluginLoader {
    runtime: Arc<JsRuntime>,
    registry: PluginRegistry,
}

impl PluginLoader {
    /// Create a loader bound to a runtime.
    #[must_use]
    pub fn new(runtime: Arc<JsRuntime>) -> Self {
        Self {
            runtime,
            registry: PluginRegistry::new(),
        }
    }

    /// The host-side mirror of loaded plugins.
    #[must_use]
    pub const fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Resolve a plugin reference to a concrete file.
    ///
    /// Absolute paths are used as-is. `./`- and `../`-relative paths resolve
    /// against `base_dir` (or the current working directory when absent).
    /// Anything else is a module name, searched in order through `base_dir`,
    /// `base_dir/node_modules`, the working directory, and its
    /// `node_modules`. Every candidate is probed both verbatim and with a
    /// `.js` extension.
    ///
    /// # Errors
    ///
    /// Returns an error naming the original path when nothing matches.
    pub fn resolve_path(path: &str, base_dir: Option<&Path>) -> Result<PathBuf> {
        let as_path = Path::new(path);
        if as_path.is_absolute() {
            return probe(as_path).ok_or_else(|| not_found(path));
        }

        let cwd = std::env::current_dir().map_err(|e| {
            Error::resource(format!("Cannot determine working directory: {}", e))
        })?;

        if path.starts_with("./") || path.starts_with("../") {
            let base = base_dir.map_or_else(|| cwd.clone(), Path::to_path_buf);
            return probe(&base.join(as_path)).ok_or_else(|| not_found(path));
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(base) = base_dir {
            candidates.push(base.to_path_buf());
            candidates.push(base.join("node_modules"));
        }
        candidates.push(cwd.clone());
        candidates.push(cwd.join("node_modules"));

        for candidate in &candidates {
            if let Some(found) = probe(&candidate.join(as_path)) {
                return Ok(found);
            }
        }
        Err(not_found(path))
    }

    /// Resolve and load a plugin, recording the result in the registry.
    ///
    /// A second load of the same resolved path is a no-op on the child and
    /// comes back with `cached = true`.
    ///
    /// # Errors
    ///
    /// Resolution failures, child-side load failures (syntax error, install
    /// threw), and minimum-version mismatches all fail the load; the runtime
    /// stays healthy.
    pub async fn load(
        &self,
        path: &str,
        base_dir: Option<&Path>,
        options: Option<Value>,
    ) -> Result<PluginRecord> {
        let resolved = Self::resolve_path(path, base_dir)?;
        let params = LoadPluginParams {
            path: resolved.to_string_lossy().into_owned(),
            base_dir: base_dir.map(|p| p.to_string_lossy().into_owned()),
            options,
        };

        let reply = self
            .runtime
            .send_command_with_timeout(
                cmd::LOAD_PLUGIN,
                Some(serde_json::to_value(&params)?),
                self.runtime.request_timeout(),
            )
            .await
            .map_err(|e| classify_load_error(path, e))?;

        let result: LoadPluginResult = serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed loadPlugin reply: {}", e)))?;

        if result.cached {
            tracing::debug!("Plugin already loaded: {:?}", resolved);
        } else {
            tracing::info!(
                "Loaded plugin {:?} ({} new functions, {} new visitors)",
                resolved,
                result.new_functions,
                result.new_visitors
            );
        }

        let record = PluginRecord::from_result(resolved, &result);
        self.registry.record(record.clone());
        Ok(record)
    }

    /// Ask the child for every registered function name.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn registered_functions(&self) -> Result<Vec<String>> {
        let reply = self
            .runtime
            .send_command_with_timeout(
                cmd::GET_REGISTERED_FUNCTIONS,
                None,
                self.runtime.request_timeout(),
            )
            .await?;
        serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed function list: {}", e)))
    }

    /// Ask the child for its visitor list.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn visitors(&self) -> Result<Vec<VisitorInfo>> {
        let reply = self
            .runtime
            .send_command_with_timeout(cmd::GET_VISITORS, None, self.runtime.request_timeout())
            .await?;
        serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed visitor list: {}", e)))
    }
}

/// Probe a candidate verbatim, then with a `.js` extension.
fn probe(candidate: &Path) -> Option<PathBuf> {
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }
    let with_ext = candidate.with_extension("js");
    if with_ext.is_file() {
        return Some(with_ext);
    }
    None
}

fn not_found(path: &str) -> Error {
    Error::plugin(format!(
        "Failed to resolve plugin '{}': no matching file in the search path",
        path
    ))
}

/// Recognise the child's minimum-version diagnostic so callers can tell it
/// apart from other load failures.
fn classify_load_error(path: &str, error: Error) -> Error {
    let message = match &error {
        Error::Protocol(message) => message.clone(),
        _ => return error,
    };
    if let Some(rest) = message.strip_prefix("Plugin requires host version ") {
        if let Some((required, actual)) = rest.split_once(", host is ") {
            return Error::MinVersion {
                required: required.trim().to_string(),
                actual: actual.trim().to_string(),
            };
        }
    }
    Error::plugin(format!("Failed to load plugin '{}': {}", path, message))
}
