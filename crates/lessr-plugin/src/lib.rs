//! # lessr Plugin Bridge
//!
//! Runs user-supplied JavaScript plugins from the compiled CSS engine. The
//! bridge is three layers:
//!
//! - a binary FlatAST codec (`lessr-flatast`) for exchanging tree fragments,
//! - file-backed shared-memory segments (`lessr-shm`) for large buffers,
//! - a long-lived Node.js subprocess driven by correlated request/response
//!   lines over stdin/stdout (this crate).
//!
//! [`PluginManager`] is the entry point: it owns the subprocess runtime, the
//! segment manager, the plugin loader, and the visitor bridge, and hands out
//! [`JsFunctionDefinition`] callables for registered plugin functions.

pub mod convert;
mod function;
mod loader;
mod registry;
mod runtime;
mod visitor;

pub use function::JsFunctionDefinition;
pub use loader::PluginLoader;
pub use registry::{PluginRecord, PluginRegistry};
pub use runtime::{JsRuntime, RuntimeOptions};
pub use visitor::{VisitorManager, VisitorRun};

use std::path::Path;
use std::sync::Arc;

use lessr_core::{Node, Result};
use lessr_protocol::{IpcMode, VisitorInfo};
use lessr_shm::ShmManager;
use serde_json::Value;

/// Plugin manager handling all plugin operations for one engine instance.
pub struct PluginManager {
    runtime: Arc<JsRuntime>,
    shm: Arc<ShmManager>,
    loader: PluginLoader,
    visitors: VisitorManager,
}

impl PluginManager {
    /// Create a manager from runtime options.
    ///
    /// # Errors
    ///
    /// Returns an error if the shared-memory directory cannot be created.
    pub fn new(options: RuntimeOptions) -> Result<Self> {
        let runtime = Arc::new(JsRuntime::new(options));
        let shm = Arc::new(ShmManager::new()?);
        Ok(Self {
            loader: PluginLoader::new(Arc::clone(&runtime)),
            visitors: VisitorManager::new(Arc::clone(&runtime), Arc::clone(&shm)),
            runtime,
            shm,
        })
    }

    /// Start the scripting child.
    ///
    /// # Errors
    ///
    /// Returns an error on double start or spawn failure.
    pub async fn start(&self) -> Result<()> {
        self.runtime.start().await
    }

    /// Stop the scripting child and destroy every shared-memory segment the
    /// manager still owns, attached or not.
    pub async fn stop(&self) {
        self.runtime.stop().await;
        self.shm.destroy_all();
    }

    /// The underlying runtime.
    #[must_use]
    pub const fn runtime(&self) -> &Arc<JsRuntime> {
        &self.runtime
    }

    /// The shared-memory manager.
    #[must_use]
    pub fn shm(&self) -> &ShmManager {
        self.shm.as_ref()
    }

    /// The host-side plugin registry mirror.
    #[must_use]
    pub const fn registry(&self) -> &PluginRegistry {
        self.loader.registry()
    }

    /// The visitor bridge.
    #[must_use]
    pub const fn visitor_manager(&self) -> &VisitorManager {
        &self.visitors
    }

    /// Load a plugin and refresh the visitor list.
    ///
    /// # Errors
    ///
    /// Propagates resolution and child-side load failures.
    pub async fn load_plugin(
        &self,
        path: &str,
        base_dir: Option<&Path>,
        options: Option<Value>,
    ) -> Result<PluginRecord> {
        let record = self.loader.load(path, base_dir, options).await?;
        self.visitors.refresh_visitors().await?;
        Ok(record)
    }

    /// Wrap a registered function name as a callable using the runtime's
    /// default IPC mode.
    #[must_use]
    pub fn function(&self, name: impl Into<String>) -> JsFunctionDefinition {
        JsFunctionDefinition::new(name, Arc::clone(&self.runtime), Arc::clone(&self.shm))
    }

    /// Wrap a registered function name with an explicit IPC mode.
    #[must_use]
    pub fn function_with_mode(
        &self,
        name: impl Into<String>,
        mode: IpcMode,
    ) -> JsFunctionDefinition {
        self.function(name).with_ipc_mode(mode)
    }

    /// Every function name the child has registered.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn registered_functions(&self) -> Result<Vec<String>> {
        self.loader.registered_functions().await
    }

    /// The child's visitor list, as last fetched.
    #[must_use]
    pub fn visitors(&self) -> Vec<VisitorInfo> {
        self.visitors.visitors()
    }

    /// Run one visitor over a host tree.
    ///
    /// # Errors
    ///
    /// Propagates child-side and transport failures.
    pub async fn run_visitor(&self, root: &Node, visitor_index: u32) -> Result<VisitorRun> {
        self.visitors.run_visitor(root, visitor_index).await
    }

    /// Run all pre-eval visitors over a host tree.
    ///
    /// # Errors
    ///
    /// Propagates child-side and transport failures.
    pub async fn run_pre_eval_visitors(&self, root: &Node) -> Result<VisitorRun> {
        self.visitors.run_pre_eval_visitors(root).await
    }

    /// Run all post-eval visitors over a host tree.
    ///
    /// # Errors
    ///
    /// Propagates child-side and transport failures.
    pub async fn run_post_eval_visitors(&self, root: &Node) -> Result<VisitorRun> {
        self.visitors.run_post_eval_visitors(root).await
    }

    /// Liveness check against the child.
    ///
    /// # Errors
    ///
    /// Returns an error when the child is unresponsive.
    pub async fn ping(&self) -> Result<()> {
        self.runtime.ping().await
    }

    /// Round-trip arbitrary data through the child.
    ///
    /// # Errors
    ///
    /// Propagates transport failures.
    pub async fn echo(&self, data: Value) -> Result<Value> {
        self.runtime.echo(data).await
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("runtime", &self.runtime)
            .field("plugins", &self.registry().count())
            .finish()
    }
}
