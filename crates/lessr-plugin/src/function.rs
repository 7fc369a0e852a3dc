//! Host-side callables backed by scripting-side plugin functions.

use std::sync::Arc;

use lessr_core::{ChildSlot, Error, Node, NodeType, Result};
use lessr_flatast::flatten;
use lessr_protocol::{
    AttachBufferParams, CallFunctionParams, DetachBufferParams, IpcMode, cmd,
};
use lessr_shm::ShmManager;

use crate::convert;
use crate::runtime::JsRuntime;

/// A plugin function wrapped as a callable the evaluator can invoke.
///
/// The IPC mode decides how arguments travel: inline JSON, or a flattened
/// wrapper tree in a shared buffer. Both paths produce identical result
/// nodes because both unmarshal through [`convert::node_from_value`].
pub struct JsFunctionDefinition {
    name: String,
    runtime: Arc<JsRuntime>,
    shm: Arc<ShmManager>,
    ipc_mode: IpcMode,
}

impl JsFunctionDefinition {
    /// Wrap a function name. The IPC mode defaults to the runtime's.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime: Arc<JsRuntime>, shm: Arc<ShmManager>) -> Self {
        let ipc_mode = runtime.ipc_mode();
        Self {
            name: name.into(),
            runtime,
            shm,
            ipc_mode,
        }
    }

    /// Override the IPC mode for this definition only.
    #[must_use]
    pub const fn with_ipc_mode(mut self, mode: IpcMode) -> Self {
        self.ipc_mode = mode;
        self
    }

    /// The scripting-side function name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The IPC mode calls through this definition use.
    #[must_use]
    pub const fn ipc_mode(&self) -> IpcMode {
        self.ipc_mode
    }

    /// Arguments are always evaluated by the engine before the bridge sees
    /// them.
    #[must_use]
    pub const fn needs_eval_args(&self) -> bool {
        true
    }

    /// Invoke the function with evaluated argument nodes.
    ///
    /// # Errors
    ///
    /// Fails when the function is unknown to the child, when the call
    /// throws, or on any transport failure.
    pub async fn call(&self, args: &[Node]) -> Result<Node> {
        match self.ipc_mode {
            IpcMode::Json => self.call_json(args).await,
            IpcMode::SharedMemory => self.call_shm(args).await,
        }
    }

    async fn call_json(&self, args: &[Node]) -> Result<Node> {
        let params = CallFunctionParams {
            name: self.name.clone(),
            args: Some(args.iter().map(convert::node_to_value).collect()),
            buffer_key: None,
        };
        let reply = self
            .runtime
            .send_command_with_timeout(
                cmd::CALL_FUNCTION,
                Some(serde_json::to_value(&params)?),
                self.runtime.request_timeout(),
            )
            .await?;
        convert::node_from_value(&reply)
    }

    async fn call_shm(&self, args: &[Node]) -> Result<Node> {
        // One-depth synthetic wrapper: the child unpacks its children as the
        // argument list.
        let wrapper = Node::new(NodeType::Expression);
        for arg in args {
            wrapper.add_child(ChildSlot::Args, arg.clone());
        }
        let bytes = flatten(&wrapper)?.ast.to_bytes();

        let segment = self.shm.create(bytes.len())?;
        let key = segment.key().to_string();
        segment.write_all(&bytes)?;
        segment.sync()?;

        let attach = AttachBufferParams {
            key: key.clone(),
            path: segment.path().to_string_lossy().into_owned(),
            size: bytes.len() as u64,
        };
        self.runtime
            .send_command_with_timeout(
                cmd::ATTACH_BUFFER,
                Some(serde_json::to_value(&attach)?),
                self.runtime.request_timeout(),
            )
            .await
            .inspect_err(|_| self.discard(&key))?;

        let params = CallFunctionParams {
            name: self.name.clone(),
            args: None,
            buffer_key: Some(key.clone()),
        };
        let reply = self
            .runtime
            .send_command_with_timeout(
                cmd::CALL_FUNCTION,
                Some(serde_json::to_value(&params)?),
                self.runtime.request_timeout(),
            )
            .await;

        // Detach and destroy whether or not the call succeeded.
        let detach = DetachBufferParams { key: key.clone() };
        if let Ok(value) = serde_json::to_value(&detach) {
            let _ = self
                .runtime
                .send_command_with_timeout(
                    cmd::DETACH_BUFFER,
                    Some(value),
                    self.runtime.request_timeout(),
                )
                .await;
        }
        self.discard(&key);

        convert::node_from_value(&reply?)
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.shm.destroy(key) {
            if !matches!(e, Error::BufferNotFound(_)) {
                tracing::warn!("Failed to destroy call buffer {}: {}", key, e);
            }
        }
    }
}

impl std::fmt::Debug for JsFunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsFunctionDefinition")
            .field("name", &self.name)
            .field("ipc_mode", &self.ipc_mode)
            .finish()
    }
}
