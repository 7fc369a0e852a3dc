//! Running scripting-side visitors over host trees and applying their
//! replacements.

use std::sync::Arc;

use lessr_core::{Error, Node, Result};
use lessr_flatast::flatten;
use lessr_protocol::{
    AttachBufferParams, DetachBufferParams, RunEvalVisitorsParams, RunEvalVisitorsResult,
    RunVisitorParams, RunVisitorResult, VisitorInfo, VisitorReplacements, cmd,
};
use lessr_shm::ShmManager;
use parking_lot::RwLock;
use serde_json::Value;

use crate::convert;
use crate::runtime::JsRuntime;

/// Outcome of a visitor run over one tree.
#[derive(Debug, Default)]
pub struct VisitorRun {
    /// How many visitors ran.
    pub visitor_count: u32,

    /// Replacements the child reported, grouped per visitor, in run order.
    pub replacements: Vec<VisitorReplacements>,

    /// How many replacements were applied to the host tree.
    pub applied: usize,

    /// Tag of a new root a visitor returned, if any. Advisory only; the
    /// bridge records it and does nothing with it.
    pub result_type: Option<String>,
}

/// Keeps the host's view of the child's visitor list and runs visitors.
pub struct VisitorManager {
    runtime: Arc<JsRuntime>,
    shm: Arc<ShmManager>,
    visitors: RwLock<Vec<VisitorInfo>>,
}

impl VisitorManager {
    /// Create a manager bound to a runtime and segment manager.
    #[must_use]
    pub fn new(runtime: Arc<JsRuntime>, shm: Arc<ShmManager>) -> Self {
        Self {
            runtime,
            shm,
            visitors: RwLock::new(Vec::new()),
        }
    }

    /// Re-fetch the visitor list from the child.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn refresh_visitors(&self) -> Result<Vec<VisitorInfo>> {
        let reply = self
            .runtime
            .send_command_with_timeout(cmd::GET_VISITORS, None, self.runtime.request_timeout())
            .await?;
        let visitors: Vec<VisitorInfo> = serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed visitor list: {}", e)))?;
        *self.visitors.write() = visitors.clone();
        Ok(visitors)
    }

    /// The most recently fetched visitor list.
    #[must_use]
    pub fn visitors(&self) -> Vec<VisitorInfo> {
        self.visitors.read().clone()
    }

    /// Run one visitor by index over a host tree and apply its replacements.
    ///
    /// # Errors
    ///
    /// An invalid index is a per-request failure from the child; transport
    /// failures poison the runtime.
    pub async fn run_visitor(&self, root: &Node, visitor_index: u32) -> Result<VisitorRun> {
        self.run(root, move |key| {
            (
                cmd::RUN_VISITOR,
                serde_json::to_value(RunVisitorParams {
                    buffer_key: key,
                    visitor_index,
                }),
            )
        })
        .await
    }

    /// Run every pre-eval visitor over a host tree and apply replacements.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn run_pre_eval_visitors(&self, root: &Node) -> Result<VisitorRun> {
        self.run(root, |key| {
            (
                cmd::RUN_PRE_EVAL_VISITORS,
                serde_json::to_value(RunEvalVisitorsParams { buffer_key: key }),
            )
        })
        .await
    }

    /// Run every post-eval visitor over a host tree and apply replacements.
    ///
    /// # Errors
    ///
    /// Propagates transport and protocol failures.
    pub async fn run_post_eval_visitors(&self, root: &Node) -> Result<VisitorRun> {
        self.run(root, |key| {
            (
                cmd::RUN_POST_EVAL_VISITORS,
                serde_json::to_value(RunEvalVisitorsParams { buffer_key: key }),
            )
        })
        .await
    }

    /// Shared plumbing: flatten, write to a fresh segment, attach, run the
    /// prepared command, detach, destroy, apply replacements.
    async fn run<F>(&self, root: &Node, make_request: F) -> Result<VisitorRun>
    where
        F: FnOnce(String) -> (&'static str, serde_json::Result<Value>),
    {
        let flattened = flatten(root)?;
        let bytes = flattened.ast.to_bytes();

        let segment = self.shm.create(bytes.len())?;
        let key = segment.key().to_string();
        segment.write_all(&bytes)?;
        segment.sync()?;

        let attach = AttachBufferParams {
            key: key.clone(),
            path: segment.path().to_string_lossy().into_owned(),
            size: bytes.len() as u64,
        };
        let attached = self
            .runtime
            .send_command_with_timeout(
                cmd::ATTACH_BUFFER,
                Some(serde_json::to_value(&attach)?),
                self.runtime.request_timeout(),
            )
            .await;
        if let Err(e) = attached {
            self.discard(&key);
            return Err(e);
        }

        let (command, params) = make_request(key.clone());
        let reply = match params {
            Ok(params) => {
                self.runtime
                    .send_command_with_timeout(
                        command,
                        Some(params),
                        self.runtime.request_timeout(),
                    )
                    .await
            }
            Err(e) => Err(Error::from(e)),
        };

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

        let reply = reply?;
        let mut run = parse_run(command, reply)?;
        run.applied = apply_replacements(&flattened.order, &run.replacements)?;
        Ok(run)
    }

    fn discard(&self, key: &str) {
        if let Err(e) = self.shm.destroy(key) {
            if !matches!(e, Error::BufferNotFound(_)) {
                tracing::warn!("Failed to destroy visitor buffer {}: {}", key, e);
            }
        }
    }
}

impl std::fmt::Debug for VisitorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitorManager")
            .field("visitors", &self.visitors.read().len())
            .finish()
    }
}

fn parse_run(command: &str, reply: Value) -> Result<VisitorRun> {
    if command == cmd::RUN_VISITOR {
        let result: RunVisitorResult = serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed runVisitor reply: {}", e)))?;
        Ok(VisitorRun {
            visitor_count: 1,
            replacements: result.replacements,
            applied: 0,
            result_type: result.result_type,
        })
    } else {
        let result: RunEvalVisitorsResult = serde_json::from_value(reply)
            .map_err(|e| Error::protocol(format!("Malformed visitor reply: {}", e)))?;
        Ok(VisitorRun {
            visitor_count: result.visitor_count,
            replacements: result.replacements,
            applied: 0,
            result_type: None,
        })
    }
}

/// Apply replacement groups to the live tree the flattening came from.
///
/// `parent_index` indexes the flat node table the visitor saw; the host
/// locates that node in flatten order and substitutes the `child_index`-th
/// entry of its ordered child list. Replacement payloads may be full node
/// records or serialized leaves; [`convert::node_from_value`] absorbs both.
fn apply_replacements(order: &[Node], groups: &[VisitorReplacements]) -> Result<usize> {
    let mut applied = 0;
    for group in groups {
        for replacement in &group.replacements {
            let parent = order.get(replacement.parent_index as usize).ok_or_else(|| {
                Error::protocol(format!(
                    "Replacement parent index {} outside flattened tree of {} nodes",
                    replacement.parent_index,
                    order.len()
                ))
            })?;
            let node = convert::node_from_value(&replacement.replacement)?;
            parent.replace_child(replacement.child_index as usize, node)?;
            applied += 1;
        }
    }
    Ok(applied)
}
