//! The line-protocol envelopes.
//!
//! One JSON object per newline-terminated line, in both directions. Requests
//! carry a process-unique monotonically increasing `id`; the child answers
//! every request with exactly one response carrying the same `id`, not
//! necessarily in arrival order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of command names the scripting child understands.
pub mod cmd {
    /// Liveness check; replies `"pong"`.
    pub const PING: &str = "ping";
    /// Round-trip marshalling check; replies with the request data.
    pub const ECHO: &str = "echo";
    /// Orderly exit; the reply is sent before the child terminates.
    pub const SHUTDOWN: &str = "shutdown";
    /// Resolve, require, and register a plugin.
    pub const LOAD_PLUGIN: &str = "loadPlugin";
    /// Invoke a registered plugin function.
    pub const CALL_FUNCTION: &str = "callFunction";
    /// List registered function names.
    pub const GET_REGISTERED_FUNCTIONS: &str = "getRegisteredFunctions";
    /// List registered visitors with their flags.
    pub const GET_VISITORS: &str = "getVisitors";
    /// Open a shared buffer by key and backing path.
    pub const ATTACH_BUFFER: &str = "attachBuffer";
    /// Drop an attached buffer.
    pub const DETACH_BUFFER: &str = "detachBuffer";
    /// Read a byte range out of an attached buffer.
    pub const READ_BUFFER: &str = "readBuffer";
    /// Describe an attached buffer.
    pub const GET_BUFFER_INFO: &str = "getBufferInfo";
    /// Run one visitor over an attached AST buffer.
    pub const RUN_VISITOR: &str = "runVisitor";
    /// Run every pre-eval visitor over an attached AST buffer.
    pub const RUN_PRE_EVAL_VISITORS: &str = "runPreEvalVisitors";
    /// Run every post-eval visitor over an attached AST buffer.
    pub const RUN_POST_EVAL_VISITORS: &str = "runPostEvalVisitors";
    /// Parse an attached buffer as a FlatAST and report its dimensions.
    pub const PARSE_AST_BUFFER: &str = "parseASTBuffer";
    /// Serialize a node record into FlatAST bytes (JSON fallback).
    pub const SERIALIZE_NODE: &str = "serializeNode";
}

/// A request line: `{"id":N,"cmd":"...","data":{...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Request id; monotonically increasing, never reused per runtime.
    pub id: u64,

    /// Command name from [`cmd`].
    pub cmd: String,

    /// Command payload, if the command takes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandRequest {
    /// Build a request.
    #[must_use]
    pub fn new(id: u64, cmd: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            id,
            cmd: cmd.into(),
            data,
        }
    }
}

/// A response line: `{"id":N,"success":bool,"result":...,"error":"..."}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Id of the request this answers.
    pub id: u64,

    /// Whether the command succeeded.
    pub success: bool,

    /// Command result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure message on error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
