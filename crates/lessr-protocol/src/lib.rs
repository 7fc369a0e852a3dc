//! # lessr Protocol
//!
//! The wire vocabulary between the compiled host and the JavaScript plugin
//! host: newline-delimited JSON request/response envelopes, the closed
//! command catalog, typed payloads per command, and IPC-mode selection.
//!
//! This is the only crate both sides of the bridge agree on; everything else
//! is an implementation detail of one side.

pub mod ipc;
pub mod message;
pub mod payload;

pub use ipc::{IPC_MODE_ENV, IpcMode};
pub use message::{CommandRequest, CommandResponse, cmd};
pub use payload::{
    AttachBufferParams, AttachBufferResult, BufferInfo, CallFunctionParams, DetachBufferParams,
    DetachBufferResult, LoadPluginParams, LoadPluginResult, ParseAstBufferParams,
    ParseAstBufferResult, ReadBufferParams, ReadBufferResult, Replacement, RunEvalVisitorsParams,
    RunEvalVisitorsResult, RunVisitorParams, RunVisitorResult, SerializeNodeParams,
    SerializeNodeResult, VisitorInfo, VisitorReplacements,
};
