//! # lessr Core
//!
//! Core types shared across the lessr plugin bridge: the error type, the
//! closed node-type taxonomy, and the host AST node handed to the bridge by
//! the evaluator.

pub mod error;
pub mod node;

pub use error::{Error, Result};
pub use node::{ChildSlot, Node, NodeType, flags};
