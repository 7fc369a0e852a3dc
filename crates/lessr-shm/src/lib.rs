//! # lessr Shared Memory
//!
//! File-backed, memory-mapped byte regions for handing large AST buffers to
//! the scripting child without pushing them through the command pipe. The
//! host writes a serialized FlatAST into a segment, `sync`s it, and sends the
//! segment's key and path in an `attachBuffer` command; the child reads the
//! backing file. Segments are destroyed by the host, never the child.

mod manager;
mod segment;

pub use manager::ShmManager;
pub use segment::ShmSegment;
