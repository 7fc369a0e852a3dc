//! # lessr FlatAST
//!
//! The binary AST codec of the plugin bridge. A host tree is flattened into
//! an indexed, byte-exact form that both the compiled host and the scripting
//! child can read without allocating per-node structures, then serialized as
//! header + node table + string table + type table + property blob (all
//! little-endian).
//!
//! The pipeline, end to end:
//!
//! ```rust,ignore
//! let flat = flatten(&tree)?;            // host tree -> FlatAst
//! let bytes = flat.ast.to_bytes();       // FlatAst -> wire bytes
//! let parsed = FlatAst::from_bytes(bytes)?;
//! let rebuilt = unflatten(&parsed, parsed.root_index())?;
//! ```
//!
//! For a given input tree the produced bytes are identical across runs.

mod flat;
mod flatten;
mod unflatten;

pub use flat::{FORMAT_VERSION, FlatAst, FlatNode, HEADER_SIZE, MAGIC, NODE_RECORD_SIZE};
pub use flatten::{FlattenedTree, flatten};
pub use unflatten::unflatten;
