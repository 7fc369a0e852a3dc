//! Flattening a host tree into a [`FlatAst`].

use lessr_core::{Node, Result};

use crate::flat::{FlatAst, FlatNode};

/// Output of [`flatten`]: the flat form plus the host nodes in flat-index
/// order, so callers can map wire indices (visitor replacements) back onto
/// the live tree.
pub struct FlattenedTree {
    /// The flat, serializable form.
    pub ast: FlatAst,

    /// `order[i]` is the host node emitted at flat index `i`.
    pub order: Vec<Node>,
}

/// Flatten a host tree, depth-first, into a fresh [`FlatAst`].
///
/// The root lands at index 0. Children are emitted per node in the fixed
/// child-slot order ([`lessr_core::ChildSlot::ORDER`]) and chained through
/// `next_index`; `child_index` points at the first child. Every string-valued
/// property is interned into the string table as it is serialized, so equal
/// strings across the tree share one table entry.
///
/// # Errors
///
/// Returns an error if a node's property map cannot be serialized.
pub fn flatten(root: &Node) -> Result<FlattenedTree> {
    let mut ast = FlatAst::new();
    let mut order = Vec::new();
    emit(root, 0, &mut ast, &mut order)?;
    ast.set_root_index(0);
    Ok(FlattenedTree { ast, order })
}

fn emit(node: &Node, parent_index: u32, ast: &mut FlatAst, order: &mut Vec<Node>) -> Result<u32> {
    let properties = node.properties();
    for value in properties.values() {
        if let Some(s) = value.as_str() {
            ast.add_string(s);
        }
    }
    let (props_offset, props_length) = ast.add_properties(&properties)?;

    let index = ast.add_node(FlatNode {
        type_id: node.node_type().id(),
        flags: node.node_flags(),
        child_index: 0,
        next_index: 0,
        parent_index,
        props_offset,
        props_length,
    });
    order.push(node.clone());

    let mut previous: Option<u32> = None;
    for child in node.children() {
        let child_flat = emit(&child, index, ast, order)?;
        match previous {
            Some(prev) => {
                if let Some(rec) = ast.node_mut(prev) {
                    rec.next_index = child_flat;
                }
            }
            None => {
                if let Some(rec) = ast.node_mut(index) {
                    rec.child_index = child_flat;
                }
            }
        }
        previous = Some(child_flat);
    }

    Ok(index)
}
