//! Materializing a host tree back out of a [`FlatAst`].

use lessr_core::{ChildSlot, Error, Node, NodeType, Result};

use crate::flat::FlatAst;

/// Rebuild a host tree from the flat form, rooted at `root_index`.
///
/// Each node gets its tag from `type_id`, its property map from the property
/// blob slice, and its children by walking `child_index` then `next_index`
/// until the 0 sentinel. Parent back-links are restored as nodes attach.
/// All children land in the generic `children` slot; the named grouping of
/// the original tree is not recorded on the wire.
///
/// # Errors
///
/// Returns [`Error::Corrupt`] for out-of-range indices or a sibling chain
/// that revisits a node, and [`Error::BadProps`] for a property slice that
/// is not a JSON object.
pub fn unflatten(ast: &FlatAst, root_index: u32) -> Result<Node> {
    let count = ast.node_count();
    if root_index >= count {
        return Err(Error::corrupt(format!(
            "Root index {} outside node table of {} nodes",
            root_index, count
        )));
    }
    let mut visited = vec![false; count as usize];
    build(ast, root_index, &mut visited)
}

fn build(ast: &FlatAst, index: u32, visited: &mut [bool]) -> Result<Node> {
    let slot = visited
        .get_mut(index as usize)
        .ok_or_else(|| Error::corrupt(format!("Node index {} out of range", index)))?;
    if *slot {
        return Err(Error::corrupt(format!(
            "Node {} appears twice in the tree",
            index
        )));
    }
    *slot = true;

    let record = ast
        .node(index)
        .ok_or_else(|| Error::corrupt(format!("Node index {} out of range", index)))?;

    let node = Node::new(NodeType::from_id(record.type_id));
    node.set_node_flags(record.flags);
    node.set_properties(ast.get_properties(record.props_offset, record.props_length)?);

    let mut child_index = record.child_index;
    while child_index != 0 {
        let child_record = ast
            .node(child_index)
            .ok_or_else(|| Error::corrupt(format!("Child index {} out of range", child_index)))?;
        let child = build(ast, child_index, visited)?;
        node.add_child(ChildSlot::Children, child);
        child_index = child_record.next_index;
    }

    Ok(node)
}
