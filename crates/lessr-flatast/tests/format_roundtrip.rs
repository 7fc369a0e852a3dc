//! End-to-end codec scenarios: flatten -> serialize -> parse -> unflatten.

use lessr_core::{ChildSlot, Error, Node, NodeType};
use lessr_flatast::{FlatAst, HEADER_SIZE, NODE_RECORD_SIZE, flatten, unflatten};

fn two_child_value() -> Node {
    let root = Node::new(NodeType::Value);
    root.set_parens(true);
    root.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Keyword).with_property("value", "inherit"),
    );
    root.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Dimension)
            .with_property("value", 100)
            .with_property("unit", ""),
    );
    root
}

#[test]
fn round_trips_a_two_child_tree() {
    let original = two_child_value();
    let tree = flatten(&original).expect("flatten");
    let bytes = tree.ast.to_bytes();

    // Header, then three fixed-width node records, then the variable tables.
    assert!(bytes.len() > HEADER_SIZE + 3 * NODE_RECORD_SIZE);
    assert_eq!(&bytes[..4], &0x4C45_5353u32.to_le_bytes());

    let parsed = FlatAst::from_bytes(bytes).expect("parse");
    assert_eq!(parsed.node_count(), 3);
    let rebuilt = unflatten(&parsed, parsed.root_index()).expect("unflatten");

    assert_eq!(rebuilt.node_type(), NodeType::Value);
    assert!(rebuilt.parens());
    let children = rebuilt.children();
    assert_eq!(children.len(), 2);
    assert_eq!(children[0].node_type(), NodeType::Keyword);
    assert_eq!(children[1].node_type(), NodeType::Dimension);
    assert!(original.structural_eq(&rebuilt));
}

#[test]
fn detects_corrupted_magic() {
    let tree = flatten(&two_child_value()).expect("flatten");
    let mut bytes = tree.ast.to_bytes();
    bytes[0] ^= 0x01;
    let err = FlatAst::from_bytes(bytes).expect_err("must reject");
    assert!(matches!(err, Error::BadMagic { .. }));
}

#[test]
fn serialization_is_deterministic_across_runs() {
    let first = flatten(&two_child_value()).expect("flatten").ast.to_bytes();
    let second = flatten(&two_child_value()).expect("flatten").ast.to_bytes();
    assert_eq!(first, second);
}

#[test]
fn parse_serialize_is_identity_on_bytes() {
    let bytes = flatten(&two_child_value()).expect("flatten").ast.to_bytes();
    let parsed = FlatAst::from_bytes(bytes.clone()).expect("parse");
    assert_eq!(parsed.to_bytes(), bytes);
}

#[test]
fn all_indices_stay_in_range() {
    // A wider tree: ruleset with selectors, nested declarations, mixed slots.
    let root = Node::new(NodeType::Ruleset);
    let selector = Node::new(NodeType::Selector);
    selector.add_child(
        ChildSlot::Elements,
        Node::new(NodeType::Element).with_property("value", ".mixin"),
    );
    root.add_child(ChildSlot::Selectors, selector);
    for i in 0..5 {
        let decl = Node::new(NodeType::Declaration).with_property("name", format!("prop-{}", i));
        decl.add_child(
            ChildSlot::Value,
            Node::new(NodeType::Dimension)
                .with_property("value", i)
                .with_property("unit", "px"),
        );
        root.add_child(ChildSlot::Rules, decl);
    }

    let tree = flatten(&root).expect("flatten");
    let parsed = FlatAst::from_bytes(tree.ast.to_bytes()).expect("parse");
    let count = parsed.node_count();
    for i in 0..count {
        let node = parsed.node(i).expect("node");
        for index in [node.child_index, node.next_index, node.parent_index] {
            assert!(index == 0 || index < count, "index {} out of [0, {})", index, count);
        }
    }
    assert!(root.structural_eq(&unflatten(&parsed, 0).expect("unflatten")));
}

#[test]
fn empty_property_maps_round_trip() {
    let root = Node::new(NodeType::Expression);
    root.add_child(ChildSlot::Children, Node::new(NodeType::Paren));
    let tree = flatten(&root).expect("flatten");
    let parsed = FlatAst::from_bytes(tree.ast.to_bytes()).expect("parse");
    let rebuilt = unflatten(&parsed, 0).expect("unflatten");
    assert!(rebuilt.properties().is_empty());
    assert!(rebuilt.children()[0].properties().is_empty());
}
