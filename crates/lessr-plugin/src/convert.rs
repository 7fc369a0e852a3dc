//! The single host ↔ wire node conversion point.
//!
//! Both IPC modes funnel through these two functions, so a function call
//! yields the same typed node whether its arguments travelled inline or
//! through a shared buffer; the modes differ only in how bytes reach the
//! other side.

use lessr_core::{ChildSlot, Error, Node, NodeType, Result};
use serde_json::{Map, Value};

/// Wire shape of a host node: `_type`, the scalar properties flattened onto
/// the object, `parens`/`parensInOp` when set, and a `children` array when
/// non-empty.
#[must_use]
pub fn node_to_value(node: &Node) -> Value {
    let mut object = Map::new();
    object.insert("_type".to_string(), Value::from(node.node_type().tag()));
    for (key, value) in node.properties() {
        object.insert(key, value);
    }
    if node.parens() {
        object.insert("parens".to_string(), Value::Bool(true));
    }
    if node.parens_in_op() {
        object.insert("parensInOp".to_string(), Value::Bool(true));
    }
    let children = node.children();
    if !children.is_empty() {
        object.insert(
            "children".to_string(),
            Value::Array(children.iter().map(node_to_value).collect()),
        );
    }
    Value::Object(object)
}

/// Rebuild a host node from a wire value.
///
/// Known types normalize their attributes (Dimension gets a numeric `value`
/// and a string `unit`; Color gets `rgb[3]` and `alpha`; Quoted gets
/// `value`/`quote`/`escaped`); unknown types copy every enumerable field.
/// Bare scalars promote: number → Dimension, string → Anonymous, boolean →
/// Keyword, array → Expression over its elements.
///
/// # Errors
///
/// Returns an error when the value is null or not expressible as a node.
pub fn node_from_value(value: &Value) -> Result<Node> {
    match value {
        Value::Number(n) => {
            let node = Node::new(NodeType::Dimension);
            node.set_property("value", n.clone());
            node.set_property("unit", "");
            Ok(node)
        }
        Value::String(s) => {
            let node = Node::new(NodeType::Anonymous);
            node.set_property("value", s.as_str());
            Ok(node)
        }
        Value::Bool(b) => {
            let node = Node::new(NodeType::Keyword);
            node.set_property("value", if *b { "true" } else { "false" });
            Ok(node)
        }
        Value::Array(items) => {
            let node = Node::new(NodeType::Expression);
            for item in items {
                node.add_child(ChildSlot::Children, node_from_value(item)?);
            }
            Ok(node)
        }
        Value::Object(object) => node_from_object(object),
        Value::Null => Err(Error::protocol("Cannot build a node from null")),
    }
}

fn node_from_object(object: &Map<String, Value>) -> Result<Node> {
    let tag = object
        .get("_type")
        .or_else(|| object.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("Anonymous");
    let node_type = NodeType::from_tag(tag);
    let node = Node::new(node_type);

    match node_type {
        NodeType::Dimension => {
            let value = object.get("value").and_then(Value::as_f64).unwrap_or(0.0);
            node.set_property("value", value);
            node.set_property("unit", unit_string(object.get("unit")));
        }
        NodeType::Color => {
            let rgb: Vec<Value> = object
                .get("rgb")
                .and_then(Value::as_array)
                .map(|a| a.iter().take(3).cloned().collect())
                .unwrap_or_else(|| vec![Value::from(0), Value::from(0), Value::from(0)]);
            node.set_property("rgb", Value::Array(rgb));
            node.set_property(
                "alpha",
                object.get("alpha").and_then(Value::as_f64).unwrap_or(1.0),
            );
        }
        NodeType::Quoted => {
            node.set_property(
                "value",
                object.get("value").and_then(Value::as_str).unwrap_or(""),
            );
            node.set_property(
                "quote",
                object.get("quote").and_then(Value::as_str).unwrap_or("\""),
            );
            node.set_property(
                "escaped",
                object.get("escaped").and_then(Value::as_bool).unwrap_or(false),
            );
        }
        NodeType::Keyword | NodeType::Anonymous => {
            let value = match object.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            node.set_property("value", value);
        }
        _ => {
            // Unknown or structural type: copy every enumerable field.
            for (key, value) in object {
                if !matches!(key.as_str(), "_type" | "type" | "children" | "parens" | "parensInOp")
                {
                    node.set_property(key.clone(), value.clone());
                }
            }
        }
    }

    if object.get("parens").and_then(Value::as_bool) == Some(true) {
        node.set_parens(true);
    }
    if object.get("parensInOp").and_then(Value::as_bool) == Some(true) {
        node.set_parens_in_op(true);
    }

    if let Some(children) = object.get("children").and_then(Value::as_array) {
        for child in children {
            node.add_child(ChildSlot::Children, node_from_value(child)?);
        }
    }

    Ok(node)
}

/// A unit on the wire is either a plain string or a Unit record with a
/// `numerator` list; anything else reads as unitless.
fn unit_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(object)) => object
            .get("numerator")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("*")
            })
            .unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_normalizes_value_and_unit() {
        let node = node_from_value(&serde_json::json!({
            "_type": "Dimension",
            "value": 3.14159,
            "unit": { "numerator": ["px"] }
        }))
        .expect("node");
        assert_eq!(node.node_type(), NodeType::Dimension);
        assert_eq!(node.property("value").and_then(|v| v.as_f64()), Some(3.14159));
        assert_eq!(node.property("unit"), Some("px".into()));

        let unitless = node_from_value(&serde_json::json!({
            "_type": "Dimension", "value": 7
        }))
        .expect("node");
        assert_eq!(unitless.property("unit"), Some("".into()));
    }

    #[test]
    fn color_and_quoted_normalize() {
        let color = node_from_value(&serde_json::json!({
            "_type": "Color", "rgb": [255, 128, 0], "alpha": 0.5
        }))
        .expect("color");
        assert_eq!(
            color.property("rgb"),
            Some(serde_json::json!([255, 128, 0]))
        );
        assert_eq!(color.property("alpha"), Some(0.5.into()));

        let quoted = node_from_value(&serde_json::json!({
            "_type": "Quoted", "value": "hi", "quote": "'", "escaped": true
        }))
        .expect("quoted");
        assert_eq!(quoted.property("value"), Some("hi".into()));
        assert_eq!(quoted.property("quote"), Some("'".into()));
        assert_eq!(quoted.property("escaped"), Some(true.into()));
    }

    #[test]
    fn bare_scalars_promote_to_nodes() {
        assert_eq!(
            node_from_value(&serde_json::json!(2.5)).expect("n").node_type(),
            NodeType::Dimension
        );
        assert_eq!(
            node_from_value(&serde_json::json!("text")).expect("n").node_type(),
            NodeType::Anonymous
        );
        assert_eq!(
            node_from_value(&serde_json::json!(true)).expect("n").node_type(),
            NodeType::Keyword
        );
        let list = node_from_value(&serde_json::json!([1, "a"])).expect("n");
        assert_eq!(list.node_type(), NodeType::Expression);
        assert_eq!(list.child_count(), 2);
        assert!(node_from_value(&Value::Null).is_err());
    }

    #[test]
    fn unknown_types_copy_all_fields() {
        let node = node_from_value(&serde_json::json!({
            "_type": "SomethingNew",
            "alpha": 1,
            "beta": "two",
            "children": [{ "_type": "Keyword", "value": "x" }]
        }))
        .expect("node");
        assert_eq!(node.node_type(), NodeType::Unknown);
        assert_eq!(node.property("alpha"), Some(1.into()));
        assert_eq!(node.property("beta"), Some("two".into()));
        assert_eq!(node.child_count(), 1);
    }

    #[test]
    fn round_trip_preserves_shape() {
        let root = Node::new(NodeType::Value);
        root.set_parens(true);
        root.add_child(
            ChildSlot::Children,
            Node::new(NodeType::Keyword).with_property("value", "inherit"),
        );

        let wire = node_to_value(&root);
        assert_eq!(wire["_type"], "Value");
        assert_eq!(wire["parens"], true);
        assert_eq!(wire["children"][0]["_type"], "Keyword");

        let back = node_from_value(&wire).expect("node");
        assert_eq!(back.node_type(), NodeType::Value);
        assert!(back.parens());
        assert_eq!(back.children()[0].property("value"), Some("inherit".into()));
    }
}
