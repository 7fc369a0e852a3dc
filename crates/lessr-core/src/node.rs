//! The host-side AST node and the closed node-type taxonomy.
//!
//! The evaluator hands the bridge trees of [`Node`] values. A node carries a
//! type tag from the closed [`NodeType`] enumeration, a raw flags word, a
//! JSON property map for its scalar attributes, and children grouped into
//! named slots. The slot order is fixed ([`ChildSlot::ORDER`]) so that
//! flattening always emits children in the same sibling sequence.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Node flag bits stored in the 16-bit flags word.
///
/// Unknown bits are preserved verbatim across flatten/unflatten round trips.
pub mod flags {
    /// The node is wrapped in parentheses.
    pub const PARENS: u16 = 1;

    /// The node is parenthesised inside an operation.
    pub const PARENS_IN_OP: u16 = 2;

    /// The node carries a source index (`_index` property).
    pub const HAS_INDEX: u16 = 4;
}

/// The closed enumeration of node type tags.
///
/// Tag ids are wire-stable: `typeID` in the binary format is exactly
/// [`NodeType::id`]. Unrecognised ids and tag names map to [`NodeType::Unknown`]
/// (id 0); they are never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Sentinel for tags this host does not know.
    Unknown,
    /// Verbatim output chunk.
    Anonymous,
    /// Named argument assignment (`name=value`).
    Assignment,
    /// Generic at-rule (`@media`-style block or simple directive).
    AtRule,
    /// Attribute selector part (`[attr=value]`).
    Attribute,
    /// Function call.
    Call,
    /// Color literal.
    Color,
    /// Selector combinator (` `, `>`, `+`, `~`).
    Combinator,
    /// CSS or silent comment.
    Comment,
    /// Guard condition.
    Condition,
    /// `@container` rule.
    Container,
    /// Property declaration (`prop: value`).
    Declaration,
    /// Detached ruleset value.
    DetachedRuleset,
    /// Number with an optional unit.
    Dimension,
    /// Legacy alias for [`NodeType::AtRule`].
    Directive,
    /// Selector element.
    Element,
    /// Space-separated expression.
    Expression,
    /// `&:extend` clause.
    Extend,
    /// `@import` statement.
    Import,
    /// Inline JavaScript escape.
    JavaScript,
    /// Bare keyword.
    Keyword,
    /// `@media` rule.
    Media,
    /// Mixin invocation.
    MixinCall,
    /// Mixin definition.
    MixinDefinition,
    /// Namespaced value lookup (`#ns > .mixin[]`).
    NamespaceValue,
    /// Negated value.
    Negative,
    /// Arithmetic operation.
    Operation,
    /// Parenthesised sub-expression.
    Paren,
    /// Property accessor (`$prop`).
    Property,
    /// Media query component inside parentheses.
    QueryInParens,
    /// Quoted string.
    Quoted,
    /// Legacy alias for [`NodeType::Declaration`].
    Rule,
    /// Block of rules with selectors.
    Ruleset,
    /// Full selector.
    Selector,
    /// Unicode-range descriptor.
    UnicodeDescriptor,
    /// Dimension unit.
    Unit,
    /// `url()` value.
    Url,
    /// Comma-separated value list.
    Value,
    /// Variable reference (`@var`).
    Variable,
    /// Variable call (`@var()`).
    VariableCall,
}

impl NodeType {
    /// Every known type tag, in id order. Index equals id.
    pub const ALL: [Self; 40] = [
        Self::Unknown,
        Self::Anonymous,
        Self::Assignment,
        Self::AtRule,
        Self::Attribute,
        Self::Call,
        Self::Color,
        Self::Combinator,
        Self::Comment,
        Self::Condition,
        Self::Container,
        Self::Declaration,
        Self::DetachedRuleset,
        Self::Dimension,
        Self::Directive,
        Self::Element,
        Self::Expression,
        Self::Extend,
        Self::Import,
        Self::JavaScript,
        Self::Keyword,
        Self::Media,
        Self::MixinCall,
        Self::MixinDefinition,
        Self::NamespaceValue,
        Self::Negative,
        Self::Operation,
        Self::Paren,
        Self::Property,
        Self::QueryInParens,
        Self::Quoted,
        Self::Rule,
        Self::Ruleset,
        Self::Selector,
        Self::UnicodeDescriptor,
        Self::Unit,
        Self::Url,
        Self::Value,
        Self::Variable,
        Self::VariableCall,
    ];

    /// Get the wire-stable type id.
    #[must_use]
    pub fn id(self) -> u16 {
        Self::ALL
            .iter()
            .position(|t| *t == self)
            .map(|p| p as u16)
            .unwrap_or(0)
    }

    /// Look up a type by wire id. Unknown ids map to [`NodeType::Unknown`].
    #[must_use]
    pub fn from_id(id: u16) -> Self {
        Self::ALL.get(id as usize).copied().unwrap_or(Self::Unknown)
    }

    /// Get the canonical tag name.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Anonymous => "Anonymous",
            Self::Assignment => "Assignment",
            Self::AtRule => "AtRule",
            Self::Attribute => "Attribute",
            Self::Call => "Call",
            Self::Color => "Color",
            Self::Combinator => "Combinator",
            Self::Comment => "Comment",
            Self::Condition => "Condition",
            Self::Container => "Container",
            Self::Declaration => "Declaration",
            Self::DetachedRuleset => "DetachedRuleset",
            Self::Dimension => "Dimension",
            Self::Directive => "Directive",
            Self::Element => "Element",
            Self::Expression => "Expression",
            Self::Extend => "Extend",
            Self::Import => "Import",
            Self::JavaScript => "JavaScript",
            Self::Keyword => "Keyword",
            Self::Media => "Media",
            Self::MixinCall => "MixinCall",
            Self::MixinDefinition => "MixinDefinition",
            Self::NamespaceValue => "NamespaceValue",
            Self::Negative => "Negative",
            Self::Operation => "Operation",
            Self::Paren => "Paren",
            Self::Property => "Property",
            Self::QueryInParens => "QueryInParens",
            Self::Quoted => "Quoted",
            Self::Rule => "Rule",
            Self::Ruleset => "Ruleset",
            Self::Selector => "Selector",
            Self::UnicodeDescriptor => "UnicodeDescriptor",
            Self::Unit => "Unit",
            Self::Url => "Url",
            Self::Value => "Value",
            Self::Variable => "Variable",
            Self::VariableCall => "VariableCall",
        }
    }

    /// Look up a type by tag name. Unknown names map to [`NodeType::Unknown`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.tag() == tag)
            .unwrap_or(Self::Unknown)
    }
}

/// Named child slots a node may expose.
///
/// A node's logical child list is the concatenation of its slots in
/// [`ChildSlot::ORDER`]; the flattener and every ordered-child operation use
/// that order, never slot insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSlot {
    /// Block contents (`rules`).
    Rules,
    /// Selector list (`selectors`).
    Selectors,
    /// Selector elements (`elements`).
    Elements,
    /// Call/mixin arguments (`args`).
    Args,
    /// Mixin parameters (`params`).
    Params,
    /// Wrapped value(s) (`value`).
    Value,
    /// Generic children (`children`).
    Children,
}

impl ChildSlot {
    /// The fixed slot traversal order.
    pub const ORDER: [Self; 7] = [
        Self::Rules,
        Self::Selectors,
        Self::Elements,
        Self::Args,
        Self::Params,
        Self::Value,
        Self::Children,
    ];

    /// Slot name as the evaluator spells it.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rules => "rules",
            Self::Selectors => "selectors",
            Self::Elements => "elements",
            Self::Args => "args",
            Self::Params => "params",
            Self::Value => "value",
            Self::Children => "children",
        }
    }
}

struct NodeData {
    node_type: NodeType,
    flags: u16,
    properties: Map<String, Value>,
    slots: Vec<(ChildSlot, Vec<Node>)>,
    parent: Weak<RwLock<NodeData>>,
}

/// A shared, mutable host AST node.
///
/// Cloning a `Node` clones the handle, not the subtree. Parent links are
/// weak; dropping a root drops its tree.
#[derive(Clone)]
pub struct Node {
    inner: Arc<RwLock<NodeData>>,
}

impl Node {
    /// Create a new node of the given type with no children or properties.
    #[must_use]
    pub fn new(node_type: NodeType) -> Self {
        Self {
            inner: Arc::new(RwLock::new(NodeData {
                node_type,
                flags: 0,
                properties: Map::new(),
                slots: Vec::new(),
                parent: Weak::new(),
            })),
        }
    }

    /// Set a scalar property, builder-style.
    #[must_use]
    pub fn with_property(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_property(key, value);
        self
    }

    /// Append a child into the `children` slot, builder-style.
    #[must_use]
    pub fn with_child(self, child: Node) -> Self {
        self.add_child(ChildSlot::Children, child);
        self
    }

    /// Get the node's type tag.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.inner.read().node_type
    }

    /// Replace the node's type tag.
    pub fn set_node_type(&self, node_type: NodeType) {
        self.inner.write().node_type = node_type;
    }

    /// Get the raw flags word.
    #[must_use]
    pub fn node_flags(&self) -> u16 {
        self.inner.read().flags
    }

    /// Replace the raw flags word, preserving bits this host does not define.
    pub fn set_node_flags(&self, flags: u16) {
        self.inner.write().flags = flags;
    }

    /// Whether the node is parenthesised.
    #[must_use]
    pub fn parens(&self) -> bool {
        self.node_flags() & flags::PARENS != 0
    }

    /// Set or clear the parens flag.
    pub fn set_parens(&self, on: bool) {
        self.set_flag(flags::PARENS, on);
    }

    /// Whether the node is parenthesised inside an operation.
    #[must_use]
    pub fn parens_in_op(&self) -> bool {
        self.node_flags() & flags::PARENS_IN_OP != 0
    }

    /// Set or clear the parens-in-op flag.
    pub fn set_parens_in_op(&self, on: bool) {
        self.set_flag(flags::PARENS_IN_OP, on);
    }

    /// Whether the node carries a source index.
    #[must_use]
    pub fn has_index(&self) -> bool {
        self.node_flags() & flags::HAS_INDEX != 0
    }

    /// Record the node's source index and raise the index flag.
    pub fn set_index(&self, index: u64) {
        let mut data = self.inner.write();
        data.properties.insert("_index".to_string(), Value::from(index));
        data.flags |= flags::HAS_INDEX;
    }

    /// Get the node's source index, if recorded.
    #[must_use]
    pub fn index(&self) -> Option<u64> {
        self.inner.read().properties.get("_index").and_then(Value::as_u64)
    }

    fn set_flag(&self, bit: u16, on: bool) {
        let mut data = self.inner.write();
        if on {
            data.flags |= bit;
        } else {
            data.flags &= !bit;
        }
    }

    /// Get a scalar property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.inner.read().properties.get(key).cloned()
    }

    /// Set a scalar property.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().properties.insert(key.into(), value.into());
    }

    /// Snapshot of the whole property map.
    #[must_use]
    pub fn properties(&self) -> Map<String, Value> {
        self.inner.read().properties.clone()
    }

    /// Replace the whole property map.
    pub fn set_properties(&self, properties: Map<String, Value>) {
        self.inner.write().properties = properties;
    }

    /// Append a child into the given slot and set its parent link.
    pub fn add_child(&self, slot: ChildSlot, child: Node) {
        child.inner.write().parent = Arc::downgrade(&self.inner);
        let mut data = self.inner.write();
        if let Some((_, nodes)) = data.slots.iter_mut().find(|(s, _)| *s == slot) {
            nodes.push(child);
        } else {
            data.slots.push((slot, vec![child]));
        }
    }

    /// The node's ordered child list: slots concatenated in [`ChildSlot::ORDER`].
    #[must_use]
    pub fn children(&self) -> Vec<Node> {
        let data = self.inner.read();
        let mut out = Vec::new();
        for slot in ChildSlot::ORDER {
            if let Some((_, nodes)) = data.slots.iter().find(|(s, _)| *s == slot) {
                out.extend(nodes.iter().cloned());
            }
        }
        out
    }

    /// Number of children across all slots.
    #[must_use]
    pub fn child_count(&self) -> usize {
        self.inner.read().slots.iter().map(|(_, nodes)| nodes.len()).sum()
    }

    /// Substitute the child at the given ordinal (in slot order) with a
    /// replacement node, returning the node that was displaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the ordinal is past the end of the child list.
    pub fn replace_child(&self, ordinal: usize, replacement: Node) -> crate::Result<Node> {
        replacement.inner.write().parent = Arc::downgrade(&self.inner);
        let mut data = self.inner.write();
        let mut remaining = ordinal;
        for slot in ChildSlot::ORDER {
            if let Some((_, nodes)) = data.slots.iter_mut().find(|(s, _)| *s == slot) {
                if remaining < nodes.len() {
                    let old = std::mem::replace(&mut nodes[remaining], replacement);
                    old.inner.write().parent = Weak::new();
                    return Ok(old);
                }
                remaining -= nodes.len();
            }
        }
        Err(crate::Error::resource(format!(
            "Child ordinal {} out of range (node has {} children)",
            ordinal,
            data.slots.iter().map(|(_, n)| n.len()).sum::<usize>()
        )))
    }

    /// The node's parent, if it has one and the parent is still alive.
    #[must_use]
    pub fn parent(&self) -> Option<Node> {
        self.inner.read().parent.upgrade().map(|inner| Node { inner })
    }

    /// Whether two handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Structural equality: type tag, flags word, properties, and children
    /// (in slot order), recursively. Parent links are not compared.
    #[must_use]
    pub fn structural_eq(&self, other: &Node) -> bool {
        if self.node_type() != other.node_type()
            || self.node_flags() != other.node_flags()
            || self.properties() != other.properties()
        {
            return false;
        }
        let ours = self.children();
        let theirs = other.children();
        ours.len() == theirs.len()
            && ours.iter().zip(theirs.iter()).all(|(a, b)| a.structural_eq(b))
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.inner.read();
        f.debug_struct("Node")
            .field("type", &data.node_type)
            .field("flags", &data.flags)
            .field("properties", &data.properties)
            .field("children", &self.children().len())
            .finish()
    }
}
