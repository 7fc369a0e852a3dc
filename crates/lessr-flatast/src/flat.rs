//! The indexed, byte-exact FlatAST container and its wire codec.
//!
//! A [`FlatAst`] holds a whole tree as four parallel tables: fixed-width node
//! records, a deduplicated string table, a type-name table, and a property
//! blob of per-node JSON objects. The serialized layout is little-endian:
//!
//! ```text
//! header      magic, version, nodeCount, rootIndex,
//!             nodeTableOffset, stringTableOffset, typeTableOffset, propsOffset
//! node table  nodeCount x 24-byte records
//! strings     count, then [len, utf8-bytes] per entry
//! types       count, then [len, utf8-bytes] per entry
//! props       len, then the raw blob
//! ```
//!
//! Index 0 is overloaded: the root node lives at index 0, and 0 in a record's
//! `child_index`/`next_index`/`parent_index` field means "absent". No record
//! may therefore reference the root through those fields; traversals treat 0
//! as a chain terminator.

use std::collections::HashMap;

use bytes::Bytes;
use lessr_core::{Error, NodeType, Result};
use serde_json::{Map, Value};

/// Magic number at the start of every serialized FlatAST ("LESS").
pub const MAGIC: u32 = 0x4C45_5353;

/// Current (and only) format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Serialized size of one node record in bytes.
pub const NODE_RECORD_SIZE: usize = 24;

/// One fixed-width node record in the node table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlatNode {
    /// Wire-stable type id ([`NodeType::id`]); authoritative over the type table.
    pub type_id: u16,

    /// Raw flags word; unknown bits round-trip untouched.
    pub flags: u16,

    /// Index of the first child, 0 if none.
    pub child_index: u32,

    /// Index of the next sibling, 0 if last.
    pub next_index: u32,

    /// Index of the parent, 0 for the root.
    pub parent_index: u32,

    /// Byte offset of this node's property JSON inside the property blob.
    pub props_offset: u32,

    /// Byte length of this node's property JSON.
    pub props_length: u32,
}

/// Property blob storage: owned while building, a shared slice after parsing.
enum PropBlob {
    Building(Vec<u8>),
    Parsed(Bytes),
}

impl PropBlob {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::Building(v) => v.as_slice(),
            Self::Parsed(b) => b.as_ref(),
        }
    }
}

/// A whole tree in flat, indexed form.
pub struct FlatAst {
    version: u32,
    root_index: u32,
    nodes: Vec<FlatNode>,
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    types: Vec<String>,
    props: PropBlob,
}

impl FlatAst {
    /// Create an empty FlatAST with the canonical type table pre-seeded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: FORMAT_VERSION,
            root_index: 0,
            nodes: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            types: NodeType::ALL.iter().map(|t| t.tag().to_string()).collect(),
            props: PropBlob::Building(Vec::new()),
        }
    }

    /// Format version of this instance.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Index of the root node.
    #[must_use]
    pub const fn root_index(&self) -> u32 {
        self.root_index
    }

    /// Set the root node index.
    pub fn set_root_index(&mut self, index: u32) {
        self.root_index = index;
    }

    /// Number of nodes in the table.
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Get a node record by index.
    #[must_use]
    pub fn node(&self, index: u32) -> Option<&FlatNode> {
        self.nodes.get(index as usize)
    }

    /// Get a mutable node record by index (sibling/child chain patching).
    pub fn node_mut(&mut self, index: u32) -> Option<&mut FlatNode> {
        self.nodes.get_mut(index as usize)
    }

    /// Append a node record, returning its index.
    pub fn add_node(&mut self, node: FlatNode) -> u32 {
        let index = self.nodes.len() as u32;
        self.nodes.push(node);
        index
    }

    /// Intern a string, returning its table index.
    ///
    /// Deduplicated: equal strings always yield the same index, and the
    /// first-added string gets index 0.
    pub fn add_string(&mut self, s: &str) -> u32 {
        if let Some(&index) = self.string_index.get(s) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), index);
        index
    }

    /// Read back an interned string.
    #[must_use]
    pub fn get_string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Number of interned strings.
    #[must_use]
    pub fn string_count(&self) -> u32 {
        self.strings.len() as u32
    }

    /// Number of entries in the type table.
    #[must_use]
    pub fn type_count(&self) -> u32 {
        self.types.len() as u32
    }

    /// Tag name for a type id, from the auxiliary type table.
    #[must_use]
    pub fn type_tag(&self, type_id: u16) -> Option<&str> {
        self.types.get(type_id as usize).map(String::as_str)
    }

    /// Serialize a property map into the blob, returning `(offset, length)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the map cannot be serialized to JSON.
    pub fn add_properties(&mut self, properties: &Map<String, Value>) -> Result<(u32, u32)> {
        let encoded = serde_json::to_vec(&Value::Object(properties.clone()))?;
        // Re-open a parsed blob for appending; pays the copy once.
        if let PropBlob::Parsed(bytes) = &self.props {
            let owned = bytes.to_vec();
            self.props = PropBlob::Building(owned);
        }
        let PropBlob::Building(blob) = &mut self.props else {
            return Err(Error::corrupt("Property blob unavailable"));
        };
        let offset = blob.len() as u32;
        blob.extend_from_slice(&encoded);
        Ok((offset, encoded.len() as u32))
    }

    /// Parse one node's property slice back into a map.
    ///
    /// A zero-length slice reads as an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] when the slice is outside the blob and
    /// [`Error::BadProps`] when the slice is not a JSON object.
    pub fn get_properties(&self, offset: u32, length: u32) -> Result<Map<String, Value>> {
        if length == 0 {
            return Ok(Map::new());
        }
        let slice = self.prop_slice(offset, length)?;
        match serde_json::from_slice::<Value>(slice) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(Error::bad_props(format!(
                "Property slice at offset {} is not an object: {}",
                offset, other
            ))),
            Err(e) => Err(Error::bad_props(format!(
                "Property slice at offset {}: {}",
                offset, e
            ))),
        }
    }

    /// Borrow one node's raw property bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupt`] when the slice is outside the blob.
    pub fn prop_slice(&self, offset: u32, length: u32) -> Result<&[u8]> {
        let blob = self.props.as_slice();
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| Error::corrupt("Property slice overflows"))?;
        if end > blob.len() {
            return Err(Error::corrupt(format!(
                "Property slice {}..{} exceeds blob size {}",
                start,
                end,
                blob.len()
            )));
        }
        Ok(&blob[start..end])
    }

    /// Total size of the property blob in bytes.
    #[must_use]
    pub fn prop_blob_len(&self) -> u32 {
        self.props.as_slice().len() as u32
    }

    /// Serialize to the wire format. Byte-identical across runs for the same
    /// instance.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let node_section = self.nodes.len() * NODE_RECORD_SIZE;
        let string_section = table_size(&self.strings);
        let type_section = table_size(&self.types);
        let blob = self.props.as_slice();

        let node_table_offset = HEADER_SIZE;
        let string_table_offset = node_table_offset + node_section;
        let type_table_offset = string_table_offset + string_section;
        let props_offset = type_table_offset + type_section;
        let total = props_offset + 4 + blob.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&(self.nodes.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.root_index.to_le_bytes());
        out.extend_from_slice(&(node_table_offset as u32).to_le_bytes());
        out.extend_from_slice(&(string_table_offset as u32).to_le_bytes());
        out.extend_from_slice(&(type_table_offset as u32).to_le_bytes());
        out.extend_from_slice(&(props_offset as u32).to_le_bytes());

        for node in &self.nodes {
            out.extend_from_slice(&node.type_id.to_le_bytes());
            out.extend_from_slice(&node.flags.to_le_bytes());
            out.extend_from_slice(&node.child_index.to_le_bytes());
            out.extend_from_slice(&node.next_index.to_le_bytes());
            out.extend_from_slice(&node.parent_index.to_le_bytes());
            out.extend_from_slice(&node.props_offset.to_le_bytes());
            out.extend_from_slice(&node.props_length.to_le_bytes());
        }

        write_table(&mut out, &self.strings);
        write_table(&mut out, &self.types);

        out.extend_from_slice(&(blob.len() as u32).to_le_bytes());
        out.extend_from_slice(blob);

        out
    }

    /// Parse the wire format, validating every section before use.
    ///
    /// The property blob is not copied: the returned instance keeps a
    /// reference into the input buffer and slices it on demand.
    ///
    /// # Errors
    ///
    /// [`Error::ShortBuffer`] when the buffer cannot hold a header,
    /// [`Error::BadMagic`] / [`Error::BadVersion`] on a foreign or newer
    /// buffer, and [`Error::Corrupt`] when any offset, section length, or
    /// node index is internally inconsistent.
    pub fn from_bytes(buf: impl Into<Bytes>) -> Result<Self> {
        let buf: Bytes = buf.into();
        if buf.len() < HEADER_SIZE {
            return Err(Error::ShortBuffer {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        let magic = read_u32_at(&buf, 0);
        if magic != MAGIC {
            return Err(Error::BadMagic { found: magic });
        }
        let version = read_u32_at(&buf, 4);
        if version != FORMAT_VERSION {
            return Err(Error::BadVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let node_count = read_u32_at(&buf, 8) as usize;
        let root_index = read_u32_at(&buf, 12);
        let node_table_offset = read_u32_at(&buf, 16) as usize;
        let string_table_offset = read_u32_at(&buf, 20) as usize;
        let type_table_offset = read_u32_at(&buf, 24) as usize;
        let props_offset = read_u32_at(&buf, 28) as usize;

        if node_count > 0 && root_index as usize >= node_count {
            return Err(Error::corrupt(format!(
                "Root index {} outside node table of {} nodes",
                root_index, node_count
            )));
        }

        // Node table.
        let node_table_end = node_table_offset
            .checked_add(node_count.saturating_mul(NODE_RECORD_SIZE))
            .filter(|&end| node_table_offset >= HEADER_SIZE && end <= buf.len())
            .ok_or_else(|| Error::corrupt("Node table exceeds buffer"))?;
        let mut nodes = Vec::with_capacity(node_count);
        let mut pos = node_table_offset;
        while pos < node_table_end {
            nodes.push(FlatNode {
                type_id: read_u16_at(&buf, pos),
                flags: read_u16_at(&buf, pos + 2),
                child_index: read_u32_at(&buf, pos + 4),
                next_index: read_u32_at(&buf, pos + 8),
                parent_index: read_u32_at(&buf, pos + 12),
                props_offset: read_u32_at(&buf, pos + 16),
                props_length: read_u32_at(&buf, pos + 20),
            });
            pos += NODE_RECORD_SIZE;
        }

        let strings = read_table(&buf, string_table_offset, "string table")?;
        let types = read_table(&buf, type_table_offset, "type table")?;

        // Property blob.
        if props_offset + 4 > buf.len() {
            return Err(Error::corrupt("Property blob header exceeds buffer"));
        }
        let blob_len = read_u32_at(&buf, props_offset) as usize;
        let blob_start = props_offset + 4;
        let blob_end = blob_start
            .checked_add(blob_len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| Error::corrupt("Property blob exceeds buffer"))?;
        let blob = buf.slice(blob_start..blob_end);

        // Per-node index and property-slice validation.
        for (i, node) in nodes.iter().enumerate() {
            for (what, index) in [
                ("child", node.child_index),
                ("next", node.next_index),
                ("parent", node.parent_index),
            ] {
                if index as usize >= node_count && index != 0 {
                    return Err(Error::corrupt(format!(
                        "Node {}: {} index {} outside node table of {} nodes",
                        i, what, index, node_count
                    )));
                }
            }
            if (node.props_offset as usize)
                .checked_add(node.props_length as usize)
                .filter(|&end| end <= blob_len)
                .is_none()
            {
                return Err(Error::corrupt(format!(
                    "Node {}: property slice exceeds blob",
                    i
                )));
            }
        }

        let mut string_index = HashMap::with_capacity(strings.len());
        for (i, s) in strings.iter().enumerate() {
            string_index.entry(s.clone()).or_insert(i as u32);
        }

        Ok(Self {
            version,
            root_index,
            nodes,
            strings,
            string_index,
            types,
            props: PropBlob::Parsed(blob),
        })
    }
}

impl Default for FlatAst {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for FlatAst {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.root_index == other.root_index
            && self.nodes == other.nodes
            && self.strings == other.strings
            && self.types == other.types
            && self.props.as_slice() == other.props.as_slice()
    }
}

impl std::fmt::Debug for FlatAst {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatAst")
            .field("version", &self.version)
            .field("root_index", &self.root_index)
            .field("nodes", &self.nodes.len())
            .field("strings", &self.strings.len())
            .field("types", &self.types.len())
            .field("prop_blob_len", &self.props.as_slice().len())
            .finish()
    }
}

fn table_size(entries: &[String]) -> usize {
    4 + entries.iter().map(|s| 4 + s.len()).sum::<usize>()
}

fn write_table(out: &mut Vec<u8>, entries: &[String]) {
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        out.extend_from_slice(entry.as_bytes());
    }
}

fn read_table(buf: &Bytes, offset: usize, what: &str) -> Result<Vec<String>> {
    if offset < HEADER_SIZE || offset + 4 > buf.len() {
        return Err(Error::corrupt(format!("{} offset out of range", what)));
    }
    let count = read_u32_at(buf, offset) as usize;
    let mut entries = Vec::with_capacity(count.min(4096));
    let mut pos = offset + 4;
    for i in 0..count {
        if pos + 4 > buf.len() {
            return Err(Error::corrupt(format!("{} entry {} truncated", what, i)));
        }
        let len = read_u32_at(buf, pos) as usize;
        pos += 4;
        let end = pos
            .checked_add(len)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| Error::corrupt(format!("{} entry {} exceeds buffer", what, i)))?;
        let s = std::str::from_utf8(&buf[pos..end])
            .map_err(|_| Error::corrupt(format!("{} entry {} is not UTF-8", what, i)))?;
        entries.push(s.to_string());
        pos = end;
    }
    Ok(entries)
}

fn read_u16_at(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

fn read_u32_at(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlatAst {
        let mut ast = FlatAst::new();
        let mut props = Map::new();
        props.insert("value".to_string(), Value::from("inherit"));
        let (po, pl) = ast.add_properties(&props).expect("props");
        ast.add_string("inherit");
        ast.add_node(FlatNode {
            type_id: NodeType::Value.id(),
            flags: 1,
            child_index: 0,
            next_index: 0,
            parent_index: 0,
            props_offset: po,
            props_length: pl,
        });
        ast
    }

    #[test]
    fn add_string_dedups_and_is_idempotent() {
        let mut ast = FlatAst::new();
        let a = ast.add_string("auto");
        let b = ast.add_string("none");
        let a2 = ast.add_string("auto");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(a, a2);
        assert_eq!(ast.string_count(), 2);
        assert_eq!(ast.get_string(a), Some("auto"));
        assert_eq!(ast.get_string(b), Some("none"));
        assert_eq!(ast.get_string(99), None);
    }

    #[test]
    fn properties_round_trip_through_blob() {
        let mut ast = FlatAst::new();
        let mut first = Map::new();
        first.insert("value".to_string(), Value::from(100));
        let mut second = Map::new();
        second.insert("unit".to_string(), Value::from("px"));

        let (o1, l1) = ast.add_properties(&first).expect("first");
        let (o2, l2) = ast.add_properties(&second).expect("second");
        assert_eq!(o1, 0);
        assert_eq!(o2, l1);

        assert_eq!(ast.get_properties(o1, l1).expect("read first"), first);
        assert_eq!(ast.get_properties(o2, l2).expect("read second"), second);
        assert!(ast.get_properties(o2, l2 + 100).is_err());
    }

    #[test]
    fn serialized_bytes_are_deterministic() {
        let a = sample().to_bytes();
        let b = sample().to_bytes();
        assert_eq!(a, b);
    }

    #[test]
    fn from_bytes_round_trips_all_fields() {
        let ast = sample();
        let bytes = ast.to_bytes();
        let parsed = FlatAst::from_bytes(bytes).expect("parse");
        assert_eq!(parsed, ast);
        // Interner still works after a parse.
        let mut parsed = parsed;
        assert_eq!(parsed.add_string("inherit"), 0);
    }

    #[test]
    fn rejects_short_buffer() {
        let err = FlatAst::from_bytes(vec![0u8; 8]).expect_err("must fail");
        assert!(matches!(err, Error::ShortBuffer { needed: 32, have: 8 }));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] ^= 0xFF;
        let err = FlatAst::from_bytes(bytes).expect_err("must fail");
        assert!(matches!(err, Error::BadMagic { .. }));
    }

    #[test]
    fn rejects_newer_version() {
        let mut bytes = sample().to_bytes();
        bytes[4] = 2;
        let err = FlatAst::from_bytes(bytes).expect_err("must fail");
        assert!(matches!(err, Error::BadVersion { found: 2, supported: 1 }));
    }

    #[test]
    fn rejects_node_table_past_end() {
        let mut bytes = sample().to_bytes();
        // Inflate the node count so the table runs off the buffer.
        bytes[8..12].copy_from_slice(&10_000u32.to_le_bytes());
        let err = FlatAst::from_bytes(bytes).expect_err("must fail");
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn rejects_out_of_range_child_index() {
        let mut ast = sample();
        ast.node_mut(0).expect("node").child_index = 57;
        let err = FlatAst::from_bytes(ast.to_bytes()).expect_err("must fail");
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn rejects_prop_slice_past_blob() {
        let mut ast = sample();
        ast.node_mut(0).expect("node").props_length = 10_000;
        let err = FlatAst::from_bytes(ast.to_bytes()).expect_err("must fail");
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn surfaces_malformed_property_json() {
        let mut ast = FlatAst::new();
        let (po, pl) = ast.add_properties(&Map::new()).expect("props");
        ast.add_node(FlatNode {
            type_id: NodeType::Keyword.id(),
            props_offset: po,
            props_length: pl,
            ..FlatNode::default()
        });
        let mut bytes = ast.to_bytes();
        // The blob is the trailing section; stomp its first byte ('{').
        let blob_at = bytes.len() - pl as usize;
        bytes[blob_at] = b'!';
        let parsed = FlatAst::from_bytes(bytes).expect("structure is still sound");
        let err = parsed.get_properties(po, pl).expect_err("must fail");
        assert!(matches!(err, Error::BadProps(_)));
    }

    #[test]
    fn unknown_flag_bits_survive_round_trip() {
        let mut ast = sample();
        ast.node_mut(0).expect("node").flags = 0xBEEF;
        let parsed = FlatAst::from_bytes(ast.to_bytes()).expect("parse");
        assert_eq!(parsed.node(0).expect("node").flags, 0xBEEF);
    }
}
