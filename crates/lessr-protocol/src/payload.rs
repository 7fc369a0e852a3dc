//! Typed payloads for each command in the catalog.
//!
//! Field names on the wire are camelCase, matching what the scripting child
//! reads and writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `loadPlugin` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPluginParams {
    /// Plugin path as the stylesheet or caller supplied it.
    pub path: String,

    /// Directory relative paths and module names resolve against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,

    /// Plugin options handed to `setOptions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// `loadPlugin` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadPluginResult {
    /// Whether the resolved path had already been loaded (no side effects).
    pub cached: bool,

    /// The resolved path the cache is keyed by.
    pub path: String,

    /// All function names registered so far.
    #[serde(default)]
    pub functions: Vec<String>,

    /// Total registered visitors.
    #[serde(default)]
    pub visitors: u32,

    /// Total registered pre-processors.
    #[serde(default)]
    pub pre_processors: u32,

    /// Total registered post-processors.
    #[serde(default)]
    pub post_processors: u32,

    /// Total registered file managers.
    #[serde(default)]
    pub file_managers: u32,

    /// Functions this load added.
    #[serde(default)]
    pub new_functions: u32,

    /// Visitors this load added.
    #[serde(default)]
    pub new_visitors: u32,

    /// Pre-processors this load added.
    #[serde(default)]
    pub new_pre_processors: u32,

    /// Post-processors this load added.
    #[serde(default)]
    pub new_post_processors: u32,

    /// File managers this load added.
    #[serde(default)]
    pub new_file_managers: u32,
}

/// `callFunction` input. Exactly one of `args` (JSON mode) or `buffer_key`
/// (shared-memory mode) is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFunctionParams {
    /// Registered function name.
    pub name: String,

    /// Arguments marshalled inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,

    /// Key of an attached buffer holding the flattened argument wrapper.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_key: Option<String>,
}

/// One registered visitor, as `getVisitors` reports it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorInfo {
    /// Position in the child's visitor list; stable across a runtime's life.
    pub index: u32,

    /// Runs before evaluation when true, after when false.
    #[serde(default)]
    pub is_pre_eval_visitor: bool,

    /// Whether the visitor replaces nodes.
    #[serde(default)]
    pub is_replacing: bool,
}

/// `attachBuffer` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachBufferParams {
    /// Segment key.
    pub key: String,

    /// Backing file the child reads.
    pub path: String,

    /// Segment size in bytes.
    pub size: u64,
}

/// `attachBuffer` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachBufferResult {
    /// Whether the key was already attached.
    pub cached: bool,

    /// Segment key.
    pub key: String,

    /// Bytes the child read.
    pub size: u64,
}

/// `detachBuffer` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachBufferParams {
    /// Segment key.
    pub key: String,
}

/// `detachBuffer` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachBufferResult {
    /// Whether a buffer was actually dropped.
    pub detached: bool,

    /// Segment key.
    pub key: String,
}

/// `readBuffer` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBufferParams {
    /// Segment key.
    pub key: String,

    /// Byte offset to read from.
    #[serde(default)]
    pub offset: u64,

    /// Bytes to read; the rest of the buffer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
}

/// `readBuffer` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadBufferResult {
    /// Base64 of the bytes read.
    pub data: String,

    /// Offset actually read from.
    pub offset: u64,

    /// Bytes actually read.
    pub length: u64,
}

/// `getBufferInfo` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferInfo {
    /// Segment key.
    pub key: String,

    /// Backing file path.
    pub path: String,

    /// Size in bytes.
    pub size: u64,
}

/// `runVisitor` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunVisitorParams {
    /// Attached buffer holding the flattened tree.
    pub buffer_key: String,

    /// Index into the child's visitor list.
    pub visitor_index: u32,
}

/// `runVisitor` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunVisitorResult {
    /// Whether the visitor ran to completion.
    pub success: bool,

    /// Replacements grouped per visitor.
    #[serde(default)]
    pub replacements: Vec<VisitorReplacements>,

    /// Tag of a new root the visitor returned, if any. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

/// `runPreEvalVisitors` / `runPostEvalVisitors` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvalVisitorsParams {
    /// Attached buffer holding the flattened tree.
    pub buffer_key: String,
}

/// `runPreEvalVisitors` / `runPostEvalVisitors` output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvalVisitorsResult {
    /// How many visitors ran.
    pub visitor_count: u32,

    /// Replacements grouped per visitor, in run order.
    #[serde(default)]
    pub replacements: Vec<VisitorReplacements>,
}

/// Replacements one visitor produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorReplacements {
    /// The visitor that produced these.
    pub visitor_index: u32,

    /// Substitutions, in encounter order.
    #[serde(default)]
    pub replacements: Vec<Replacement>,
}

/// One substitution the host must apply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replacement {
    /// Flat index of the parent node in the table the visitor saw.
    pub parent_index: u32,

    /// Position in the parent's ordered child list.
    pub child_index: u32,

    /// The new node: a host-shaped record, possibly with serialized leaves.
    pub replacement: Value,
}

/// `parseASTBuffer` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseAstBufferParams {
    /// Attached buffer to parse (parse results are cached per key).
    pub buffer_key: String,
}

/// `parseASTBuffer` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseAstBufferResult {
    /// Format version of the buffer.
    pub version: u32,

    /// Number of node records.
    pub node_count: u32,

    /// Index of the root node.
    pub root_index: u32,

    /// Entries in the string table.
    pub string_table_size: u32,

    /// Entries in the type table.
    pub type_table_size: u32,
}

/// `serializeNode` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializeNodeParams {
    /// Node record to serialize.
    pub node: Value,
}

/// `serializeNode` output: FlatAST bytes, or the JSON fallback with size 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializeNodeResult {
    /// Base64 FlatAST bytes, when binary serialization succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer: Option<String>,

    /// The node as JSON, when binary serialization was not possible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,

    /// Byte size of the buffer; 0 for the JSON fallback.
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_fields_are_camel_case_on_the_wire() {
        let params = RunVisitorParams {
            buffer_key: "k".to_string(),
            visitor_index: 2,
        };
        let json = serde_json::to_value(&params).expect("json");
        assert_eq!(json["bufferKey"], "k");
        assert_eq!(json["visitorIndex"], 2);

        let replacement: Replacement = serde_json::from_value(serde_json::json!({
            "parentIndex": 4,
            "childIndex": 1,
            "replacement": { "_type": "Keyword", "value": "none" }
        }))
        .expect("parse");
        assert_eq!(replacement.parent_index, 4);
        assert_eq!(replacement.child_index, 1);
    }

    #[test]
    fn load_plugin_result_tolerates_missing_counts() {
        let result: LoadPluginResult = serde_json::from_value(serde_json::json!({
            "cached": false,
            "path": "/p/plugin.js",
            "functions": ["pi"]
        }))
        .expect("parse");
        assert!(!result.cached);
        assert_eq!(result.functions, vec!["pi".to_string()]);
        assert_eq!(result.visitors, 0);
        assert_eq!(result.new_functions, 0);
    }

    #[test]
    fn visitor_info_round_trips() {
        let info = VisitorInfo {
            index: 0,
            is_pre_eval_visitor: true,
            is_replacing: true,
        };
        let json = serde_json::to_value(info).expect("json");
        assert_eq!(json["isPreEvalVisitor"], true);
        let back: VisitorInfo = serde_json::from_value(json).expect("parse");
        assert!(back.is_pre_eval_visitor);
        assert!(back.is_replacing);
    }
}
