//! End-to-end bridge tests against a live Node.js plugin host.
//!
//! Each test skips with a notice when `node` is not installed, so the suite
//! passes on machines without a JavaScript runtime.

use std::path::PathBuf;
use std::sync::Arc;

use lessr_core::{ChildSlot, Error, Node, NodeType};
use lessr_plugin::{PluginManager, RuntimeOptions};
use lessr_protocol::IpcMode;

fn node_available() -> bool {
    if which::which("node").is_ok() {
        return true;
    }
    eprintln!("skipping: node not found on PATH");
    false
}

fn testdata(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("testdata").join(file)
}

async fn started_manager(options: RuntimeOptions) -> PluginManager {
    // Surfaces plugin-host stderr in test output under RUST_LOG.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    let manager = PluginManager::new(options).expect("manager");
    manager.start().await.expect("start");
    manager
}

#[tokio::test]
async fn ping_and_echo_round_trip() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;

    manager.ping().await.expect("ping");
    let payload = serde_json::json!({ "nested": [1, "two", { "three": 3 }] });
    let echoed = manager.echo(payload.clone()).await.expect("echo");
    assert_eq!(echoed, payload);

    manager.stop().await;
}

#[tokio::test]
async fn unknown_commands_fail_the_single_request() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;

    let err = manager
        .runtime()
        .send_command("frobnicate", None)
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("Unknown command: frobnicate")));

    // The runtime stays healthy for later requests.
    manager.ping().await.expect("ping after failure");
    manager.stop().await;
}

#[tokio::test]
async fn pi_returns_the_same_dimension_in_both_ipc_modes() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;

    let record = manager
        .load_plugin(testdata("pi-plugin.js").to_str().expect("utf8"), None, None)
        .await
        .expect("load");
    assert!(!record.cached);
    assert!(record.functions.contains(&"pi".to_string()));

    // A second load of the same resolved path is a cache hit.
    let again = manager
        .load_plugin(testdata("pi-plugin.js").to_str().expect("utf8"), None, None)
        .await
        .expect("reload");
    assert!(again.cached);

    let mut results = Vec::new();
    for mode in [IpcMode::Json, IpcMode::SharedMemory] {
        let pi = manager.function_with_mode("pi", mode);
        assert!(pi.needs_eval_args());
        let node = pi.call(&[]).await.expect("call");
        assert_eq!(node.node_type(), NodeType::Dimension);
        let value = node.property("value").and_then(|v| v.as_f64()).expect("value");
        assert!((value - std::f64::consts::PI).abs() < 1e-4, "got {}", value);
        assert_eq!(node.property("unit"), Some("".into()));
        results.push(node);
    }
    assert!(results[0].structural_eq(&results[1]));

    // No leaked segments after shared-memory calls.
    assert_eq!(manager.shm().segment_count(), 0);

    let err = manager
        .function("no-such-function")
        .call(&[])
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("Function not found")));

    manager.stop().await;
}

#[tokio::test]
async fn function_arguments_survive_the_trip() {
    if !node_available() {
        return;
    }
    let dir = tempfile::tempdir().expect("dir");
    let plugin = dir.path().join("add-unit.js");
    std::fs::write(
        &plugin,
        r#"
module.exports = {
  install(less, pluginManager, functions) {
    functions.add('double', function (dim) {
      return new less.tree.Dimension(dim.value * 2, dim.unit);
    });
  },
};
"#,
    )
    .expect("write plugin");

    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;
    manager
        .load_plugin("add-unit.js", Some(dir.path()), None)
        .await
        .expect("load");

    let arg = Node::new(NodeType::Dimension)
        .with_property("value", 21)
        .with_property("unit", "px");
    for mode in [IpcMode::Json, IpcMode::SharedMemory] {
        let result = manager
            .function_with_mode("double", mode)
            .call(std::slice::from_ref(&arg))
            .await
            .expect("call");
        assert_eq!(result.node_type(), NodeType::Dimension);
        assert_eq!(result.property("value").and_then(|v| v.as_f64()), Some(42.0));
        assert_eq!(result.property("unit"), Some("px".into()));
    }

    manager.stop().await;
}

#[tokio::test]
async fn pre_eval_visitor_reports_both_replacements_in_order() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;
    manager
        .load_plugin(
            testdata("auto-none-visitor.js").to_str().expect("utf8"),
            None,
            None,
        )
        .await
        .expect("load");

    let visitors = manager.visitors();
    assert_eq!(visitors.len(), 1);
    assert!(visitors[0].is_pre_eval_visitor);
    assert!(visitors[0].is_replacing);

    // Two "auto" keywords: (parentA, 0) and (parentB, 1).
    let root = Node::new(NodeType::Ruleset);
    let parent_a = Node::new(NodeType::Value);
    parent_a.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Keyword).with_property("value", "auto"),
    );
    parent_a.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Dimension).with_property("value", 1),
    );
    let parent_b = Node::new(NodeType::Value);
    parent_b.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Keyword).with_property("value", "bold"),
    );
    parent_b.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Keyword).with_property("value", "auto"),
    );
    root.add_child(ChildSlot::Rules, parent_a.clone());
    root.add_child(ChildSlot::Rules, parent_b.clone());

    let run = manager.run_pre_eval_visitors(&root).await.expect("run");
    assert_eq!(run.visitor_count, 1);
    let flat: Vec<_> = run
        .replacements
        .iter()
        .flat_map(|group| group.replacements.iter())
        .collect();
    assert_eq!(flat.len(), 2);
    // Flat indices: root=0, parentA=1 (children 2,3), parentB=4 (children 5,6).
    assert_eq!((flat[0].parent_index, flat[0].child_index), (1, 0));
    assert_eq!((flat[1].parent_index, flat[1].child_index), (4, 1));

    // And they were applied to the live tree.
    assert_eq!(run.applied, 2);
    assert_eq!(parent_a.children()[0].property("value"), Some("none".into()));
    assert_eq!(parent_b.children()[1].property("value"), Some("none".into()));
    assert_eq!(parent_a.children()[1].node_type(), NodeType::Dimension);

    // Post-eval pass runs the complement: nothing to do here.
    let post = manager.run_post_eval_visitors(&root).await.expect("post");
    assert_eq!(post.visitor_count, 0);

    let err = manager.run_visitor(&root, 99).await.expect_err("must fail");
    assert!(matches!(err, Error::Protocol(ref m) if m.contains("Invalid visitor index")));

    manager.stop().await;
}

#[tokio::test]
async fn twenty_concurrent_echoes_see_no_id_cross_talk() {
    if !node_available() {
        return;
    }
    let manager = Arc::new(started_manager(RuntimeOptions::new().with_json_mode()).await);

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            let echoed = manager
                .echo(serde_json::json!({ "task": i }))
                .await
                .expect("echo");
            assert_eq!(echoed["task"], i);
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    manager.stop().await;
}

#[tokio::test]
async fn min_version_gate_rejects_demanding_plugins() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new().with_json_mode()).await;

    let err = manager
        .load_plugin(
            testdata("needs-future-host.js").to_str().expect("utf8"),
            None,
            None,
        )
        .await
        .expect_err("must fail");
    assert!(matches!(err, Error::MinVersion { ref required, .. } if required == "99.0.0"));

    manager.stop().await;
}

#[tokio::test]
async fn stop_with_attached_buffers_cleans_up_everything() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new()).await;

    // Attach five segments and never detach them.
    let mut paths = Vec::new();
    for i in 0..5usize {
        let segment = manager.shm().create(64).expect("segment");
        segment.write_all(&[i as u8; 64]).expect("write");
        segment.sync().expect("sync");
        let params = serde_json::json!({
            "key": segment.key(),
            "path": segment.path().to_string_lossy(),
            "size": 64,
        });
        manager
            .runtime()
            .send_command("attachBuffer", Some(params))
            .await
            .expect("attach");
        paths.push(segment.path().to_path_buf());
    }
    let dir = manager.shm().dir_path().to_path_buf();
    assert_eq!(manager.shm().segment_count(), 5);

    manager.stop().await;

    assert_eq!(manager.shm().segment_count(), 0);
    for path in paths {
        assert!(!path.exists(), "segment file {:?} leaked", path);
    }

    // New requests fail now that the runtime is gone.
    let err = manager.ping().await.expect_err("must fail");
    assert!(matches!(err, Error::RuntimeStopped));
    drop(manager);
    assert!(!dir.exists(), "shm directory leaked");
}

#[tokio::test]
async fn buffer_commands_cover_read_info_and_detach() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new()).await;

    let segment = manager.shm().create(8).expect("segment");
    segment.write_all(&[9, 8, 7, 6, 5, 4, 3, 2]).expect("write");
    segment.sync().expect("sync");
    let key = segment.key().to_string();
    let attach = serde_json::json!({
        "key": key,
        "path": segment.path().to_string_lossy(),
        "size": 8,
    });
    manager
        .runtime()
        .send_command("attachBuffer", Some(attach.clone()))
        .await
        .expect("attach");

    // Re-attach reports cached.
    let again = manager
        .runtime()
        .send_command("attachBuffer", Some(attach))
        .await
        .expect("re-attach");
    assert_eq!(again["cached"], true);

    let info = manager
        .runtime()
        .send_command("getBufferInfo", Some(serde_json::json!({ "key": key })))
        .await
        .expect("info");
    assert_eq!(info["size"], 8);

    use base64::Engine as _;
    let read = manager
        .runtime()
        .send_command(
            "readBuffer",
            Some(serde_json::json!({ "key": key, "offset": 2, "length": 3 })),
        )
        .await
        .expect("read");
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(read["data"].as_str().expect("base64"))
        .expect("decode");
    assert_eq!(bytes, vec![7, 6, 5]);

    let oob = manager
        .runtime()
        .send_command(
            "readBuffer",
            Some(serde_json::json!({ "key": key, "offset": 6, "length": 4 })),
        )
        .await
        .expect_err("must fail");
    assert!(matches!(oob, Error::Protocol(ref m) if m.contains("out of bounds")));

    manager
        .runtime()
        .send_command("detachBuffer", Some(serde_json::json!({ "key": key })))
        .await
        .expect("detach");
    let missing = manager
        .runtime()
        .send_command("detachBuffer", Some(serde_json::json!({ "key": key })))
        .await
        .expect_err("must fail");
    assert!(matches!(missing, Error::Protocol(ref m) if m.contains("Buffer not found")));

    manager.stop().await;
}

#[tokio::test]
async fn parse_ast_buffer_reports_table_sizes() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new()).await;

    let root = Node::new(NodeType::Value);
    root.add_child(
        ChildSlot::Children,
        Node::new(NodeType::Keyword).with_property("value", "inherit"),
    );
    let bytes = lessr_flatast::flatten(&root).expect("flatten").ast.to_bytes();
    let segment = manager.shm().create(bytes.len()).expect("segment");
    segment.write_all(&bytes).expect("write");
    segment.sync().expect("sync");
    manager
        .runtime()
        .send_command(
            "attachBuffer",
            Some(serde_json::json!({
                "key": segment.key(),
                "path": segment.path().to_string_lossy(),
                "size": bytes.len(),
            })),
        )
        .await
        .expect("attach");

    let parsed = manager
        .runtime()
        .send_command(
            "parseASTBuffer",
            Some(serde_json::json!({ "bufferKey": segment.key() })),
        )
        .await
        .expect("parse");
    assert_eq!(parsed["version"], 1);
    assert_eq!(parsed["nodeCount"], 2);
    assert_eq!(parsed["rootIndex"], 0);
    assert_eq!(parsed["typeTableSize"], 40);

    manager.stop().await;
}

#[tokio::test]
async fn serialize_node_round_trips_through_the_host_codec() {
    if !node_available() {
        return;
    }
    let manager = started_manager(RuntimeOptions::new()).await;

    let node = serde_json::json!({
        "_type": "Dimension",
        "value": 12.5,
        "unit": "em",
    });
    let reply = manager
        .runtime()
        .send_command("serializeNode", Some(serde_json::json!({ "node": node })))
        .await
        .expect("serialize");

    use base64::Engine as _;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(reply["buffer"].as_str().expect("buffer"))
        .expect("decode");
    assert_eq!(reply["size"], bytes.len());

    let ast = lessr_flatast::FlatAst::from_bytes(bytes).expect("parse");
    assert_eq!(ast.node_count(), 1);
    let rebuilt = lessr_flatast::unflatten(&ast, 0).expect("unflatten");
    assert_eq!(rebuilt.node_type(), NodeType::Dimension);
    assert_eq!(rebuilt.property("value").and_then(|v| v.as_f64()), Some(12.5));
    assert_eq!(rebuilt.property("unit"), Some("em".into()));

    manager.stop().await;
}
