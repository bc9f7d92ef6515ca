//! Protocol engine behaviour against a scripted runtime.

mod common;

use codepod_core::{
    ExtensionCall, ExtensionOutput, ExtensionRegistry, RpcClient, RuntimeProcess, SandboxConfig,
    SandboxError,
};
use common::connect;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn upper(call: &ExtensionCall) -> anyhow::Result<ExtensionOutput> {
    Ok(ExtensionOutput::ok(call.stdin.to_uppercase()))
}

fn registry_with_upper() -> Arc<ExtensionRegistry> {
    let mut registry = ExtensionRegistry::new();
    registry.register("upper", upper);
    Arc::new(registry)
}

#[tokio::test]
async fn test_single_callback_before_response() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        assert_eq!(req["id"], 1);

        let cb = runtime
            .invoke(
                "cb_1",
                json!({"name": "upper", "args": [], "stdin": "hello", "env": {}, "cwd": "/"}),
            )
            .await;
        assert_eq!(cb["result"], json!({"stdout": "HELLO", "exitCode": 0}));
        assert!(cb.get("error").is_none());

        runtime
            .reply(&req, json!({"stdout": cb["result"]["stdout"], "exitCode": 0}))
            .await;

        // The next outer request is the next id; nothing was written in between.
        let next = runtime.expect("ping").await;
        assert_eq!(next["id"], 2);
        runtime.reply(&next, json!({})).await;
        runtime
    });

    let result: Value = client
        .call("run", json!({"command": "echo hello | upper"}))
        .await
        .unwrap();
    assert_eq!(result["stdout"], "HELLO");

    let _: Value = client.call("ping", json!({})).await.unwrap();
    let mut runtime = script.await.unwrap();

    drop(client);
    assert!(runtime.at_eof().await, "client wrote an unexpected extra line");
}

#[tokio::test]
async fn test_multiple_callbacks_served_in_order() {
    let seen = Arc::new(AtomicUsize::new(0));
    let mut registry = ExtensionRegistry::new();
    let counter = Arc::clone(&seen);
    registry.register("count", move |call: &ExtensionCall| -> anyhow::Result<ExtensionOutput> {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(ExtensionOutput::ok(format!("{n}:{}", call.args.join(" "))))
    });

    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, Arc::new(registry));

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        let mut outputs = Vec::new();
        for i in 0..3 {
            let cb = runtime
                .invoke(&format!("cb_{i}"), json!({"name": "count", "args": [format!("call{i}")]}))
                .await;
            outputs.push(cb["result"]["stdout"].as_str().unwrap().to_string());
        }
        runtime.reply(&req, json!(outputs)).await;
    });

    let outputs: Vec<String> = client.call("run", json!({"command": "x"})).await.unwrap();
    script.await.unwrap();
    assert_eq!(outputs, vec!["0:call0", "1:call1", "2:call2"]);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unknown_extension_does_not_break_call() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        let cb = runtime.invoke("cb_x", json!({"name": "missing"})).await;
        assert_eq!(cb["error"]["code"], -32603);
        assert!(cb["error"]["message"].as_str().unwrap().contains("missing"));
        assert!(cb.get("result").is_none());
        runtime
            .reply(&req, json!({"stdout": "", "stderr": "missing: extension failed\n", "exitCode": 1}))
            .await;
    });

    let result: Value = client.call("run", json!({"command": "missing"})).await.unwrap();
    script.await.unwrap();
    assert_eq!(result["exitCode"], 1);
    assert!(!client.is_broken());
}

#[tokio::test]
async fn test_failing_handler_is_contained() {
    let mut registry = ExtensionRegistry::new();
    registry.register("boom", |_: &ExtensionCall| -> anyhow::Result<ExtensionOutput> {
        anyhow::bail!("handler exploded")
    });
    registry.register("panic", |_: &ExtensionCall| -> anyhow::Result<ExtensionOutput> {
        panic!("handler panicked")
    });

    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, Arc::new(registry));

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        let first = runtime.invoke("cb_1", json!({"name": "boom"})).await;
        assert_eq!(first["error"]["code"], -32603);
        assert!(first["error"]["message"].as_str().unwrap().contains("handler exploded"));

        let second = runtime.invoke("cb_2", json!({"name": "panic"})).await;
        assert_eq!(second["error"]["code"], -32603);
        assert!(second["error"]["message"].as_str().unwrap().contains("handler panicked"));

        runtime.reply(&req, json!("done")).await;
    });

    let result: String = client.call("run", json!({})).await.unwrap();
    script.await.unwrap();
    assert_eq!(result, "done");
}

#[tokio::test]
async fn test_unknown_callback_method_gets_error_reply() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        runtime
            .send(json!({"jsonrpc": "2.0", "id": "cb_7", "method": "host.shutdown", "params": {}}))
            .await;
        let resp = runtime.recv().await;
        assert_eq!(resp["id"], "cb_7");
        assert_eq!(resp["error"]["code"], -32601);
        runtime.reply(&req, json!(null)).await;
    });

    let result: Value = client.call("run", json!({})).await.unwrap();
    script.await.unwrap();
    assert!(result.is_null());
}

#[tokio::test]
async fn test_non_string_callback_method_gets_error_reply() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        let req = runtime.expect("run").await;
        runtime
            .send(json!({"jsonrpc": "2.0", "id": "cb_1", "method": 5, "params": {}}))
            .await;
        let resp = runtime.recv().await;
        assert_eq!(resp["id"], "cb_1");
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["error"]["message"], "Unknown callback method: 5");

        // The outer call is still alive and callbacks keep working.
        let cb = runtime.invoke("cb_2", json!({"name": "upper", "stdin": "ok"})).await;
        assert_eq!(cb["result"]["stdout"], "OK");
        runtime.reply(&req, json!("done")).await;
    });

    let result: String = client.call("run", json!({})).await.unwrap();
    script.await.unwrap();
    assert_eq!(result, "done");
    assert!(!client.is_broken());
}

#[tokio::test]
async fn test_remote_error_after_callback() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        let req = runtime.expect("files.read").await;
        runtime.invoke("cb_1", json!({"name": "upper", "stdin": "x"})).await;
        runtime.reply_error(&req, 1, "ENOENT: no such file").await;
    });

    let err = client
        .call::<_, Value>("files.read", json!({"path": "/nonexistent"}))
        .await
        .unwrap_err();
    script.await.unwrap();
    match err {
        SandboxError::Rpc { code, message } => {
            assert_eq!(code, 1);
            assert!(message.contains("ENOENT"));
        }
        other => panic!("expected Rpc error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_closed_before_response() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        runtime.expect("run").await;
        // Runtime dies without answering.
        drop(runtime);
    });

    let err = client.call::<_, Value>("run", json!({})).await.unwrap_err();
    script.await.unwrap();
    assert!(err.is_transport(), "expected transport error, got {err:?}");
}

#[tokio::test]
async fn test_stream_closed_mid_callback() {
    let (transport, mut runtime) = connect();
    let mut client = RpcClient::new(transport, registry_with_upper());

    let script = tokio::spawn(async move {
        runtime.expect("run").await;
        runtime.invoke("cb_1", json!({"name": "upper", "stdin": "a"})).await;
        drop(runtime);
    });

    let err = client.call::<_, Value>("run", json!({})).await.unwrap_err();
    script.await.unwrap();
    assert!(err.is_transport());
    assert!(client.is_broken());
}

#[cfg(unix)]
#[tokio::test]
async fn test_subprocess_exit_is_transport_error() {
    // `true <script>` exits immediately without reading or writing anything.
    let config = SandboxConfig::builder()
        .runtime("true")
        .server_script("server.js")
        .build()
        .unwrap();
    let (process, transport) = RuntimeProcess::spawn(&config).unwrap();
    let mut client = RpcClient::new(transport, Arc::new(ExtensionRegistry::new()));

    let err = client
        .call::<_, Value>("create", json!({}))
        .await
        .unwrap_err();
    assert!(err.is_transport(), "expected transport error, got {err:?}");
    process.stop().await;
}

#[tokio::test]
async fn test_spawn_missing_runtime() {
    let config = SandboxConfig::builder()
        .runtime("/definitely/not/a/real/runtime")
        .build()
        .unwrap();
    let err = RuntimeProcess::spawn(&config).unwrap_err();
    assert!(matches!(err, SandboxError::Spawn(_)));
}
