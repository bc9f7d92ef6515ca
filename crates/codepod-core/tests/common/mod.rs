//! Scripted stand-in for the sandbox runtime, connected over an in-memory pipe.

#![allow(dead_code)]

use codepod_core::{Sandbox, SandboxConfig, Transport};
use serde_json::{json, Value};
use tokio::io::{
    duplex, split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf,
    WriteHalf,
};

/// The runtime side of a transport. Tests drive it line by line.
pub struct FakeRuntime {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

/// A transport for the client and the fake runtime on the other end.
pub fn connect() -> (Transport, FakeRuntime) {
    let (client_end, runtime_end) = duplex(256 * 1024);
    let (client_read, client_write) = split(client_end);
    let (runtime_read, runtime_write) = split(runtime_end);
    (
        Transport::new(client_read, client_write),
        FakeRuntime {
            lines: BufReader::new(runtime_read).lines(),
            writer: runtime_write,
        },
    )
}

/// Attach a root sandbox, answering its `create` request.
///
/// Returns the sandbox, the runtime, and the `create` request as received.
pub async fn attach(config: SandboxConfig) -> (Sandbox, FakeRuntime, Value) {
    let (transport, mut runtime) = connect();
    let (sandbox, create) = tokio::join!(Sandbox::attach(transport, config), async {
        let req = runtime.expect("create").await;
        runtime.reply(&req, json!({"ok": true})).await;
        req
    });
    (sandbox.expect("attach should succeed"), runtime, create)
}

impl FakeRuntime {
    /// Next message from the client. Panics on end of stream.
    pub async fn recv(&mut self) -> Value {
        let line = self
            .lines
            .next_line()
            .await
            .expect("read from client")
            .expect("client closed the stream");
        serde_json::from_str(&line).expect("client sent invalid JSON")
    }

    /// True if the client closed its side without sending anything else.
    pub async fn at_eof(&mut self) -> bool {
        matches!(self.lines.next_line().await, Ok(None))
    }

    /// Next message, which must be a request for `method`.
    pub async fn expect(&mut self, method: &str) -> Value {
        let req = self.recv().await;
        assert_eq!(req["method"], method, "unexpected request: {req}");
        assert_eq!(req["jsonrpc"], "2.0");
        req
    }

    /// Write one raw line.
    pub async fn send_line(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Write one message.
    pub async fn send(&mut self, message: Value) {
        self.send_line(&message.to_string()).await;
    }

    /// Answer `req` with a result.
    pub async fn reply(&mut self, req: &Value, result: Value) {
        self.send(json!({"jsonrpc": "2.0", "id": req["id"], "result": result}))
            .await;
    }

    /// Answer `req` with an error.
    pub async fn reply_error(&mut self, req: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": req["id"],
            "error": {"code": code, "message": message}
        }))
        .await;
    }

    /// Issue an `extension.invoke` callback and return the host's answer.
    pub async fn invoke(&mut self, cb_id: &str, params: Value) -> Value {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": cb_id,
            "method": "extension.invoke",
            "params": params
        }))
        .await;
        let resp = self.recv().await;
        assert_eq!(resp["id"], cb_id, "callback answered with wrong id: {resp}");
        assert_eq!(resp["jsonrpc"], "2.0");
        resp
    }
}
