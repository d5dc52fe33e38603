//! A minimal in-process stand-in for the watched full node's JSON-RPC
//! endpoint, in the spirit of the crate's own request/response test harnesses
//! (see `btcwatch-rpc-client`'s envelope types): it speaks just enough
//! HTTP/1.1 to satisfy `reqwest`, and just enough JSON-RPC 2.0 to satisfy
//! `RawRpcClient`, nothing more.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Bitcoin Core's "invalid address or key" code, reused here so canned
/// absent-entity replies match what `btcwatch-rpc-client` expects.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// One canned reply. `NotFound` maps to the same error code
/// `btcwatch-rpc-client` treats as "absent", not a transport failure.
#[derive(Clone)]
pub enum Reply {
    Result(Value),
    NotFound,
}

impl From<Value> for Reply {
    fn from(v: Value) -> Self {
        Reply::Result(v)
    }
}

/// A queue of canned replies per method (or per method+first-param key). A
/// single registered reply is replayed for every call; a registered sequence
/// is popped one at a time and the last entry is replayed once the sequence
/// is exhausted, so tests can script a handful of distinct calls without
/// having to predict exactly how many times a route is hit.
#[derive(Clone, Default)]
pub struct FakeNode {
    routes: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
}

impl FakeNode {
    /// Bind to an ephemeral localhost port and start serving in the
    /// background. Returns the node and the base URL a `RpcClient` can be
    /// pointed at directly.
    pub async fn spawn() -> (Self, String) {
        let node = FakeNode::default();
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake node listener");
        let addr = listener.local_addr().expect("local addr");
        let routes = node.routes.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(serve_one(stream, routes.clone()));
            }
        });
        (node, format!("http://{addr}"))
    }

    /// Register the one reply a parameter-less method (e.g.
    /// `getbestblockhash`) always returns.
    pub fn set(&self, method: &str, result: impl Into<Reply>) {
        self.set_sequence(method, vec![result.into()]);
    }

    /// Register a sequence of replies for a parameter-less method, one per
    /// call — `getbestblockhash` advancing one block a call being the
    /// motivating case.
    pub fn set_sequence(&self, method: &str, replies: Vec<Reply>) {
        self.insert(method.to_string(), replies);
    }

    /// Register the one reply a specific keyed call (e.g.
    /// `getrawtransaction` for one txid) always returns.
    pub fn set_keyed(&self, method: &str, param: &Value, result: impl Into<Reply>) {
        self.set_keyed_sequence(method, param, vec![result.into()]);
    }

    /// Like [`Self::set_sequence`] but scoped to one method+param key, so a
    /// single txid's or block hash's repeated calls can answer differently
    /// across a test (e.g. present, then reorged out).
    pub fn set_keyed_sequence(&self, method: &str, param: &Value, replies: Vec<Reply>) {
        self.insert(key(method, param), replies);
    }

    pub fn set_keyed_not_found(&self, method: &str, param: &Value) {
        self.set_keyed_sequence(method, param, vec![Reply::NotFound]);
    }

    fn insert(&self, key: String, replies: Vec<Reply>) {
        self.routes.lock().unwrap().insert(key, replies.into_iter().collect());
    }
}

fn key(method: &str, param: &Value) -> String {
    format!("{method}:{}", serde_json::to_string(param).unwrap())
}

async fn serve_one(mut stream: tokio::net::TcpStream, routes: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length: usize = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().to_string())
        })
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = &buf[body_start..(body_start + content_length).min(buf.len())];
    let parsed: Value = serde_json::from_slice(body).unwrap_or(Value::Null);

    let response_body = match parsed {
        Value::Array(requests) => {
            let responses: Vec<Value> = requests.iter().map(|r| respond_one(r, &routes)).collect();
            serde_json::to_vec(&responses).unwrap()
        }
        other => serde_json::to_vec(&respond_one(&other, &routes)).unwrap(),
    };

    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response_body.len()
    );
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(&response_body).await;
    let _ = stream.shutdown().await;
}

fn respond_one(request: &Value, routes: &Arc<Mutex<HashMap<String, VecDeque<Reply>>>>) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = request.get("params").and_then(Value::as_array).cloned().unwrap_or_default();

    let mut routes = routes.lock().unwrap();
    let keyed = params.first().map(|p| key(method, p));
    let found = keyed
        .as_ref()
        .and_then(|k| routes.get_mut(k))
        .or_else(|| routes.get_mut(method));

    let reply = found.map(|queue| {
        if queue.len() > 1 {
            queue.pop_front().expect("checked non-empty")
        } else {
            queue.front().expect("checked non-empty").clone()
        }
    });

    match reply {
        Some(Reply::Result(result)) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
        Some(Reply::NotFound) => {
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": RPC_INVALID_ADDRESS_OR_KEY, "message": "not found"}})
        }
        None => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("fake node has no route for {method}")}
        }),
    }
}
