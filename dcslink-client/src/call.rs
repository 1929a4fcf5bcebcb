//! TCP call protocol client.
//!
//! The call server speaks self-delimiting JSON documents over one TCP
//! stream: after the client sends the literal `SENDAPI\n`, the server
//! replies with a JSON array cataloguing the callable APIs, and each later
//! call produces at most one JSON object carrying a `result` key. Document
//! boundaries are found by incremental parse success, buffering partial
//! input until a full document parses. There is a single pending-response
//! slot, so calls are serialized on the client side.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use dcslink_core::config::LinkConfig;
use dcslink_core::types::{LinkError, Result};

/// One callable API from the server's catalog, keyed by its syntax string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDef {
    pub api_syntax: String,
    #[serde(default)]
    pub parameter_defs: Vec<ParamDef>,
    #[serde(default)]
    pub returns_data: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    #[serde(default)]
    pub id: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(rename = "type", default)]
    pub param_type: serde_json::Value,
}

struct Inner {
    config: LinkConfig,
    apis: Mutex<HashMap<String, ApiDef>>,
    response: Mutex<Option<serde_json::Value>>,
    received: Notify,
    writer: Mutex<Option<OwnedWriteHalf>>,
    task: Mutex<Option<JoinHandle<()>>>,
    // One call in flight at a time; the response slot cannot correlate more.
    call_lock: Mutex<()>,
    running: AtomicBool,
}

/// Client for the request/response call channel.
#[derive(Clone)]
pub struct CallClient {
    inner: Arc<Inner>,
}

impl CallClient {
    pub fn new(config: LinkConfig) -> Self {
        CallClient {
            inner: Arc::new(Inner {
                config,
                apis: Mutex::new(HashMap::new()),
                response: Mutex::new(None),
                received: Notify::new(),
                writer: Mutex::new(None),
                task: Mutex::new(None),
                call_lock: Mutex::new(()),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Connect, request the API catalog, and wait for it to arrive.
    pub async fn connect(&self, timeout: Option<Duration>) -> Result<()> {
        let net = &self.inner.config.network;
        let addr = SocketAddrV4::new(net.server_ip, net.call_port);
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        self.inner.running.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        let handle = tokio::spawn(listen_loop(inner, read_half));
        *self.inner.task.lock().await = Some(handle);

        let notified = self.inner.received.notified();
        write_half.write_all(b"SENDAPI\n").await?;
        *self.inner.writer.lock().await = Some(write_half);

        let waited = match timeout {
            Some(t) => tokio::time::timeout(t, notified)
                .await
                .map_err(|_| LinkError::Timeout),
            None => {
                notified.await;
                Ok(())
            }
        };
        if let Err(e) = waited {
            tracing::error!("call server did not send its API catalog in time");
            self.close().await;
            return Err(e);
        }

        let count = self.inner.apis.lock().await.len();
        tracing::debug!(apis = count, "call channel connected");
        Ok(())
    }

    /// Names of the catalogued APIs.
    pub async fn apis(&self) -> HashSet<String> {
        self.inner.apis.lock().await.keys().cloned().collect()
    }

    /// Invoke `command` with the given named parameters.
    ///
    /// The provided parameter names must match the catalog definition
    /// exactly. Returns `Ok(None)` immediately for APIs that declare no
    /// return value; otherwise waits up to `timeout` for the single response
    /// document.
    pub async fn call(
        &self,
        command: &str,
        params: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Option<serde_json::Value>> {
        if !self.inner.running.load(Ordering::SeqCst) {
            return Err(LinkError::NotConnected);
        }

        let mut api = {
            let apis = self.inner.apis.lock().await;
            apis.get(command)
                .cloned()
                .ok_or_else(|| LinkError::UnknownApi(command.to_string()))?
        };

        let expected: HashSet<&str> = api.parameter_defs.iter().map(|p| p.name.as_str()).collect();
        let provided: HashSet<&str> = params.iter().map(|(name, _)| *name).collect();
        if expected != provided {
            let mut msg = format!("{command}:");
            let missing: Vec<&&str> = expected.difference(&provided).collect();
            if !missing.is_empty() {
                msg.push_str(&format!(" missing {missing:?}"));
            }
            let extra: Vec<&&str> = provided.difference(&expected).collect();
            if !extra.is_empty() {
                msg.push_str(&format!(" unexpected {extra:?}"));
            }
            return Err(LinkError::ParameterMismatch(msg));
        }

        let values: HashMap<&str, &str> = params.iter().copied().collect();
        for def in &mut api.parameter_defs {
            def.value = values.get(def.name.as_str()).map(|v| v.to_string());
        }

        let payload = serde_json::to_string(&api)
            .map_err(|e| LinkError::Protocol(format!("call encoding failed: {e}")))?;

        // Serialize calls: one response slot, one call in flight.
        let _guard = self.inner.call_lock.lock().await;
        *self.inner.response.lock().await = None;
        let notified = self.inner.received.notified();
        {
            let mut writer = self.inner.writer.lock().await;
            let writer = writer.as_mut().ok_or(LinkError::NotConnected)?;
            writer.write_all(payload.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }

        if !api.returns_data {
            return Ok(None);
        }

        tokio::time::timeout(timeout, notified)
            .await
            .map_err(|_| LinkError::Timeout)?;
        Ok(self.inner.response.lock().await.take())
    }

    /// Close the connection and stop the listen task.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.lock().await.take() {
            handle.abort();
        }
        *self.inner.writer.lock().await = None;
    }
}

async fn listen_loop(inner: Arc<Inner>, mut read_half: OwnedReadHalf) {
    let mut raw = vec![0u8; 65536];
    let mut buffer = String::new();
    while inner.running.load(Ordering::SeqCst) {
        let len = match read_half.read(&mut raw).await {
            Ok(0) => {
                tracing::debug!("call server closed the connection");
                break;
            }
            Ok(len) => len,
            Err(e) => {
                if inner.running.load(Ordering::SeqCst) {
                    tracing::error!(error = %e, "call channel receive failed");
                }
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&raw[..len]));
        process_buffer(&inner, &mut buffer).await;
    }
    inner.running.store(false, Ordering::SeqCst);
}

/// Peel complete JSON documents off the front of the buffer. Incomplete
/// trailing input is kept for the next read; anything else unparsable is
/// dropped so the stream cannot wedge.
async fn process_buffer(inner: &Arc<Inner>, buffer: &mut String) {
    loop {
        let text = buffer.trim_start();
        if text.is_empty() {
            buffer.clear();
            return;
        }
        let mut stream = serde_json::Deserializer::from_str(text).into_iter::<serde_json::Value>();
        match stream.next() {
            Some(Ok(doc)) => {
                let consumed = buffer.len() - text.len() + stream.byte_offset();
                buffer.drain(..consumed);
                handle_document(inner, doc).await;
            }
            Some(Err(e)) if e.is_eof() => return,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "discarding unparsable call channel input");
                buffer.clear();
                return;
            }
            None => return,
        }
    }
}

async fn handle_document(inner: &Arc<Inner>, doc: serde_json::Value) {
    match doc {
        serde_json::Value::Array(entries) => {
            let mut apis = HashMap::new();
            for entry in entries {
                match serde_json::from_value::<ApiDef>(entry) {
                    Ok(def) => {
                        apis.insert(def.api_syntax.clone(), def);
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping malformed API catalog entry"),
                }
            }
            tracing::debug!(apis = apis.len(), "API catalog received");
            *inner.apis.lock().await = apis;
            inner.received.notify_one();
        }
        serde_json::Value::Object(mut obj) => {
            *inner.response.lock().await = obj.remove("result");
            inner.received.notify_one();
        }
        other => {
            tracing::warn!(kind = %json_kind(&other), "unexpected call channel document");
        }
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
