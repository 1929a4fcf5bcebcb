//! UDP export stream client.
//!
//! Owns the receive socket, runs the byte-level decoder and field assembler
//! over incoming datagrams, and dispatches decoded field values to
//! subscribers. Also tracks the aircraft-name sentinel: the first non-empty
//! value latches the airframe identity and triggers the per-aircraft schema
//! merge; a later empty value raises the mission-ended event exactly once.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use dcslink_core::assembler::{FieldAssembler, Notification};
use dcslink_core::config::LinkConfig;
use dcslink_core::protocol::StreamDecoder;
use dcslink_core::schema::{default_schema_dir, SchemaSet};
use dcslink_core::types::{
    LinkError, Result, Value, AIRCRAFT_NAME_FIELD, MISSION_ENDED_EVENT,
};

/// Handle returned by [`ExportClient::on`], used to remove the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

struct Inner {
    config: LinkConfig,
    schema: Mutex<SchemaSet>,
    decoder: Mutex<StreamDecoder>,
    assembler: Mutex<FieldAssembler>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, Callback)>>>,
    aircraft: Mutex<Option<String>>,
    identified: Notify,
    first_value: Notify,
    connected: AtomicBool,
    last_frame: Mutex<Option<Instant>>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    next_id: AtomicU64,
    events_tx: broadcast::Sender<Notification>,
}

/// Client for the export stream session.
#[derive(Clone)]
pub struct ExportClient {
    inner: Arc<Inner>,
}

impl ExportClient {
    /// Load the schema and prepare a disconnected client.
    ///
    /// Fails fast if the schema directory cannot be found or the preload
    /// documents do not parse; a session without a registry decodes nothing.
    pub fn new(config: LinkConfig) -> Result<Self> {
        let dir = match &config.schema_dir {
            Some(dir) => dir.clone(),
            None => default_schema_dir().ok_or_else(|| {
                LinkError::Schema("no schema directory configured or found".into())
            })?,
        };
        let schema = SchemaSet::load(dir)?;
        let assembler = FieldAssembler::new(schema.registry());
        let (events_tx, _) = broadcast::channel(256);

        Ok(ExportClient {
            inner: Arc::new(Inner {
                config,
                schema: Mutex::new(schema),
                decoder: Mutex::new(StreamDecoder::new()),
                assembler: Mutex::new(assembler),
                subscribers: Mutex::new(HashMap::new()),
                aircraft: Mutex::new(None),
                identified: Notify::new(),
                first_value: Notify::new(),
                connected: AtomicBool::new(false),
                last_frame: Mutex::new(None),
                socket: Mutex::new(None),
                task: Mutex::new(None),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(1),
                events_tx,
            }),
        })
    }

    /// Bind the receive socket and start the listen task.
    ///
    /// A failed multicast join is logged and tolerated; unicast reception on
    /// the bound port still works, which is what loopback setups use.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let net = &self.inner.config.network;
        let bind = SocketAddrV4::new(net.bind_addr, net.receive_port);
        let socket = match UdpSocket::bind(bind).await {
            Ok(s) => s,
            Err(e) => {
                self.inner.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        if let Err(e) = socket.join_multicast_v4(net.multicast_group, net.bind_addr) {
            tracing::warn!(
                group = %net.multicast_group,
                error = %e,
                "multicast join failed, receiving unicast only"
            );
        }
        let socket = Arc::new(socket);
        *self.inner.socket.lock().await = Some(socket.clone());

        let inner = self.inner.clone();
        let handle = tokio::spawn(listen_loop(inner, socket));
        *self.inner.task.lock().await = Some(handle);

        tracing::debug!(bind = %bind, "export stream listener started");
        Ok(())
    }

    /// Wait until the host identifies the active aircraft.
    ///
    /// Returns the latched aircraft name, or [`LinkError::Timeout`] if no
    /// non-empty name arrives within `timeout`.
    pub async fn wait_for_aircraft(&self, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.identified.notified();
            if let Some(name) = self.inner.aircraft.lock().await.clone() {
                return Ok(name);
            }
            match deadline {
                Some(d) => {
                    if tokio::time::timeout_at(d, notified).await.is_err() {
                        // No aircraft means no session; release the socket.
                        self.close().await;
                        return Err(LinkError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wait until the stream produces its first value for any recognized
    /// field. This is the liveness signal: the host is exporting and the
    /// schema matches. On timeout the session is torn down.
    pub async fn wait_for_data(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.inner.first_value.notified();
            if self.inner.connected.load(Ordering::SeqCst) {
                return Ok(());
            }
            match deadline {
                Some(d) => {
                    if tokio::time::timeout_at(d, notified).await.is_err() {
                        self.close().await;
                        return Err(LinkError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Every identifier a subscriber can register for: all schema fields
    /// except the aircraft-name sentinel, plus [`MISSION_ENDED_EVENT`].
    pub async fn event_names(&self) -> std::collections::HashSet<String> {
        let schema = self.inner.schema.lock().await;
        let mut names: std::collections::HashSet<String> = schema
            .field_ids()
            .filter(|id| *id != AIRCRAFT_NAME_FIELD)
            .map(str::to_string)
            .collect();
        names.insert(MISSION_ENDED_EVENT.to_string());
        names
    }

    /// Subscribe a callback to one field identifier (or to
    /// [`MISSION_ENDED_EVENT`]).
    pub async fn on(
        &self,
        field: &str,
        callback: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> SubscriptionId {
        if !self.event_names().await.contains(field) {
            tracing::warn!(field, "subscribing to an identifier the schema does not list");
        }
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .subscribers
            .lock()
            .await
            .entry(field.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Unknown handles are ignored.
    pub async fn off(&self, field: &str, id: SubscriptionId) {
        let mut subs = self.inner.subscribers.lock().await;
        if let Some(list) = subs.get_mut(field) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subs.remove(field);
            }
        }
    }

    /// Broadcast receiver carrying every dispatched notification.
    pub fn events(&self) -> broadcast::Receiver<Notification> {
        self.inner.events_tx.subscribe()
    }

    /// Send a raw command string to the host's command port. The host's
    /// command format is `"IDENTIFIER value\n"`; formatting is left to the
    /// caller.
    pub async fn send(&self, command: &str) -> Result<()> {
        let socket = self
            .inner
            .socket
            .lock()
            .await
            .clone()
            .ok_or(LinkError::NotConnected)?;
        let net = &self.inner.config.network;
        let target = SocketAddrV4::new(net.server_ip, net.send_port);
        socket.send_to(command.as_bytes(), target).await?;
        tracing::debug!(command, "command sent");
        Ok(())
    }

    /// The latched aircraft name, if a mission is active.
    pub async fn aircraft_name(&self) -> Option<String> {
        self.inner.aircraft.lock().await.clone()
    }

    /// Time since the last datagram arrived. `None` before the first one.
    pub async fn last_frame_age(&self) -> Option<Duration> {
        self.inner
            .last_frame
            .lock()
            .await
            .map(|t| t.elapsed())
    }

    /// True if a datagram arrived within `window`.
    pub async fn is_alive(&self, window: Duration) -> bool {
        matches!(self.last_frame_age().await, Some(age) if age <= window)
    }

    /// Local address of the bound receive socket.
    pub async fn local_addr(&self) -> Result<SocketAddr> {
        let socket = self
            .inner
            .socket
            .lock()
            .await
            .clone()
            .ok_or(LinkError::NotConnected)?;
        Ok(socket.local_addr()?)
    }

    /// Stop the listen task, drop the socket, and discard all decode state.
    /// Subscriptions survive and fire again after a reconnect.
    pub async fn close(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.lock().await.take() {
            handle.abort();
        }
        *self.inner.socket.lock().await = None;
        reset_decode_state(&self.inner).await;
    }
}

/// Discard everything tied to the byte stream: mid-block decoder state and
/// half-filled string buffers must never survive into the next session.
async fn reset_decode_state(inner: &Inner) {
    inner.decoder.lock().await.reset();
    let registry = inner.schema.lock().await.registry();
    inner.assembler.lock().await.replace_registry(registry);
}

async fn listen_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; 65536];
    while inner.running.load(Ordering::SeqCst) {
        let len = match socket.recv_from(&mut buf).await {
            Ok((len, _)) => len,
            Err(e) => {
                if inner.running.load(Ordering::SeqCst) {
                    tracing::error!(error = %e, "export stream receive failed");
                }
                inner.running.store(false, Ordering::SeqCst);
                return;
            }
        };
        *inner.last_frame.lock().await = Some(Instant::now());
        handle_datagram(&inner, &buf[..len]).await;
    }
}

async fn handle_datagram(inner: &Arc<Inner>, bytes: &[u8]) {
    let events = inner.decoder.lock().await.feed(bytes);
    let notifications = inner.assembler.lock().await.apply_all(&events);
    if !notifications.is_empty() && !inner.connected.swap(true, Ordering::SeqCst) {
        inner.first_value.notify_waiters();
    }
    for note in notifications {
        if &*note.field == AIRCRAFT_NAME_FIELD {
            // The sentinel is consumed here; subscribers see the synthetic
            // mission-ended event, never the raw name field.
            let name = note.value.as_text().unwrap_or("").to_string();
            handle_aircraft_name(inner, &name).await;
            continue;
        }
        dispatch(inner, note).await;
    }
}

async fn handle_aircraft_name(inner: &Arc<Inner>, name: &str) {
    if name.is_empty() {
        // Empty after having been set means the mission ended. take() makes
        // the transition fire exactly once even though the field keeps
        // re-notifying empty every frame.
        let ended = inner.aircraft.lock().await.take();
        if let Some(prev) = ended {
            tracing::info!(aircraft = %prev, "mission ended");
            dispatch(
                inner,
                Notification {
                    field: Arc::from(MISSION_ENDED_EVENT),
                    value: Value::Text(String::new()),
                },
            )
            .await;
            // The session is over; stop listening, release the socket, and
            // discard decode state. The next mission needs a fresh connect().
            inner.running.store(false, Ordering::SeqCst);
            inner.connected.store(false, Ordering::SeqCst);
            *inner.socket.lock().await = None;
            reset_decode_state(inner).await;
        }
        return;
    }

    {
        let guard = inner.aircraft.lock().await;
        if guard.as_deref() == Some(name) {
            return;
        }
    }

    let mut schema = inner.schema.lock().await;
    match schema.load_aircraft(name) {
        Ok(()) => {
            let registry = schema.registry();
            drop(schema);
            inner.assembler.lock().await.replace_registry(registry);
            *inner.aircraft.lock().await = Some(name.to_string());
            tracing::info!(aircraft = %name, "aircraft identified, schema merged");
            inner.identified.notify_waiters();
        }
        Err(e) => {
            tracing::error!(aircraft = %name, error = %e, "aircraft schema load failed");
        }
    }
}

async fn dispatch(inner: &Arc<Inner>, note: Notification) {
    let _ = inner.events_tx.send(note.clone());

    let callbacks: Vec<Callback> = {
        let subs = inner.subscribers.lock().await;
        match subs.get(&*note.field) {
            Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
            None => return,
        }
    };
    for cb in callbacks {
        // A panicking subscriber must not take down the listen task or
        // starve the remaining subscribers.
        let result = catch_unwind(AssertUnwindSafe(|| cb(&note.field, &note.value)));
        if result.is_err() {
            tracing::error!(field = %note.field, "subscriber callback panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
