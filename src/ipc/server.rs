//! Unix domain socket server for IPC
//!
//! Provides request-response communication, key emulation, and push
//! notifications for key, hold and chord subscriptions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::emulator::KeyEmulator;
use crate::events::KeyCode;
use crate::hotkey::{keys, Chord, HotkeyError, HotkeyMultiplexer, KeyEventRouter};
use crate::observer::{ChannelObserver, ObserverRef};

use super::protocol::{
    DaemonStatus, ErrorCode, Notification, Request, Response, SubscriptionId, MAX_MESSAGE_LEN,
};

/// Everything a client request can reach
pub struct ServerContext {
    router: KeyEventRouter,
    mux: Arc<HotkeyMultiplexer>,
    emulator: Option<KeyEmulator>,
    start_time: Instant,
    next_subscription: AtomicU64,
}

impl ServerContext {
    /// `emulator` is `None` when this platform cannot synthesize keys
    pub fn new(
        router: KeyEventRouter,
        mux: Arc<HotkeyMultiplexer>,
        emulator: Option<KeyEmulator>,
    ) -> Self {
        Self {
            router,
            mux,
            emulator,
            start_time: Instant::now(),
            next_subscription: AtomicU64::new(1),
        }
    }

    fn status(&self) -> DaemonStatus {
        DaemonStatus {
            hook_attached: self.router.has_hook(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            pressed_keys: self.mux.pressed_keys(),
            subscriptions: self.mux.subscription_count(),
            chord_repeat: self.mux.chord_repeat(),
            ..DaemonStatus::default()
        }
    }
}

/// What a client subscribed to
enum Target {
    Key(KeyCode),
    Hold(KeyCode),
    Chord(Chord),
}

/// Subscriptions held by one connection
///
/// Dropping it removes them all from the multiplexer.
struct ClientSubscriptions {
    mux: Arc<HotkeyMultiplexer>,
    notes: mpsc::UnboundedSender<Notification>,
    active: HashMap<SubscriptionId, (Target, ObserverRef)>,
}

impl ClientSubscriptions {
    fn new(mux: Arc<HotkeyMultiplexer>, notes: mpsc::UnboundedSender<Notification>) -> Self {
        Self {
            mux,
            notes,
            active: HashMap::new(),
        }
    }

    fn add(&mut self, id: SubscriptionId, target: Target) {
        let observer: ObserverRef = ChannelObserver::with_sender(self.notes.clone(), move |event| {
            Notification::KeyEvent {
                subscription: id,
                event,
            }
        });

        match &target {
            Target::Key(code) => self.mux.subscribe_key_event(*code, Arc::clone(&observer)),
            Target::Hold(code) => self.mux.subscribe_hold(*code, Arc::clone(&observer)),
            Target::Chord(chord) => self.mux.subscribe_chord(chord.clone(), Arc::clone(&observer)),
        }
        self.active.insert(id, (target, observer));
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        match self.active.remove(&id) {
            Some((target, observer)) => {
                self.detach(&target, &observer);
                true
            }
            None => false,
        }
    }

    fn detach(&self, target: &Target, observer: &ObserverRef) {
        match target {
            Target::Key(code) => self.mux.unsubscribe_key_event(*code, observer),
            Target::Hold(code) => self.mux.unsubscribe_hold(*code, observer),
            Target::Chord(chord) => self.mux.unsubscribe_chord(chord, observer),
        };
    }
}

impl Drop for ClientSubscriptions {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            debug!(count = self.active.len(), "dropping client subscriptions");
        }
        for (_, (target, observer)) in std::mem::take(&mut self.active) {
            self.detach(&target, &observer);
        }
    }
}

fn resolve_key(name: &str) -> Result<KeyCode, Response> {
    keys::lookup(name)
        .map(|spec| spec.code)
        .ok_or_else(|| Response::error(ErrorCode::UnknownKey, format!("unknown key name: {name}")))
}

fn chord_error(e: HotkeyError) -> Response {
    let code = match e {
        HotkeyError::EmptyChord => ErrorCode::EmptyChord,
        HotkeyError::UnknownKey(_) => ErrorCode::UnknownKey,
    };
    Response::error(code, e.to_string())
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket and create the server
    pub fn new(socket_path: &Path, context: ServerContext) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to set socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            context: Arc::new(context),
            shutdown_tx,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until [`Server::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = shutdown_rx.recv() => return Ok(()),
            };

            match accepted {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut client_shutdown = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = client_shutdown.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (mut reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a half-read request is never
        // abandoned when a notification is ready first
        let (frame_tx, mut frame_rx) = mpsc::channel::<Vec<u8>>(16);
        let reader_task = tokio::spawn(async move {
            loop {
                match read_frame(&mut reader).await {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(?e, "client read failed");
                        break;
                    }
                }
            }
        });

        let (note_tx, mut note_rx) = mpsc::unbounded_channel();
        let mut subscriptions = ClientSubscriptions::new(Arc::clone(&context.mux), note_tx);

        let result = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else {
                        debug!("client disconnected");
                        break Ok(());
                    };
                    let response = match serde_json::from_slice::<Request>(&frame) {
                        Ok(request) => {
                            debug!(?request, "received request");
                            Self::process_request(request, &context, &mut subscriptions)
                        }
                        Err(e) => Response::error(ErrorCode::InvalidRequest, e.to_string()),
                    };
                    if let Err(e) = write_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }
                Some(note) = note_rx.recv() => {
                    if let Err(e) = write_message(&mut writer, &note).await {
                        break Err(e);
                    }
                }
            }
        };

        reader_task.abort();
        drop(subscriptions);
        result
    }

    /// Process a request and return a response
    fn process_request(
        request: Request,
        context: &ServerContext,
        subscriptions: &mut ClientSubscriptions,
    ) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(context.status()),

            Request::EmulateKeys {
                keys: names,
                delay_ms,
            } => {
                let Some(emulator) = &context.emulator else {
                    return Response::error(
                        ErrorCode::EmulationUnavailable,
                        "key synthesis is not available on this platform",
                    );
                };
                if names.is_empty() {
                    return Response::error(ErrorCode::EmptySequence, "no keys to emulate");
                }
                if let Some(unknown) = names.iter().find(|name| keys::lookup(name).is_none()) {
                    return Response::error(
                        ErrorCode::UnknownKey,
                        format!("unknown key name: {unknown}"),
                    );
                }
                emulator.emulate_keys_async(&names, delay_ms);
                Response::EmulationScheduled
            }

            Request::SubscribeKey { key } => match resolve_key(&key) {
                Ok(code) => Self::subscribe(context, subscriptions, Target::Key(code)),
                Err(response) => response,
            },

            Request::SubscribeHold { key } => match resolve_key(&key) {
                Ok(code) => Self::subscribe(context, subscriptions, Target::Hold(code)),
                Err(response) => response,
            },

            Request::SubscribeChord { keys: names } => match Chord::from_names(&names) {
                Ok(chord) => Self::subscribe(context, subscriptions, Target::Chord(chord)),
                Err(e) => chord_error(e),
            },

            Request::Unsubscribe { subscription } => {
                if subscriptions.remove(subscription) {
                    Response::Unsubscribed { subscription }
                } else {
                    Response::error(
                        ErrorCode::UnknownSubscription,
                        format!("no subscription {subscription} on this connection"),
                    )
                }
            }
        }
    }

    fn subscribe(
        context: &ServerContext,
        subscriptions: &mut ClientSubscriptions,
        target: Target,
    ) -> Response {
        let subscription = context.next_subscription.fetch_add(1, Ordering::Relaxed);
        subscriptions.add(subscription, target);
        info!(subscription, "client subscribed");
        Response::Subscribed { subscription }
    }

    /// Stop accepting, close client connections and remove the socket file
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Read one length-prefixed frame. `None` on a clean disconnect.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large: {len} bytes");
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Read and decode one message. `None` on a clean disconnect.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body).context("failed to parse message")?)),
        None => Ok(None),
    }
}

/// Send a length-prefixed JSON message
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}
