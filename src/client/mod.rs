//! Client side of the chat socket.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnected -> ...`: after any
//! close the session waits a fixed delay and dials again, for as long as it
//! lives. Only [`ClientSession::disconnect`] (or dropping the session) stops
//! the loop. Sends issued while not connected are dropped, not queued.

mod buffer;

use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::{
    chat::model::{Message, MessageKind, image_body},
    protocol::{ClientFrame, ServerFrame},
};

pub use buffer::{BufferMark, MessageBuffer, merge};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Socket endpoint, e.g. `ws://localhost:8080/ws`.
    pub server_url: String,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self { server_url: server_url.into(), reconnect_delay: DEFAULT_RECONNECT_DELAY }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn url_for(&self, user_id: &str) -> String {
        format!("{}?userId={}", self.server_url, user_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

struct Shared {
    /// Bumped by every connect and disconnect. A driver only touches state
    /// while its own epoch is current, so an aborted one cannot resurrect it.
    epoch: Mutex<u64>,
    state: watch::Sender<SessionState>,
    outbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
    buffer: Mutex<MessageBuffer>,
    events: broadcast::Sender<ServerFrame>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    /// Starts a new epoch: drops the outbox and reports `Disconnected`.
    fn reset(&self) -> u64 {
        let mut epoch = lock(&self.epoch);
        *epoch += 1;
        lock(&self.outbox).take();
        self.state.send_replace(SessionState::Disconnected);
        *epoch
    }

    fn set_state(&self, epoch: u64, state: SessionState) -> bool {
        let current = lock(&self.epoch);
        if *current != epoch {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    fn open(&self, epoch: u64, outbox: mpsc::UnboundedSender<String>) -> bool {
        let current = lock(&self.epoch);
        if *current != epoch {
            return false;
        }
        *lock(&self.outbox) = Some(outbox);
        self.state.send_replace(SessionState::Connected);
        true
    }

    fn close(&self, epoch: u64) -> bool {
        let current = lock(&self.epoch);
        if *current != epoch {
            return false;
        }
        lock(&self.outbox).take();
        self.state.send_replace(SessionState::Disconnected);
        true
    }

    fn receive(&self, raw: &str) {
        let frame = match ServerFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unreadable server frame");
                return;
            }
        };

        if let Some(message) = frame.message() {
            lock(&self.buffer).push(message.clone());
        }
        // nobody listening is fine
        let _ = self.events.send(frame);
    }
}

pub struct ClientSession {
    config: ClientConfig,
    user_id: Option<String>,
    shared: Arc<Shared>,
    driver: Option<JoinHandle<()>>,
}

impl ClientSession {
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (events, _) = broadcast::channel(256);

        Self {
            config,
            user_id: None,
            shared: Arc::new(Shared {
                epoch: Mutex::new(0),
                state,
                outbox: Mutex::new(None),
                buffer: Mutex::new(MessageBuffer::default()),
                events,
            }),
            driver: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Every frame the server sends, as it arrives.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerFrame> {
        self.shared.events.subscribe()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Starts the connect/reconnect loop. Empty ids are ignored; a running loop is replaced.
    pub fn connect(&mut self, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let epoch = self.shared.reset();

        self.user_id = Some(user_id.to_owned());
        let url = self.config.url_for(user_id);
        let delay = self.config.reconnect_delay;
        self.driver = Some(tokio::spawn(drive(self.shared.clone(), epoch, url, delay)));
    }

    /// Stops the loop, including any pending reconnect, and closes the socket.
    pub fn disconnect(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.shared.reset();
    }

    pub fn send(&self, receiver_id: &str, text: &str, kind: MessageKind) -> Result<SendOutcome, ClientError> {
        let Some(sender_id) = self.user_id.clone() else {
            return Ok(SendOutcome::Dropped);
        };
        if self.state() != SessionState::Connected {
            tracing::debug!(receiver_id, "not connected, dropping send");
            return Ok(SendOutcome::Dropped);
        }

        let frame = serde_json::to_string(&ClientFrame::Chat {
            sender_id,
            receiver_id: receiver_id.to_owned(),
            text: text.to_owned(),
            message_type: kind,
        })?;

        let outbox = lock(&self.shared.outbox);
        match outbox.as_ref().map(|tx| tx.send(frame)) {
            Some(Ok(())) => Ok(SendOutcome::Sent),
            _ => Ok(SendOutcome::Dropped),
        }
    }

    pub fn send_image(&self, receiver_id: &str, description: &str) -> Result<SendOutcome, ClientError> {
        self.send(receiver_id, &image_body(description), MessageKind::Image)
    }

    /// Take before fetching history, then hand it to [`Self::conversation_since`].
    pub fn history_mark(&self) -> BufferMark {
        lock(&self.shared.buffer).mark()
    }

    /// History for `peer_id` fetched just now, merged with what arrived live.
    pub fn conversation(&self, peer_id: &str, history: Vec<Message>) -> Vec<Message> {
        let me = self.user_id.as_deref().unwrap_or_default();
        lock(&self.shared.buffer).conversation(me, peer_id, history)
    }

    /// Like [`Self::conversation`], keeping live messages that arrived after `mark`
    /// even when the fetched history predates them.
    pub fn conversation_since(&self, peer_id: &str, history: Vec<Message>, mark: BufferMark) -> Vec<Message> {
        let me = self.user_id.as_deref().unwrap_or_default();
        lock(&self.shared.buffer).conversation_since(me, peer_id, history, mark)
    }

    pub fn live_messages(&self) -> Vec<Message> {
        lock(&self.shared.buffer).live()
    }

    /// Drops a message from the live buffer, e.g. after deleting it.
    pub fn forget(&self, message_id: Uuid) {
        lock(&self.shared.buffer).forget(message_id);
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

async fn drive(shared: Arc<Shared>, epoch: u64, url: String, delay: Duration) {
    loop {
        if !shared.set_state(epoch, SessionState::Connecting) {
            return;
        }

        match connect_async(url.as_str()).await {
            Ok((stream, _)) => {
                tracing::info!("chat socket connected");
                run_connection(&shared, epoch, stream).await;
                tracing::info!("chat socket closed");
            }
            Err(e) => tracing::debug!(error = %e, "chat socket connect failed"),
        }

        if !shared.close(epoch) {
            return;
        }
        tokio::time::sleep(delay).await;
    }
}

async fn run_connection<S>(shared: &Shared, epoch: u64, stream: tokio_tungstenite::WebSocketStream<S>)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    if !shared.open(epoch, tx) {
        return;
    }

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                let Some(text) = outgoing else { break };
                if sink.send(WsMessage::text(text)).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => shared.receive(text.as_str()),
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
