//! Who is reachable for live push right now.
//!
//! One live connection per user: registering again replaces the previous
//! entry, whose handle is orphaned. Process-local, never persisted, so
//! several server instances would each see only their own users.

use std::{fmt, sync::Arc};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::ServerFrame;

pub type FrameSender = mpsc::UnboundedSender<ServerFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(Uuid);

impl ConnectionHandle {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct PresenceEntry {
    handle: ConnectionHandle,
    sender: FrameSender,
    connected_at: OffsetDateTime,
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    by_user: Arc<DashMap<String, PresenceEntry>>,
    by_handle: Arc<DashMap<ConnectionHandle, String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, sender: FrameSender, connected_at: OffsetDateTime) -> ConnectionHandle {
        let handle = ConnectionHandle::new();
        self.by_handle.insert(handle, user_id.to_owned());

        let previous = self.by_user.insert(user_id.to_owned(), PresenceEntry { handle, sender, connected_at });
        if let Some(previous) = previous {
            self.by_handle.remove(&previous.handle);
            tracing::debug!(user_id, orphaned = %previous.handle, "replaced live connection");
        }
        handle
    }

    /// Removes the entry only while `handle` is still the user's current one.
    pub fn deregister(&self, handle: ConnectionHandle) -> Option<String> {
        let (_, user_id) = self.by_handle.remove(&handle)?;
        self.by_user.remove_if(&user_id, |_, entry| entry.handle == handle);
        Some(user_id)
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.by_user.get(user_id).map(|entry| entry.handle)
    }

    pub fn connected_at(&self, user_id: &str) -> Option<OffsetDateTime> {
        self.by_user.get(user_id).map(|entry| entry.connected_at)
    }

    /// The user a handle is bound to, or `None` once it was replaced or closed.
    pub fn user_of(&self, handle: ConnectionHandle) -> Option<String> {
        self.by_handle.get(&handle).map(|user_id| user_id.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.by_user.len()
    }

    /// Best effort. False when the user is offline or the connection is gone.
    pub fn push(&self, user_id: &str, frame: ServerFrame) -> bool {
        match self.by_user.get(user_id) {
            Some(entry) => entry.sender.send(frame).is_ok(),
            None => false,
        }
    }
}
