use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::{
    clock::SharedClock,
    directory::{Directory, Role, eligible},
    error::{ChatError, DeleteDenied},
    presence::PresenceRegistry,
    protocol::ServerFrame,
};

use super::{
    model::{Message, MessageKind, NewMessage},
    store::MessageStore,
};

pub const DEFAULT_DELETE_WINDOW: Duration = Duration::minutes(2);

/// Every send goes through here: eligibility, persistence, then live push.
#[derive(Clone)]
pub struct MessageRouter {
    store: MessageStore,
    directory: Directory,
    presence: PresenceRegistry,
    clock: SharedClock,
    delete_window: Duration,
}

impl MessageRouter {
    pub fn new(
        store: MessageStore,
        directory: Directory,
        presence: PresenceRegistry,
        clock: SharedClock,
        delete_window: Duration,
    ) -> Self {
        Self { store, directory, presence, clock, delete_window }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn delete_window(&self) -> Duration {
        self.delete_window
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Stores the message, pushes it to the receiver if online and acks the sender.
    /// Nothing is pushed unless the store accepted the row.
    pub async fn send(
        &self,
        sender_id: &str,
        receiver_id: &str,
        text: &str,
        kind: MessageKind,
    ) -> Result<Message, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyBody);
        }
        self.ensure_eligible(sender_id, receiver_id).await?;

        let message = self.store
            .append(
                NewMessage {
                    sender_id: sender_id.to_owned(),
                    receiver_id: receiver_id.to_owned(),
                    message: text.to_owned(),
                    message_type: kind,
                },
                self.clock.now(),
            )
            .await?;

        if self.presence.push(receiver_id, ServerFrame::Chat { message: message.clone() }) {
            tracing::debug!(message_id = %message.id, receiver_id, "pushed live");
        } else {
            tracing::debug!(message_id = %message.id, receiver_id, "receiver offline, stored only");
        }
        self.presence.push(sender_id, ServerFrame::ChatSent { message: message.clone() });

        Ok(message)
    }

    pub async fn fetch_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        self.ensure_eligible(user_a, user_b).await?;
        Ok(self.store.conversation(user_a, user_b).await?)
    }

    pub async fn soft_delete(&self, message_id: Uuid, requesting_user_id: &str) -> Result<(), ChatError> {
        let Some(message) = self.store.get(message_id).await? else {
            return Err(ChatError::NotFound(message_id));
        };

        if message.sender_id != requesting_user_id {
            return Err(ChatError::Forbidden { id: message_id, reason: DeleteDenied::NotSender });
        }
        if message.is_deleted {
            return Err(ChatError::NotFound(message_id));
        }
        if self.clock.now() - message.created_at >= self.delete_window {
            return Err(ChatError::Forbidden { id: message_id, reason: DeleteDenied::WindowExpired });
        }

        // a concurrent delete may have won between the read and the update
        if !self.store.mark_deleted(message_id).await? {
            return Err(ChatError::NotFound(message_id));
        }

        tracing::info!(message_id = %message_id, user_id = requesting_user_id, "message deleted");
        Ok(())
    }

    /// Admin view of a pair's conversation, deleted messages included.
    pub async fn audit_conversation(&self, admin_id: &str, user_a: &str, user_b: &str) -> Result<Vec<Message>, ChatError> {
        match self.directory.active_user(admin_id).await? {
            Some(user) if user.role == Role::Admin => Ok(self.store.audit(user_a, user_b).await?),
            _ => Err(ChatError::AdminOnly),
        }
    }

    async fn ensure_eligible(&self, sender_id: &str, receiver_id: &str) -> Result<(), ChatError> {
        let Some(sender) = self.directory.participant(sender_id).await? else {
            return Err(ChatError::UnknownUser(sender_id.to_owned()));
        };
        let Some(receiver) = self.directory.participant(receiver_id).await? else {
            return Err(ChatError::UnknownUser(receiver_id.to_owned()));
        };

        if !eligible(&sender, &receiver) {
            return Err(ChatError::NotEligible {
                sender: sender_id.to_owned(),
                receiver: receiver_id.to_owned(),
            });
        }
        Ok(())
    }
}
