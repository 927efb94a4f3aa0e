use std::collections::HashMap;

use uuid::Uuid;

use crate::chat::model::Message;

/// Position in the live stream. Take one before fetching history; every
/// message that arrived before it is covered by that history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferMark(u64);

#[derive(Debug)]
struct Arrival {
    seq: u64,
    message: Message,
}

/// Messages that arrived live, kept until history catches up with them.
#[derive(Debug, Default)]
pub struct MessageBuffer {
    live: Vec<Arrival>,
    next_seq: u64,
}

impl MessageBuffer {
    /// A message seen again (push then ack) replaces the earlier copy.
    pub fn push(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;

        match self.live.iter_mut().find(|a| a.message.id == message.id) {
            Some(existing) => *existing = Arrival { seq, message },
            None => self.live.push(Arrival { seq, message }),
        }
    }

    pub fn mark(&self) -> BufferMark {
        BufferMark(self.next_seq)
    }

    pub fn forget(&mut self, id: Uuid) {
        self.live.retain(|a| a.message.id != id);
    }

    pub fn live(&self) -> Vec<Message> {
        self.live.iter().map(|a| a.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// History fetched just now, merged with the pair's live messages.
    pub fn conversation(&mut self, me: &str, peer: &str, history: Vec<Message>) -> Vec<Message> {
        let now = self.mark();
        self.conversation_since(me, peer, history, now)
    }

    /// History fetched after `mark` replaces the pair's live messages that
    /// arrived before it, deleted ones included. Later arrivals are kept and merged.
    pub fn conversation_since(
        &mut self,
        me: &str,
        peer: &str,
        history: Vec<Message>,
        mark: BufferMark,
    ) -> Vec<Message> {
        self.live.retain(|a| !a.message.involves(me, peer) || BufferMark(a.seq) >= mark);

        let live = self
            .live
            .iter()
            .filter(|a| a.message.involves(me, peer))
            .map(|a| a.message.clone());
        merge(history.into_iter().chain(live))
    }
}

/// De-duplicates by id and orders by creation time.
pub fn merge(messages: impl IntoIterator<Item = Message>) -> Vec<Message> {
    let mut by_id: HashMap<Uuid, Message> = HashMap::new();
    for message in messages {
        by_id.entry(message.id).or_insert(message);
    }

    let mut merged: Vec<Message> = by_id.into_values().collect();
    merged.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    merged
}
