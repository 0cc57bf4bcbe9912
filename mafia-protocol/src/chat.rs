//! Chat messages and the ring buffers that bound their retention.

use std::collections::VecDeque;

use serde::Deserialize;
use serde::Serialize;

use crate::ids::MessageId;
use crate::ids::PlayerId;
use crate::ids::RoomId;

pub const PUBLIC_CHAT_CAPACITY: usize = 100;
pub const MAFIA_CHAT_CAPACITY: usize = 50;

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum ChatKind {
    Player,
    Mafia,
    System,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: Option<PlayerId>,
    pub sender_username: String,
    pub content: String,
    pub kind: ChatKind,
    pub timestamp_ms: u64,
}

/// Fixed-capacity FIFO retention buffer for one room's chat channel.
///
/// Mirrors the teacher's `Client::message_inbox` (a bounded `VecDeque`),
/// generalized from a per-player inbox to a per-room, per-channel ring
/// buffer since chat history here is replayed to reconnecting players
/// rather than drained once per client.
#[derive(Debug, Default)]
pub struct ChatRingBuffer {
    capacity: usize,
    messages: VecDeque<ChatMessage>,
    seen_ids: std::collections::HashSet<MessageId>,
}

impl ChatRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            messages: VecDeque::with_capacity(capacity),
            seen_ids: std::collections::HashSet::new(),
        }
    }

    /// Appends a message, evicting the oldest if at capacity.
    ///
    /// Idempotent on `id`: a duplicate id (retried intent) is silently
    /// dropped, per spec §7 "Retries".
    pub fn push(&mut self, message: ChatMessage) {
        if !self.seen_ids.insert(message.id) {
            return;
        }

        if self.messages.len() >= self.capacity {
            if let Some(evicted) = self.messages.pop_front() {
                self.seen_ids.remove(&evicted.id);
            }
        }

        self.messages.push_back(message);
    }

    /// Returns the full replay buffer in chronological order, oldest first.
    pub fn replay(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
