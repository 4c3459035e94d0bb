use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::message::Message;

/// Messages further than this ahead of the oldest unacknowledged one wait.
pub const RELIABLE_WINDOW: u32 = 256;

#[derive(Debug, Clone)]
struct PendingMessage {
    index: u32,
    message: Message,
    last_sent: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct ReliableSender {
    pending: VecDeque<PendingMessage>,
    next_index: u32,
}

impl ReliableSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> u32 {
        let index = self.next_index;
        self.next_index = self.next_index.wrapping_add(1);
        self.pending.push_back(PendingMessage {
            index,
            message,
            last_sent: None,
        });
        index
    }

    /// Messages inside the window that were never sent or whose resend
    /// timer expired, oldest first.
    pub fn due(&self, now: Instant, resend_after: Duration) -> Vec<(u32, Message)> {
        let Some(oldest) = self.pending.front().map(|p| p.index) else {
            return Vec::new();
        };

        self.pending
            .iter()
            .take_while(|p| p.index.wrapping_sub(oldest) < RELIABLE_WINDOW)
            .filter(|p| p.last_sent.is_none_or(|t| now.duration_since(t) >= resend_after))
            .map(|p| (p.index, p.message.clone()))
            .collect()
    }

    pub fn mark_sent(&mut self, indices: &[u32], now: Instant) {
        for pending in &mut self.pending {
            if indices.contains(&pending.index) {
                pending.last_sent = Some(now);
            }
        }
    }

    pub fn acknowledge(&mut self, indices: &[u32]) {
        if indices.is_empty() {
            return;
        }
        self.pending.retain(|p| !indices.contains(&p.index));
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.len()
    }
}

/// Reorders reliable messages by index and releases them without gaps.
#[derive(Debug, Default)]
pub struct OrderedReceiver {
    next_index: u32,
    buffer: BTreeMap<u32, Message>,
}

impl OrderedReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages that became deliverable, in send order.
    /// Duplicates and indices outside the window are dropped.
    pub fn receive(&mut self, index: u32, message: Message) -> Vec<Message> {
        let ahead = index.wrapping_sub(self.next_index);
        if ahead >= RELIABLE_WINDOW {
            return Vec::new();
        }
        self.buffer.entry(index).or_insert(message);

        let mut ready = Vec::new();
        while let Some(message) = self.buffer.remove(&self.next_index) {
            ready.push(message);
            self.next_index = self.next_index.wrapping_add(1);
        }
        ready
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}
