//! Messages held back until the connection authenticates.

use std::collections::VecDeque;

use serde_json::{Map, Value};
use shiftwire_shared::ClientMessage;

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    pub channel: String,
    pub payload: Map<String, Value>,
}

impl QueuedMessage {
    pub fn to_client_message(&self) -> ClientMessage {
        ClientMessage::channel_message(self.channel.clone(), self.payload.clone())
    }
}

/// FIFO of outbound channel messages, bounded by `capacity`.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<QueuedMessage>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message; when full, the oldest entry is evicted and returned.
    pub fn push(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Put a message back at the head after a failed write. When that
    /// overfills the queue, the newest entry is evicted and returned.
    pub fn requeue(&mut self, message: QueuedMessage) -> Option<QueuedMessage> {
        self.items.push_front(message);
        if self.items.len() > self.capacity {
            self.items.pop_back()
        } else {
            None
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pop(&mut self) -> Option<QueuedMessage> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(n: u64) -> QueuedMessage {
        let mut payload = Map::new();
        payload.insert("n".into(), json!(n));
        QueuedMessage {
            channel: "chat".into(),
            payload,
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let mut queue = OutboundQueue::new(8);
        for n in 1..=3 {
            assert!(queue.push(msg(n)).is_none());
        }
        let drained: Vec<_> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(drained, vec![msg(1), msg(2), msg(3)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(msg(1));
        queue.push(msg(2));
        assert_eq!(queue.push(msg(3)), Some(msg(1)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(msg(2)));
    }

    #[test]
    fn requeue_restores_head() {
        let mut queue = OutboundQueue::new(4);
        queue.push(msg(1));
        queue.push(msg(2));
        let head = queue.pop().unwrap();
        assert_eq!(queue.requeue(head), None);
        assert_eq!(queue.pop(), Some(msg(1)));
    }

    #[test]
    fn requeue_into_full_queue_evicts_newest() {
        let mut queue = OutboundQueue::new(2);
        queue.push(msg(1));
        queue.push(msg(2));
        assert_eq!(queue.requeue(msg(0)), Some(msg(2)));
        assert_eq!(queue.pop(), Some(msg(0)));
        assert_eq!(queue.pop(), Some(msg(1)));
        assert_eq!(queue.capacity(), 2);
    }

    #[test]
    fn queued_payload_becomes_channel_frame() {
        let frame = msg(7).to_client_message().to_json().unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"type": "channel_message", "channel": "chat", "n": 7}));
    }
}
