//! Channel subscriptions and the global subscriber count.
//!
//! The registry is the single source of truth for "does anyone still need
//! the socket". Each channel keeps its subscribers in registration order so
//! fan-out is deterministic; a channel disappears with its last subscriber.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use shiftwire_shared::{ChannelMessage, RealtimeError};

/// Callback invoked for every message routed to a channel.
pub type MessageHandler = Arc<dyn Fn(&ChannelMessage) + Send + Sync>;

/// Identifies one subscription. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Free-form label used in logs.
    pub label: Option<String>,
}

impl SubscribeOptions {
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }
}

#[derive(Default)]
struct Channel {
    subscribers: BTreeMap<SubscriberId, Option<MessageHandler>>,
}

/// Result of [`SubscriptionRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Added {
    pub id: SubscriberId,
    /// The registry was empty before this subscriber.
    pub first_overall: bool,
    pub channel_created: bool,
}

/// Result of [`SubscriptionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removed {
    pub channel_removed: bool,
    /// No subscribers remain on any channel.
    pub now_empty: bool,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    channels: HashMap<String, Channel>,
    subscriber_count: usize,
    next_id: u64,
}

impl SubscriptionRegistry {
    pub fn add(&mut self, channel: &str, handler: Option<MessageHandler>) -> Added {
        self.next_id += 1;
        let id = SubscriberId(self.next_id);
        let first_overall = self.subscriber_count == 0;

        let channel_created = !self.channels.contains_key(channel);
        self.channels
            .entry(channel.to_string())
            .or_default()
            .subscribers
            .insert(id, handler);
        self.subscriber_count += 1;

        Added {
            id,
            first_overall,
            channel_created,
        }
    }

    /// Remove a subscriber. Returns `None` if it was not registered, which
    /// makes repeated removal a no-op.
    pub fn remove(&mut self, channel: &str, id: SubscriberId) -> Option<Removed> {
        let entry = self.channels.get_mut(channel)?;
        entry.subscribers.remove(&id)?;
        self.subscriber_count -= 1;

        let channel_removed = entry.subscribers.is_empty();
        if channel_removed {
            self.channels.remove(channel);
        }
        Some(Removed {
            channel_removed,
            now_empty: self.subscriber_count == 0,
        })
    }

    /// Handlers for `channel` in registration order. Subscribers without a
    /// handler are skipped.
    pub fn handlers(&self, channel: &str) -> Vec<MessageHandler> {
        self.channels
            .get(channel)
            .map(|c| c.subscribers.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains_key(channel)
    }

    #[cfg(test)]
    pub fn channel_subscribers(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |c| c.subscribers.len())
    }

    pub fn clear(&mut self) {
        self.channels.clear();
        self.subscriber_count = 0;
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("channels", &self.channels.len())
            .field("subscribers", &self.subscriber_count)
            .finish()
    }
}

/// Invoke each handler with `message`. A panicking handler is reported and
/// does not stop delivery to the rest.
pub fn deliver(handlers: &[MessageHandler], message: &ChannelMessage) -> Vec<RealtimeError> {
    handlers
        .iter()
        .filter_map(|handler| {
            panic::catch_unwind(AssertUnwindSafe(|| handler(message)))
                .err()
                .map(|payload| RealtimeError::ChannelHandler {
                    channel: message.channel.clone(),
                    message: panic_message(payload.as_ref()),
                })
        })
        .collect()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::Map;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> MessageHandler {
        let log = Arc::clone(log);
        Arc::new(move |_: &ChannelMessage| log.lock().push(name))
    }

    fn message(channel: &str) -> ChannelMessage {
        ChannelMessage::new(Some(channel.to_string()), Map::new())
    }

    #[test]
    fn first_subscriber_is_reported_once() {
        let mut registry = SubscriptionRegistry::default();
        let a = registry.add("chat", None);
        let b = registry.add("chat", None);
        let c = registry.add("presence", None);
        assert!(a.first_overall && a.channel_created);
        assert!(!b.first_overall && !b.channel_created);
        assert!(!c.first_overall && c.channel_created);
        assert_eq!(registry.subscriber_count(), 3);
        assert_eq!(registry.channel_count(), 2);
    }

    #[test]
    fn channel_disappears_with_last_subscriber() {
        let mut registry = SubscriptionRegistry::default();
        let a = registry.add("chat", None);
        let b = registry.add("chat", None);

        let removed = registry.remove("chat", a.id).unwrap();
        assert!(!removed.channel_removed && !removed.now_empty);
        assert!(registry.contains("chat"));

        let removed = registry.remove("chat", b.id).unwrap();
        assert!(removed.channel_removed && removed.now_empty);
        assert!(!registry.contains("chat"));
    }

    #[test]
    fn double_remove_is_a_noop() {
        let mut registry = SubscriptionRegistry::default();
        let a = registry.add("chat", None);
        registry.add("chat", None);
        assert!(registry.remove("chat", a.id).is_some());
        assert!(registry.remove("chat", a.id).is_none());
        assert!(registry.remove("nope", a.id).is_none());
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = SubscriptionRegistry::default();
        registry.add("chat", Some(recorder(&log, "first")));
        registry.add("chat", None);
        registry.add("chat", Some(recorder(&log, "third")));
        registry.add("presence", Some(recorder(&log, "other")));

        let handlers = registry.handlers("chat");
        assert_eq!(handlers.len(), 2);
        assert!(deliver(&handlers, &message("chat")).is_empty());
        assert_eq!(*log.lock(), vec!["first", "third"]);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let panicking: MessageHandler = Arc::new(|_: &ChannelMessage| panic!("boom"));
        let handlers = vec![panicking, recorder(&log, "survivor")];

        let errors = deliver(&handlers, &message("chat"));
        assert_eq!(*log.lock(), vec!["survivor"]);
        assert_eq!(
            errors,
            vec![RealtimeError::ChannelHandler {
                channel: "chat".into(),
                message: "boom".into()
            }]
        );
    }

    #[test]
    fn clear_drops_everything() {
        let mut registry = SubscriptionRegistry::default();
        registry.add("chat", None);
        registry.add("presence", None);
        registry.clear();
        assert_eq!(registry.subscriber_count(), 0);
        assert_eq!(registry.channel_count(), 0);
        assert!(registry.add("chat", None).first_overall);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        const CHANNELS: [&str; 3] = ["chat", "presence", "shifts"];

        proptest! {
            #[test]
            fn count_matches_channel_sets(ops in prop::collection::vec((any::<bool>(), 0usize..3, any::<prop::sample::Index>()), 0..64)) {
                let mut registry = SubscriptionRegistry::default();
                let mut live: Vec<(&str, SubscriberId)> = Vec::new();

                for (add, channel, pick) in ops {
                    if add || live.is_empty() {
                        let name = CHANNELS[channel];
                        let added = registry.add(name, None);
                        prop_assert_eq!(added.first_overall, live.is_empty());
                        live.push((name, added.id));
                    } else {
                        let (name, id) = live.remove(pick.index(live.len()));
                        let removed = registry.remove(name, id);
                        prop_assert!(removed.is_some());
                        prop_assert_eq!(removed.map(|r| r.now_empty), Some(live.is_empty()));
                    }

                    let total: usize = CHANNELS.iter().map(|c| registry.channel_subscribers(c)).sum();
                    prop_assert_eq!(registry.subscriber_count(), total);
                    prop_assert_eq!(registry.subscriber_count(), live.len());
                    for name in CHANNELS {
                        let expected = live.iter().any(|(c, _)| *c == name);
                        prop_assert_eq!(registry.contains(name), expected);
                    }
                }
            }
        }
    }
}
