// file: src/subscriptions.rs
// description: live set of subscription topics, replayed on every (re)connect

use crate::{
    connection::SubscriptionSink,
    types::{ClientMessage, Subscription},
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Topics the process currently wants updates for, keyed by canonical form.
///
/// The set held here is exactly what gets re-sent on the next reconnect.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionRegistry {
    topics: BTreeMap<String, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `topic`; sends a subscribe frame only when the topic is new and the sink is connected.
    /// Returns `true` if the topic was not registered before.
    pub fn subscribe(&mut self, topic: Subscription, sink: &mut impl SubscriptionSink) -> bool {
        let key = topic.canonical();
        if self.topics.contains_key(&key) {
            debug!(topic = %key, "Already subscribed");
            return false;
        }

        if sink.is_connected() {
            match sink.send_message(&ClientMessage::subscribe(&topic)) {
                Ok(()) => debug!(topic = %key, "Subscribed"),
                Err(e) => warn!(topic = %key, error = %e, "Subscribe send failed, will replay on reconnect"),
            }
        } else {
            debug!(topic = %key, "Queued subscription until connected");
        }

        self.topics.insert(key, topic);
        true
    }

    /// Remove `topic`. Unknown topics are a no-op. Returns `true` if something was removed.
    pub fn unsubscribe(&mut self, topic: &Subscription, sink: &mut impl SubscriptionSink) -> bool {
        let key = topic.canonical();
        if self.topics.remove(&key).is_none() {
            return false;
        }

        if sink.is_connected()
            && let Err(e) = sink.send_message(&ClientMessage::unsubscribe(topic))
        {
            warn!(topic = %key, error = %e, "Unsubscribe send failed");
        }
        debug!(topic = %key, "Unsubscribed");
        true
    }

    pub fn contains(&self, topic: &Subscription) -> bool {
        self.topics.contains_key(&topic.canonical())
    }

    /// Snapshot in canonical-string order.
    pub fn topics(&self) -> Vec<Subscription> {
        self.topics.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrackerError;
    use crate::types::SubscriptionAction;

    #[derive(Default)]
    struct RecordingSink {
        connected: bool,
        fail: bool,
        sent: Vec<ClientMessage>,
    }

    impl SubscriptionSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected
        }

        fn send_message(&mut self, message: &ClientMessage) -> Result<(), TrackerError> {
            if self.fail {
                return Err(TrackerError::SendFailed("socket gone".into()));
            }
            self.sent.push(message.clone());
            Ok(())
        }
    }

    #[test]
    fn duplicate_subscribe_sends_once() {
        let mut sink = RecordingSink {
            connected: true,
            ..Default::default()
        };
        let mut registry = SubscriptionRegistry::new();

        assert!(registry.subscribe(Subscription::task("t1"), &mut sink));
        assert!(!registry.subscribe(Subscription::task("t1"), &mut sink));

        assert_eq!(sink.sent.len(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn queued_while_disconnected() {
        let mut sink = RecordingSink::default();
        let mut registry = SubscriptionRegistry::new();

        registry.subscribe(Subscription::execution("e1"), &mut sink);
        registry.subscribe(Subscription::All, &mut sink);

        assert!(sink.sent.is_empty());
        assert_eq!(
            registry.topics(),
            vec![Subscription::All, Subscription::execution("e1")]
        );
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let mut sink = RecordingSink {
            connected: true,
            ..Default::default()
        };
        let mut registry = SubscriptionRegistry::new();

        assert!(!registry.unsubscribe(&Subscription::task("never"), &mut sink));
        assert!(sink.sent.is_empty());

        registry.subscribe(Subscription::task("t1"), &mut sink);
        assert!(registry.unsubscribe(&Subscription::task("t1"), &mut sink));
        assert!(!registry.unsubscribe(&Subscription::task("t1"), &mut sink));

        assert_eq!(sink.sent.len(), 2);
        assert_eq!(sink.sent[1].action, SubscriptionAction::Unsubscribe);
        assert!(registry.is_empty());
    }

    #[test]
    fn failed_send_keeps_topic_registered() {
        let mut sink = RecordingSink {
            connected: true,
            fail: true,
            ..Default::default()
        };
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.subscribe(Subscription::task("t1"), &mut sink));
        assert!(registry.contains(&Subscription::task("t1")));
    }
}
