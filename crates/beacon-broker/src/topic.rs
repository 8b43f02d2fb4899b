// Fan-out primitive: a named channel with a map of live subscriber
// callbacks.
use beacon_wire::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub type SubscriberFn = dyn Fn(&Message) -> anyhow::Result<()> + Send + Sync;

struct Subscribers {
    next_id: u64,
    callbacks: HashMap<u64, Arc<SubscriberFn>>,
}

/// One topic and its live subscribers.
///
/// `publish` copies the callback set under a short-held lock and invokes
/// each callback outside it, so a slow subscriber cannot stall the
/// publisher or its peers. Callbacks must not block; connection-side
/// buffering belongs to the subscriber.
pub struct Topic {
    name: String,
    subscribers: Mutex<Subscribers>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Mutex::new(Subscribers {
                next_id: 0,
                callbacks: HashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a callback and returns its id, unique for the lifetime of
    /// this topic.
    pub fn subscribe(&self, callback: Box<SubscriberFn>) -> u64 {
        let mut subs = self.subscribers.lock().expect("subscribers lock");
        let id = subs.next_id;
        subs.next_id += 1;
        subs.callbacks.insert(id, Arc::from(callback));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut subs = self.subscribers.lock().expect("subscribers lock");
        subs.callbacks.remove(&id);
    }

    /// Delivers to every current subscriber. A subscriber that leaves during
    /// the delivery may still see this one in-flight message. Callback
    /// errors are logged and ignored; the topic tracks no delivery state.
    pub fn publish(&self, m: &Message) {
        let callbacks: Vec<Arc<SubscriberFn>> = {
            let subs = self.subscribers.lock().expect("subscribers lock");
            subs.callbacks.values().cloned().collect()
        };
        for callback in callbacks {
            if let Err(err) = callback(m) {
                tracing::debug!(topic = %self.name, error = %err, "subscriber delivery failed");
            }
        }
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.lock().expect("subscribers lock").callbacks.len()
    }
}
