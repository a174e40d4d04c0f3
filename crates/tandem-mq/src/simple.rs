//! In-memory message queue backend.
//!
//! Every consumer owns an inbox. `produce` appends the message to the inbox
//! of each matching consumer while holding the registry lock, then drains
//! those inboxes after releasing it. Whoever finds an inbox idle delivers
//! all of its pending messages, so delivery to one consumer is sequential
//! and in produce order, callbacks never run under the registry lock, and a
//! callback may itself produce, consume, or stop consuming.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tandem_core::ports::{ConsumerCallback, MessageQueue, QueueHandle, QueueRef};
use tandem_core::{Error, Result};
use tracing::{debug, info};

use crate::config::MqConfig;
use crate::connector::MqBackend;
use crate::metrics::MqMetrics;
use crate::topic::Topic;

#[derive(Debug, Clone)]
struct Message {
    routing_key: String,
    payload: Value,
}

#[derive(Default)]
struct Inbox {
    pending: VecDeque<Message>,
    delivering: bool,
    stopped: bool,
}

struct Consumer {
    topics: Vec<Topic>,
    callback: ConsumerCallback,
    persistent_name: Option<String>,
    inbox: Mutex<Inbox>,
}

impl Consumer {
    fn matches(&self, routing_key: &str) -> bool {
        self.topics.iter().any(|t| t.matches(routing_key))
    }

    fn drain(&self, metrics: &MqMetrics) {
        {
            let mut inbox = lock(&self.inbox);
            if inbox.delivering || inbox.stopped {
                return;
            }
            inbox.delivering = true;
        }
        let _unwind = UnwindGuard(&self.inbox);

        loop {
            let message = {
                let mut inbox = lock(&self.inbox);
                let next = if inbox.stopped {
                    None
                } else {
                    inbox.pending.pop_front()
                };
                match next {
                    Some(message) => message,
                    None => {
                        inbox.delivering = false;
                        return;
                    }
                }
            };
            (self.callback)(&message.routing_key, &message.payload);
            metrics.record_delivery();
        }
    }
}

/// Clears the delivering flag if a callback panics mid-drain.
struct UnwindGuard<'a>(&'a Mutex<Inbox>);

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).delivering = false;
        }
    }
}

/// Messages retained for a detached persistent consumer.
struct Backlog {
    topics: Vec<Topic>,
    messages: VecDeque<Message>,
}

#[derive(Default)]
struct Registry {
    consumers: HashMap<u64, Arc<Consumer>>,
    backlogs: HashMap<String, Backlog>,
}

struct Shared {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    debug: AtomicBool,
    metrics: Arc<MqMetrics>,
}

impl Shared {
    fn stop_consuming(&self, id: u64) {
        let mut registry = lock(&self.registry);
        let Some(consumer) = registry.consumers.remove(&id) else {
            return;
        };

        let undelivered = {
            let mut inbox = lock(&consumer.inbox);
            inbox.stopped = true;
            std::mem::take(&mut inbox.pending)
        };
        self.metrics.consumer_detached();

        if let Some(name) = &consumer.persistent_name {
            debug!(
                "Persistent queue {} detached with {} undelivered messages",
                name,
                undelivered.len()
            );
            registry.backlogs.insert(
                name.clone(),
                Backlog {
                    topics: consumer.topics.clone(),
                    messages: undelivered,
                },
            );
        }
    }
}

/// In-memory, single-process message queue.
#[derive(Clone)]
pub struct SimpleMq {
    shared: Arc<Shared>,
}

impl SimpleMq {
    pub fn new() -> Self {
        Self::with_config(&MqConfig::default())
    }

    pub fn with_config(config: &MqConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                next_id: AtomicU64::new(1),
                debug: AtomicBool::new(config.debug),
                metrics: MqMetrics::new(),
            }),
        }
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<MqMetrics> {
        &self.shared.metrics
    }

    /// Number of messages held for a detached persistent queue.
    pub fn backlog_len(&self, persistent_name: &str) -> Option<usize> {
        lock(&self.shared.registry)
            .backlogs
            .get(persistent_name)
            .map(|b| b.messages.len())
    }

    /// Number of attached consumers.
    pub fn consumer_count(&self) -> usize {
        lock(&self.shared.registry).consumers.len()
    }
}

impl Default for SimpleMq {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue for SimpleMq {
    fn produce(&self, routing_key: &str, payload: Value) {
        let shared = &self.shared;
        shared.metrics.record_produce();
        if shared.debug.load(Ordering::Relaxed) {
            info!("MSG: {} {}", routing_key, payload);
        }

        let message = Message {
            routing_key: routing_key.to_string(),
            payload,
        };

        let targets: Vec<Arc<Consumer>> = {
            let mut registry = lock(&shared.registry);
            let mut targets = Vec::new();

            for consumer in registry.consumers.values() {
                if consumer.matches(routing_key) {
                    lock(&consumer.inbox).pending.push_back(message.clone());
                    targets.push(consumer.clone());
                }
            }

            for backlog in registry.backlogs.values_mut() {
                if backlog.topics.iter().any(|t| t.matches(routing_key)) {
                    backlog.messages.push_back(message.clone());
                    shared.metrics.record_backlogged();
                }
            }

            targets
        };

        for consumer in targets {
            consumer.drain(&shared.metrics);
        }
    }

    fn consume(
        &self,
        callback: ConsumerCallback,
        topics: &[&str],
        persistent_name: Option<&str>,
    ) -> Result<QueueRef> {
        if topics.is_empty() {
            return Err(Error::Mq("consumer needs at least one topic".to_string()));
        }
        let shared = &self.shared;
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

        let consumer = {
            let mut registry = lock(&shared.registry);

            let mut pending = VecDeque::new();
            if let Some(name) = persistent_name {
                let attached = registry
                    .consumers
                    .values()
                    .any(|c| c.persistent_name.as_deref() == Some(name));
                if attached {
                    return Err(Error::Mq(format!(
                        "persistent queue {} already has a consumer",
                        name
                    )));
                }
                if let Some(backlog) = registry.backlogs.remove(name) {
                    debug!(
                        "Replaying {} messages to persistent queue {}",
                        backlog.messages.len(),
                        name
                    );
                    shared.metrics.record_replayed(backlog.messages.len() as u64);
                    pending = backlog.messages;
                }
            }

            let consumer = Arc::new(Consumer {
                topics: topics.iter().map(|t| Topic::new(*t)).collect(),
                callback,
                persistent_name: persistent_name.map(str::to_string),
                inbox: Mutex::new(Inbox {
                    pending,
                    ..Default::default()
                }),
            });
            registry.consumers.insert(id, consumer.clone());
            shared.metrics.consumer_attached();
            consumer
        };

        // Replay any backlog before handing the queue back.
        consumer.drain(&shared.metrics);

        Ok(QueueRef::new(Arc::new(SimpleQueueRef {
            shared: shared.clone(),
            id,
        })))
    }
}

impl MqBackend for SimpleMq {
    fn reconfigure(&self, config: &MqConfig) -> Result<()> {
        self.shared.debug.store(config.debug, Ordering::Relaxed);
        Ok(())
    }
}

struct SimpleQueueRef {
    shared: Arc<Shared>,
    id: u64,
}

impl QueueHandle for SimpleQueueRef {
    fn stop_consuming(&self) {
        self.shared.stop_consuming(self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    fn recorder() -> (ConsumerCallback, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let cb: ConsumerCallback = Arc::new(move |key: &str, payload: &Value| {
            sink.lock().unwrap().push((key.to_string(), payload.clone()));
        });
        (cb, calls)
    }

    fn count(calls: &Calls) -> usize {
        calls.lock().unwrap().len()
    }

    #[test]
    fn test_empty_produce() {
        let mq = SimpleMq::new();
        mq.produce("a.b.c", json!({"x": 1}));
        assert_eq!(mq.metrics().snapshot().messages_delivered, 0);
    }

    #[test]
    fn test_delivers_key_and_payload() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        mq.consume(cb, &["a.*.c"], None).unwrap();

        mq.produce("a.b.c", json!("x"));

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("a.b.c".to_string(), json!("x"))]
        );
    }

    #[test]
    fn test_multiple_topic_match() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        mq.consume(cb, &["a", "b", "c"], None).unwrap();

        mq.produce("b", json!("x"));
        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_overlapping_topics_deliver_once() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        mq.consume(cb, &["a.*", "a.#", "#"], None).unwrap();

        mq.produce("a.b", json!(1));
        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_no_topics_rejected() {
        let mq = SimpleMq::new();
        let (cb, _) = recorder();
        assert!(matches!(mq.consume(cb, &[], None), Err(Error::Mq(_))));
    }

    #[test]
    fn test_stop_consuming() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        let qref = mq.consume(cb, &["abc"], None).unwrap();

        mq.produce("abc", json!({"x": 1}));
        qref.stop_consuming();
        mq.produce("abc", json!({"x": 1}));

        assert_eq!(count(&calls), 1);
    }

    #[test]
    fn test_stop_consuming_twice() {
        let mq = SimpleMq::new();
        let (cb, _) = recorder();
        let qref = mq.consume(cb, &["abc"], None).unwrap();
        qref.stop_consuming();
        qref.stop_consuming();
        assert_eq!(mq.consumer_count(), 0);
        assert_eq!(mq.metrics().snapshot().consumers, 0);
    }

    #[test]
    fn test_non_persistent() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        let (cb2, calls2) = recorder();

        let qref = mq.consume(cb.clone(), &["abc"], None).unwrap();
        let qref2 = mq.consume(cb2, &["abc"], None).unwrap();

        qref.stop_consuming();
        mq.produce("abc", json!({}));

        let qref = mq.consume(cb, &["abc"], None).unwrap();
        qref.stop_consuming();
        qref2.stop_consuming();

        assert_eq!(count(&calls2), 1);
        assert_eq!(count(&calls), 0);
    }

    #[test]
    fn test_persistent() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();

        let qref = mq.consume(cb.clone(), &["abc"], Some("ABC")).unwrap();
        qref.stop_consuming();

        mq.produce("abc", json!({}));
        assert_eq!(mq.backlog_len("ABC"), Some(1));

        let qref = mq.consume(cb, &["abc"], Some("ABC")).unwrap();
        qref.stop_consuming();

        assert_eq!(count(&calls), 1);
        assert_eq!(mq.metrics().snapshot().messages_replayed, 1);
    }

    #[test]
    fn test_persistent_replay_precedes_live() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();

        mq.consume(cb.clone(), &["job.#"], Some("jobs"))
            .unwrap()
            .stop_consuming();

        mq.produce("job.1", json!(1));
        mq.produce("other", json!(0));
        mq.produce("job.2", json!(2));

        let _qref = mq.consume(cb, &["job.#"], Some("jobs")).unwrap();
        mq.produce("job.3", json!(3));

        let payloads: Vec<Value> = calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, p)| p.clone())
            .collect();
        assert_eq!(payloads, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(mq.backlog_len("jobs"), None);
    }

    #[test]
    fn test_persistent_name_in_use() {
        let mq = SimpleMq::new();
        let (cb, _) = recorder();
        let _qref = mq.consume(cb.clone(), &["abc"], Some("ABC")).unwrap();
        assert!(mq.consume(cb, &["abc"], Some("ABC")).is_err());
    }

    #[test]
    fn test_callback_may_stop_itself() {
        let mq = SimpleMq::new();
        let calls = Arc::new(AtomicU64::new(0));
        let slot: Arc<Mutex<Option<QueueRef>>> = Arc::new(Mutex::new(None));

        let cb: ConsumerCallback = {
            let calls = calls.clone();
            let slot = slot.clone();
            Arc::new(move |_: &str, _: &Value| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(qref) = slot.lock().unwrap().take() {
                    qref.stop_consuming();
                }
            })
        };
        let qref = mq.consume(cb, &["abc"], None).unwrap();
        *slot.lock().unwrap() = Some(qref);

        mq.produce("abc", json!(1));
        mq.produce("abc", json!(2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(mq.consumer_count(), 0);
    }

    #[test]
    fn test_reentrant_produce_keeps_order() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        mq.consume(cb, &["#"], None).unwrap();

        let inner = mq.clone();
        let relay: ConsumerCallback = Arc::new(move |key: &str, _: &Value| {
            if key == "first" {
                inner.produce("second", json!(2));
            }
        });
        mq.consume(relay, &["first"], None).unwrap();

        mq.produce("first", json!(1));

        let keys: Vec<String> = calls
            .lock()
            .unwrap()
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        assert_eq!(keys, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_concurrent_producers_deliver_everything() {
        let mq = SimpleMq::new();
        let (cb, calls) = recorder();
        mq.consume(cb, &["load.*"], None).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let mq = mq.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        mq.produce(&format!("load.{}", t), json!(i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(count(&calls), 1000);

        // Per-producer order is preserved.
        let calls = calls.lock().unwrap();
        for t in 0..4 {
            let key = format!("load.{}", t);
            let seen: Vec<i64> = calls
                .iter()
                .filter(|(k, _)| *k == key)
                .map(|(_, p)| p.as_i64().unwrap())
                .collect();
            assert_eq!(seen, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_reconfigure_toggles_debug() {
        let mq = SimpleMq::new();
        mq.reconfigure(&MqConfig::default().with_debug(true)).unwrap();
        assert!(mq.shared.debug.load(Ordering::Relaxed));
    }
}
