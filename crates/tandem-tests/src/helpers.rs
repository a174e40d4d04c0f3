//! Test helper functions and utilities.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tandem_core::ports::{ConsumerCallback, MessageQueue, QueueRef};

/// Collects every message delivered to one consumer.
#[derive(Clone, Default)]
pub struct MessageRecorder {
    messages: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MessageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback that appends to this recorder.
    pub fn callback(&self) -> ConsumerCallback {
        let messages = self.messages.clone();
        Arc::new(move |routing_key: &str, payload: &Value| {
            messages
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((routing_key.to_string(), payload.clone()));
        })
    }

    /// Register a consumer that records into this recorder.
    pub fn attach(
        &self,
        mq: &dyn MessageQueue,
        topics: &[&str],
        persistent_name: Option<&str>,
    ) -> tandem_core::Result<QueueRef> {
        mq.consume(self.callback(), topics, persistent_name)
    }

    pub fn messages(&self) -> Vec<(String, Value)> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        self.messages().into_iter().map(|(key, _)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}
