//! In-memory implementation of StateStore.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tandem_core::Result;
use tandem_core::ids::ObjectId;
use tandem_core::ports::StateStore;
use tokio::sync::RwLock;

use crate::faults::FaultInjector;

/// In-memory implementation of StateStore.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: RwLock<HashMap<(ObjectId, String), Value>>,
    writes: AtomicU64,
    faults: FaultInjector,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store operations fail.
    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next(count);
    }

    /// Make the next `count` calls of one operation fail.
    pub fn fail_operation(&self, operation: &'static str, count: u32) {
        self.faults.fail_operation(operation, count);
    }

    /// Number of successful `set_state` calls.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Read a value without going through the fault injector.
    pub async fn peek(&self, objectid: ObjectId, key: &str) -> Option<Value> {
        self.state
            .read()
            .await
            .get(&(objectid, key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_state(&self, objectid: ObjectId, key: &str, default: Value) -> Result<Value> {
        self.faults.check("get_state")?;
        Ok(self
            .state
            .read()
            .await
            .get(&(objectid, key.to_string()))
            .cloned()
            .unwrap_or(default))
    }

    async fn set_state(&self, objectid: ObjectId, key: &str, value: Value) -> Result<()> {
        self.faults.check("set_state")?;
        self.state
            .write()
            .await
            .insert((objectid, key.to_string()), value);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
