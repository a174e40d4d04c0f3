//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the schedulers and the
//! message queue and storage adapters.

use crate::buildset::{BuildRequestIds, BuildsetRecord, NewBuildset};
use crate::ids::{BuildsetId, ObjectId};
use crate::results::ResultCode;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Callback invoked with `(routing_key, payload)` for every delivered message.
pub type ConsumerCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// In-process message queue with topic-based routing.
pub trait MessageQueue: Send + Sync {
    /// Deliver `payload` to every consumer whose topics match `routing_key`.
    fn produce(&self, routing_key: &str, payload: Value);

    /// Register a consumer for the given topics.
    ///
    /// Topics support wildcards: `*` matches exactly one word and `#` matches
    /// zero or more words, e.g. `buildset.*.complete`, `buildset.#`.
    /// A `persistent_name` keeps undelivered messages across
    /// [`QueueRef::stop_consuming`] and replays them to the next consumer
    /// registered under the same name.
    fn consume(
        &self,
        callback: ConsumerCallback,
        topics: &[&str],
        persistent_name: Option<&str>,
    ) -> Result<QueueRef>;
}

/// Backend side of a [`QueueRef`].
pub trait QueueHandle: Send + Sync {
    fn stop_consuming(&self);
}

/// Handle to a registered consumer.
///
/// Dropping the handle does not stop consumption; call
/// [`QueueRef::stop_consuming`] explicitly.
#[derive(Clone)]
pub struct QueueRef {
    handle: Arc<dyn QueueHandle>,
}

impl QueueRef {
    pub fn new(handle: Arc<dyn QueueHandle>) -> Self {
        Self { handle }
    }

    /// Stop delivering messages to this consumer. Idempotent.
    pub fn stop_consuming(&self) {
        self.handle.stop_consuming();
    }
}

impl fmt::Debug for QueueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueRef").finish_non_exhaustive()
    }
}

/// Durable storage of buildsets.
#[async_trait]
pub trait BuildsetStore: Send + Sync {
    /// Create a buildset with one build request per builder.
    async fn add_buildset(&self, buildset: NewBuildset) -> Result<(BuildsetId, BuildRequestIds)>;

    /// Get a buildset by ID.
    async fn get_buildset(&self, bsid: BuildsetId) -> Result<Option<BuildsetRecord>>;

    /// Get the build request ids of a buildset.
    async fn build_request_ids(&self, bsid: BuildsetId) -> Result<BuildRequestIds>;

    /// Mark a buildset complete with the given result.
    async fn complete_buildset(&self, bsid: BuildsetId, result: ResultCode) -> Result<()>;
}

/// Durable key/value state scoped per object (e.g. per scheduler).
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a state value, or `default` if none was stored.
    async fn get_state(&self, objectid: ObjectId, key: &str, default: Value) -> Result<Value>;

    /// Store a state value.
    async fn set_state(&self, objectid: ObjectId, key: &str, value: Value) -> Result<()>;
}
