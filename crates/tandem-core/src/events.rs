//! Buildset lifecycle messages carried on the message queue.

use crate::ids::{BuildsetId, SourceStampSetId};
use crate::results::ResultCode;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic matching every new-buildset message.
pub const BUILDSET_NEW_TOPIC: &str = "buildset.*.new";

/// Topic matching every buildset-completion message.
pub const BUILDSET_COMPLETE_TOPIC: &str = "buildset.*.complete";

/// All buildset lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BuildsetEvent {
    New(BuildsetNewPayload),
    Complete(BuildsetCompletePayload),
}

impl BuildsetEvent {
    /// Returns the routing key for this event.
    pub fn routing_key(&self) -> String {
        match self {
            BuildsetEvent::New(p) => format!("buildset.{}.new", p.bsid),
            BuildsetEvent::Complete(p) => format!("buildset.{}.complete", p.bsid),
        }
    }

    pub fn bsid(&self) -> BuildsetId {
        match self {
            BuildsetEvent::New(p) => p.bsid,
            BuildsetEvent::Complete(p) => p.bsid,
        }
    }

    /// Serialize into the JSON payload placed on the queue.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Payload of `buildset.<bsid>.new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildsetNewPayload {
    /// Name of the scheduler that created the buildset.
    pub scheduler: String,
    pub bsid: BuildsetId,
    pub ssid: SourceStampSetId,
}

impl BuildsetNewPayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        Ok(Self::deserialize(payload)?)
    }
}

/// Payload of `buildset.<bsid>.complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildsetCompletePayload {
    pub bsid: BuildsetId,
    pub result: ResultCode,
}

impl BuildsetCompletePayload {
    pub fn from_value(payload: &Value) -> Result<Self> {
        Ok(Self::deserialize(payload)?)
    }
}
