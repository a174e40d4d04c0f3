//! Configuration for the message queue.

use serde::{Deserialize, Serialize};
use tandem_core::{Error, Result};

/// Name of the built-in in-memory backend.
pub const SIMPLE_MQ_TYPE: &str = "simple";

/// Configuration for the message queue connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqConfig {
    /// Backend name, looked up in the connector's registry.
    #[serde(rename = "type", default = "default_mq_type")]
    pub mq_type: String,
    /// Log every produced message.
    #[serde(default)]
    pub debug: bool,
}

fn default_mq_type() -> String {
    SIMPLE_MQ_TYPE.to_string()
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            mq_type: default_mq_type(),
            debug: false,
        }
    }
}

impl MqConfig {
    /// Create a config selecting the given backend.
    pub fn new(mq_type: impl Into<String>) -> Self {
        Self {
            mq_type: mq_type.into(),
            ..Default::default()
        }
    }

    /// Enable or disable per-message debug logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Parse a config from YAML.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid mq config: {}", e)))
    }
}
