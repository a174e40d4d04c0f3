//! Backend selection for the message queue.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tandem_core::ports::{ConsumerCallback, MessageQueue, QueueRef};
use tandem_core::{Error, Result};
use tracing::{error, info};

use crate::config::{MqConfig, SIMPLE_MQ_TYPE};
use crate::simple::SimpleMq;

/// A message queue implementation selectable by name.
pub trait MqBackend: MessageQueue {
    /// Apply a new configuration of the same backend type.
    fn reconfigure(&self, _config: &MqConfig) -> Result<()> {
        Ok(())
    }
}

/// Constructor registered for a backend name.
pub type BackendFactory = fn(&MqConfig) -> Result<Arc<dyn MqBackend>>;

fn simple_backend(config: &MqConfig) -> Result<Arc<dyn MqBackend>> {
    Ok(Arc::new(SimpleMq::with_config(config)))
}

struct Active {
    mq_type: String,
    backend: Arc<dyn MqBackend>,
}

/// Selects a backend from configuration and forwards queue operations to it.
pub struct MqConnector {
    classes: HashMap<String, BackendFactory>,
    active: RwLock<Option<Active>>,
}

impl MqConnector {
    /// Create a connector knowing only the built-in backends.
    pub fn new() -> Self {
        let mut classes: HashMap<String, BackendFactory> = HashMap::new();
        classes.insert(SIMPLE_MQ_TYPE.to_string(), simple_backend);
        Self {
            classes,
            active: RwLock::new(None),
        }
    }

    /// Register an additional backend, replacing any previous one of that name.
    pub fn with_backend(mut self, mq_type: impl Into<String>, factory: BackendFactory) -> Self {
        self.classes.insert(mq_type.into(), factory);
        self
    }

    /// Instantiate the backend named by `config`.
    pub fn setup(&self, config: &MqConfig) -> Result<()> {
        let factory = self
            .classes
            .get(&config.mq_type)
            .ok_or_else(|| Error::UnknownMqType(config.mq_type.clone()))?;
        let backend = factory(config)?;

        info!("Message queue backend {} ready", config.mq_type);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(Active {
            mq_type: config.mq_type.clone(),
            backend,
        });
        Ok(())
    }

    /// Hand a new configuration to the running backend.
    ///
    /// The backend type cannot change without a restart.
    pub fn reconfigure(&self, config: &MqConfig) -> Result<()> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        let active = active
            .as_ref()
            .ok_or_else(|| Error::Mq("message queue not set up".to_string()))?;
        if active.mq_type != config.mq_type {
            return Err(Error::Config(format!(
                "cannot change mq type from {} to {} without a restart",
                active.mq_type, config.mq_type
            )));
        }
        active.backend.reconfigure(config)
    }

    /// Name of the active backend, if set up.
    pub fn mq_type(&self) -> Option<String> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.mq_type.clone())
    }

    /// The active backend, if set up.
    pub fn backend(&self) -> Option<Arc<dyn MqBackend>> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|a| a.backend.clone())
    }
}

impl Default for MqConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue for MqConnector {
    fn produce(&self, routing_key: &str, payload: Value) {
        match self.backend() {
            Some(backend) => backend.produce(routing_key, payload),
            None => error!("Dropping message {}: message queue not set up", routing_key),
        }
    }

    fn consume(
        &self,
        callback: ConsumerCallback,
        topics: &[&str],
        persistent_name: Option<&str>,
    ) -> Result<QueueRef> {
        let backend = self
            .backend()
            .ok_or_else(|| Error::Mq("message queue not set up".to_string()))?;
        backend.consume(callback, topics, persistent_name)
    }
}
