//! Services shared by every scheduler in a master.

use std::sync::Arc;
use tandem_core::Result;
use tandem_core::ports::{BuildsetStore, MessageQueue, StateStore};
use tandem_db::Database;
use tandem_mq::MqConnector;
use tracing::info;

use crate::config::MasterConfig;

/// The message queue and stores schedulers run against.
#[derive(Clone)]
pub struct MasterContext {
    pub mq: Arc<dyn MessageQueue>,
    pub buildsets: Arc<dyn BuildsetStore>,
    pub state: Arc<dyn StateStore>,
}

impl MasterContext {
    pub fn new(
        mq: Arc<dyn MessageQueue>,
        buildsets: Arc<dyn BuildsetStore>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            mq,
            buildsets,
            state,
        }
    }

    /// Build the context from configuration, failing on an unknown mq type.
    pub fn from_config(config: &MasterConfig, db: &Database) -> Result<Self> {
        let connector = MqConnector::new();
        connector.setup(&config.mq)?;
        info!("Master context ready with {} message queue", config.mq.mq_type);

        Ok(Self::new(
            Arc::new(connector),
            db.buildset_store(),
            db.state_store(),
        ))
    }
}
