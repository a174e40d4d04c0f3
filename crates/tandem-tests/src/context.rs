//! Test context providing access to all test infrastructure.

use std::sync::Arc;
use tandem_db::Database;
use tandem_mq::SimpleMq;
use tandem_scheduler::{MasterConfig, MasterContext};

/// A master wired to a fresh message queue and database.
pub struct TestContext {
    pub db: Database,
    pub mq: Arc<SimpleMq>,
    pub master: MasterContext,
}

impl TestContext {
    /// Create a context backed by a [`SimpleMq`] the test can inspect.
    pub fn new() -> anyhow::Result<Self> {
        crate::init_test_logging();

        let db = Database::in_memory();
        let mq = Arc::new(SimpleMq::new());
        let master = MasterContext::new(mq.clone(), db.buildset_store(), db.state_store());

        Ok(Self { db, mq, master })
    }

    /// Create a master from YAML configuration, going through the mq connector.
    pub fn from_config(yaml: &str) -> anyhow::Result<ConfiguredContext> {
        crate::init_test_logging();

        let config = MasterConfig::from_yaml(yaml)?;
        let db = Database::in_memory();
        let master = MasterContext::from_config(&config, &db)?;

        Ok(ConfiguredContext { db, master })
    }

    /// Another master on the same database, as after a restart.
    pub fn restarted(&self) -> Self {
        let mq = Arc::new(SimpleMq::new());
        let master = MasterContext::new(
            mq.clone(),
            self.db.buildset_store(),
            self.db.state_store(),
        );

        Self {
            db: self.db.clone(),
            mq,
            master,
        }
    }
}

/// Context built from configuration.
pub struct ConfiguredContext {
    pub db: Database,
    pub master: MasterContext,
}
