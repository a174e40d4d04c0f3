//! Master and scheduler configuration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tandem_core::ids::ObjectId;
use tandem_core::properties::Properties;
use tandem_core::{Error, Result};
use tandem_mq::MqConfig;

/// Source recorded for properties that come from a scheduler's configuration.
pub const SCHEDULER_PROPERTY_SOURCE: &str = "Scheduler";

/// Top-level master configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Message queue backend selection.
    #[serde(default)]
    pub mq: MqConfig,
}

impl MasterConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid master config: {}", e)))
    }
}

/// Configuration shared by every scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Scheduler name, unique within the master.
    pub name: String,
    /// Identity under which durable scheduler state is stored.
    pub objectid: ObjectId,
    /// Builders that buildsets from this scheduler target.
    #[serde(default)]
    pub builder_names: Vec<String>,
    /// Default properties for every buildset this scheduler creates.
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
}

impl SchedulerConfig {
    pub fn new(name: impl Into<String>, objectid: ObjectId, builder_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            objectid,
            builder_names,
            properties: BTreeMap::new(),
        }
    }

    /// Add a default property.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid scheduler config: {}", e)))
    }

    /// Reject configurations no scheduler can run with.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("scheduler name must not be empty".to_string()));
        }
        if self.builder_names.is_empty() {
            return Err(Error::Config(format!(
                "scheduler {} must name at least one builder",
                self.name
            )));
        }
        if let Some(blank) = self.builder_names.iter().find(|b| b.trim().is_empty()) {
            return Err(Error::Config(format!(
                "scheduler {} has an invalid builder name {:?}",
                self.name, blank
            )));
        }
        Ok(())
    }

    /// Default properties, tagged with the scheduler source.
    pub fn default_properties(&self) -> Properties {
        let mut props = Properties::new();
        for (name, value) in &self.properties {
            props.set_property(name.clone(), value.clone(), SCHEDULER_PROPERTY_SOURCE);
        }
        props
    }
}
