//! Buildset domain types.

use crate::ids::{BuildRequestId, BuildsetId, SourceStampSetId};
use crate::properties::Properties;
use crate::results::ResultCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Build request ids of a buildset, keyed by builder name.
pub type BuildRequestIds = BTreeMap<String, BuildRequestId>;

/// A stored buildset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildsetRecord {
    pub bsid: BuildsetId,
    pub ssid: SourceStampSetId,
    pub reason: String,
    pub properties: Properties,
    pub external_idstring: Option<String>,
    pub complete: bool,
    /// Meaningful only once `complete` is set; may lag the completion event.
    pub results: Option<ResultCode>,
    pub submitted_at: DateTime<Utc>,
    pub complete_at: Option<DateTime<Utc>>,
}

impl BuildsetRecord {
    /// Whether this buildset finished with a result that triggers dependents.
    pub fn succeeded(&self) -> bool {
        self.results.is_some_and(|r| r.is_success_class())
    }
}

/// Parameters for creating a buildset.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBuildset {
    pub ssid: SourceStampSetId,
    pub reason: String,
    pub properties: Properties,
    pub builder_names: Vec<String>,
    pub external_idstring: Option<String>,
}

impl NewBuildset {
    pub fn new(ssid: SourceStampSetId, reason: impl Into<String>) -> Self {
        Self {
            ssid,
            reason: reason.into(),
            properties: Properties::new(),
            builder_names: vec![],
            external_idstring: None,
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_builders(mut self, builder_names: Vec<String>) -> Self {
        self.builder_names = builder_names;
        self
    }

    pub fn with_external_idstring(mut self, idstring: impl Into<String>) -> Self {
        self.external_idstring = Some(idstring.into());
        self
    }
}
