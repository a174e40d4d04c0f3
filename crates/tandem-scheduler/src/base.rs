//! Behaviour shared by all schedulers.

use std::sync::Arc;
use tandem_core::buildset::{BuildRequestIds, NewBuildset};
use tandem_core::events::{BuildsetEvent, BuildsetNewPayload};
use tandem_core::ids::{BuildsetId, ObjectId, SourceStampSetId};
use tandem_core::ports::{BuildsetStore, MessageQueue, StateStore};
use tandem_core::properties::Properties;
use tandem_core::Result;
use tracing::{error, info};

use crate::config::{SCHEDULER_PROPERTY_SOURCE, SchedulerConfig};
use crate::master::MasterContext;

/// Anything that can be configured on a master.
///
/// Only schedulers expose [`MasterService::as_scheduler`]; other services
/// (builders, status targets, ...) cannot be used as an upstream.
pub trait MasterService: Send + Sync {
    fn service_name(&self) -> &str;

    fn as_scheduler(&self) -> Option<&dyn Scheduler> {
        None
    }
}

/// A scheduler that creates buildsets.
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &str;

    fn builder_names(&self) -> &[String];
}

/// Name, builders, properties, and master services of one scheduler.
pub struct SchedulerBase {
    config: SchedulerConfig,
    properties: Properties,
    master: MasterContext,
}

impl SchedulerBase {
    pub fn new(config: SchedulerConfig, master: MasterContext) -> Result<Self> {
        config.validate()?;
        let properties = config.default_properties();
        Ok(Self {
            config,
            properties,
            master,
        })
    }

    pub fn objectid(&self) -> ObjectId {
        self.config.objectid
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn mq(&self) -> &Arc<dyn MessageQueue> {
        &self.master.mq
    }

    pub fn buildsets(&self) -> &Arc<dyn BuildsetStore> {
        &self.master.buildsets
    }

    pub fn state(&self) -> &Arc<dyn StateStore> {
        &self.master.state
    }

    /// Create a buildset for every configured builder and announce it.
    ///
    /// Properties are layered as scheduler defaults, then `set_props`, then
    /// a `scheduler` property naming this scheduler.
    pub async fn add_buildset_for_source_stamp(
        &self,
        ssid: SourceStampSetId,
        reason: &str,
        set_props: Option<&Properties>,
    ) -> Result<(BuildsetId, BuildRequestIds)> {
        let mut properties = self.properties.clone();
        if let Some(set_props) = set_props {
            properties.update(set_props);
        }
        properties.set_property("scheduler", self.name(), SCHEDULER_PROPERTY_SOURCE);

        let buildset = NewBuildset::new(ssid, reason)
            .with_properties(properties)
            .with_builders(self.config.builder_names.clone());

        let (bsid, brids) = self.master.buildsets.add_buildset(buildset).await?;
        info!(
            "Scheduler {} added buildset {} for sourcestampset {} ({})",
            self.name(),
            bsid,
            ssid,
            reason
        );

        let event = BuildsetEvent::New(BuildsetNewPayload {
            scheduler: self.name().to_string(),
            bsid,
            ssid,
        });
        match event.to_payload() {
            Ok(payload) => self.master.mq.produce(&event.routing_key(), payload),
            Err(e) => error!("Failed to announce buildset {}: {}", bsid, e),
        }

        Ok((bsid, brids))
    }
}

impl Scheduler for SchedulerBase {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn builder_names(&self) -> &[String] {
        &self.config.builder_names
    }
}

impl MasterService for SchedulerBase {
    fn service_name(&self) -> &str {
        &self.config.name
    }

    fn as_scheduler(&self) -> Option<&dyn Scheduler> {
        Some(self)
    }
}
