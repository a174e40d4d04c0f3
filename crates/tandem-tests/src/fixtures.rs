//! Test fixtures for schedulers and buildsets.

use tandem_core::buildset::BuildsetRecord;
use tandem_core::events::{BuildsetCompletePayload, BuildsetEvent};
use tandem_core::ids::{BuildsetId, ObjectId};
use tandem_core::ports::BuildsetStore;
use tandem_core::results::ResultCode;
use tandem_scheduler::dependent::DOWNSTREAM_REASON;
use tandem_scheduler::{Dependent, MasterService, SchedulerBase, SchedulerConfig, Triggerable};

use crate::context::TestContext;

/// Factory for scheduler configurations.
pub struct SchedulerFixture;

impl SchedulerFixture {
    /// Configuration with a single builder named after the scheduler.
    pub fn config(name: &str, objectid: i64) -> SchedulerConfig {
        SchedulerConfig::new(name, ObjectId::new(objectid), vec![format!("{}-builder", name)])
    }

    /// A plain scheduler usable as an upstream.
    pub fn upstream(ctx: &TestContext, name: &str) -> anyhow::Result<SchedulerBase> {
        Ok(SchedulerBase::new(
            Self::config(name, 1),
            ctx.master.clone(),
        )?)
    }

    pub fn dependent(
        ctx: &TestContext,
        name: &str,
        objectid: i64,
        upstream: &dyn MasterService,
    ) -> anyhow::Result<Dependent> {
        Ok(Dependent::new(
            Self::config(name, objectid),
            upstream,
            ctx.master.clone(),
        )?)
    }

    pub fn triggerable(ctx: &TestContext, name: &str) -> anyhow::Result<Triggerable> {
        Ok(Triggerable::new(
            Self::config(name, 50),
            ctx.master.clone(),
        )?)
    }
}

/// Record a buildset's result and announce its completion.
pub async fn complete_buildset(
    ctx: &TestContext,
    bsid: BuildsetId,
    result: ResultCode,
) -> anyhow::Result<()> {
    ctx.db.buildsets().complete_buildset(bsid, result).await?;
    announce_completion(ctx, bsid, result)
}

/// Announce a completion without touching the store.
pub fn announce_completion(
    ctx: &TestContext,
    bsid: BuildsetId,
    result: ResultCode,
) -> anyhow::Result<()> {
    use tandem_core::ports::MessageQueue;

    let event = BuildsetEvent::Complete(BuildsetCompletePayload { bsid, result });
    ctx.mq.produce(&event.routing_key(), event.to_payload()?);
    Ok(())
}

/// Buildsets created by dependent schedulers.
pub async fn downstream_buildsets(ctx: &TestContext) -> Vec<BuildsetRecord> {
    ctx.db.buildsets().buildsets_with_reason(DOWNSTREAM_REASON).await
}
