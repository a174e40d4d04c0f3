//! Scheduler fired explicitly by a build step.
//!
//! Each [`Triggerable::trigger`] creates a buildset and hands back a future
//! that resolves with the buildset's result once it completes. The
//! completion subscription only exists while some trigger is waiting.

use futures::channel::oneshot;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use tandem_core::buildset::BuildRequestIds;
use tandem_core::events::{BUILDSET_COMPLETE_TOPIC, BuildsetCompletePayload};
use tandem_core::ids::{BuildsetId, SourceStampSetId};
use tandem_core::ports::{ConsumerCallback, QueueRef};
use tandem_core::properties::Properties;
use tandem_core::results::ResultCode;
use tandem_core::{Error, Result};
use tracing::{debug, info};

use crate::base::{MasterService, Scheduler, SchedulerBase};
use crate::config::SchedulerConfig;
use crate::master::MasterContext;

/// Outcome of a triggered buildset.
pub type TriggerOutcome = (ResultCode, BuildRequestIds);

/// Resolves once the triggered buildset completes.
///
/// Fails with [`Error::Cancelled`] if the scheduler stops first.
#[derive(Debug)]
pub struct TriggerFuture {
    bsid: BuildsetId,
    rx: oneshot::Receiver<Result<TriggerOutcome>>,
}

impl TriggerFuture {
    /// The buildset this trigger created.
    pub fn bsid(&self) -> BuildsetId {
        self.bsid
    }
}

impl Future for TriggerFuture {
    type Output = Result<TriggerOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let bsid = self.bsid;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(Error::Cancelled(bsid))),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct Waiter {
    brids: BuildRequestIds,
    tx: oneshot::Sender<Result<TriggerOutcome>>,
}

#[derive(Default)]
struct Waiting {
    waiters: HashMap<BuildsetId, Waiter>,
    /// Triggers whose buildset is being created.
    creating: usize,
    /// Completions seen while a creation was in flight.
    early: HashMap<BuildsetId, ResultCode>,
    consumer: Option<QueueRef>,
    /// Bumped by every stop; creations started before a stop are cancelled.
    epoch: u64,
}

impl Waiting {
    /// Retire one in-flight creation, returning any completion already seen
    /// for `bsid`.
    fn finish_creation(&mut self, bsid: Option<BuildsetId>) -> Option<ResultCode> {
        self.creating -= 1;
        let early = bsid.and_then(|bsid| self.early.remove(&bsid));
        // Every in-flight id is known now, so nothing buffered can match.
        if self.creating == 0 {
            self.early.clear();
        }
        early
    }

    /// Hand back the consumer once nothing can need it any more.
    fn take_if_idle(&mut self) -> Option<QueueRef> {
        if self.waiters.is_empty() && self.creating == 0 {
            self.early.clear();
            self.consumer.take()
        } else {
            None
        }
    }
}

struct TriggerInner {
    base: SchedulerBase,
    waiting: Mutex<Waiting>,
}

impl TriggerInner {
    fn lock(&self) -> MutexGuard<'_, Waiting> {
        self.waiting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn buildset_complete(&self, msg: BuildsetCompletePayload) {
        let (waiter, idle) = {
            let mut waiting = self.lock();
            let waiter = waiting.waiters.remove(&msg.bsid);
            if waiter.is_none() {
                if waiting.creating == 0 {
                    return;
                }
                waiting.early.insert(msg.bsid, msg.result);
            }
            (waiter, waiting.take_if_idle())
        };

        // Detach before resolving so a waiter that triggers again resubscribes.
        if let Some(consumer) = idle {
            consumer.stop_consuming();
        }
        if let Some(waiter) = waiter {
            info!(
                "Triggered buildset {} of {} finished with {}",
                msg.bsid,
                self.base.name(),
                msg.result
            );
            let _ = waiter.tx.send(Ok((msg.result, waiter.brids)));
        }
    }
}

/// Decrements the in-flight count if a trigger is dropped mid-creation.
struct Creation<'a> {
    inner: &'a TriggerInner,
    epoch: u64,
    armed: bool,
}

impl Drop for Creation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let idle = {
            let mut waiting = self.inner.lock();
            waiting.finish_creation(None);
            waiting.take_if_idle()
        };
        if let Some(consumer) = idle {
            consumer.stop_consuming();
        }
    }
}

/// Creates buildsets on demand and reports their results to the caller.
pub struct Triggerable {
    inner: Arc<TriggerInner>,
    subscribe_lock: tokio::sync::Mutex<()>,
}

impl Triggerable {
    pub fn new(config: SchedulerConfig, master: MasterContext) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(TriggerInner {
                base: SchedulerBase::new(config, master)?,
                waiting: Mutex::new(Waiting::default()),
            }),
            subscribe_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Create a buildset for `ssid` and return a future for its result.
    ///
    /// `set_props` override the scheduler's default properties.
    pub async fn trigger(
        &self,
        ssid: SourceStampSetId,
        set_props: Option<&Properties>,
    ) -> Result<TriggerFuture> {
        let mut creation = self.begin_creation().await?;

        let reason = format!("Triggerable({})", self.name());
        let created = self
            .inner
            .base
            .add_buildset_for_source_stamp(ssid, &reason, set_props)
            .await;

        creation.armed = false;
        let mut waiting = self.inner.lock();
        let early = waiting.finish_creation(created.as_ref().ok().map(|(bsid, _)| *bsid));
        let stopped = waiting.epoch != creation.epoch;

        let outcome = match created {
            Ok((bsid, brids)) => {
                let (tx, rx) = oneshot::channel();
                if stopped {
                    debug!("Scheduler stopped while buildset {} was being created", bsid);
                    let _ = tx.send(Err(Error::Cancelled(bsid)));
                } else if let Some(result) = early {
                    debug!("Buildset {} completed before its trigger returned", bsid);
                    let _ = tx.send(Ok((result, brids)));
                } else {
                    waiting.waiters.insert(bsid, Waiter { brids, tx });
                }
                Ok(TriggerFuture { bsid, rx })
            }
            Err(e) => Err(e),
        };

        let idle = waiting.take_if_idle();
        drop(waiting);
        if let Some(consumer) = idle {
            consumer.stop_consuming();
        }
        outcome
    }

    /// Count a creation in flight and make sure completions are observed.
    async fn begin_creation(&self) -> Result<Creation<'_>> {
        let _guard = self.subscribe_lock.lock().await;

        let (subscribed, epoch) = {
            let mut waiting = self.inner.lock();
            waiting.creating += 1;
            (waiting.consumer.is_some(), waiting.epoch)
        };
        let creation = Creation {
            inner: &self.inner,
            epoch,
            armed: true,
        };
        if subscribed {
            return Ok(creation);
        }

        let qref = self.inner.base.mq().consume(
            complete_callback(Arc::downgrade(&self.inner)),
            &[BUILDSET_COMPLETE_TOPIC],
            None,
        )?;
        debug!("Triggerable {} subscribed to buildset completions", self.name());
        self.inner.lock().consumer = Some(qref);
        Ok(creation)
    }

    /// Stop observing completions and fail every pending trigger, including
    /// those whose buildset is still being created.
    pub fn stop(&self) {
        let (waiters, consumer) = {
            let mut waiting = self.inner.lock();
            waiting.epoch += 1;
            waiting.early.clear();
            (
                std::mem::take(&mut waiting.waiters),
                waiting.consumer.take(),
            )
        };

        if let Some(consumer) = consumer {
            consumer.stop_consuming();
        }
        for (bsid, waiter) in waiters {
            let _ = waiter.tx.send(Err(Error::Cancelled(bsid)));
        }
        info!("Triggerable scheduler {} stopped", self.name());
    }

    /// Number of triggered buildsets still running.
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.lock().consumer.is_some()
    }
}

impl Scheduler for Triggerable {
    fn name(&self) -> &str {
        self.inner.base.name()
    }

    fn builder_names(&self) -> &[String] {
        self.inner.base.builder_names()
    }
}

impl MasterService for Triggerable {
    fn service_name(&self) -> &str {
        self.name()
    }

    fn as_scheduler(&self) -> Option<&dyn Scheduler> {
        Some(self)
    }
}

fn complete_callback(inner: Weak<TriggerInner>) -> ConsumerCallback {
    Arc::new(move |routing_key: &str, payload: &Value| {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match BuildsetCompletePayload::from_value(payload) {
            Ok(msg) => inner.buildset_complete(msg),
            Err(e) => debug!("Ignoring malformed {} message: {}", routing_key, e),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use tandem_core::buildset::{BuildsetRecord, NewBuildset};
    use tandem_core::events::BuildsetEvent;
    use tandem_core::ids::ObjectId;
    use tandem_core::ports::{BuildsetStore, MessageQueue};
    use tandem_db::Database;
    use tandem_db::repositories::MemoryBuildsetStore;
    use tandem_mq::SimpleMq;
    use tokio::sync::Notify;
    use tokio_test::{assert_pending, assert_ready_ok, task};

    fn config() -> SchedulerConfig {
        SchedulerConfig::new("trig", ObjectId::new(30), vec!["b1".to_string(), "b2".to_string()])
            .with_property("tier", "nightly")
    }

    fn setup() -> (Database, Arc<SimpleMq>, Triggerable) {
        let db = Database::in_memory();
        let mq = Arc::new(SimpleMq::new());
        let master = MasterContext::new(mq.clone(), db.buildset_store(), db.state_store());
        let trig = Triggerable::new(config(), master).unwrap();
        (db, mq, trig)
    }

    fn complete(mq: &SimpleMq, bsid: BuildsetId, result: ResultCode) {
        let event = BuildsetEvent::Complete(BuildsetCompletePayload { bsid, result });
        mq.produce(&event.routing_key(), event.to_payload().unwrap());
    }

    #[tokio::test]
    async fn test_trigger_resolves_with_result() {
        let (db, mq, trig) = setup();

        let props = Properties::new().with_property("tier", "release", "Trigger");
        let fut = trig
            .trigger(SourceStampSetId::new(1091), Some(&props))
            .await
            .unwrap();
        let bsid = fut.bsid();
        assert!(trig.is_subscribed());
        assert_eq!(trig.waiting_count(), 1);

        let record = db.buildsets().get_buildset(bsid).await.unwrap().unwrap();
        assert_eq!(record.ssid, SourceStampSetId::new(1091));
        assert_eq!(record.reason, "Triggerable(trig)");
        assert_eq!(record.properties.get_property("tier"), Some(&json!("release")));
        assert_eq!(record.properties.get_property("scheduler"), Some(&json!("trig")));

        complete(&mq, bsid, ResultCode::new(13));
        let (result, brids) = fut.await.unwrap();

        assert_eq!(result, ResultCode::new(13));
        assert_eq!(brids, db.buildsets().build_request_ids(bsid).await.unwrap());
        assert_eq!(brids.len(), 2);
        assert!(!trig.is_subscribed());
        assert_eq!(mq.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_triggers_share_subscription() {
        let (_db, mq, trig) = setup();

        let first = trig.trigger(SourceStampSetId::new(1), None).await.unwrap();
        let second = trig.trigger(SourceStampSetId::new(2), None).await.unwrap();
        assert_ne!(first.bsid(), second.bsid());
        assert_eq!(mq.consumer_count(), 1);

        complete(&mq, second.bsid(), ResultCode::FAILURE);
        assert!(trig.is_subscribed());
        assert_eq!(trig.waiting_count(), 1);
        assert_eq!(second.await.unwrap().0, ResultCode::FAILURE);

        complete(&mq, first.bsid(), ResultCode::SUCCESS);
        assert_eq!(first.await.unwrap().0, ResultCode::SUCCESS);
        assert!(!trig.is_subscribed());
    }

    #[tokio::test]
    async fn test_unrelated_completions_ignored() {
        let (_db, mq, trig) = setup();

        let fut = trig.trigger(SourceStampSetId::new(1), None).await.unwrap();
        let bsid = fut.bsid();
        let mut fut = task::spawn(fut);
        assert_pending!(fut.poll());

        complete(&mq, BuildsetId::new(999), ResultCode::SUCCESS);
        mq.produce("buildset.5.complete", json!({"bsid": "nope"}));

        assert!(!fut.is_woken());
        assert_pending!(fut.poll());
        assert_eq!(trig.waiting_count(), 1);
        assert!(trig.is_subscribed());

        complete(&mq, bsid, ResultCode::WARNINGS);
        assert!(fut.is_woken());
        let (result, _) = assert_ready_ok!(fut.poll());
        assert_eq!(result, ResultCode::WARNINGS);
    }

    #[tokio::test]
    async fn test_creation_failure_unsubscribes() {
        let (db, mq, trig) = setup();

        db.buildsets().fail_operation("add_buildset", 1);
        let err = trig.trigger(SourceStampSetId::new(1), None).await.unwrap_err();

        assert!(matches!(err, Error::Database(_)));
        assert_eq!(trig.waiting_count(), 0);
        assert!(!trig.is_subscribed());
        assert_eq!(mq.consumer_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_pending() {
        let (_db, mq, trig) = setup();

        let fut = trig.trigger(SourceStampSetId::new(1), None).await.unwrap();
        let bsid = fut.bsid();
        trig.stop();

        assert!(matches!(fut.await, Err(Error::Cancelled(id)) if id == bsid));
        assert_eq!(mq.consumer_count(), 0);

        // Late completions are harmless.
        complete(&mq, bsid, ResultCode::SUCCESS);
        assert_eq!(trig.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_trigger_again_after_completion() {
        let (_db, mq, trig) = setup();

        let fut = trig.trigger(SourceStampSetId::new(1), None).await.unwrap();
        complete(&mq, fut.bsid(), ResultCode::SUCCESS);
        fut.await.unwrap();

        let fut = trig.trigger(SourceStampSetId::new(2), None).await.unwrap();
        assert!(trig.is_subscribed());
        complete(&mq, fut.bsid(), ResultCode::EXCEPTION);
        assert_eq!(fut.await.unwrap().0, ResultCode::EXCEPTION);
    }

    /// Store that can hold creations until released and announce completions
    /// before handing the new buildset back.
    struct HookedStore {
        inner: MemoryBuildsetStore,
        mq: Arc<SimpleMq>,
        gate: Option<Arc<Notify>>,
        announce: fn(BuildsetId) -> Vec<(BuildsetId, ResultCode)>,
    }

    #[async_trait]
    impl BuildsetStore for HookedStore {
        async fn add_buildset(
            &self,
            buildset: NewBuildset,
        ) -> Result<(BuildsetId, BuildRequestIds)> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let (bsid, brids) = self.inner.add_buildset(buildset).await?;
            for (done, result) in (self.announce)(bsid) {
                complete(&self.mq, done, result);
            }
            Ok((bsid, brids))
        }

        async fn get_buildset(&self, bsid: BuildsetId) -> Result<Option<BuildsetRecord>> {
            self.inner.get_buildset(bsid).await
        }

        async fn build_request_ids(&self, bsid: BuildsetId) -> Result<BuildRequestIds> {
            self.inner.build_request_ids(bsid).await
        }

        async fn complete_buildset(&self, bsid: BuildsetId, result: ResultCode) -> Result<()> {
            self.inner.complete_buildset(bsid, result).await
        }
    }

    fn hooked(
        gate: Option<Arc<Notify>>,
        announce: fn(BuildsetId) -> Vec<(BuildsetId, ResultCode)>,
    ) -> (Arc<SimpleMq>, Triggerable) {
        let db = Database::in_memory();
        let mq = Arc::new(SimpleMq::new());
        let store = Arc::new(HookedStore {
            inner: MemoryBuildsetStore::new(),
            mq: mq.clone(),
            gate,
            announce,
        });
        let master = MasterContext::new(mq.clone(), store, db.state_store());
        (mq, Triggerable::new(config(), master).unwrap())
    }

    fn in_flight(trig: &Triggerable) -> usize {
        trig.inner.lock().creating
    }

    fn buffered(trig: &Triggerable) -> usize {
        trig.inner.lock().early.len()
    }

    #[tokio::test]
    async fn test_completion_before_trigger_returns() {
        let (_mq, trig) = hooked(None, |bsid| vec![(bsid, ResultCode::SKIPPED)]);

        let fut = trig.trigger(SourceStampSetId::new(4), None).await.unwrap();
        assert_eq!(fut.await.unwrap().0, ResultCode::SKIPPED);
        assert_eq!(trig.waiting_count(), 0);
        assert!(!trig.is_subscribed());
    }

    #[tokio::test]
    async fn test_unrelated_completions_during_creation_not_retained() {
        let (mq, trig) = hooked(None, |bsid| {
            (1..=5)
                .map(|n| (BuildsetId::new(bsid.get() + 1000 * n), ResultCode::SUCCESS))
                .collect()
        });

        let mut pending = Vec::new();
        for ssid in 1..=3 {
            pending.push(trig.trigger(SourceStampSetId::new(ssid), None).await.unwrap());
        }

        assert_eq!(trig.waiting_count(), 3);
        assert_eq!(in_flight(&trig), 0);
        assert_eq!(buffered(&trig), 0);
        assert!(trig.is_subscribed());

        for fut in pending {
            complete(&mq, fut.bsid(), ResultCode::SUCCESS);
            assert_eq!(fut.await.unwrap().0, ResultCode::SUCCESS);
        }
        assert!(!trig.is_subscribed());
    }

    #[tokio::test]
    async fn test_stop_during_creation_cancels_trigger() {
        let gate = Arc::new(Notify::new());
        let (mq, trig) = hooked(Some(gate.clone()), |_| Vec::new());
        let trig = Arc::new(trig);

        let task = tokio::spawn({
            let trig = trig.clone();
            async move { trig.trigger(SourceStampSetId::new(9), None).await }
        });
        while in_flight(&trig) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(trig.is_subscribed());

        trig.stop();
        assert!(!trig.is_subscribed());
        gate.notify_one();

        let fut = task.await.unwrap().unwrap();
        let bsid = fut.bsid();
        assert_eq!(trig.waiting_count(), 0);
        assert_eq!(in_flight(&trig), 0);
        assert!(!trig.is_subscribed());
        assert_eq!(mq.consumer_count(), 0);

        complete(&mq, bsid, ResultCode::SUCCESS);
        assert!(matches!(fut.await, Err(Error::Cancelled(id)) if id == bsid));
    }

    #[tokio::test]
    async fn test_trigger_after_stop_works() {
        let (_db, mq, trig) = setup();

        trig.stop();
        let fut = trig.trigger(SourceStampSetId::new(3), None).await.unwrap();
        assert!(trig.is_subscribed());

        complete(&mq, fut.bsid(), ResultCode::SUCCESS);
        assert_eq!(fut.await.unwrap().0, ResultCode::SUCCESS);
    }
}
