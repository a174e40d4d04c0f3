//! Scheduler that triggers downstream buildsets when an upstream scheduler's
//! buildsets succeed.
//!
//! Upstream buildset ids are tracked durably in the state store so that a
//! buildset completing while this scheduler is stopped is still acted on
//! by the reconciliation pass run at the next start.

use serde_json::{Value, json};
use std::sync::{Arc, Mutex, PoisonError};
use tandem_core::buildset::BuildsetRecord;
use tandem_core::events::{
    BUILDSET_COMPLETE_TOPIC, BUILDSET_NEW_TOPIC, BuildsetCompletePayload, BuildsetNewPayload,
};
use tandem_core::ids::BuildsetId;
use tandem_core::ports::{ConsumerCallback, QueueRef};
use tandem_core::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::base::{MasterService, Scheduler, SchedulerBase};
use crate::config::SchedulerConfig;
use crate::master::MasterContext;

/// State-store key holding the tracked upstream buildset ids.
pub const UPSTREAM_BSIDS_KEY: &str = "upstream_bsids";

/// Reason given to buildsets created by a dependent scheduler.
pub const DOWNSTREAM_REASON: &str = "downstream";

enum Notification {
    Created { scheduler: String, bsid: BuildsetId },
    Completed(BuildsetCompletePayload),
    Reconcile,
    Flush(oneshot::Sender<()>),
    Stop,
}

struct Running {
    consumer: QueueRef,
    tx: mpsc::UnboundedSender<Notification>,
    worker: JoinHandle<()>,
}

struct Tracker {
    base: Arc<SchedulerBase>,
    upstream_name: String,
    /// Cached tracked ids; `None` until loaded from the state store.
    upstream_bsids: tokio::sync::Mutex<Option<Vec<BuildsetId>>>,
}

/// Triggers a buildset on its own builders for every successful buildset of
/// an upstream scheduler.
pub struct Dependent {
    tracker: Arc<Tracker>,
    running: Mutex<Option<Running>>,
}

impl Dependent {
    /// Create a dependent scheduler watching `upstream`.
    ///
    /// Fails if `upstream` is not a scheduler.
    pub fn new(
        config: SchedulerConfig,
        upstream: &dyn MasterService,
        master: MasterContext,
    ) -> Result<Self> {
        let upstream = upstream.as_scheduler().ok_or_else(|| {
            Error::Config(format!(
                "upstream {} of scheduler {} must be another scheduler",
                upstream.service_name(),
                config.name
            ))
        })?;
        let upstream_name = upstream.name().to_string();
        let base = Arc::new(SchedulerBase::new(config, master)?);

        Ok(Self {
            tracker: Arc::new(Tracker {
                base,
                upstream_name,
                upstream_bsids: tokio::sync::Mutex::new(None),
            }),
            running: Mutex::new(None),
        })
    }

    pub fn upstream_name(&self) -> &str {
        &self.tracker.upstream_name
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to buildset events and check for buildsets that completed
    /// while stopped. Starting a running scheduler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mq = self.tracker.base.mq();

        // One queue for both topics, so a buildset's `new` always reaches the
        // worker before its `complete`.
        let consumer = mq.consume(
            buildset_callback(tx.clone()),
            &[BUILDSET_NEW_TOPIC, BUILDSET_COMPLETE_TOPIC],
            None,
        )?;

        // Channel is open: the receiver is still held locally.
        let _ = tx.send(Notification::Reconcile);
        let worker = tokio::spawn(run_worker(self.tracker.clone(), rx));

        info!(
            "Dependent scheduler {} started, watching {}",
            self.name(),
            self.tracker.upstream_name
        );
        *running = Some(Running {
            consumer,
            tx,
            worker,
        });
        Ok(())
    }

    /// Stop consuming, finish notifications already received, and drop the
    /// cached tracked ids.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(running) = running else {
            return;
        };

        running.consumer.stop_consuming();
        let _ = running.tx.send(Notification::Stop);
        if let Err(e) = running.worker.await {
            error!("Dependent scheduler {} worker failed: {}", self.name(), e);
        }

        *self.tracker.upstream_bsids.lock().await = None;
        info!("Dependent scheduler {} stopped", self.name());
    }

    /// Wait until every notification received so far has been handled.
    pub async fn flush(&self) {
        let tx = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|r| r.tx.clone());
        let Some(tx) = tx else {
            return;
        };

        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(Notification::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Record interest in `bsid` if it was created by the upstream scheduler.
    pub async fn on_buildset_created(&self, scheduler: &str, bsid: BuildsetId) -> Result<()> {
        self.tracker.buildset_created(scheduler, bsid).await
    }

    /// Evaluate every tracked buildset that is complete, or is `hint`.
    pub async fn reconcile(&self, hint: Option<&BuildsetCompletePayload>) -> Result<()> {
        self.tracker.check_completed_buildsets(hint).await
    }

    /// Currently tracked upstream buildset ids.
    pub async fn tracked_buildsets(&self) -> Result<Vec<BuildsetId>> {
        let mut cache = self.tracker.upstream_bsids.lock().await;
        self.tracker.load(&mut cache).await
    }
}

impl Scheduler for Dependent {
    fn name(&self) -> &str {
        self.tracker.base.name()
    }

    fn builder_names(&self) -> &[String] {
        self.tracker.base.builder_names()
    }
}

impl MasterService for Dependent {
    fn service_name(&self) -> &str {
        self.name()
    }

    fn as_scheduler(&self) -> Option<&dyn Scheduler> {
        Some(self)
    }
}

fn buildset_callback(tx: mpsc::UnboundedSender<Notification>) -> ConsumerCallback {
    Arc::new(move |routing_key: &str, payload: &Value| {
        let notification = if routing_key.ends_with(".new") {
            BuildsetNewPayload::from_value(payload).map(|msg| Notification::Created {
                scheduler: msg.scheduler,
                bsid: msg.bsid,
            })
        } else {
            BuildsetCompletePayload::from_value(payload).map(Notification::Completed)
        };
        match notification {
            Ok(notification) => {
                let _ = tx.send(notification);
            }
            Err(e) => debug!("Ignoring malformed {} message: {}", routing_key, e),
        }
    })
}

async fn run_worker(tracker: Arc<Tracker>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let outcome = match notification {
            Notification::Created { scheduler, bsid } => {
                tracker.buildset_created(&scheduler, bsid).await
            }
            Notification::Completed(msg) => tracker.check_completed_buildsets(Some(&msg)).await,
            Notification::Reconcile => tracker.check_completed_buildsets(None).await,
            Notification::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
            Notification::Stop => break,
        };
        if let Err(e) = outcome {
            error!(
                "Dependent scheduler {} failed to handle buildset event: {}",
                tracker.base.name(),
                e
            );
        }
    }
}

impl Tracker {
    /// Load tracked ids into `cache` if needed and return a copy.
    async fn load(&self, cache: &mut Option<Vec<BuildsetId>>) -> Result<Vec<BuildsetId>> {
        if let Some(bsids) = cache.as_ref() {
            return Ok(bsids.clone());
        }
        let value = self
            .base
            .state()
            .get_state(self.base.objectid(), UPSTREAM_BSIDS_KEY, json!([]))
            .await?;
        let bsids: Vec<BuildsetId> = serde_json::from_value(value)?;
        *cache = Some(bsids.clone());
        Ok(bsids)
    }

    /// Persist `bsids`, updating the cache only once the write succeeded.
    async fn save(
        &self,
        cache: &mut Option<Vec<BuildsetId>>,
        bsids: Vec<BuildsetId>,
    ) -> Result<()> {
        self.base
            .state()
            .set_state(self.base.objectid(), UPSTREAM_BSIDS_KEY, json!(bsids))
            .await?;
        *cache = Some(bsids);
        Ok(())
    }

    async fn buildset_created(&self, scheduler: &str, bsid: BuildsetId) -> Result<()> {
        if scheduler != self.upstream_name {
            return Ok(());
        }

        let mut cache = self.upstream_bsids.lock().await;
        let mut bsids = self.load(&mut cache).await?;
        if bsids.contains(&bsid) {
            return Ok(());
        }
        bsids.push(bsid);
        self.save(&mut cache, bsids).await?;
        debug!("Scheduler {} now tracking upstream buildset {}", self.base.name(), bsid);
        Ok(())
    }

    /// Fetch tracked buildsets, forgetting ids the store no longer knows.
    async fn upstream_buildsets(
        &self,
        cache: &mut Option<Vec<BuildsetId>>,
    ) -> Result<Vec<BuildsetRecord>> {
        let bsids = self.load(cache).await?;

        let mut records = Vec::with_capacity(bsids.len());
        let mut missing = Vec::new();
        for bsid in &bsids {
            match self.base.buildsets().get_buildset(*bsid).await? {
                Some(record) => records.push(record),
                None => missing.push(*bsid),
            }
        }

        if !missing.is_empty() {
            warn!(
                "Scheduler {} dropping unknown upstream buildsets {:?}",
                self.base.name(),
                missing
            );
            let kept = bsids.into_iter().filter(|b| !missing.contains(b)).collect();
            self.save(cache, kept).await?;
        }

        Ok(records)
    }

    async fn check_completed_buildsets(
        &self,
        hint: Option<&BuildsetCompletePayload>,
    ) -> Result<()> {
        let mut cache = self.upstream_bsids.lock().await;
        let records = self.upstream_buildsets(&mut cache).await?;

        let mut evaluated = Vec::new();
        let mut failure = None;
        for record in records {
            let hinted = hint.filter(|h| h.bsid == record.bsid);
            // The store's complete flag may lag the completion message.
            if !record.complete && hinted.is_none() {
                continue;
            }

            let results = record.results.or(hinted.map(|h| h.result));
            if results.is_some_and(|r| r.is_success_class()) {
                if let Err(e) = self
                    .base
                    .add_buildset_for_source_stamp(record.ssid, DOWNSTREAM_REASON, None)
                    .await
                {
                    failure = Some(e);
                    break;
                }
            } else {
                debug!(
                    "Upstream buildset {} finished with {:?}; not triggering",
                    record.bsid, results
                );
            }
            evaluated.push(record.bsid);
        }

        if !evaluated.is_empty() {
            let kept = self
                .load(&mut cache)
                .await?
                .into_iter()
                .filter(|b| !evaluated.contains(b))
                .collect();
            self.save(&mut cache, kept).await?;
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
