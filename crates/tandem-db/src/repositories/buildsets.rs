//! In-memory implementation of BuildsetStore.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tandem_core::buildset::{BuildRequestIds, BuildsetRecord, NewBuildset};
use tandem_core::ids::{BuildRequestId, BuildsetId, SourceStampSetId};
use tandem_core::ports::BuildsetStore;
use tandem_core::properties::Properties;
use tandem_core::results::ResultCode;
use tandem_core::{Error, Result};
use tokio::sync::RwLock;
use tracing::debug;

use crate::faults::FaultInjector;

#[derive(Debug, Clone)]
struct StoredBuildset {
    record: BuildsetRecord,
    brids: BuildRequestIds,
}

#[derive(Debug, Default)]
struct Tables {
    buildsets: BTreeMap<BuildsetId, StoredBuildset>,
    next_bsid: i64,
    next_brid: i64,
}

/// In-memory implementation of BuildsetStore.
#[derive(Debug, Default)]
pub struct MemoryBuildsetStore {
    tables: RwLock<Tables>,
    faults: FaultInjector,
}

impl MemoryBuildsetStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store operations fail.
    pub fn fail_next(&self, count: u32) {
        self.faults.fail_next(count);
    }

    /// Make the next `count` calls of one operation (e.g. `"add_buildset"`) fail.
    pub fn fail_operation(&self, operation: &'static str, count: u32) {
        self.faults.fail_operation(operation, count);
    }

    /// Insert a buildset directly, bypassing id allocation.
    ///
    /// Used to seed buildsets created by a previous process.
    pub async fn insert(
        &self,
        bsid: BuildsetId,
        ssid: SourceStampSetId,
        complete: bool,
        results: Option<ResultCode>,
    ) {
        let mut tables = self.tables.write().await;
        tables.next_bsid = tables.next_bsid.max(bsid.get());
        tables.buildsets.insert(
            bsid,
            StoredBuildset {
                record: BuildsetRecord {
                    bsid,
                    ssid,
                    reason: String::new(),
                    properties: Properties::new(),
                    external_idstring: None,
                    complete,
                    results,
                    submitted_at: Utc::now(),
                    complete_at: complete.then(Utc::now),
                },
                brids: BuildRequestIds::new(),
            },
        );
    }

    /// All buildsets in creation order.
    pub async fn all_buildsets(&self) -> Vec<BuildsetRecord> {
        self.tables
            .read()
            .await
            .buildsets
            .values()
            .map(|b| b.record.clone())
            .collect()
    }

    /// Buildsets created with the given reason.
    pub async fn buildsets_with_reason(&self, reason: &str) -> Vec<BuildsetRecord> {
        self.all_buildsets()
            .await
            .into_iter()
            .filter(|b| b.reason == reason)
            .collect()
    }
}

#[async_trait]
impl BuildsetStore for MemoryBuildsetStore {
    async fn add_buildset(&self, buildset: NewBuildset) -> Result<(BuildsetId, BuildRequestIds)> {
        self.faults.check("add_buildset")?;

        let mut tables = self.tables.write().await;
        tables.next_bsid += 1;
        let bsid = BuildsetId::new(tables.next_bsid);

        let mut brids = BuildRequestIds::new();
        for builder in &buildset.builder_names {
            tables.next_brid += 1;
            brids.insert(builder.clone(), BuildRequestId::new(tables.next_brid));
        }

        let record = BuildsetRecord {
            bsid,
            ssid: buildset.ssid,
            reason: buildset.reason,
            properties: buildset.properties,
            external_idstring: buildset.external_idstring,
            complete: false,
            results: None,
            submitted_at: Utc::now(),
            complete_at: None,
        };
        tables.buildsets.insert(
            bsid,
            StoredBuildset {
                record,
                brids: brids.clone(),
            },
        );

        debug!("Added buildset {} with {} build requests", bsid, brids.len());
        Ok((bsid, brids))
    }

    async fn get_buildset(&self, bsid: BuildsetId) -> Result<Option<BuildsetRecord>> {
        self.faults.check("get_buildset")?;
        Ok(self
            .tables
            .read()
            .await
            .buildsets
            .get(&bsid)
            .map(|b| b.record.clone()))
    }

    async fn build_request_ids(&self, bsid: BuildsetId) -> Result<BuildRequestIds> {
        self.faults.check("build_request_ids")?;
        self.tables
            .read()
            .await
            .buildsets
            .get(&bsid)
            .map(|b| b.brids.clone())
            .ok_or(Error::BuildsetNotFound(bsid))
    }

    async fn complete_buildset(&self, bsid: BuildsetId, result: ResultCode) -> Result<()> {
        self.faults.check("complete_buildset")?;

        let mut tables = self.tables.write().await;
        let stored = tables
            .buildsets
            .get_mut(&bsid)
            .ok_or(Error::BuildsetNotFound(bsid))?;
        if stored.record.complete {
            return Err(Error::BuildsetAlreadyComplete(bsid));
        }
        stored.record.complete = true;
        stored.record.results = Some(result);
        stored.record.complete_at = Some(Utc::now());
        Ok(())
    }
}
