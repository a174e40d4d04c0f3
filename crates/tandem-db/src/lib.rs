//! Storage layer for Tandem.
//!
//! Ships in-memory implementations of the buildset and state stores. They
//! serialize their own mutations and support failure injection so callers
//! can exercise store error paths.

pub mod faults;
pub mod repositories;

pub use repositories::*;

use std::sync::Arc;
use tandem_core::ports::{BuildsetStore, StateStore};

/// Handle to both stores.
#[derive(Clone, Default)]
pub struct Database {
    buildsets: Arc<MemoryBuildsetStore>,
    state: Arc<MemoryStateStore>,
}

impl Database {
    /// Create an empty in-memory database.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Concrete buildset store, for seeding and inspection.
    pub fn buildsets(&self) -> &Arc<MemoryBuildsetStore> {
        &self.buildsets
    }

    /// Concrete state store, for seeding and inspection.
    pub fn state(&self) -> &Arc<MemoryStateStore> {
        &self.state
    }

    pub fn buildset_store(&self) -> Arc<dyn BuildsetStore> {
        self.buildsets.clone()
    }

    pub fn state_store(&self) -> Arc<dyn StateStore> {
        self.state.clone()
    }
}
