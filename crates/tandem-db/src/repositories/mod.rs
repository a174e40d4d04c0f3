//! In-memory store implementations.

mod buildsets;
mod state;

pub use buildsets::MemoryBuildsetStore;
pub use state::MemoryStateStore;
