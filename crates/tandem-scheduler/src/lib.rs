//! Schedulers that create buildsets in response to other buildsets.
//!
//! - [`Dependent`] fires when an upstream scheduler's buildset succeeds.
//! - [`Triggerable`] fires on demand and reports the buildset's result.

pub mod base;
pub mod config;
pub mod dependent;
pub mod master;
pub mod triggerable;

pub use base::{MasterService, Scheduler, SchedulerBase};
pub use config::{MasterConfig, SchedulerConfig};
pub use dependent::Dependent;
pub use master::MasterContext;
pub use triggerable::{TriggerFuture, TriggerOutcome, Triggerable};
