//! Tandem Core
//!
//! Core domain types, port traits, and error handling for Tandem.
//! This crate has minimal dependencies and defines the shared vocabulary
//! used by the message queue, storage, and scheduler crates.

pub mod buildset;
pub mod error;
pub mod events;
pub mod ids;
pub mod ports;
pub mod properties;
pub mod results;

pub use error::{Error, Result};
pub use ids::*;
