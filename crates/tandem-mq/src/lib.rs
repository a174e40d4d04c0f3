//! Topic-routed message queue for Tandem.

pub mod config;
pub mod connector;
pub mod metrics;
mod simple;
pub mod topic;

pub use config::MqConfig;
pub use connector::{BackendFactory, MqBackend, MqConnector};
pub use metrics::{MetricsSnapshot, MqMetrics};
pub use simple::SimpleMq;
pub use topic::Topic;
