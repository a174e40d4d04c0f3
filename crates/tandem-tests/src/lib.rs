//! Integration test infrastructure for Tandem.
//!
//! Everything runs in-process against the simple message queue and the
//! in-memory stores.
//!
//! # Usage
//!
//! ```ignore
//! use tandem_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new().unwrap();
//!     // Use ctx.db, ctx.mq, ctx.master, etc.
//! }
//! ```

pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,tandem_scheduler=debug,tandem_mq=debug")),
        )
        .with_test_writer()
        .try_init();
}
