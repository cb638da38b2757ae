//! Integration test infrastructure for pagecache.
//!
//! Everything runs in-process against a [`MemoryStore`](pagecache_store::MemoryStore)
//! driven by a [`ManualClock`](pagecache_core::ManualClock), so expiry and
//! grace windows are stepped explicitly instead of slept through.
//!
//! # Usage
//!
//! ```ignore
//! use pagecache_tests::TestContext;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let ctx = TestContext::new(rules(2, 5));
//!     let response = ctx.get("/page").await;
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
                .unwrap_or_else(|_| EnvFilter::new("warn,pagecache_core=debug")),
        )
        .with_test_writer()
        .try_init();
}
