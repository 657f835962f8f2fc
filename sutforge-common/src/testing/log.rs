//! Test logging.
//!
//! Call [`init_test_logging`] at the top of a test (or from a `ctor`) to
//! route `tracing` output through the test writer, so it only shows for
//! failing tests.
//!
//! ```ignore
//! #[ctor::ctor]
//! fn setup() {
//!     sutforge_common::testing::init_test_logging();
//! }
//! ```

use std::sync::Once;
use tracing_subscriber::prelude::*;

static TEST_LOGGING_INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// The level comes from `SUTFORGE_TEST_LOG_LEVEL` (default `debug`).
/// Safe to call from every test.
pub fn init_test_logging() {
    TEST_LOGGING_INIT.call_once(|| {
        let level =
            std::env::var("SUTFORGE_TEST_LOG_LEVEL").unwrap_or_else(|_| "debug".to_string());
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "sutforge={level},sutforge_common={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
