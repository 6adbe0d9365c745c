//! Helpers shared by the workspace's test suites.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

// Workaround for "unused crate" lint false positives.
use workspace_hack as _;

use observability_deps::tracing::{self, info};
use parking_lot::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

static LOG_SETUP: Once = Once::new();

/// Enables debug logging if the RUST_LOG environment variable is set.
///
/// Safe to call from every test; only the first call installs the subscriber.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Install a terminal log subscriber driven by the RUST_LOG filter.
pub fn start_logging() {
    // ensure the global has been initialized
    LOG_SETUP.call_once(|| {
        // honor any global log filter set via RUST_LOG
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // route `log` records emitted by dependencies into tracing
        LogTracer::init().expect("tracing-log init failed");

        let subscriber = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting tracing default failed");

        info!("logging enabled");
    })
}

/// Asserts that `haystack` contains `needle`, with a useful failure message.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {{
        let haystack = &$haystack;
        let needle: &str = $needle.as_ref();
        assert!(
            haystack.contains(needle),
            "assert_contains failed:\n  needle: {needle:?}\n  haystack: {haystack:?}",
        );
    }};
}

/// Asserts that `haystack` does not contain `needle`.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {{
        let haystack = &$haystack;
        let needle: &str = $needle.as_ref();
        assert!(
            !haystack.contains(needle),
            "assert_not_contains failed:\n  needle: {needle:?}\n  haystack: {haystack:?}",
        );
    }};
}
