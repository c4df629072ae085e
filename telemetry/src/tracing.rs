use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Default filter applied when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVES: &str = "ingest=info";

/// Guards against double initialization in test binaries, where multiple tests
/// run in the same process and each one calls [`init_test_tracing`].
static TEST_TRACING: Once = Once::new();

/// Initializes tracing for a long-running binary.
///
/// The filter is taken from `RUST_LOG` when present, falling back to
/// [`DEFAULT_DIRECTIVES`] otherwise.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_DIRECTIVES.into()))
        .with(fmt::layer())
        .init();
}

/// Initializes tracing for tests.
///
/// Safe to call from every test. Output goes through the test writer so it is
/// captured per test and only shown on failure.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "ingest=debug".into()))
            .with(fmt::layer().with_test_writer())
            .init();
    });
}
