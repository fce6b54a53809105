//! Tracing Initialization
//!
//! Configures the tracing subscriber with an environment filter and a
//! formatted output layer.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log level directives (default: `terminal_sync=info`)
//!
//! # Usage
//!
//! ```ignore
//! use terminal_sync::infrastructure::telemetry;
//!
//! // Initialize once at startup.
//! telemetry::init();
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Build the default environment filter.
///
/// `RUST_LOG` directives take precedence; the defaults keep this crate
/// at info and silence the noisier transport internals.
#[allow(clippy::expect_used)]
fn default_filter() -> EnvFilter {
    EnvFilter::from_default_env()
        .add_directive(
            "terminal_sync=info"
                .parse()
                .expect("static directive 'terminal_sync=info' is valid"),
        )
        .add_directive(
            "tungstenite=warn"
                .parse()
                .expect("static directive 'tungstenite=warn' is valid"),
        )
        .add_directive(
            "hyper=warn"
                .parse()
                .expect("static directive 'hyper=warn' is valid"),
        )
}

/// Initialize the tracing subscriber.
///
/// Call once at startup; a second call panics because the global
/// subscriber is already set.
pub fn init() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(default_filter())
        .with(fmt_layer)
        .init();
}

// =============================================================================
// Tests
// =============================================================================
