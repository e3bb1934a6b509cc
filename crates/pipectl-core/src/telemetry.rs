//! Structured logging setup.
//!
//! Logs go to stderr so that `--json` results printed on stdout stay
//! machine-readable. The global subscriber can only be set once; later
//! calls to [`init_tracing`] leave the first one in place.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON log lines instead of text.
/// * `level`: default verbosity when `RUST_LOG` is not set.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let (text, json) = if json {
        let json_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(false);
        (None, Some(json_layer))
    } else {
        let text_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        (Some(text_layer), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .is_ok()
}
