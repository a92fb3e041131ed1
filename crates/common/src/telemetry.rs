//! Logging setup shared by every MedDesk binary

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_level`. JSON output unless `MEDDESK_LOG_FORMAT=pretty`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let pretty = std::env::var("MEDDESK_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    let builder = fmt().with_env_filter(filter).with_target(true);

    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}
