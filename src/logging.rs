// Logging setup
// Library code logs through the `log` facade; binaries install a
// tracing-subscriber fmt sink that also picks up `log` records. Output goes to
// stderr because stdout carries the RPC stream.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when RUST_LOG is unset: our crates at `level`, the rest at warn.
pub fn default_directive(level: &str) -> String {
    format!(
        "kicad_courier_lib={level},kicad_courier={level},kcourier={level},warn",
        level = level
    )
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
    if installed.is_err() {
        log::debug!("Logging already initialized");
    }
}
