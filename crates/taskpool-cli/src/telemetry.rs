//! Console logging for the `taskpool` binary.
//!
//! Events are printed through `tracing_subscriber::fmt` in a human-readable,
//! pretty layout with thread ids, source locations and local RFC 3339
//! timestamps. Verbosity is controlled with `RUST_LOG` and defaults to `info`;
//! use `RUST_LOG=taskpool=trace` to follow every dispatch.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        )
        .try_init()?;

    Ok(())
}
