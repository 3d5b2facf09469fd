//! Structured logging setup.
//!
//! Logs go to **stderr** so stdout stays reserved for command output.
//! The level comes from `RUST_LOG`, falling back to `info`, or `debug`
//! with `--verbose`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. Fails if one is already set.
pub fn init(verbose: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let default_level = if verbose { "debug" } else { "info" };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .compact();

    let filter_layer =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_level))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}
