//! Tracing subscriber setup shared by the binaries.
//!
//! Logs go to stderr. `flight-query` prints its JSON result on stdout, and the
//! two streams must not mix.

use crate::config::{LogConfig, LogFormat};
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber, writing to stderr. `RUST_LOG` wins over `config.filter`.
///
/// Calling this twice is harmless; the second call leaves the first subscriber in place.
pub fn init_tracing(config: &LogConfig) {
    if let Err(e) = build_subscriber(config, std::io::stderr).try_init() {
        tracing::debug!("tracing subscriber already installed: {}", e);
    }
}

/// Build the subscriber `init_tracing` installs, with output sent to `writer`.
pub fn build_subscriber<W>(config: &LogConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format {
        LogFormat::Text => Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_writer(writer)
                .finish(),
        ),
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_current_span(false)
                .with_writer(writer)
                .finish(),
        ),
    }
}
