//! Optional tracing-subscriber wiring for standalone binaries and examples
//! that embed this crate.
//!
//! The client itself only emits [`tracing`] events — structured, rate-
//! limited to one per 5 seconds per call site — and never installs a
//! subscriber — that decision belongs to the embedding application. This
//! module is a convenience for callers who don't already have one, gated
//! behind the `tracing-init` feature so it doesn't force a
//! `tracing-subscriber` dependency on every consumer.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Initializes a global tracing subscriber with formatted output, honoring
/// `RUST_LOG` and defaulting to `info` when it's unset.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_span_events(FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_level(true)
                .with_filter(filter),
        )
        .init();
}
