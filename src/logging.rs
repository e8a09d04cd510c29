//! Tracing subscriber setup for the binary.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber.
///
/// Reads `RUST_LOG`; defaults to `book_maker=info`. Output goes to stderr in
/// compact format, e.g.
///
/// ```bash
/// RUST_LOG=book_maker=debug book-maker phase 2 --project-id <id>
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("book_maker=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
