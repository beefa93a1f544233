//! Scopecast - record audio, watch it live, export it as a video.
//!
//! The library provides engine capture, the lock-free live display path,
//! and the offline video export with its audio merge.

pub mod capture;
pub mod export;
pub mod recorder;
pub mod utils;
pub mod waveform;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scopecast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
