//! # elevtile-server
//!
//! Elevation statistics and terrain rendering over a tile pyramid.
//!
//! [`ElevationService`] exposes the request surface: per-tile statistics,
//! histograms and quantiles, statistics over a WGS84 envelope, and PNG
//! renders of elevation, slope, aspect, hillshade, TRI and TPI. It is
//! configured through [`ServerConfig`], loaded from YAML by the `elevtile`
//! binary. [`metrics_export::InMemoryRecorder`] collects the service
//! metrics when the binary is asked to write them out.

mod config;
pub mod metrics_export;
mod service;

pub use config::{ConfigError, ServerConfig};
pub use service::{ElevationService, RenderKind, ServiceError, ServiceResult};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Logs go to stderr so
/// command output on stdout stays machine-readable.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // A subscriber may already be installed by an embedding application
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
