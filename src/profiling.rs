//! # Profiling Guide
//!
//! The cache logs through `tracing` at all times. With the `profiling`
//! feature it also opens spans around eviction, load jobs and finalize
//! drains, and [`init_tracing`] becomes available to write them to a file.
//!
//! ## Basic Usage
//!
//! ```toml
//! [dependencies]
//! resource_cache = { version = "0.1", features = ["profiling"] }
//! ```
//!
//! ```ignore
//! let _guard = resource_cache::profiling::init_tracing("trace.log")?;
//! let cache = ResourceCache::default();
//! // ... load and finalize; spans land in trace.log
//! ```
//!
//! Spans emitted:
//! - `load_resource` (loader thread, one per load job)
//! - `run_finalizers` (finalize thread, one per drain)
//! - `charge_and_evict` (whenever a resource is charged)
//!
//! ## Performance Tips
//!
//! 1. Profile in release mode for accurate metrics
//! 2. Use `RUST_LOG=resource_cache=debug` to see insert, dispatch and eviction events

#[cfg(feature = "profiling")]
pub use tracing_appender::non_blocking::WorkerGuard;

/// Install a global subscriber writing every event and span to `path`.
///
/// Keep the returned guard alive; dropping it flushes the writer.
#[cfg(feature = "profiling")]
pub fn init_tracing<P: AsRef<std::path::Path>>(path: P) -> crate::error::Result<WorkerGuard> {
    let file = std::fs::File::create(path.as_ref())?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_max_level(tracing::Level::TRACE)
        .try_init()
        .map_err(|e| crate::error::CacheError::ConfigError(format!("tracing already initialized: {e}")))?;
    Ok(guard)
}
