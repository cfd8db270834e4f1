//! Public SDK surface for the daily spark service.
//!
//! Re-exports the building blocks and provides a small logging helper so
//! every binary initializes output the same way.

/// Re-export for convenience.
pub use spark_rs_config as config;
pub use spark_rs_core as core;
/// Re-export for convenience.
pub use spark_rs_provider as provider;
/// Re-export for convenience.
pub use spark_rs_store as store;

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// Millisecond timestamps, level from `RUST_LOG`. This is a no-op if the
/// feature is not enabled or a logger is already installed.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .parse_default_env()
            .try_init();
    }
}
