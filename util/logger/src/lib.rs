//! Thin façade over `log` + `env_logger`.
//!
//! Re-exports the `log` macros so every crate in the workspace depends on
//! `btcwatch-logger` rather than `log` directly, keeping one place to swap
//! the backend later.

pub use log::{debug, error, info, trace, warn};

use std::io::Write;

/// Initialize the global logger from `RUST_LOG`, defaulting to `info` when
/// unset. Safe to call more than once; only the first call has an effect.
pub fn init() {
    init_with_default("info");
}

/// Same as [`init`] but with a caller-chosen default filter.
pub fn init_with_default(default_filter: &str) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format(|buf, record| {
        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        writeln!(
            buf,
            "{} {:<5} {} {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
