//! Tracing initialization
//!
//! `RUST_LOG` controls the filter; defaults to `info` when unset or
//! unparseable. Safe to call more than once, which keeps test setups
//! simple.

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
