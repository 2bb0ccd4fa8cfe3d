#![allow(dead_code)]

use std::sync::Once;

static INIT: Once = Once::new();

/// Set up a tracing subscriber when `RUST_LOG` asks for one.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        INIT.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .init();
        });
    }
}
