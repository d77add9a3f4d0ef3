//! Log subscriber setup.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the embedding application. [`init_tracing`] is a convenience for
//! binaries and for the worker's `debug` switch.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

/// Default filter directive when `RUST_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "codap_relay_worker=debug"
    } else {
        "codap_relay_worker=info"
    }
}

/// Install a global fmt subscriber once per process. `RUST_LOG` wins over the
/// `debug` default. A subscriber installed elsewhere is left in place.
pub fn init_tracing(debug: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    });
}
