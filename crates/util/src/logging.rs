// SPDX-License-Identifier: PolyForm-Shield-1.0

use tracing_subscriber::EnvFilter;

/// Initialise process-wide structured logging.
///
/// `RUST_LOG` overrides; otherwise `verbose` (the config document's
/// `verbose` field) selects a default level: `0` is `info`, `1` is `debug`,
/// `2` or higher is `trace`. Intended to be called exactly once, at the top
/// of `main`.
pub fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}
