//! Logging setup and the verbose-mode sentinel
//!
//! Log output goes through `tracing`; verbosity of the steady-state client
//! loop is additionally controlled by an operator-touchable sentinel file
//! that is re-checked every cycle, so no signal handling is needed.

use std::path::Path;

pub use tracing::{debug, error, info, warn};

/// Directory holding the log files and the verbose sentinel
pub const LOG_DIR: &str = "/opt/autosync/log";

/// Initialize the tracing subscriber with environment filter support.
///
/// Logs at INFO and above by default; override with `RUST_LOG`, e.g.
/// `RUST_LOG=autosync::client=debug`.
pub fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_writer(std::io::stderr)
		.init();
}

/// Whether the operator enabled verbose cycle logging
pub fn verbose() -> bool {
	verbose_sentinel(Path::new(LOG_DIR))
}

fn verbose_sentinel(log_dir: &Path) -> bool {
	log_dir.join("v").exists()
}


// vim: ts=4
