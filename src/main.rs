use autosync::config::{self, Config, Mode};
use autosync::store::{SnapshotStore, ZfsStore};
use autosync::tls::TlsContext;
use autosync::{client, logging, server};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "autosync", version, about = "Pull-based ZFS snapshot replicator")]
struct Args {
	/// Path to the configuration file
	#[arg(short = 'c', value_name = "PATH", default_value = config::DEFAULT_CONFIG_PATH)]
	config: PathBuf,
}

#[tokio::main]
async fn main() {
	let args = Args::parse();
	logging::init_tracing();

	let conf = match Config::load(&args.config) {
		Ok(conf) => conf,
		Err(e) => {
			eprintln!("error parsing config '{}': {}", args.config.display(), e);
			process::exit(2);
		}
	};

	let tls = match TlsContext::from_config(&conf) {
		Ok(tls) => tls,
		Err(e) => {
			error!("TLS setup failed: {}", e);
			process::exit(1);
		}
	};

	let store: Arc<dyn SnapshotStore> = Arc::new(ZfsStore::new());

	match conf.mode {
		Mode::Server => {
			if let Err(e) = server::run(&conf, &tls, store).await {
				error!("server failed: {}", e);
				process::exit(1);
			}
		}
		Mode::Client => client::run(&conf, &tls, store).await,
	}
}

// vim: ts=4
