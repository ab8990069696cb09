//! Long-running replication client
//!
//! The client drives everything: connect, plan, transfer, disconnect,
//! sleep, repeat. One connection fetches the dataset list; each dataset
//! then gets a fresh connection carrying its snapshot query and, if the
//! planner calls for it, the transfer itself. A failing dataset is logged
//! and skipped — the next cycle is the retry mechanism.

use crate::config::Config;
use crate::error::SyncError;
use crate::logging;
use crate::plan::{self, Action};
use crate::protocol::{self, Request, Response};
use crate::shaping::Shaped;
use crate::store::SnapshotStore;
use crate::tls::TlsContext;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Run replication cycles forever, pausing `delay` between them
pub async fn run(conf: &Config, tls: &TlsContext, store: Arc<dyn SnapshotStore>) {
	loop {
		// the sentinel is re-checked every cycle
		let verbose = logging::verbose();
		if verbose {
			info!("sync started");
		}
		let started = Instant::now();
		if let Err(e) = cycle(conf, tls, store.as_ref()).await {
			warn!("sync cycle failed: {}", e);
		}
		if verbose {
			info!("sync finished, duration {:?}", started.elapsed());
		}
		sleep(conf.delay).await;
	}
}

/// One pass over all included datasets
pub async fn cycle(
	conf: &Config,
	tls: &TlsContext,
	store: &dyn SnapshotStore,
) -> Result<(), SyncError> {
	let connector = tls.connector();
	let datasets = fetch_datasets(conf, &connector).await?;
	for dataset in datasets {
		if let Err(e) = replicate_dataset(conf, &connector, store, &dataset).await {
			warn!("can't replicate {}: {}", dataset, e);
		}
	}
	Ok(())
}

async fn connect(
	conf: &Config,
	connector: &TlsConnector,
) -> Result<TlsStream<Shaped<TcpStream>>, SyncError> {
	let tcp = TcpStream::connect((conf.remote.as_str(), conf.port)).await?;
	// the shaper sits below TLS so the cap covers TLS framing too
	let shaped = Shaped::new(tcp, conf.bwlimit * 1024);
	let name = ServerName::try_from(conf.remote.clone())
		.map_err(|_| SyncError::BadServerName(conf.remote.clone()))?;
	Ok(connector.connect(name, shaped).await?)
}

// Ask the server for its dataset list, then apply the client-side filter
// too so a misconfigured server still yields the intended set
async fn fetch_datasets(
	conf: &Config,
	connector: &TlsConnector,
) -> Result<Vec<String>, SyncError> {
	let mut stream = connect(conf, connector).await?;
	protocol::write_request(&mut stream, &Request::Datasets).await?;
	let response = protocol::read_response(&mut stream).await?;
	let _ = stream.shutdown().await;
	match response {
		Some(Response::Datasets(datasets)) => Ok(conf.filter.filter_sorted(datasets)),
		Some(Response::Error(message)) => Err(SyncError::Remote(message)),
		Some(other) => Err(SyncError::UnexpectedResponse { kind: other.kind() }),
		None => Err(SyncError::Disconnected),
	}
}

// One session-per-dataset exchange: snapshot query, plan, transfer
async fn replicate_dataset(
	conf: &Config,
	connector: &TlsConnector,
	store: &dyn SnapshotStore,
	dataset: &str,
) -> Result<(), SyncError> {
	let mut stream = connect(conf, connector).await?;
	let result = replicate_over(conf, store, &mut stream, dataset).await;
	// close_notify so the server session ends cleanly
	let _ = stream.shutdown().await;
	result
}

async fn replicate_over<S>(
	conf: &Config,
	store: &dyn SnapshotStore,
	stream: &mut S,
	dataset: &str,
) -> Result<(), SyncError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	protocol::write_request(stream, &Request::Snapshots { dataset: dataset.to_string() })
		.await?;
	let source_snapshots = match protocol::read_response(stream).await? {
		Some(Response::Snapshots(snapshots)) => snapshots,
		Some(Response::Error(message)) => return Err(SyncError::Remote(message)),
		Some(other) => return Err(SyncError::UnexpectedResponse { kind: other.kind() }),
		None => return Err(SyncError::Disconnected),
	};
	if source_snapshots.is_empty() {
		info!("source snapshots list empty, can't replicate {}", dataset);
		return Ok(());
	}

	let destination_dataset = plan::destination_dataset(&conf.storage, dataset)?;
	let destination_datasets: Vec<String> = store
		.list_all_datasets()
		.await?
		.into_iter()
		.filter(|name| plan::within_storage(&conf.storage, name))
		.collect();
	let exists = destination_datasets.contains(&destination_dataset);
	let destination_snapshots = if exists {
		store.list_snapshots(&destination_dataset).await?
	} else {
		Vec::new()
	};

	match plan::decide(&source_snapshots, exists, &destination_snapshots)? {
		Action::UpToDate => {
			if logging::verbose() {
				info!("{} is up to date", dataset);
			}
			Ok(())
		}
		Action::Full { snapshot } => {
			// purge leftovers so force-receive semantics stay deterministic;
			// only meaningful when the dataset is actually there
			if exists {
				for stale in &destination_snapshots {
					store.destroy(&destination_dataset, stale).await?;
				}
			}
			let request = Request::FullSnapshot {
				dataset: dataset.to_string(),
				snapshot: snapshot.clone(),
			};
			transfer(conf, store, stream, &request).await?;
			debug!("received full {}@{} into {}", dataset, snapshot, destination_dataset);
			Ok(())
		}
		Action::Incremental { base, target } => {
			let request = Request::IncrementalSnapshot {
				dataset: dataset.to_string(),
				base,
				target: target.clone(),
			};
			transfer(conf, store, stream, &request).await?;
			debug!(
				"received incremental {}@{} into {}",
				dataset, target, destination_dataset
			);
			Ok(())
		}
	}
}

// Pump one streamed reply into a receive subprocess
async fn transfer<S>(
	conf: &Config,
	store: &dyn SnapshotStore,
	stream: &mut S,
	request: &Request,
) -> Result<(), SyncError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	protocol::write_request(stream, request).await?;
	let mut receive = store.open_receive(&conf.storage).await?;
	let mut write_failed = false;
	loop {
		match protocol::read_response(stream).await {
			Ok(Some(Response::ZfsStream(chunk))) => {
				if !write_failed {
					if let Err(e) = receive.write(&chunk).await {
						// keep draining the wire so the server's stream
						// ends predictably; the exit status will tell
						warn!("receive subprocess write failed: {}", e);
						write_failed = true;
					}
				}
			}
			Ok(Some(Response::DataEof)) => {
				return receive.finish().await.map_err(Into::into);
			}
			Ok(Some(Response::Error(message))) => {
				receive.abort().await;
				return Err(SyncError::Remote(message));
			}
			Ok(Some(other)) => {
				receive.abort().await;
				return Err(SyncError::UnexpectedResponse { kind: other.kind() });
			}
			Ok(None) => {
				receive.abort().await;
				return Err(SyncError::Disconnected);
			}
			Err(e) => {
				receive.abort().await;
				return Err(e.into());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Mode;
	use crate::error::StoreError;
	use crate::filter::DatasetFilter;
	use crate::store::{ReceiveStream, SendStream};
	use async_trait::async_trait;
	use bytes::Bytes;
	use std::path::PathBuf;
	use std::time::Duration;
	use tokio::io::duplex;
	use tokio::process::Command;

	struct SinkStore {
		sink: PathBuf,
	}

	#[async_trait]
	impl SnapshotStore for SinkStore {
		async fn list_all_datasets(&self) -> Result<Vec<String>, StoreError> {
			Ok(Vec::new())
		}

		async fn list_snapshots(&self, _dataset: &str) -> Result<Vec<String>, StoreError> {
			Ok(Vec::new())
		}

		async fn destroy(&self, _dataset: &str, _snapshot: &str) -> Result<(), StoreError> {
			Ok(())
		}

		async fn open_send(
			&self,
			_dataset: &str,
			_base: Option<&str>,
			_target: &str,
		) -> Result<SendStream, StoreError> {
			Err(StoreError::BadOutput { message: "no send side in this test".to_string() })
		}

		async fn open_receive(&self, _storage: &str) -> Result<ReceiveStream, StoreError> {
			let mut command = Command::new("sh");
			command.arg("-c").arg(format!("cat > '{}'", self.sink.display()));
			ReceiveStream::spawn(command, "sh -c cat".to_string())
		}
	}

	fn client_config() -> Config {
		Config {
			mode: Mode::Client,
			listen: String::new(),
			remote: "127.0.0.1".to_string(),
			port: 1,
			bwlimit: 0,
			ca: Default::default(),
			cert: Default::default(),
			key: Default::default(),
			filter: DatasetFilter::new(),
			storage: "backup/tank".to_string(),
			delay: Duration::from_secs(1),
		}
	}

	#[tokio::test]
	async fn test_transfer_lands_chunks_in_order() {
		let dir = tempfile::TempDir::new().unwrap();
		let sink = dir.path().join("received");
		let conf = client_config();
		let store = SinkStore { sink: sink.clone() };
		let (mut near, mut far) = duplex(1024 * 1024);

		let server = tokio::spawn(async move {
			let request = protocol::read_request(&mut far).await.unwrap().unwrap();
			assert!(matches!(request, Request::FullSnapshot { .. }));
			for chunk in [&b"first-"[..], &b"second"[..]] {
				protocol::write_response(
					&mut far,
					&Response::ZfsStream(Bytes::copy_from_slice(chunk)),
				)
				.await
				.unwrap();
			}
			protocol::write_response(&mut far, &Response::DataEof).await.unwrap();
		});

		let request = Request::FullSnapshot {
			dataset: "tank/101".to_string(),
			snapshot: "autosnap.a.daily".to_string(),
		};
		transfer(&conf, &store, &mut near, &request).await.unwrap();
		server.await.unwrap();
		assert_eq!(std::fs::read(&sink).unwrap(), b"first-second");
	}

	#[tokio::test]
	async fn test_transfer_aborts_on_remote_error() {
		let dir = tempfile::TempDir::new().unwrap();
		let conf = client_config();
		let store = SinkStore { sink: dir.path().join("received") };
		let (mut near, mut far) = duplex(65536);

		let server = tokio::spawn(async move {
			let _ = protocol::read_request(&mut far).await.unwrap().unwrap();
			protocol::write_response(
				&mut far,
				&Response::Error("zfs send failed".to_string()),
			)
			.await
			.unwrap();
		});

		let request = Request::FullSnapshot {
			dataset: "tank/101".to_string(),
			snapshot: "autosnap.a.daily".to_string(),
		};
		let err = transfer(&conf, &store, &mut near, &request).await.unwrap_err();
		server.await.unwrap();
		assert!(matches!(err, SyncError::Remote(_)));
	}

	#[tokio::test]
	async fn test_transfer_fails_on_dropped_connection() {
		let dir = tempfile::TempDir::new().unwrap();
		let conf = client_config();
		let store = SinkStore { sink: dir.path().join("received") };
		let (mut near, mut far) = duplex(65536);

		let server = tokio::spawn(async move {
			let _ = protocol::read_request(&mut far).await.unwrap().unwrap();
			protocol::write_response(
				&mut far,
				&Response::ZfsStream(Bytes::from_static(b"partial")),
			)
			.await
			.unwrap();
			// connection dies without DataEof
		});

		let request = Request::IncrementalSnapshot {
			dataset: "tank/101".to_string(),
			base: "autosnap.a.daily".to_string(),
			target: "autosnap.b.daily".to_string(),
		};
		let err = transfer(&conf, &store, &mut near, &request).await.unwrap_err();
		server.await.unwrap();
		assert!(matches!(err, SyncError::Disconnected));
	}
}

// vim: ts=4
