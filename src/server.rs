//! TLS server: accept loop and per-connection request/reply sessions
//!
//! The server is passive and stateless across connections. Every accepted
//! TLS connection gets its own spawned worker serving exactly one peer;
//! workers share nothing mutable. A session ends on clean EOF, on an
//! unknown request kind, or on the first network error.

use crate::config::Config;
use crate::error::{ProtocolError, SyncError};
use crate::protocol::{self, Request, Response};
use crate::shaping::Shaped;
use crate::store::SnapshotStore;
use crate::tls::TlsContext;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Bind the configured address and serve forever
pub async fn run(
	conf: &Config,
	tls: &TlsContext,
	store: Arc<dyn SnapshotStore>,
) -> Result<(), SyncError> {
	let listener = TcpListener::bind((conf.listen.as_str(), conf.port)).await?;
	info!("listening on {}:{}", conf.listen, conf.port);
	serve(listener, conf.clone(), tls, store).await
}

/// Accept loop over an already-bound listener
pub async fn serve(
	listener: TcpListener,
	conf: Config,
	tls: &TlsContext,
	store: Arc<dyn SnapshotStore>,
) -> Result<(), SyncError> {
	let conf = Arc::new(conf);
	let acceptor = tls.acceptor();
	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!("accept failed: {}", e);
				continue;
			}
		};
		let conf = conf.clone();
		let store = store.clone();
		let acceptor = acceptor.clone();
		tokio::spawn(async move {
			// the shaper sits below TLS so the cap covers TLS framing too
			let shaped = Shaped::new(stream, conf.bwlimit * 1024);
			match acceptor.accept(shaped).await {
				Ok(mut tls_stream) => {
					if let Err(e) =
						handle_connection(&conf, store.as_ref(), &mut tls_stream).await
					{
						warn!("session with {} ended: {}", peer, e);
					}
				}
				Err(e) => debug!("TLS handshake with {} failed: {}", peer, e),
			}
		});
	}
}

/// Request/reply loop for one authenticated peer
pub async fn handle_connection<S>(
	conf: &Config,
	store: &dyn SnapshotStore,
	stream: &mut S,
) -> Result<(), SyncError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	loop {
		let request = match protocol::read_request(stream).await {
			Ok(Some(request)) => request,
			// peer hung up between requests
			Ok(None) => return Ok(()),
			Err(ProtocolError::UnknownKind { kind }) => {
				debug!("unknown request kind {}, closing session", kind);
				return Ok(());
			}
			Err(e) => return Err(e.into()),
		};

		match request {
			Request::Datasets => {
				let response = match store.list_all_datasets().await {
					Ok(datasets) => Response::Datasets(conf.filter.filter_sorted(datasets)),
					Err(e) => {
						warn!("can't list datasets: {}", e);
						Response::Error(e.to_string())
					}
				};
				protocol::write_response(stream, &response).await?;
			}
			Request::Snapshots { dataset } => {
				let response = match store.list_snapshots(&dataset).await {
					Ok(snapshots) => Response::Snapshots(snapshots),
					Err(e) => {
						warn!("can't list snapshots of {}: {}", dataset, e);
						Response::Error(e.to_string())
					}
				};
				protocol::write_response(stream, &response).await?;
			}
			Request::FullSnapshot { dataset, snapshot } => {
				stream_send(store, stream, &dataset, None, &snapshot).await?;
			}
			Request::IncrementalSnapshot { dataset, base, target } => {
				stream_send(store, stream, &dataset, Some(&base), &target).await?;
			}
		}
	}
}

// Pump one send subprocess onto the wire in fixed-size chunks
async fn stream_send<S>(
	store: &dyn SnapshotStore,
	stream: &mut S,
	dataset: &str,
	base: Option<&str>,
	target: &str,
) -> Result<(), SyncError>
where
	S: AsyncRead + AsyncWrite + Unpin,
{
	let mut send = match store.open_send(dataset, base, target).await {
		Ok(send) => send,
		Err(e) => {
			// store failed before streaming started: answer and keep the
			// session alive
			warn!("can't open send for {}@{}: {}", dataset, target, e);
			protocol::write_response(stream, &Response::Error(e.to_string())).await?;
			return Ok(());
		}
	};

	let mut buf = vec![0u8; protocol::CHUNK_SIZE];
	loop {
		match send.read(&mut buf).await {
			Ok(0) => {
				protocol::write_response(stream, &Response::DataEof).await?;
				if let Err(e) = send.finish().await {
					warn!("send subprocess for {}@{} failed: {}", dataset, target, e);
				}
				return Ok(());
			}
			Ok(n) => {
				let chunk = Response::ZfsStream(Bytes::copy_from_slice(&buf[..n]));
				if let Err(e) = protocol::write_response(stream, &chunk).await {
					// no DataEof: the peer sees a dropped connection
					send.abort().await;
					return Err(e.into());
				}
			}
			Err(e) => {
				// mid-stream store failure; no resynchronization attempt
				warn!("reading send stream for {}@{} failed: {}", dataset, target, e);
				send.abort().await;
				return Err(e.into());
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::StoreError;
	use crate::store::{ReceiveStream, SendStream};
	use async_trait::async_trait;
	use tokio::io::duplex;
	use tokio::process::Command;

	// store whose send streams come from a shell one-liner
	struct ScriptStore {
		datasets: Vec<String>,
		snapshots: Vec<String>,
		payload: String,
	}

	#[async_trait]
	impl SnapshotStore for ScriptStore {
		async fn list_all_datasets(&self) -> Result<Vec<String>, StoreError> {
			Ok(self.datasets.clone())
		}

		async fn list_snapshots(&self, _dataset: &str) -> Result<Vec<String>, StoreError> {
			Ok(self.snapshots.clone())
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
			let mut command = Command::new("sh");
			command.arg("-c").arg(format!("printf '%s' '{}'", self.payload));
			SendStream::spawn(command, "sh -c printf".to_string())
		}

		async fn open_receive(&self, _storage: &str) -> Result<ReceiveStream, StoreError> {
			let mut command = Command::new("sh");
			command.arg("-c").arg("cat >/dev/null");
			ReceiveStream::spawn(command, "sh -c cat".to_string())
		}
	}

	fn test_config() -> Config {
		let mut filter = crate::filter::DatasetFilter::new();
		filter.exclude("tank/secret").unwrap();
		Config {
			mode: crate::config::Mode::Server,
			listen: "127.0.0.1".to_string(),
			remote: String::new(),
			port: 1,
			bwlimit: 0,
			ca: Default::default(),
			cert: Default::default(),
			key: Default::default(),
			filter,
			storage: String::new(),
			delay: std::time::Duration::ZERO,
		}
	}

	#[tokio::test]
	async fn test_session_lists_and_streams() {
		let conf = test_config();
		let store = ScriptStore {
			datasets: vec![
				"tank/zz".to_string(),
				"tank/secret".to_string(),
				"tank/aa".to_string(),
			],
			snapshots: vec!["autosnap.a.daily".to_string()],
			payload: "send-stream-body".to_string(),
		};
		let (mut near, mut far) = duplex(1024 * 1024);
		let server = tokio::spawn(async move {
			handle_connection(&conf, &store, &mut far).await
		});

		protocol::write_request(&mut near, &Request::Datasets).await.unwrap();
		let response = protocol::read_response(&mut near).await.unwrap().unwrap();
		// excluded name dropped, rest sorted
		assert_eq!(
			response,
			Response::Datasets(vec!["tank/aa".to_string(), "tank/zz".to_string()])
		);

		protocol::write_request(
			&mut near,
			&Request::Snapshots { dataset: "tank/aa".to_string() },
		)
		.await
		.unwrap();
		let response = protocol::read_response(&mut near).await.unwrap().unwrap();
		assert_eq!(response, Response::Snapshots(vec!["autosnap.a.daily".to_string()]));

		protocol::write_request(
			&mut near,
			&Request::FullSnapshot {
				dataset: "tank/aa".to_string(),
				snapshot: "autosnap.a.daily".to_string(),
			},
		)
		.await
		.unwrap();
		let mut collected = Vec::new();
		loop {
			match protocol::read_response(&mut near).await.unwrap().unwrap() {
				Response::ZfsStream(chunk) => collected.extend_from_slice(&chunk),
				Response::DataEof => break,
				other => panic!("unexpected response {:?}", other),
			}
		}
		assert_eq!(collected, b"send-stream-body");

		drop(near);
		assert!(server.await.unwrap().is_ok());
	}

	#[tokio::test]
	async fn test_unknown_kind_closes_session_silently() {
		let conf = test_config();
		let store =
			ScriptStore { datasets: vec![], snapshots: vec![], payload: String::new() };
		let (mut near, mut far) = duplex(4096);
		let server = tokio::spawn(async move {
			handle_connection(&conf, &store, &mut far).await
		});

		// hand-rolled frame with kind 99 and three empty strings
		let mut frame = vec![0u8, 0, 0, 7, 99];
		frame.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
		tokio::io::AsyncWriteExt::write_all(&mut near, &frame).await.unwrap();

		// session ends without any reply on the wire
		assert!(server.await.unwrap().is_ok());
		assert!(protocol::read_response(&mut near).await.unwrap().is_none());
	}
}

// vim: ts=4
