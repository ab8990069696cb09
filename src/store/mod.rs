//! Snapshot store abstraction and subprocess stream plumbing
//!
//! The rest of the program talks to the local filesystem only through
//! [`SnapshotStore`]. Implementations run the backing tool as a
//! subprocess and pipe its stdout/stdin; the [`SendStream`] and
//! [`ReceiveStream`] handles own that subprocess for the duration of one
//! transfer. Calling `finish()` (or `abort()`) is mandatory before
//! declaring the transfer done — the child's exit status is the
//! authoritative signal, and dropping a stream without closing it is a
//! bug in the caller.

use crate::error::StoreError;
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::warn;

pub mod zfs;

pub use zfs::ZfsStore;

/// Only snapshots carrying this name prefix are visible to replication
pub const AUTOSNAP_MARKER: &str = "autosnap";

/// Abstract interface to the snapshot-capable filesystem
#[async_trait]
pub trait SnapshotStore: Send + Sync {
	/// Every dataset known to the store
	async fn list_all_datasets(&self) -> Result<Vec<String>, StoreError>;

	/// Replicable snapshots of one dataset, sorted ascending
	async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>, StoreError>;

	/// Remove a single snapshot
	async fn destroy(&self, dataset: &str, snapshot: &str) -> Result<(), StoreError>;

	/// Start a send of `dataset@target`; `base` of `None` means full,
	/// `Some(b)` means incremental from `b`
	async fn open_send(
		&self,
		dataset: &str,
		base: Option<&str>,
		target: &str,
	) -> Result<SendStream, StoreError>;

	/// Start a receive that materializes a send stream under
	/// `storage_root`, replacing conflicting content (force mode)
	async fn open_receive(&self, storage_root: &str) -> Result<ReceiveStream, StoreError>;
}

/// Running send subprocess whose stdout is the snapshot stream
pub struct SendStream {
	child: Child,
	stdout: ChildStdout,
	stderr: Option<ChildStderr>,
	command: String,
}

impl SendStream {
	pub(crate) fn spawn(mut command: Command, description: String) -> Result<Self, StoreError> {
		command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
		let mut child = command.spawn().map_err(|e| StoreError::SpawnFailed {
			command: description.clone(),
			source: e,
		})?;
		let stdout = child
			.stdout
			.take()
			.ok_or(StoreError::StdioUnavailable { what: "stdout" })?;
		let stderr = child.stderr.take();
		Ok(SendStream { child, stdout, stderr, command: description })
	}

	/// Read the next run of stream bytes; 0 means the tool is done
	pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		self.stdout.read(buf).await
	}

	/// Tear the send down mid-stream without waiting for its end
	pub async fn abort(mut self) {
		let _ = self.child.start_kill();
		let _ = self.child.wait().await;
	}

	/// Close the pipe and wait the subprocess out
	pub async fn finish(self) -> Result<(), StoreError> {
		let SendStream { mut child, stdout, stderr, command } = self;
		drop(stdout);
		let mut detail = String::new();
		if let Some(mut stderr) = stderr {
			let _ = stderr.read_to_string(&mut detail).await;
		}
		let status = child.wait().await?;
		if !status.success() {
			return Err(StoreError::CommandFailed { command, stderr: detail });
		}
		Ok(())
	}
}

/// Running receive subprocess consuming a snapshot stream on stdin
pub struct ReceiveStream {
	child: Child,
	stdin: Option<ChildStdin>,
	stderr: Option<ChildStderr>,
	command: String,
}

impl ReceiveStream {
	pub(crate) fn spawn(mut command: Command, description: String) -> Result<Self, StoreError> {
		command.stdin(Stdio::piped()).stdout(Stdio::null()).stderr(Stdio::piped());
		let mut child = command.spawn().map_err(|e| StoreError::SpawnFailed {
			command: description.clone(),
			source: e,
		})?;
		let stdin = child.stdin.take();
		if stdin.is_none() {
			return Err(StoreError::StdioUnavailable { what: "stdin" });
		}
		let stderr = child.stderr.take();
		Ok(ReceiveStream { child, stdin, stderr, command: description })
	}

	/// Feed stream bytes into the tool
	pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
		match self.stdin.as_mut() {
			Some(stdin) => stdin.write_all(data).await,
			None => Err(io::Error::new(
				io::ErrorKind::BrokenPipe,
				"receive stdin already closed",
			)),
		}
	}

	/// Signal end of stream, log the tool's stderr and wait it out; a
	/// clean exit is the commit point of the transfer
	pub async fn finish(self) -> Result<(), StoreError> {
		let ReceiveStream { mut child, stdin, stderr, command } = self;
		drop(stdin);
		let mut tail = Vec::new();
		if let Some(stderr) = stderr {
			let mut lines = BufReader::new(stderr).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				warn!("{}: stderr: {}", command, line);
				tail.push(line);
			}
		}
		let status = child.wait().await?;
		if !status.success() {
			return Err(StoreError::CommandFailed { command, stderr: tail.join("; ") });
		}
		Ok(())
	}

	/// Tear the receive down without finalizing; the tool discards the
	/// partial state on its own
	pub async fn abort(mut self) {
		self.stdin.take();
		let _ = self.child.start_kill();
		let _ = self.child.wait().await;
	}
}

// vim: ts=4
