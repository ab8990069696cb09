//! ZFS-backed snapshot store
//!
//! Runs the `zfs` command and parses its `-H` (scripting mode) output.
//! The program name is injectable so tests can point the store at a stub
//! executable.

use crate::error::StoreError;
use crate::store::{ReceiveStream, SendStream, SnapshotStore, AUTOSNAP_MARKER};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Snapshot store backed by the host `zfs` binary
#[derive(Debug, Clone)]
pub struct ZfsStore {
	program: PathBuf,
}

impl ZfsStore {
	pub fn new() -> Self {
		Self::with_program("zfs")
	}

	/// Use a different executable in place of `zfs`
	pub fn with_program(program: impl Into<PathBuf>) -> Self {
		ZfsStore { program: program.into() }
	}

	fn describe(&self, args: &[&str]) -> String {
		format!("{} {}", self.program.display(), args.join(" "))
	}

	// Run a short-lived subcommand and capture its stdout
	async fn run(&self, args: &[&str]) -> Result<String, StoreError> {
		let output = Command::new(&self.program)
			.args(args)
			.stdin(Stdio::null())
			.output()
			.await
			.map_err(|e| StoreError::SpawnFailed {
				command: self.describe(args),
				source: e,
			})?;
		if !output.status.success() {
			return Err(StoreError::CommandFailed {
				command: self.describe(args),
				stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			});
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}
}

impl Default for ZfsStore {
	fn default() -> Self {
		ZfsStore::new()
	}
}

#[async_trait]
impl SnapshotStore for ZfsStore {
	async fn list_all_datasets(&self) -> Result<Vec<String>, StoreError> {
		let output = self.run(&["list", "-H", "-o", "name"]).await?;
		Ok(parse_names(&output))
	}

	async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>, StoreError> {
		let output = self.run(&["list", "-H", "-p", "-o", "name", "-t", "snap"]).await?;
		let mut snapshots = Vec::new();
		for line in output.lines() {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			let (owner, snapshot) = line.split_once('@').ok_or_else(|| {
				StoreError::BadOutput {
					message: format!("snapshot line without '@': '{}'", line),
				}
			})?;
			if owner != dataset || !snapshot.starts_with(AUTOSNAP_MARKER) {
				continue;
			}
			snapshots.push(snapshot.to_string());
		}
		snapshots.sort();
		Ok(snapshots)
	}

	async fn destroy(&self, dataset: &str, snapshot: &str) -> Result<(), StoreError> {
		let name = format!("{}@{}", dataset, snapshot);
		self.run(&["destroy", name.as_str()]).await?;
		Ok(())
	}

	async fn open_send(
		&self,
		dataset: &str,
		base: Option<&str>,
		target: &str,
	) -> Result<SendStream, StoreError> {
		let full_name = format!("{}@{}", dataset, target);
		let mut command = Command::new(&self.program);
		let description = match base {
			// full send carries the snapshot properties along
			None => {
				command.args(["send", "-p", full_name.as_str()]);
				self.describe(&["send", "-p", full_name.as_str()])
			}
			Some(base) => {
				let base_ref = format!("@{}", base);
				command.args(["send", "-i", base_ref.as_str(), full_name.as_str()]);
				self.describe(&["send", "-i", base_ref.as_str(), full_name.as_str()])
			}
		};
		SendStream::spawn(command, description)
	}

	async fn open_receive(&self, storage_root: &str) -> Result<ReceiveStream, StoreError> {
		let mut command = Command::new(&self.program);
		command.args(["recv", "-F", "-d", storage_root]);
		ReceiveStream::spawn(command, self.describe(&["recv", "-F", "-d", storage_root]))
	}
}

fn parse_names(output: &str) -> Vec<String> {
	output
		.lines()
		.map(str::trim)
		.filter(|line| !line.is_empty())
		.map(str::to_string)
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use std::os::unix::fs::PermissionsExt;
	use std::path::Path;
	use tempfile::TempDir;

	fn stub(dir: &Path, body: &str) -> PathBuf {
		let path = dir.join("zfs");
		fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
		let mut perms = fs::metadata(&path).unwrap().permissions();
		perms.set_mode(0o755);
		fs::set_permissions(&path, perms).unwrap();
		path
	}

	#[tokio::test]
	async fn test_list_all_datasets_trims_lines() {
		let dir = TempDir::new().unwrap();
		let store = ZfsStore::with_program(stub(
			dir.path(),
			"printf 'tank\\ntank/101\\n\\n  tank/102  \\n'",
		));
		assert_eq!(
			store.list_all_datasets().await.unwrap(),
			vec!["tank", "tank/101", "tank/102"]
		);
	}

	#[tokio::test]
	async fn test_list_snapshots_filters_and_sorts() {
		let dir = TempDir::new().unwrap();
		let store = ZfsStore::with_program(stub(
			dir.path(),
			"printf 'tank/101@autosnap.2016-07-17.00:00:00.daily\\n\
			 tank/101@manual.keep\\n\
			 tank/102@autosnap.2016-07-16.00:00:00.daily\\n\
			 tank/101@autosnap.2016-07-16.00:00:00.daily\\n'",
		));
		assert_eq!(
			store.list_snapshots("tank/101").await.unwrap(),
			vec![
				"autosnap.2016-07-16.00:00:00.daily",
				"autosnap.2016-07-17.00:00:00.daily"
			]
		);
	}

	#[tokio::test]
	async fn test_failed_command_carries_stderr() {
		let dir = TempDir::new().unwrap();
		let store = ZfsStore::with_program(stub(dir.path(), "echo boom >&2; exit 1"));
		let err = store.list_all_datasets().await.unwrap_err();
		match err {
			StoreError::CommandFailed { stderr, .. } => assert!(stderr.contains("boom")),
			other => panic!("unexpected error {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_missing_program_is_spawn_error() {
		let store = ZfsStore::with_program("/nonexistent/zfs");
		assert!(matches!(
			store.list_all_datasets().await.unwrap_err(),
			StoreError::SpawnFailed { .. }
		));
	}

	#[tokio::test]
	async fn test_send_stream_reads_to_eof() {
		let dir = TempDir::new().unwrap();
		let store = ZfsStore::with_program(stub(
			dir.path(),
			"case \"$1\" in send) printf 'stream-bytes';; esac",
		));
		let mut send = store
			.open_send("tank/101", None, "autosnap.a.daily")
			.await
			.unwrap();
		let mut collected = Vec::new();
		let mut buf = [0u8; 7];
		loop {
			let n = send.read(&mut buf).await.unwrap();
			if n == 0 {
				break;
			}
			collected.extend_from_slice(&buf[..n]);
		}
		send.finish().await.unwrap();
		assert_eq!(collected, b"stream-bytes");
	}

	#[tokio::test]
	async fn test_receive_stream_lands_bytes() {
		let dir = TempDir::new().unwrap();
		let sink = dir.path().join("received");
		let store = ZfsStore::with_program(stub(
			dir.path(),
			&format!("case \"$1\" in recv) cat > '{}';; esac", sink.display()),
		));
		let mut receive = store.open_receive("backup/tank").await.unwrap();
		receive.write(b"snapshot ").await.unwrap();
		receive.write(b"payload").await.unwrap();
		receive.finish().await.unwrap();
		assert_eq!(fs::read(&sink).unwrap(), b"snapshot payload");
	}

	#[tokio::test]
	async fn test_receive_failure_is_command_failed() {
		let dir = TempDir::new().unwrap();
		let store = ZfsStore::with_program(stub(
			dir.path(),
			"case \"$1\" in recv) cat >/dev/null; echo 'cannot receive' >&2; exit 1;; esac",
		));
		let mut receive = store.open_receive("backup/tank").await.unwrap();
		receive.write(b"data").await.unwrap();
		let err = receive.finish().await.unwrap_err();
		assert!(matches!(err, StoreError::CommandFailed { .. }));
	}

	#[tokio::test]
	async fn test_destroy_passes_full_snapshot_name() {
		let dir = TempDir::new().unwrap();
		let log = dir.path().join("destroyed");
		let store = ZfsStore::with_program(stub(
			dir.path(),
			&format!("case \"$1\" in destroy) echo \"$2\" >> '{}';; esac", log.display()),
		));
		store.destroy("backup/tank/101", "autosnap.a.daily").await.unwrap();
		assert_eq!(
			fs::read_to_string(&log).unwrap().trim(),
			"backup/tank/101@autosnap.a.daily"
		);
	}
}

// vim: ts=4
