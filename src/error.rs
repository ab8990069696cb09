//! Error types for autosync operations

use std::error::Error;
use std::fmt;
use std::io;

/// Configuration file errors, reported once at startup
#[derive(Debug)]
pub enum ConfigError {
	/// Failed to read the config file
	Io(io::Error),

	/// Malformed line (no value, stray text)
	Syntax { line: usize, message: String },

	/// Directive not known to this program
	UnknownDirective { line: usize, name: String },

	/// Directive present but its value does not parse
	BadValue { directive: &'static str, value: String },

	/// The parsed config is inconsistent (mode/directive mismatch etc.)
	Invalid { message: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Io(e) => write!(f, "can't read config: {}", e),
			ConfigError::Syntax { line, message } => {
				write!(f, "syntax error on line {}: {}", line, message)
			}
			ConfigError::UnknownDirective { line, name } => {
				write!(f, "unknown directive '{}' on line {}", name, line)
			}
			ConfigError::BadValue { directive, value } => {
				write!(f, "bad {} value '{}'", directive, value)
			}
			ConfigError::Invalid { message } => write!(f, "{}", message),
		}
	}
}

impl Error for ConfigError {}

impl From<io::Error> for ConfigError {
	fn from(e: io::Error) -> Self {
		ConfigError::Io(e)
	}
}

/// TLS context construction errors, fatal at startup
#[derive(Debug)]
pub enum TlsError {
	/// Failed to read a PEM file
	Io { path: String, source: io::Error },

	/// PEM file did not contain what we expected
	Pem { path: String, message: String },

	/// CA bundle contained no usable certificate
	EmptyCaBundle { path: String },

	/// rustls rejected the configuration
	Build(rustls::Error),

	/// Client certificate verifier could not be built
	Verifier(String),
}

impl fmt::Display for TlsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TlsError::Io { path, source } => write!(f, "can't read '{}': {}", path, source),
			TlsError::Pem { path, message } => write!(f, "bad PEM file '{}': {}", path, message),
			TlsError::EmptyCaBundle { path } => {
				write!(f, "no usable certificate in CA bundle '{}'", path)
			}
			TlsError::Build(e) => write!(f, "TLS configuration rejected: {}", e),
			TlsError::Verifier(message) => {
				write!(f, "can't build client certificate verifier: {}", message)
			}
		}
	}
}

impl Error for TlsError {}

impl From<rustls::Error> for TlsError {
	fn from(e: rustls::Error) -> Self {
		TlsError::Build(e)
	}
}

/// Wire protocol errors
#[derive(Debug)]
pub enum ProtocolError {
	/// Network I/O failure
	Io(io::Error),

	/// Peer announced a frame larger than the ceiling
	FrameTooLarge { size: u32 },

	/// Record kind byte not known to this program
	UnknownKind { kind: u8 },

	/// Frame ended before a field was complete
	Truncated { what: &'static str },

	/// String field was not valid UTF-8
	InvalidUtf8 { what: &'static str },
}

impl fmt::Display for ProtocolError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ProtocolError::Io(e) => write!(f, "I/O error: {}", e),
			ProtocolError::FrameTooLarge { size } => {
				write!(f, "frame of {} bytes exceeds maximum", size)
			}
			ProtocolError::UnknownKind { kind } => write!(f, "unknown record kind {}", kind),
			ProtocolError::Truncated { what } => write!(f, "truncated frame: {}", what),
			ProtocolError::InvalidUtf8 { what } => write!(f, "invalid UTF-8 in {}", what),
		}
	}
}

impl Error for ProtocolError {}

impl From<io::Error> for ProtocolError {
	fn from(e: io::Error) -> Self {
		ProtocolError::Io(e)
	}
}

/// Snapshot store (subprocess) errors
#[derive(Debug)]
pub enum StoreError {
	/// Could not start the backing tool
	SpawnFailed { command: String, source: io::Error },

	/// Backing tool exited unsuccessfully
	CommandFailed { command: String, stderr: String },

	/// Backing tool printed something we can't parse
	BadOutput { message: String },

	/// Spawned subprocess came up without the expected pipe
	StdioUnavailable { what: &'static str },

	/// Pipe I/O towards the subprocess failed
	Io(io::Error),
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::SpawnFailed { command, source } => {
				write!(f, "can't run '{}': {}", command, source)
			}
			StoreError::CommandFailed { command, stderr } => {
				let detail = stderr.trim();
				if detail.is_empty() {
					write!(f, "'{}' failed", command)
				} else {
					write!(f, "'{}' failed: {}", command, detail)
				}
			}
			StoreError::BadOutput { message } => write!(f, "unparsable tool output: {}", message),
			StoreError::StdioUnavailable { what } => {
				write!(f, "subprocess {} unavailable", what)
			}
			StoreError::Io(e) => write!(f, "subprocess I/O error: {}", e),
		}
	}
}

impl Error for StoreError {}

impl From<io::Error> for StoreError {
	fn from(e: io::Error) -> Self {
		StoreError::Io(e)
	}
}

/// Replication planner errors; the affected dataset is skipped for the cycle
#[derive(Debug, PartialEq, Eq)]
pub enum PlanError {
	/// Dataset name carries no pool prefix (no '/')
	DatasetWithoutPool(String),

	/// Snapshot name carries no suffix class (no '.')
	SnapshotWithoutSuffix(String),

	/// Planning was attempted with an empty source snapshot list
	NoSnapshots,
}

impl fmt::Display for PlanError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PlanError::DatasetWithoutPool(name) => {
				write!(f, "unexpected dataset name '{}': no pool prefix", name)
			}
			PlanError::SnapshotWithoutSuffix(name) => {
				write!(f, "unexpected snapshot name '{}': no suffix", name)
			}
			PlanError::NoSnapshots => write!(f, "no source snapshots to plan with"),
		}
	}
}

impl Error for PlanError {}

/// Session-level error for one replication exchange
#[derive(Debug)]
pub enum SyncError {
	/// Network I/O failure
	Io(io::Error),

	/// Wire protocol failure
	Protocol(ProtocolError),

	/// Local snapshot store failure
	Store(StoreError),

	/// Planner rejected the dataset
	Plan(PlanError),

	/// Server answered with a ResponseError record
	Remote(String),

	/// Server answered with a record we did not ask for
	UnexpectedResponse { kind: u8 },

	/// Peer hung up mid-exchange
	Disconnected,

	/// Remote host name is not usable for TLS verification
	BadServerName(String),
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io(e) => write!(f, "I/O error: {}", e),
			SyncError::Protocol(e) => write!(f, "protocol error: {}", e),
			SyncError::Store(e) => write!(f, "store error: {}", e),
			SyncError::Plan(e) => write!(f, "planner error: {}", e),
			SyncError::Remote(message) => write!(f, "remote error: {}", message),
			SyncError::UnexpectedResponse { kind } => {
				write!(f, "unexpected response kind {}", kind)
			}
			SyncError::Disconnected => write!(f, "connection closed by peer"),
			SyncError::BadServerName(name) => write!(f, "bad server name '{}'", name),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::Io(e)
	}
}

impl From<ProtocolError> for SyncError {
	fn from(e: ProtocolError) -> Self {
		SyncError::Protocol(e)
	}
}

impl From<StoreError> for SyncError {
	fn from(e: StoreError) -> Self {
		SyncError::Store(e)
	}
}

impl From<PlanError> for SyncError {
	fn from(e: PlanError) -> Self {
		SyncError::Plan(e)
	}
}

// vim: ts=4
