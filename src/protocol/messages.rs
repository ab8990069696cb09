//! Protocol record types and their wire kind values

use bytes::Bytes;

pub const REQUEST_DATASETS: u8 = 1;
pub const RESPONSE_DATASETS: u8 = 2;
pub const REQUEST_SNAPSHOTS: u8 = 3;
pub const RESPONSE_SNAPSHOTS: u8 = 4;
pub const REQUEST_FULL_SNAPSHOT: u8 = 5;
pub const REQUEST_INCREMENTAL_SNAPSHOT: u8 = 7;
pub const RESPONSE_ZFS_STREAM: u8 = 9;
pub const RESPONSE_DATA_EOF: u8 = 254;
pub const RESPONSE_ERROR: u8 = 255;

/// Client-to-server record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
	/// List all datasets the server is willing to expose
	Datasets,

	/// List replicable snapshots of one dataset
	Snapshots { dataset: String },

	/// Stream a full send of `dataset@snapshot`
	FullSnapshot { dataset: String, snapshot: String },

	/// Stream an incremental send from `base` to `dataset@target`
	IncrementalSnapshot { dataset: String, base: String, target: String },
}

impl Request {
	pub fn kind(&self) -> u8 {
		match self {
			Request::Datasets => REQUEST_DATASETS,
			Request::Snapshots { .. } => REQUEST_SNAPSHOTS,
			Request::FullSnapshot { .. } => REQUEST_FULL_SNAPSHOT,
			Request::IncrementalSnapshot { .. } => REQUEST_INCREMENTAL_SNAPSHOT,
		}
	}
}

/// Server-to-client record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
	/// Filtered, sorted dataset list
	Datasets(Vec<String>),

	/// Sorted snapshot list for one dataset
	Snapshots(Vec<String>),

	/// One chunk of a running send stream
	ZfsStream(Bytes),

	/// End of a send stream
	DataEof,

	/// Store-level failure before streaming started
	Error(String),
}

impl Response {
	pub fn kind(&self) -> u8 {
		match self {
			Response::Datasets(_) => RESPONSE_DATASETS,
			Response::Snapshots(_) => RESPONSE_SNAPSHOTS,
			Response::ZfsStream(_) => RESPONSE_ZFS_STREAM,
			Response::DataEof => RESPONSE_DATA_EOF,
			Response::Error(_) => RESPONSE_ERROR,
		}
	}
}

// vim: ts=4
