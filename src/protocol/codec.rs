//! Frame encoding and decoding for protocol records
//!
//! Wire format, big-endian throughout:
//!
//! ```text
//! frame    := len:u32 payload
//! request  := kind:u8 str str str          (dataset, snapshot1, snapshot2)
//! response := kind:u8 seq seq blob str     (datasets, snapshots, chunk, error)
//! str      := len:u16 utf8-bytes
//! seq      := count:u32 str*
//! blob     := len:u32 bytes
//! ```
//!
//! Every record always carries all of its fields; unused ones encode as
//! their zero value. Each `encode` produces one self-delimiting frame that
//! the peer's `decode` returns atomically.

use crate::error::ProtocolError;
use crate::protocol::messages::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Decode ceiling; the largest legitimate frame is a stream chunk plus
/// framing overhead, and dataset listings stay far below this
pub const MAX_FRAME_SIZE: u32 = 8 * 1024 * 1024;

/// Fixed transfer chunk size, identical on both peers so frame sizes and
/// buffer memory stay predictable
pub const CHUNK_SIZE: usize = 2 * 1024 * 1024;

const MAX_STR: usize = u16::MAX as usize;

impl Request {
	/// Encode as one length-prefixed frame
	pub fn encode(&self) -> Bytes {
		let (dataset, snapshot1, snapshot2) = match self {
			Request::Datasets => ("", "", ""),
			Request::Snapshots { dataset } => (dataset.as_str(), "", ""),
			Request::FullSnapshot { dataset, snapshot } => {
				(dataset.as_str(), snapshot.as_str(), "")
			}
			Request::IncrementalSnapshot { dataset, base, target } => {
				(dataset.as_str(), base.as_str(), target.as_str())
			}
		};

		let payload_len = 1 + str_size(dataset) + str_size(snapshot1) + str_size(snapshot2);
		let mut buf = BytesMut::with_capacity(4 + payload_len);
		buf.put_u32(payload_len as u32);
		buf.put_u8(self.kind());
		put_str(&mut buf, dataset);
		put_str(&mut buf, snapshot1);
		put_str(&mut buf, snapshot2);
		buf.freeze()
	}

	/// Decode from a frame payload (the length prefix already consumed)
	pub fn decode(mut payload: Bytes) -> Result<Request, ProtocolError> {
		if payload.remaining() < 1 {
			return Err(ProtocolError::Truncated { what: "request kind" });
		}
		let kind = payload.get_u8();
		if !matches!(
			kind,
			REQUEST_DATASETS
				| REQUEST_SNAPSHOTS
				| REQUEST_FULL_SNAPSHOT
				| REQUEST_INCREMENTAL_SNAPSHOT
		) {
			return Err(ProtocolError::UnknownKind { kind });
		}

		let dataset = get_str(&mut payload, "dataset name")?;
		let snapshot1 = get_str(&mut payload, "snapshot1 name")?;
		let snapshot2 = get_str(&mut payload, "snapshot2 name")?;

		Ok(match kind {
			REQUEST_DATASETS => Request::Datasets,
			REQUEST_SNAPSHOTS => Request::Snapshots { dataset },
			REQUEST_FULL_SNAPSHOT => Request::FullSnapshot { dataset, snapshot: snapshot1 },
			_ => Request::IncrementalSnapshot { dataset, base: snapshot1, target: snapshot2 },
		})
	}
}

impl Response {
	/// Encode as one length-prefixed frame
	pub fn encode(&self) -> Bytes {
		let empty: &[String] = &[];
		let (datasets, snapshots, chunk, error): (&[String], &[String], &[u8], &str) =
			match self {
				Response::Datasets(list) => (list.as_slice(), empty, &[], ""),
				Response::Snapshots(list) => (empty, list.as_slice(), &[], ""),
				Response::ZfsStream(data) => (empty, empty, data.as_ref(), ""),
				Response::DataEof => (empty, empty, &[], ""),
				Response::Error(message) => (empty, empty, &[], message.as_str()),
			};

		let payload_len =
			1 + seq_size(datasets) + seq_size(snapshots) + 4 + chunk.len() + str_size(error);
		let mut buf = BytesMut::with_capacity(4 + payload_len);
		buf.put_u32(payload_len as u32);
		buf.put_u8(self.kind());
		put_seq(&mut buf, datasets);
		put_seq(&mut buf, snapshots);
		buf.put_u32(chunk.len() as u32);
		buf.put_slice(chunk);
		put_str(&mut buf, error);
		buf.freeze()
	}

	/// Decode from a frame payload (the length prefix already consumed)
	pub fn decode(mut payload: Bytes) -> Result<Response, ProtocolError> {
		if payload.remaining() < 1 {
			return Err(ProtocolError::Truncated { what: "response kind" });
		}
		let kind = payload.get_u8();
		if !matches!(
			kind,
			RESPONSE_DATASETS
				| RESPONSE_SNAPSHOTS
				| RESPONSE_ZFS_STREAM
				| RESPONSE_DATA_EOF
				| RESPONSE_ERROR
		) {
			return Err(ProtocolError::UnknownKind { kind });
		}

		let datasets = get_seq(&mut payload, "dataset list")?;
		let snapshots = get_seq(&mut payload, "snapshot list")?;
		let chunk = get_blob(&mut payload, "data chunk")?;
		let error = get_str(&mut payload, "error message")?;

		Ok(match kind {
			RESPONSE_DATASETS => Response::Datasets(datasets),
			RESPONSE_SNAPSHOTS => Response::Snapshots(snapshots),
			RESPONSE_ZFS_STREAM => Response::ZfsStream(chunk),
			RESPONSE_DATA_EOF => Response::DataEof,
			_ => Response::Error(error),
		})
	}
}

/// Read one request; `None` means the peer hung up cleanly between frames
pub async fn read_request<R: AsyncRead + Unpin>(
	r: &mut R,
) -> Result<Option<Request>, ProtocolError> {
	match read_frame(r).await? {
		Some(payload) => Ok(Some(Request::decode(payload)?)),
		None => Ok(None),
	}
}

/// Read one response; `None` means the peer hung up cleanly between frames
pub async fn read_response<R: AsyncRead + Unpin>(
	r: &mut R,
) -> Result<Option<Response>, ProtocolError> {
	match read_frame(r).await? {
		Some(payload) => Ok(Some(Response::decode(payload)?)),
		None => Ok(None),
	}
}

pub async fn write_request<W: AsyncWrite + Unpin>(
	w: &mut W,
	request: &Request,
) -> Result<(), ProtocolError> {
	w.write_all(&request.encode()).await?;
	w.flush().await?;
	Ok(())
}

pub async fn write_response<W: AsyncWrite + Unpin>(
	w: &mut W,
	response: &Response,
) -> Result<(), ProtocolError> {
	w.write_all(&response.encode()).await?;
	w.flush().await?;
	Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Bytes>, ProtocolError> {
	let mut len_bytes = [0u8; 4];
	// read the first length byte alone so a clean hangup between frames is
	// distinguishable from a mid-frame cut
	let first = r.read(&mut len_bytes[..1]).await?;
	if first == 0 {
		return Ok(None);
	}
	r.read_exact(&mut len_bytes[1..]).await?;
	let len = u32::from_be_bytes(len_bytes);
	if len == 0 {
		return Err(ProtocolError::Truncated { what: "empty frame" });
	}
	if len > MAX_FRAME_SIZE {
		return Err(ProtocolError::FrameTooLarge { size: len });
	}
	let mut payload = vec![0u8; len as usize];
	r.read_exact(&mut payload).await?;
	Ok(Some(Bytes::from(payload)))
}

// Field names and error strings never approach the u16 cap; clamping on a
// char boundary keeps the encoder total regardless
fn clamp(s: &str) -> &str {
	if s.len() <= MAX_STR {
		return s;
	}
	let mut end = MAX_STR;
	while !s.is_char_boundary(end) {
		end -= 1;
	}
	&s[..end]
}

fn str_size(s: &str) -> usize {
	2 + clamp(s).len()
}

fn seq_size(items: &[String]) -> usize {
	4 + items.iter().map(|s| str_size(s)).sum::<usize>()
}

fn put_str(buf: &mut BytesMut, s: &str) {
	let s = clamp(s);
	buf.put_u16(s.len() as u16);
	buf.put_slice(s.as_bytes());
}

fn put_seq(buf: &mut BytesMut, items: &[String]) {
	buf.put_u32(items.len() as u32);
	for item in items {
		put_str(buf, item);
	}
}

fn get_str(payload: &mut Bytes, what: &'static str) -> Result<String, ProtocolError> {
	if payload.remaining() < 2 {
		return Err(ProtocolError::Truncated { what });
	}
	let len = payload.get_u16() as usize;
	if payload.remaining() < len {
		return Err(ProtocolError::Truncated { what });
	}
	String::from_utf8(payload.copy_to_bytes(len).to_vec())
		.map_err(|_| ProtocolError::InvalidUtf8 { what })
}

fn get_seq(payload: &mut Bytes, what: &'static str) -> Result<Vec<String>, ProtocolError> {
	if payload.remaining() < 4 {
		return Err(ProtocolError::Truncated { what });
	}
	let count = payload.get_u32() as usize;
	// each entry needs at least its length prefix
	if count > payload.remaining() / 2 {
		return Err(ProtocolError::Truncated { what });
	}
	let mut items = Vec::with_capacity(count);
	for _ in 0..count {
		items.push(get_str(payload, what)?);
	}
	Ok(items)
}

fn get_blob(payload: &mut Bytes, what: &'static str) -> Result<Bytes, ProtocolError> {
	if payload.remaining() < 4 {
		return Err(ProtocolError::Truncated { what });
	}
	let len = payload.get_u32() as usize;
	if payload.remaining() < len {
		return Err(ProtocolError::Truncated { what });
	}
	Ok(payload.copy_to_bytes(len))
}


// vim: ts=4
