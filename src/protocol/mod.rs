//! Request/reply wire protocol between client and server
//!
//! One connection carries a strictly sequential exchange: the client
//! encodes a [`Request`], the server answers with one [`Response`] — or,
//! for snapshot transfers, with a run of stream records terminated by a
//! data-EOF marker. Records travel as self-delimiting length-prefixed
//! frames over the (optionally bandwidth-shaped) TLS byte stream.

pub mod codec;
pub mod messages;

pub use codec::{read_request, read_response, write_request, write_response};
pub use codec::{CHUNK_SIZE, MAX_FRAME_SIZE};
pub use messages::{Request, Response};

// vim: ts=4
