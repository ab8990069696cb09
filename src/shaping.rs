//! Bandwidth shaping layer for the raw byte stream
//!
//! `Shaped` wraps the TCP socket below the TLS layer, so the configured
//! ceiling covers TLS framing overhead as well as payload bytes. Each
//! direction keeps its own debt ledger: bytes moved accumulate debt,
//! elapsed wall-clock time pays it down, and once the outstanding debt is
//! worth a sleep the next poll in that direction waits it out. A limit of
//! 0 turns the wrapper into a passthrough.

use std::future::Future;
use std::io;
use std::num::NonZeroU64;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

const MICROS_PER_SECOND: u128 = 1_000_000;

// Debt below this is carried forward instead of scheduling a tiny sleep
const MINIMUM_SLEEP: Duration = Duration::from_millis(10);

struct Lane {
	limit: Option<NonZeroU64>,
	debt: u64,
	last: Option<Instant>,
	gate: Option<Pin<Box<Sleep>>>,
}

impl Lane {
	fn new(bytes_per_second: u64) -> Self {
		Lane { limit: NonZeroU64::new(bytes_per_second), debt: 0, last: None, gate: None }
	}

	// Serve a pending sleep before allowing the next I/O poll
	fn poll_gate(&mut self, cx: &mut Context<'_>) -> Poll<()> {
		if let Some(gate) = self.gate.as_mut() {
			ready!(gate.as_mut().poll(cx));
			self.gate = None;
		}
		Poll::Ready(())
	}

	// Account for bytes that just moved; schedule a gate if the debt is due
	fn register(&mut self, bytes: usize) {
		let limit = match self.limit {
			Some(limit) => limit,
			None => return,
		};
		let now = Instant::now();
		if let Some(last) = self.last {
			let elapsed_us = now.duration_since(last).as_micros();
			let allowed = elapsed_us.saturating_mul(u128::from(limit.get())) / MICROS_PER_SECOND;
			let remaining = u128::from(self.debt).saturating_sub(allowed);
			self.debt = remaining.min(u128::from(u64::MAX)) as u64;
		}
		self.last = Some(now);
		self.debt = self.debt.saturating_add(bytes as u64);

		let owed_us =
			u128::from(self.debt).saturating_mul(MICROS_PER_SECOND) / u128::from(limit.get());
		let owed = Duration::from_micros(owed_us.min(u128::from(u64::MAX)) as u64);
		if owed >= MINIMUM_SLEEP {
			// the slept time is credited back on the next register()
			self.gate = Some(Box::pin(sleep(owed)));
		}
	}
}

/// Byte stream with an independent throughput ceiling per direction
pub struct Shaped<S> {
	inner: S,
	read: Lane,
	write: Lane,
}

impl<S> Shaped<S> {
	/// Wrap `inner`, capping each direction at `bytes_per_second`
	/// (0 disables shaping)
	pub fn new(inner: S, bytes_per_second: u64) -> Self {
		Shaped {
			inner,
			read: Lane::new(bytes_per_second),
			write: Lane::new(bytes_per_second),
		}
	}
}

impl<S: AsyncRead + Unpin> AsyncRead for Shaped<S> {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		let this = self.get_mut();
		ready!(this.read.poll_gate(cx));
		let before = buf.filled().len();
		ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
		let moved = buf.filled().len() - before;
		this.read.register(moved);
		Poll::Ready(Ok(()))
	}
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Shaped<S> {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		let this = self.get_mut();
		ready!(this.write.poll_gate(cx));
		let moved = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
		this.write.register(moved);
		Poll::Ready(Ok(moved))
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_flush(cx)
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
	}
}


// vim: ts=4
