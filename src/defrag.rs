//! Frame defragmenters: turning a byte stream into discrete frames.
//!
//! TCP delivers bytes, not messages. A [`Defragmenter`] is the stateful
//! reader that reassembles message frames from a peer's stream. The
//! receive loop owns a carry buffer of leftover bytes; `read_frame`
//! appends stream reads to it, splits one completed frame off the front,
//! and leaves the remainder as the next call's leftovers.
//!
//! Two reusable strategies are provided:
//!
//! - [`LengthPrefixedDefragmenter`] for protocols with a fixed-size
//!   header that encodes the total frame length.
//! - [`MixedDefragmenter`] for protocols where the header itself has a
//!   variable shape, resolved by a caller-supplied probe.
//!
//! Both are stateless between frames; the carry buffer is the only state
//! and it is explicit in the contract.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::cancel::CancelToken;
use crate::error::{NetError, Result};

/// Default sanity ceiling on the total length of a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// What a call to [`Defragmenter::read_frame`] produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A fully assembled frame. Residual bytes stay in the carry buffer.
    Frame(Bytes),
    /// The buffered bytes are not a recoverable frame; the caller must
    /// discard the carry buffer and call again.
    Dropped,
    /// The stream reached end-of-file before a frame could be completed.
    StreamClosed,
}

/// A stateful reader that assembles frames from a byte stream.
///
/// Implementations must honour `cancel` at every read (returning
/// [`NetError::Cancelled`]) and propagate transport failures as
/// [`NetError::Io`]. Any other error is treated by the engine as an
/// unhandled protocol error and terminates the peer.
#[async_trait]
pub trait Defragmenter: Send {
    /// Read until one frame is complete, the buffered data turns out to
    /// be unusable, or the stream closes.
    ///
    /// `carry` holds leftover bytes from the previous call and receives
    /// this call's leftovers.
    async fn read_frame(
        &mut self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        carry: &mut BytesMut,
        cancel: &CancelToken,
    ) -> Result<ReadOutcome>;
}

/// Factory producing a fresh defragmenter, used at peer construction and
/// by protocol switches.
pub type DefragmenterFactory = Arc<dyn Fn() -> Box<dyn Defragmenter> + Send + Sync>;

/// Read one chunk from `stream` into `carry`, honouring cancellation.
///
/// Returns the number of bytes read; zero means end-of-stream.
async fn fill(
    stream: &mut (dyn AsyncRead + Send + Unpin),
    carry: &mut BytesMut,
    cancel: &CancelToken,
) -> Result<usize> {
    tokio::select! {
        _ = cancel.cancelled() => Err(NetError::Cancelled),
        read = (&mut *stream).read_buf(carry) => read.map_err(NetError::from),
    }
}

/// Defragmenter for protocols with a fixed-size length header.
///
/// The header is `header_len` bytes; `frame_length` decodes it into the
/// **total** frame length, header included. The produced frame spans the
/// header and the body.
pub struct LengthPrefixedDefragmenter {
    header_len: usize,
    frame_length: Arc<dyn Fn(&[u8]) -> usize + Send + Sync>,
    max_frame_len: usize,
}

impl LengthPrefixedDefragmenter {
    /// Create a defragmenter with a `header_len`-byte header decoded by
    /// `frame_length`, and a sanity ceiling of `max_frame_len` on the
    /// total frame length.
    pub fn new<F>(header_len: usize, frame_length: F, max_frame_len: usize) -> Self
    where
        F: Fn(&[u8]) -> usize + Send + Sync + 'static,
    {
        assert!(header_len > 0, "header length must be positive");
        Self {
            header_len,
            frame_length: Arc::new(frame_length),
            max_frame_len,
        }
    }

    /// The common case: a 4-byte little-endian header carrying the total
    /// frame length.
    pub fn u32_le(max_frame_len: usize) -> Self {
        Self::new(
            4,
            |header| u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize,
            max_frame_len,
        )
    }
}

#[async_trait]
impl Defragmenter for LengthPrefixedDefragmenter {
    async fn read_frame(
        &mut self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        carry: &mut BytesMut,
        cancel: &CancelToken,
    ) -> Result<ReadOutcome> {
        while carry.len() < self.header_len {
            if fill(stream, carry, cancel).await? == 0 {
                return Ok(ReadOutcome::StreamClosed);
            }
        }

        let total = (self.frame_length)(&carry[..self.header_len]);
        if total < self.header_len || total > self.max_frame_len {
            tracing::debug!(
                target: "seine::defrag",
                total,
                max = self.max_frame_len,
                "dropping frame with unusable declared length"
            );
            return Ok(ReadOutcome::Dropped);
        }

        while carry.len() < total {
            if fill(stream, carry, cancel).await? == 0 {
                return Ok(ReadOutcome::StreamClosed);
            }
        }

        Ok(ReadOutcome::Frame(carry.split_to(total).freeze()))
    }
}

impl std::fmt::Debug for LengthPrefixedDefragmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LengthPrefixedDefragmenter")
            .field("header_len", &self.header_len)
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

/// Verdict of a [`MixedDefragmenter`] header probe on a growing byte
/// prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderProbe {
    /// The prefix is not yet long enough to decide.
    NeedMore,
    /// The header is complete: it spans `header_len` bytes and the whole
    /// frame spans `total_len` bytes (header included).
    Complete {
        /// Length of the header in bytes.
        header_len: usize,
        /// Total frame length in bytes, header included.
        total_len: usize,
    },
    /// The prefix cannot be a valid header; the buffered data is dropped.
    Invalid,
}

/// Defragmenter for protocols whose header shape is caller-defined:
/// delimiter-terminated headers, type-dependent lengths, and the like.
///
/// The probe is called on the growing buffered prefix until it resolves;
/// the body is then read to the declared total length.
pub struct MixedDefragmenter {
    probe: Arc<dyn Fn(&[u8]) -> HeaderProbe + Send + Sync>,
    max_frame_len: usize,
}

impl MixedDefragmenter {
    /// Create a defragmenter driven by `probe`, with a sanity ceiling of
    /// `max_frame_len` on the total frame length.
    pub fn new<F>(probe: F, max_frame_len: usize) -> Self
    where
        F: Fn(&[u8]) -> HeaderProbe + Send + Sync + 'static,
    {
        Self {
            probe: Arc::new(probe),
            max_frame_len,
        }
    }
}

#[async_trait]
impl Defragmenter for MixedDefragmenter {
    async fn read_frame(
        &mut self,
        stream: &mut (dyn AsyncRead + Send + Unpin),
        carry: &mut BytesMut,
        cancel: &CancelToken,
    ) -> Result<ReadOutcome> {
        let total = loop {
            match (self.probe)(&carry[..]) {
                HeaderProbe::NeedMore => {
                    if fill(stream, carry, cancel).await? == 0 {
                        return Ok(ReadOutcome::StreamClosed);
                    }
                }
                HeaderProbe::Complete {
                    header_len,
                    total_len,
                } => {
                    if total_len < header_len || total_len > self.max_frame_len {
                        tracing::debug!(
                            target: "seine::defrag",
                            total_len,
                            max = self.max_frame_len,
                            "dropping frame with unusable declared length"
                        );
                        return Ok(ReadOutcome::Dropped);
                    }
                    break total_len;
                }
                HeaderProbe::Invalid => return Ok(ReadOutcome::Dropped),
            }
        };

        while carry.len() < total {
            if fill(stream, carry, cancel).await? == 0 {
                return Ok(ReadOutcome::StreamClosed);
            }
        }

        Ok(ReadOutcome::Frame(carry.split_to(total).freeze()))
    }
}

impl std::fmt::Debug for MixedDefragmenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixedDefragmenter")
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}
