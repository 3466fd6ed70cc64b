//! Byte-stream channel (UART, USB CDC, stdio).
//!
//! A stream has no message boundaries, so every bus frame travels behind a
//! little-endian length prefix:
//! ```text
//! ┌────────────┬──────────────────────────┐
//! │ Length (2B)│ Bus frame (N B)          │
//! │ LE u16     │                          │
//! └────────────┴──────────────────────────┘
//! ```
//!
//! [`FrameDecoder`] accumulates incoming bytes and yields complete frames;
//! a single read may carry part of a prefix, part of a frame, or several
//! frames back to back. The stream is point-to-point, so sessions on it
//! carry [`ChannelContext::None`] and all end together when the stream
//! closes.

use std::io::{self, Read, Write};
use std::sync::{Mutex, PoisonError};

use log::{debug, info, warn};

use crate::bus::{Bus, Channel, ChannelContext, ChannelId};

/// Length prefix size.
const PREFIX_LEN: usize = 2;

const READ_BUF_SIZE: usize = 512;

// ── Decoder ──────────────────────────────────────────────────

enum DecoderState {
    /// Waiting for prefix bytes.
    ReadingPrefix { collected: usize },
    /// Prefix received, reading the frame body.
    ReadingFrame { expected: usize },
    /// Oversized frame announced; skipping its body.
    Discarding { remaining: usize },
}

/// Streaming length-prefix decoder.
pub struct FrameDecoder {
    state: DecoderState,
    prefix: [u8; PREFIX_LEN],
    frame: Vec<u8>,
    max_frame: usize,
}

impl FrameDecoder {
    /// Decoder accepting frames of at most `max_frame` bytes.
    pub fn new(max_frame: usize) -> Self {
        Self {
            state: DecoderState::ReadingPrefix { collected: 0 },
            prefix: [0; PREFIX_LEN],
            frame: Vec::with_capacity(max_frame),
            max_frame,
        }
    }

    /// Feed bytes; `on_frame` runs once per completed frame, in order.
    ///
    /// Zero-length frames are ignored. Frames longer than the limit are
    /// skipped whole so the decoder stays aligned with the stream.
    pub fn feed(&mut self, mut data: &[u8], mut on_frame: impl FnMut(&[u8])) {
        while !data.is_empty() {
            match &mut self.state {
                DecoderState::ReadingPrefix { collected } => {
                    let take = (PREFIX_LEN - *collected).min(data.len());
                    self.prefix[*collected..*collected + take].copy_from_slice(&data[..take]);
                    *collected += take;
                    data = &data[take..];

                    if *collected == PREFIX_LEN {
                        let len = u16::from_le_bytes(self.prefix) as usize;
                        self.frame.clear();
                        self.state = if len == 0 {
                            DecoderState::ReadingPrefix { collected: 0 }
                        } else if len > self.max_frame {
                            debug!("SERIAL: skipping {}-byte frame (limit {})", len, self.max_frame);
                            DecoderState::Discarding { remaining: len }
                        } else {
                            DecoderState::ReadingFrame { expected: len }
                        };
                    }
                }

                DecoderState::ReadingFrame { expected } => {
                    let take = (*expected - self.frame.len()).min(data.len());
                    self.frame.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.frame.len() == *expected {
                        self.state = DecoderState::ReadingPrefix { collected: 0 };
                        on_frame(&self.frame);
                    }
                }

                DecoderState::Discarding { remaining } => {
                    let take = (*remaining).min(data.len());
                    *remaining -= take;
                    data = &data[take..];

                    if *remaining == 0 {
                        self.state = DecoderState::ReadingPrefix { collected: 0 };
                    }
                }
            }
        }
    }

    /// Drop any partial frame (e.g. after the line was re-opened).
    pub fn reset(&mut self) {
        self.state = DecoderState::ReadingPrefix { collected: 0 };
        self.frame.clear();
    }
}

/// Prefix `frame` with its length. `None` if it cannot be expressed.
pub fn encode_frame(frame: &[u8]) -> Option<Vec<u8>> {
    let len = u16::try_from(frame.len()).ok()?;
    let mut out = Vec::with_capacity(PREFIX_LEN + frame.len());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(frame);
    Some(out)
}

// ── Channel ──────────────────────────────────────────────────

/// Outbound half of a byte stream, registered as a bus channel.
pub struct StreamChannel<W> {
    name: &'static str,
    mtu: usize,
    writer: Mutex<W>,
}

impl<W: Write + Send> StreamChannel<W> {
    pub fn new(name: &'static str, mtu: usize, writer: W) -> Self {
        Self {
            name,
            mtu,
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> Channel for StreamChannel<W> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn mtu(&self, _: &ChannelContext) -> usize {
        self.mtu
    }

    fn send(&self, frame: &[u8], _: &ChannelContext) -> bool {
        let Some(bytes) = encode_frame(frame) else {
            return false;
        };
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.write_all(&bytes).and_then(|()| writer.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!("SERIAL: '{}' write failed: {}", self.name, e);
                false
            }
        }
    }
}

/// Read frames from `reader` into the bus until the stream ends.
///
/// End of stream ends every session on the channel. Blocks the calling
/// thread; run it on the transport's own thread.
pub fn pump(bus: &Bus, channel: ChannelId, mut reader: impl Read, max_frame: usize) -> io::Result<()> {
    let mut decoder = FrameDecoder::new(max_frame);
    let mut buf = [0u8; READ_BUF_SIZE];

    let result = loop {
        match reader.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => decoder.feed(&buf[..n], |frame| {
                bus.dispatch(channel, frame, ChannelContext::None);
            }),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break Err(e),
        }
    };

    let ended = bus.disconnect(channel, &ChannelContext::None);
    info!("SERIAL: stream closed, {} session(s) ended", ended);
    result
}
