//! Length-delimited framing on top of the raw byte stream.
//!
//! [`FramingFilter`] buffers whatever the socket delivers and forwards only
//! complete frames, header included, to the layer inside it. A pluggable
//! [`SizeDetector`] decides how long the next frame is.

use std::cell::{Cell, RefCell};

use thiserror::Error;
use tracing::{trace, warn};

use crate::{
    buffer::ByteQueue,
    config::MAX_FRAME_SIZE,
    net::filter::{Context, Filter},
};

/// A malformed frame header. Fatal for the connection that sent it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("bad magic byte {found:#04x}, expected {expected:#04x}")]
    BadMagic { expected: u8, found: u8 },

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },

    #[error("invalid frame header: {0}")]
    Invalid(String),
}

/// Tells how long the frame at the start of `buf` is.
///
/// Returns `Ok(0)` while `buf` is too short to know, otherwise the total
/// frame length including its header. A header that can never become valid
/// is an error, which is different from not having enough bytes yet.
pub trait SizeDetector: 'static {
    fn frame_size(&self, buf: &[u8]) -> Result<usize, FramingError>;
}

impl<F> SizeDetector for F
where
    F: Fn(&[u8]) -> Result<usize, FramingError> + 'static,
{
    fn frame_size(&self, buf: &[u8]) -> Result<usize, FramingError> {
        self(buf)
    }
}

/// Frames of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct FixedSize(pub usize);

impl SizeDetector for FixedSize {
    fn frame_size(&self, buf: &[u8]) -> Result<usize, FramingError> {
        if self.0 == 0 {
            return Err(FramingError::Invalid("fixed frame size is zero".into()));
        }
        Ok(if buf.len() >= self.0 { self.0 } else { 0 })
    }
}

/// Width of a big-endian length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthField {
    U16,
    U32,
}

impl LengthField {
    fn width(self) -> usize {
        match self {
            LengthField::U16 => 2,
            LengthField::U32 => 4,
        }
    }

    fn max_payload(self) -> usize {
        match self {
            LengthField::U16 => u16::MAX as usize,
            LengthField::U32 => u32::MAX as usize,
        }
    }

    fn read(self, bytes: &[u8]) -> usize {
        match self {
            LengthField::U16 => u16::from_be_bytes([bytes[0], bytes[1]]) as usize,
            LengthField::U32 => {
                u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize
            }
        }
    }
}

/// `[magic?][length][payload]` frames, the length counting the payload only.
///
/// Frames are limited to [`MAX_FRAME_SIZE`] bytes in total unless
/// [`LengthPrefixed::with_max_frame`] says otherwise.
#[derive(Debug, Clone, Copy)]
pub struct LengthPrefixed {
    field: LengthField,
    magic: Option<u8>,
    max_frame: usize,
}

impl LengthPrefixed {
    pub const fn new(field: LengthField) -> Self {
        Self {
            field,
            magic: None,
            max_frame: MAX_FRAME_SIZE,
        }
    }

    /// Requires every frame to start with `magic`.
    pub const fn with_magic(mut self, magic: u8) -> Self {
        self.magic = Some(magic);
        self
    }

    /// Rejects headers announcing frames longer than `max_frame` in total.
    pub const fn with_max_frame(mut self, max_frame: usize) -> Self {
        self.max_frame = max_frame;
        self
    }

    pub fn header_len(&self) -> usize {
        self.magic.map_or(0, |_| 1) + self.field.width()
    }

    /// Builds a frame around `payload`, refusing payloads the length field
    /// cannot express or the frame limit would reject on the other side.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, FramingError> {
        let header_len = self.header_len();
        let len = header_len + payload.len();
        let max = self
            .max_frame
            .min(header_len.saturating_add(self.field.max_payload()));
        if len > max {
            return Err(FramingError::TooLarge { len, max });
        }

        let mut frame = Vec::with_capacity(len);
        if let Some(magic) = self.magic {
            frame.push(magic);
        }
        match self.field {
            LengthField::U16 => frame.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
            LengthField::U32 => frame.extend_from_slice(&(payload.len() as u32).to_be_bytes()),
        }
        frame.extend_from_slice(payload);
        Ok(frame)
    }
}

impl SizeDetector for LengthPrefixed {
    fn frame_size(&self, buf: &[u8]) -> Result<usize, FramingError> {
        let mut offset = 0;
        if let Some(expected) = self.magic {
            let Some(&found) = buf.first() else {
                return Ok(0);
            };
            if found != expected {
                return Err(FramingError::BadMagic { expected, found });
            }
            offset = 1;
        }
        let header_len = offset + self.field.width();
        if buf.len() < header_len {
            return Ok(0);
        }
        let len = header_len + self.field.read(&buf[offset..header_len]);
        if len > self.max_frame {
            return Err(FramingError::TooLarge {
                len,
                max: self.max_frame,
            });
        }
        Ok(len)
    }
}

/// Assembles complete frames before handing them inward.
///
/// Only `on_recv` (and `on_disconnect`, to keep it single) is overridden;
/// outbound traffic passes through untouched.
pub struct FramingFilter<D> {
    detector: D,
    buffer: RefCell<ByteQueue>,
    failed: Cell<bool>,
}

impl<D: SizeDetector> FramingFilter<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            buffer: RefCell::new(ByteQueue::new()),
            failed: Cell::new(false),
        }
    }

    /// Bytes received but not yet forwarded.
    pub fn buffered(&self) -> usize {
        self.buffer.borrow().len()
    }

    fn fail(&self, ctx: &Context, err: FramingError) {
        warn!(%err, peer_addr = ?ctx.remote_addr(), "malformed frame, closing connection");
        self.failed.set(true);
        self.buffer.borrow_mut().clear();
        ctx.disconnect();
        ctx.fire_disconnect();
    }
}

impl<D: SizeDetector> Filter for FramingFilter<D> {
    fn on_recv(&self, ctx: &Context, data: &[u8]) {
        if self.failed.get() {
            return;
        }
        self.buffer.borrow_mut().push(data);

        loop {
            let detected = {
                let buffer = self.buffer.borrow();
                self.detector
                    .frame_size(buffer.chunk())
                    .map(|size| (size, buffer.len()))
            };
            let size = match detected {
                Ok((size, available)) if size > 0 && size <= available => size,
                Ok(_) => return,
                Err(err) => return self.fail(ctx, err),
            };

            let frame = self.buffer.borrow_mut().take_front(size);
            trace!(len = size, "frame assembled");
            ctx.fire_recv(&frame);

            if self.failed.get() {
                return;
            }
        }
    }

    fn on_disconnect(&self, ctx: &Context) {
        if self.failed.replace(true) {
            return;
        }
        ctx.fire_disconnect();
    }
}
