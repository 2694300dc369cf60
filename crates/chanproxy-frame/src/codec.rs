use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::{FrameError, Result};

/// Frame terminator. Never produced by the base64 alphabet.
pub const DELIMITER: u8 = b';';

/// Configuration for the frame codec.
#[derive(Debug, Clone, Default)]
pub struct FrameConfig {
    /// Maximum size of one buffered frame in bytes, delimiter excluded.
    /// `None` leaves buffering unbounded.
    pub max_frame_size: Option<usize>,
}

impl FrameConfig {
    /// Bounded configuration, for peers that are not trusted.
    pub fn bounded(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: Some(max_frame_size),
        }
    }

    fn check(&self, size: usize) -> Result<()> {
        match self.max_frame_size {
            Some(max) if size > max => Err(FrameError::FrameTooLarge { size, max }),
            _ => Ok(()),
        }
    }
}

/// Encode a message into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────────┬─────┐
/// │ base64(JSON(message))        │ ";" │
/// └──────────────────────────────┴─────┘
/// ```
pub fn encode_frame<T: Serialize + ?Sized>(message: &T, dst: &mut BytesMut) -> Result<()> {
    let json = serde_json::to_vec(message)?;
    let encoded = BASE64_STANDARD.encode(json);
    dst.reserve(encoded.len() + 1);
    dst.put_slice(encoded.as_bytes());
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode the next complete frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// Empty segments (`;;`) are skipped. On success or on a decode failure the
/// frame bytes are consumed, so the remainder stays aligned on a frame
/// boundary.
///
/// This scans the whole buffer on every call. Streams fed in many small
/// reads should go through [`FrameCodec`] or [`StreamFramer`], which resume
/// the scan where the previous call stopped.
///
/// [`StreamFramer`]: crate::StreamFramer
pub fn decode_frame(src: &mut BytesMut, config: &FrameConfig) -> Result<Option<Value>> {
    FrameScanner::default().decode(src, config)
}

/// Incremental delimiter search over a growing buffer.
#[derive(Debug, Clone, Default)]
pub(crate) struct FrameScanner {
    /// Bytes before this offset are known not to contain a delimiter.
    next_index: usize,
    /// An oversized unterminated frame is being dropped up to its delimiter.
    is_discarding: bool,
}

impl FrameScanner {
    pub(crate) fn decode(
        &mut self,
        src: &mut BytesMut,
        config: &FrameConfig,
    ) -> Result<Option<Value>> {
        loop {
            let start = self.next_index.min(src.len());
            let found = src[start..]
                .iter()
                .position(|b| *b == DELIMITER)
                .map(|offset| start + offset);

            match (self.is_discarding, found) {
                (true, Some(end)) => {
                    src.advance(end + 1);
                    self.next_index = 0;
                    self.is_discarding = false;
                }
                (true, None) => {
                    src.clear();
                    self.next_index = 0;
                    return Ok(None);
                }
                (false, Some(0)) => {
                    src.advance(1);
                    self.next_index = 0;
                }
                (false, Some(end)) => {
                    self.next_index = 0;
                    let segment = src.split_to(end);
                    src.advance(1);
                    config.check(end)?;

                    let json = BASE64_STANDARD.decode(&segment)?;
                    let value = serde_json::from_slice(&json)?;
                    return Ok(Some(value));
                }
                (false, None) => {
                    if let Err(err) = config.check(src.len()) {
                        self.next_index = 0;
                        self.is_discarding = true;
                        return Err(err);
                    }
                    self.next_index = src.len();
                    return Ok(None);
                }
            }
        }
    }
}

/// `tokio_util` codec for the base64 JSON frame format.
///
/// Decodes into [`serde_json::Value`] and encodes anything `Serialize`.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
    scanner: FrameScanner,
}

impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            scanner: FrameScanner::default(),
        }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Decoder for FrameCodec {
    type Item = Value;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        self.scanner.decode(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>> {
        if let Some(value) = self.decode(src)? {
            return Ok(Some(value));
        }
        if !src.is_empty() {
            debug!(
                remaining = src.len(),
                "discarding unterminated frame at end of stream"
            );
            src.clear();
        }
        self.scanner = FrameScanner::default();
        Ok(None)
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        encode_frame(&item, dst)
    }
}
