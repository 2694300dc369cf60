//! Line-oriented channel over a process's standard streams.
//!
//! Each message occupies exactly one `\n`-terminated line. The channel is
//! agnostic to what a line contains; the frame crate decides that.

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tokio_util::codec::{Encoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::error::{Result, TransportError};

/// Default upper bound for a single line (16 MiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Boxed read half of a process channel.
pub type LineSource = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of a process channel.
pub type LineSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Reader side of a process channel, yielding one `String` per line.
pub type LineReader = FramedRead<LineSource, LinesCodec>;

/// A bidirectional line channel over a child's stdio, the current
/// process's stdio, or any pair of async byte halves.
pub struct ProcessChannel {
    reader: LineReader,
    writer: FramedWrite<LineSink, LinesCodec>,
    max_line_length: usize,
}

impl ProcessChannel {
    /// Build a channel from explicit read and write halves.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_max_line_length(reader, writer, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Build a channel with a custom line length cap.
    pub fn with_max_line_length<R, W>(reader: R, writer: W, max_line_length: usize) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: LineSource = Box::new(reader);
        let writer: LineSink = Box::new(writer);
        Self {
            reader: FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_length)),
            writer: FramedWrite::new(writer, LinesCodec::new_with_max_length(max_line_length)),
            max_line_length,
        }
    }

    /// Attach to a spawned child's piped stdout (read) and stdin (write).
    ///
    /// Fails if either stream was not configured with `Stdio::piped()` or was
    /// already taken.
    pub fn from_child(child: &mut Child) -> Result<Self> {
        let stdout = child.stdout.take().ok_or_else(|| {
            TransportError::InvalidChannel("child stdout is not piped".to_string())
        })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            TransportError::InvalidChannel("child stdin is not piped".to_string())
        })?;
        debug!(pid = ?child.id(), "attached process channel to child");
        Ok(Self::new(stdout, stdin))
    }

    /// Attach to the current process's stdin (read) and stdout (write).
    pub fn from_stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Line length cap applied on both directions.
    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Receive the next line, without its terminator. `None` at end of stream.
    pub async fn recv_line(&mut self) -> Result<Option<String>> {
        match self.reader.next().await {
            Some(line) => line
                .map(Some)
                .map_err(|e| map_codec_error(e, self.max_line_length)),
            None => Ok(None),
        }
    }

    /// Send one line. The terminator is appended.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        check_line_length(line, self.max_line_length)?;
        self.writer
            .send(line)
            .await
            .map_err(|e| map_codec_error(e, self.max_line_length))
    }

    /// Split into the line reader and the raw writer.
    ///
    /// Bytes destined for the writer should be produced by [`encode_line`].
    pub fn into_parts(self) -> (LineReader, LineSink) {
        (self.reader, self.writer.into_inner())
    }
}

/// Encode a single line with its terminator.
///
/// Lines longer than `max_line_length` are refused, the same cap the
/// receiving side applies.
pub fn encode_line(line: &str, max_line_length: usize) -> Result<Bytes> {
    check_line_length(line, max_line_length)?;
    let mut buf = BytesMut::with_capacity(line.len() + 1);
    LinesCodec::new_with_max_length(max_line_length)
        .encode(line, &mut buf)
        .map_err(|e| map_codec_error(e, max_line_length))?;
    Ok(buf.freeze())
}

// LinesCodec only enforces its cap while decoding.
fn check_line_length(line: &str, max: usize) -> Result<()> {
    if line.len() > max {
        return Err(TransportError::LineTooLong { max });
    }
    Ok(())
}

/// Map a line codec failure into a transport error.
pub fn map_codec_error(err: LinesCodecError, max: usize) -> TransportError {
    match err {
        LinesCodecError::MaxLineLengthExceeded => TransportError::LineTooLong { max },
        LinesCodecError::Io(e) => TransportError::Io(e),
    }
}
