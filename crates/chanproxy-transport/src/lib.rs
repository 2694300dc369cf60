//! Raw duplex endpoints for chanproxy.
//!
//! Two capability shapes are provided, and callers pick one at construction:
//! - byte streams ([`ByteStream`]) accepted from a [`StreamListener`]
//!   (Unix domain sockets, TCP)
//! - message pipes ([`ProcessChannel`]) that deliver discrete lines, such as
//!   a child process's stdio
//!
//! This is the lowest layer. Framing and correlation live further up.

pub mod error;
pub mod process;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use process::{
    encode_line, LineReader, LineSink, LineSource, ProcessChannel, DEFAULT_MAX_LINE_LENGTH,
};
pub use tcp::TcpSocketListener;
pub use traits::{ByteStream, ConnectionInfo, StreamListener, TransportKind};

#[cfg(unix)]
pub use uds::UnixDomainSocket;
