//! Message framing for chanproxy.
//!
//! Byte streams carry self-delimiting frames:
//! - each message is serialized to JSON
//! - the JSON bytes are base64-encoded (standard alphabet, padded)
//! - a `;` terminates the frame
//!
//! Base64 output never contains `;`, so the delimiter needs no escaping.
//! Line-oriented channels use [`line`] instead, one JSON string per line.

pub mod codec;
pub mod error;
pub mod framer;
pub mod line;

pub use codec::{decode_frame, encode_frame, FrameCodec, FrameConfig, DELIMITER};
pub use error::{FrameError, Result};
pub use framer::StreamFramer;
pub use line::{decode_line_message, encode_line_message};
