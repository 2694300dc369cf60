use std::time::Duration;

use serde_json::Value;

/// Boxed error returned by user-supplied handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in channel proxy, request and host operations.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The proxy, channel or host was disposed.
    #[error("channel proxy already disposed")]
    Disposed,

    /// The raw endpoint cannot back a channel proxy.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    /// No reply arrived within the request timeout.
    #[error("request {id} timed out after {elapsed:?}")]
    Timeout { id: String, elapsed: Duration },

    /// Inbound bytes could not be decoded into a message.
    #[error("failed to decode inbound message: {0}")]
    Decode(#[source] chanproxy_frame::FrameError),

    /// The channel closed or was disposed while the request was pending.
    #[error("channel closed before request {id} settled")]
    ChannelClosed { id: String },

    /// A caller-supplied request id is already awaiting a reply.
    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    /// A data or message handler failed.
    #[error("handler failed: {0}")]
    Handler(#[source] BoxError),

    /// The remote side answered with a failure body.
    #[error("remote request failed: {0}")]
    Remote(Value),

    /// An argument was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] chanproxy_transport::TransportError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
