//! Transport-agnostic channel proxies with request/response correlation.
//!
//! chanproxy turns a raw socket or a child process's stdio into a message
//! channel, correlates requests with replies, and hosts many connections
//! behind a single listener.
//!
//! # Crate Structure
//!
//! - [`transport`]: Raw endpoints (Unix sockets, TCP, process stdio)
//! - [`frame`]: Socket framing (`base64(JSON);`) and process line encoding
//! - [`route`]: Route patterns, mail envelopes and URL conditions
//! - [`peer`]: Channel proxies, request channels, hosts and communicators
//!   (behind the `peer` feature)

/// Re-export transport types.
pub mod transport {
    pub use chanproxy_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use chanproxy_frame::*;
}

/// Re-export route types.
pub mod route {
    pub use chanproxy_route::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use chanproxy_peer::*;
}
