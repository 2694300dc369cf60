//! Channel proxies and request/response correlation.
//!
//! This is the layer applications use. Wrap a raw endpoint in a
//! [`ChannelProxy`], add correlation with [`RequestChannel`], host many
//! connections with [`ChannelHostProxy`], or route requests by path with
//! [`Communicator`].

pub mod communicator;
pub mod config;
pub mod connector;
pub mod error;
pub mod handler;
pub mod host;
pub mod message;
pub mod proxy;
pub mod request;

pub use communicator::{Communicator, CommunicatorOptions, RouteFuture, RouteHandler};
pub use config::ChannelConfig;
#[cfg(unix)]
pub use connector::connect_unix;
pub use connector::{attach_child, attach_stdio, connect_tcp};
pub use error::{BoxError, ProxyError, Result};
pub use handler::{ExceptionSink, HandlerSlot, TracingSink};
pub use host::{ChannelHostProxy, TargetHandle};
pub use message::{Message, LOCAL_FIELDS};
pub use proxy::{ChannelKind, ChannelProxy};
pub use request::RequestChannel;
