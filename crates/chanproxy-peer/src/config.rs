use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chanproxy_frame::FrameConfig;

use crate::handler::{ExceptionSink, TracingSink};

/// Configuration shared by channel proxies, request channels and hosts.
#[derive(Clone)]
pub struct ChannelConfig {
    /// Frame limits for socket channels.
    pub frame: FrameConfig,
    /// Timeout applied to requests that don't pass their own.
    /// `None` waits until a reply arrives or the channel closes.
    pub request_timeout: Option<Duration>,
    /// Where background failures are reported.
    pub sink: Arc<dyn ExceptionSink>,
}

impl ChannelConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ExceptionSink>) -> Self {
        self.sink = sink;
        self
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            request_timeout: None,
            sink: Arc::new(TracingSink),
        }
    }
}

impl fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelConfig")
            .field("frame", &self.frame)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
