//! Uniform data channel over a byte stream or a process line channel.
//!
//! A [`ChannelProxy`] owns the raw endpoint. One reader task decodes inbound
//! frames and hands each to the installed data handler. One writer task
//! drains an unbounded outbound queue, so [`ChannelProxy::send_data`] never
//! blocks.

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use bytes::{Bytes, BytesMut};
use chanproxy_frame::{decode_line_message, encode_frame, encode_line_message, FrameCodec, FrameError};
use chanproxy_transport::process::map_codec_error;
use chanproxy_transport::{
    encode_line, ByteStream, ProcessChannel, TransportError, DEFAULT_MAX_LINE_LENGTH,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::ChannelConfig;
use crate::error::{BoxError, ProxyError, Result};
use crate::handler::{lock, ExceptionSink, HandlerSlot};

/// Called once per inbound message.
pub type DataHandler =
    dyn Fn(&ChannelProxy, Value) -> std::result::Result<(), BoxError> + Send + Sync;

/// Called at most once when the inbound side ends. `None` is a clean end of
/// stream; `Some` carries the decode or handler failure that stopped it.
pub type CloseHandler = dyn Fn(Option<&ProxyError>) + Send + Sync;

/// Owner notification for a local dispose, which never reaches the close
/// handler.
pub(crate) type DisposeHook = dyn Fn() + Send + Sync;

/// Which wire encoding a proxy speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// `base64(JSON);` frames over a byte stream.
    Socket,
    /// One JSON string per line.
    Process,
}

impl ChannelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelKind::Socket => "socket",
            ChannelKind::Process => "process",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a channel proxy.
///
/// Clones refer to the same proxy. When the last handle is dropped the
/// reader stops and the writer drains and closes.
#[derive(Clone)]
pub struct ChannelProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    kind: ChannelKind,
    /// Outbound line cap. Only set for process channels.
    max_line_length: Option<usize>,
    /// `None` once disposed.
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    data_handler: HandlerSlot<DataHandler>,
    close_handler: HandlerSlot<CloseHandler>,
    dispose_hook: HandlerSlot<DisposeHook>,
    shutdown: CancellationToken,
    flowing: Arc<Notify>,
    sink: Arc<dyn ExceptionSink>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

type Inbound = Result<Option<Value>>;

impl ChannelProxy {
    /// Wrap a connected byte stream. Frames use the base64 JSON format.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn socket<S: ByteStream>(stream: S, config: &ChannelConfig) -> Result<Self> {
        let runtime = current_runtime()?;
        let (read_half, write_half) = tokio::io::split(stream);
        let frames = FramedRead::new(read_half, FrameCodec::new(config.frame.clone())).map(
            |item| match item {
                Ok(value) => Ok(Some(value)),
                Err(FrameError::Io(e)) => Err(ProxyError::Transport(TransportError::Io(e))),
                Err(e) => Err(ProxyError::Decode(e)),
            },
        );
        Ok(Self::spawn(
            ChannelKind::Socket,
            None,
            frames,
            write_half,
            config,
            &runtime,
        ))
    }

    /// Wrap a line channel, such as a child's stdio.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn process(channel: ProcessChannel, config: &ChannelConfig) -> Result<Self> {
        let runtime = current_runtime()?;
        let max_line_length = channel.max_line_length();
        let (lines, writer) = channel.into_parts();
        let frames = lines.map(move |item| match item {
            Ok(line) => decode_line_message(&line).map_err(ProxyError::Decode),
            Err(e) => Err(ProxyError::Transport(map_codec_error(e, max_line_length))),
        });
        Ok(Self::spawn(
            ChannelKind::Process,
            Some(max_line_length),
            frames,
            writer,
            config,
            &runtime,
        ))
    }

    fn spawn<St, W>(
        kind: ChannelKind,
        max_line_length: Option<usize>,
        frames: St,
        writer: W,
        config: &ChannelConfig,
        runtime: &Handle,
    ) -> Self
    where
        St: Stream<Item = Inbound> + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let flowing = Arc::new(Notify::new());

        let writer_task = runtime.spawn(write_loop(kind, writer, rx));
        let inner = Arc::new(ProxyInner {
            kind,
            max_line_length,
            outbound: Mutex::new(Some(tx)),
            data_handler: HandlerSlot::new(),
            close_handler: HandlerSlot::new(),
            dispose_hook: HandlerSlot::new(),
            shutdown: shutdown.clone(),
            flowing: Arc::clone(&flowing),
            sink: Arc::clone(&config.sink),
            writer: Mutex::new(Some(writer_task)),
        });

        runtime.spawn(read_loop(
            Arc::downgrade(&inner),
            frames,
            shutdown,
            flowing,
        ));
        debug!(%kind, "channel proxy started");

        Self { inner }
    }

    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.inner.outbound).is_none()
    }

    /// Serialize `payload` and queue it for writing.
    ///
    /// `Ok(true)` means the frame was queued, not that the peer received it.
    /// `Ok(false)` means the writer has stopped, usually because the
    /// transport closed.
    pub fn send_data<T: Serialize + ?Sized>(&self, payload: &T) -> Result<bool> {
        let Some(tx) = lock(&self.inner.outbound).clone() else {
            return Err(ProxyError::Disposed);
        };
        let frame = self.encode(payload)?;
        let queued = tx.send(frame).is_ok();
        if !queued {
            debug!(kind = %self.inner.kind, "writer stopped; frame not queued");
        }
        Ok(queued)
    }

    fn encode<T: Serialize + ?Sized>(&self, payload: &T) -> Result<Bytes> {
        match self.inner.kind {
            ChannelKind::Socket => {
                let mut buf = BytesMut::new();
                encode_frame(payload, &mut buf).map_err(encode_error)?;
                Ok(buf.freeze())
            }
            ChannelKind::Process => {
                let line = encode_line_message(payload).map_err(encode_error)?;
                let max = self
                    .inner
                    .max_line_length
                    .unwrap_or(DEFAULT_MAX_LINE_LENGTH);
                Ok(encode_line(&line, max)?)
            }
        }
    }

    /// Install the data handler, returning the previous one.
    ///
    /// Installing the first handler starts the reader; frames that arrived
    /// earlier are delivered to it.
    pub fn set_data_handler<F>(&self, handler: F) -> Result<Option<Arc<DataHandler>>>
    where
        F: Fn(&ChannelProxy, Value) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.replace_data_handler(Some(Arc::new(handler)))
    }

    /// Swap the data handler, for save/restore chaining. Clearing with `None`
    /// always succeeds; installing fails once disposed.
    pub fn replace_data_handler(
        &self,
        handler: Option<Arc<DataHandler>>,
    ) -> Result<Option<Arc<DataHandler>>> {
        if handler.is_some() && self.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        let start = handler.is_some();
        let previous = self.inner.data_handler.replace(handler);
        if start {
            self.inner.flowing.notify_one();
        }
        Ok(previous)
    }

    /// Install the data handler without starting the reader. Reading begins
    /// at the next [`start`](Self::start) or handler install.
    pub(crate) fn stage_data_handler(&self, handler: Arc<DataHandler>) -> Result<()> {
        if self.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        self.inner.data_handler.replace(Some(handler));
        Ok(())
    }

    pub(crate) fn start(&self) {
        self.inner.flowing.notify_one();
    }

    pub fn clear_data_handler(&self) -> Option<Arc<DataHandler>> {
        self.inner.data_handler.take()
    }

    pub fn set_close_handler<F>(&self, handler: F) -> Result<Option<Arc<CloseHandler>>>
    where
        F: Fn(Option<&ProxyError>) + Send + Sync + 'static,
    {
        if self.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        Ok(self.inner.close_handler.replace(Some(Arc::new(handler))))
    }

    /// Run `hook` once when this proxy is disposed locally. The owner uses it
    /// to settle state the close handler would otherwise have settled.
    pub(crate) fn set_dispose_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.dispose_hook.replace(Some(Arc::new(hook)));
    }

    /// Dispatch one inbound message to the data handler.
    ///
    /// A handler failure is reported to the exception sink and returned, which
    /// ends the reader.
    fn trigger_data_handler(&self, data: Value) -> Result<()> {
        let Some(handler) = self.inner.data_handler.get() else {
            trace!(kind = %self.inner.kind, "no data handler; message dropped");
            return Ok(());
        };
        handler(self, data).map_err(|err| {
            self.inner.sink.write_exception(&*err);
            ProxyError::Handler(err)
        })
    }

    fn finish(&self, err: Option<ProxyError>) {
        match &err {
            Some(err) => warn!(kind = %self.inner.kind, error = %err, "channel closed with error"),
            None => debug!(kind = %self.inner.kind, "channel reached end of stream"),
        }
        if let Some(handler) = self.inner.close_handler.take() {
            handler(err.as_ref());
        }
    }

    /// Stop reading, drop the handlers and let the writer drain and close the
    /// endpoint. Idempotent, and safe to call from inside a handler.
    ///
    /// The close handler is not called. An owning [`RequestChannel`] is still
    /// told, so its pending requests settle.
    ///
    /// [`RequestChannel`]: crate::RequestChannel
    pub fn dispose(&self) {
        let Some(tx) = lock(&self.inner.outbound).take() else {
            return;
        };
        drop(tx);
        self.inner.data_handler.take();
        self.inner.close_handler.take();
        self.inner.shutdown.cancel();
        debug!(kind = %self.inner.kind, "channel proxy disposed");
        if let Some(hook) = self.inner.dispose_hook.take() {
            hook();
        }
    }

    /// [`dispose`](Self::dispose), then wait for queued frames to be written.
    pub async fn dispose_async(&self) {
        self.dispose();
        let writer = lock(&self.inner.writer).take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }
}

impl fmt::Debug for ChannelProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelProxy")
            .field("kind", &self.inner.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|_| {
        ProxyError::InvalidChannel("channel proxy requires a running Tokio runtime".to_string())
    })
}

fn encode_error(err: FrameError) -> ProxyError {
    match err {
        FrameError::Json(e) => ProxyError::Json(e),
        FrameError::Io(e) => ProxyError::Transport(TransportError::Io(e)),
        other => ProxyError::InvalidArgument(other.to_string()),
    }
}

async fn read_loop<St>(
    inner: Weak<ProxyInner>,
    mut frames: St,
    shutdown: CancellationToken,
    flowing: Arc<Notify>,
) where
    St: Stream<Item = Inbound> + Unpin,
{
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => return,
        _ = flowing.notified() => {}
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            next = frames.next() => next,
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let proxy = ChannelProxy { inner };

        match next {
            None => {
                proxy.finish(None);
                return;
            }
            Some(Ok(None)) => {}
            Some(Ok(Some(value))) => {
                if let Err(err) = proxy.trigger_data_handler(value) {
                    proxy.finish(Some(err));
                    return;
                }
            }
            Some(Err(err)) => {
                proxy.inner.sink.write_exception(&err);
                proxy.finish(Some(err));
                return;
            }
        }
    }
}

async fn write_loop<W>(kind: ChannelKind, mut writer: W, mut rx: mpsc::UnboundedReceiver<Bytes>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        let written = async {
            writer.write_all(&frame).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = written {
            debug!(%kind, error = %err, "channel write failed; writer stopping");
            return;
        }
    }
    if let Err(err) = writer.shutdown().await {
        trace!(%kind, error = %err, "channel shutdown failed");
    }
}
