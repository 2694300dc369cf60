//! Accepts connections on a listener and tracks one [`RequestChannel`] per
//! connected target.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chanproxy_transport::{ByteStream, ConnectionInfo, StreamListener};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{ProxyError, Result};
use crate::handler::{lock, HandlerSlot};
use crate::message::Message;
use crate::proxy::ChannelProxy;
use crate::request::{ChannelCloseHandler, MessageHandler, RequestChannel};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

pub type ConnectionHandler = dyn Fn(&ChannelProxy) + Send + Sync;
pub type ErrorHandler = dyn Fn(&ProxyError) + Send + Sync;
/// Handler for the `close` and `listening` events.
pub type HostEventHandler = dyn Fn() + Send + Sync;
pub type TargetAcquiredHandler = dyn Fn(&str, &TargetHandle) + Send + Sync;
pub type TargetLostHandler = dyn Fn(&str) + Send + Sync;
pub type TargetMessageHandler = dyn Fn(&TargetHandle, Message) + Send + Sync;

/// Outgoing handle to one connected target.
#[derive(Clone, Debug)]
pub struct TargetHandle {
    id: String,
    channel: RequestChannel,
}

impl TargetHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel(&self) -> &RequestChannel {
        &self.channel
    }

    pub async fn send_request(
        &self,
        message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        self.channel.send_request(message, timeout).await
    }

    pub fn send(&self, message: Message) -> Result<bool> {
        self.channel.send(message)
    }
}

struct TargetEntry {
    channel: RequestChannel,
    /// `target-acquired` has been emitted and the channel is reading.
    announced: bool,
}

#[derive(Default)]
struct HostHandlers {
    connection: HandlerSlot<ConnectionHandler>,
    error: HandlerSlot<ErrorHandler>,
    close: HandlerSlot<HostEventHandler>,
    listening: HandlerSlot<HostEventHandler>,
    target_acquired: HandlerSlot<TargetAcquiredHandler>,
    target_lost: HandlerSlot<TargetLostHandler>,
    message: HandlerSlot<TargetMessageHandler>,
}

impl HostHandlers {
    fn clear(&self) {
        self.connection.take();
        self.error.take();
        self.close.take();
        self.listening.take();
        self.target_acquired.take();
        self.target_lost.take();
        self.message.take();
    }
}

/// Hosts a listening endpoint and manages the channels of its targets.
///
/// Lifecycle: created, listening, closed. `close` is terminal.
#[derive(Clone)]
pub struct ChannelHostProxy {
    inner: Arc<HostInner>,
}

struct HostInner {
    config: ChannelConfig,
    handlers: HostHandlers,
    targets: Mutex<HashMap<String, TargetEntry>>,
    info: Mutex<Option<ConnectionInfo>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    disposed: AtomicBool,
}

impl ChannelHostProxy {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(HostInner {
                config,
                handlers: HostHandlers::default(),
                targets: Mutex::new(HashMap::new()),
                info: Mutex::new(None),
                shutdown: CancellationToken::new(),
                closed: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Start accepting connections on `listener`.
    ///
    /// Emits `listening` once the accept loop is running. A host listens on
    /// one listener; calling this again fails.
    pub fn listen<L: StreamListener>(&self, listener: L) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ProxyError::Disposed);
        }
        let runtime = Handle::try_current().map_err(|_| {
            ProxyError::InvalidChannel("channel host requires a running Tokio runtime".to_string())
        })?;

        let info = listener.connection_info();
        {
            let mut current = lock(&self.inner.info);
            if current.is_some() {
                return Err(ProxyError::InvalidArgument(
                    "channel host is already listening".to_string(),
                ));
            }
            *current = Some(info.clone());
        }

        runtime.spawn(accept_loop(
            Arc::downgrade(&self.inner),
            listener,
            self.inner.shutdown.clone(),
        ));
        info!(%info, "channel host listening");
        self.emit_listening();
        Ok(())
    }

    /// How peers reach this host, once listening.
    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        lock(&self.inner.info).clone()
    }

    /// Ids of the live targets, sorted.
    pub fn target_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.targets)
            .iter()
            .filter(|(_, entry)| entry.announced)
            .map(|(id, _)| id.clone())
            .collect();
        names.sort();
        names
    }

    pub fn target(&self, id: &str) -> Option<TargetHandle> {
        let targets = lock(&self.inner.targets);
        let entry = targets.get(id).filter(|entry| entry.announced)?;
        Some(TargetHandle {
            id: id.to_string(),
            channel: entry.channel.clone(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting, drop every target, then emit `close`.
    ///
    /// Each target gets `target-lost` and is disposed, which rejects its
    /// pending requests.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();

        let drained: Vec<(String, TargetEntry)> = lock(&self.inner.targets).drain().collect();
        for (id, entry) in drained {
            // Unannounced targets are finished by the task adopting them.
            if entry.announced {
                self.emit_target_lost(&id);
            }
            entry.channel.dispose();
        }

        info!("channel host closed");
        self.emit_close();
    }

    /// Close, then drop every handler. Later events are ignored.
    pub fn dispose(&self) {
        self.close();
        if !self.inner.disposed.swap(true, Ordering::SeqCst) {
            self.inner.handlers.clear();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Drop every handler. Allowed after dispose.
    pub fn clear_handlers(&self) {
        self.inner.handlers.clear();
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        Ok(())
    }

    pub fn set_connection_handler<F>(&self, handler: F) -> Result<Option<Arc<ConnectionHandler>>>
    where
        F: Fn(&ChannelProxy) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.connection.replace(Some(Arc::new(handler))))
    }

    pub fn set_error_handler<F>(&self, handler: F) -> Result<Option<Arc<ErrorHandler>>>
    where
        F: Fn(&ProxyError) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.error.replace(Some(Arc::new(handler))))
    }

    pub fn set_close_handler<F>(&self, handler: F) -> Result<Option<Arc<HostEventHandler>>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.close.replace(Some(Arc::new(handler))))
    }

    pub fn set_listening_handler<F>(&self, handler: F) -> Result<Option<Arc<HostEventHandler>>>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.listening.replace(Some(Arc::new(handler))))
    }

    pub fn set_target_acquired_handler<F>(
        &self,
        handler: F,
    ) -> Result<Option<Arc<TargetAcquiredHandler>>>
    where
        F: Fn(&str, &TargetHandle) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self
            .inner
            .handlers
            .target_acquired
            .replace(Some(Arc::new(handler))))
    }

    pub fn set_target_lost_handler<F>(&self, handler: F) -> Result<Option<Arc<TargetLostHandler>>>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.target_lost.replace(Some(Arc::new(handler))))
    }

    /// Receives unsolicited messages from any target.
    pub fn set_message_handler<F>(&self, handler: F) -> Result<Option<Arc<TargetMessageHandler>>>
    where
        F: Fn(&TargetHandle, Message) + Send + Sync + 'static,
    {
        self.ensure_live()?;
        Ok(self.inner.handlers.message.replace(Some(Arc::new(handler))))
    }

    /// Wrap an accepted stream and register it as a target.
    fn adopt<S: ByteStream>(&self, stream: S) {
        if self.is_closed() {
            return;
        }
        let proxy = match ChannelProxy::socket(stream, &self.inner.config) {
            Ok(proxy) => proxy,
            Err(err) => {
                self.emit_error(&err);
                return;
            }
        };
        self.emit_connection(&proxy);

        let id = Uuid::new_v4().simple().to_string();
        let weak = Arc::downgrade(&self.inner);

        let message_handler: Arc<MessageHandler> = {
            let weak = weak.clone();
            let id = id.clone();
            Arc::new(move |channel: &RequestChannel, message: Message| {
                if let Some(host) = upgrade(&weak) {
                    let target = TargetHandle {
                        id: id.clone(),
                        channel: channel.clone(),
                    };
                    host.emit_message(&target, message);
                }
            })
        };
        let on_closed: Arc<ChannelCloseHandler> = {
            let id = id.clone();
            Arc::new(move |err: Option<&ProxyError>| {
                if let Some(host) = upgrade(&weak) {
                    host.on_target_closed(&id, err);
                }
            })
        };

        // Reading stays paused until the target has been announced, so
        // `target-acquired` always precedes its messages and its loss.
        let channel = match RequestChannel::new_paused(
            proxy,
            &self.inner.config,
            Some(message_handler),
            Some(on_closed),
        ) {
            Ok(channel) => channel,
            Err(err) => {
                self.emit_error(&err);
                return;
            }
        };
        lock(&self.inner.targets).insert(
            id.clone(),
            TargetEntry {
                channel: channel.clone(),
                announced: false,
            },
        );

        debug!(target_id = %id, "target acquired");
        let handle = TargetHandle {
            id: id.clone(),
            channel,
        };
        self.emit_target_acquired(&id, &handle);

        let keep = {
            let mut targets = lock(&self.inner.targets);
            match targets.get_mut(&id) {
                Some(entry) if !self.is_closed() => {
                    entry.announced = true;
                    true
                }
                _ => {
                    targets.remove(&id);
                    false
                }
            }
        };
        if keep {
            handle.channel.start();
        } else {
            debug!(target_id = %id, "target ended while being announced");
            self.emit_target_lost(&id);
            handle.channel.dispose();
        }
    }

    fn on_target_closed(&self, id: &str, err: Option<&ProxyError>) {
        if let Some(err) = err {
            self.emit_error(err);
        }
        let lost = lock(&self.inner.targets).remove(id);
        if let Some(entry) = lost {
            debug!(target_id = %id, "target lost");
            // Unannounced targets are finished by the task adopting them.
            if entry.announced {
                self.emit_target_lost(id);
            }
            entry.channel.dispose();
        }
    }

    fn live(&self) -> bool {
        !self.inner.disposed.load(Ordering::SeqCst)
    }

    fn emit_connection(&self, proxy: &ChannelProxy) {
        if let Some(handler) = self.inner.handlers.connection.get().filter(|_| self.live()) {
            handler(proxy);
        }
    }

    fn emit_error(&self, err: &ProxyError) {
        match self.inner.handlers.error.get().filter(|_| self.live()) {
            Some(handler) => handler(err),
            None => warn!(error = %err, "channel host error"),
        }
    }

    fn emit_close(&self) {
        if let Some(handler) = self.inner.handlers.close.get().filter(|_| self.live()) {
            handler();
        }
    }

    fn emit_listening(&self) {
        if let Some(handler) = self.inner.handlers.listening.get().filter(|_| self.live()) {
            handler();
        }
    }

    fn emit_target_acquired(&self, id: &str, target: &TargetHandle) {
        if let Some(handler) = self.inner.handlers.target_acquired.get().filter(|_| self.live()) {
            handler(id, target);
        }
    }

    fn emit_target_lost(&self, id: &str) {
        if let Some(handler) = self.inner.handlers.target_lost.get().filter(|_| self.live()) {
            handler(id);
        }
    }

    fn emit_message(&self, target: &TargetHandle, message: Message) {
        match self.inner.handlers.message.get().filter(|_| self.live()) {
            Some(handler) => handler(target, message),
            None => debug!(target_id = %target.id, "no host message handler; message dropped"),
        }
    }
}

fn upgrade(weak: &Weak<HostInner>) -> Option<ChannelHostProxy> {
    weak.upgrade().map(|inner| ChannelHostProxy { inner })
}

impl fmt::Debug for ChannelHostProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHostProxy")
            .field("info", &self.connection_info())
            .field("targets", &self.target_names().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn accept_loop<L: StreamListener>(
    host: Weak<HostInner>,
    listener: L,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let Some(host) = upgrade(&host) else {
            break;
        };
        match accepted {
            Ok(stream) => host.adopt(stream),
            Err(err) => {
                host.emit_error(&ProxyError::from(err));
                drop(host);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!(info = %listener.connection_info(), "accept loop stopped");
}
