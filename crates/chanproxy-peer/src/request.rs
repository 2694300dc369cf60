//! Request/response correlation on top of a [`ChannelProxy`].
//!
//! Outgoing requests are registered under their id before they are written.
//! Each pending record settles exactly once: by a reply carrying the same
//! id, by its timeout, or by the channel closing.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::error::{BoxError, ProxyError, Result};
use crate::handler::{lock, HandlerSlot};
use crate::message::Message;
use crate::proxy::ChannelProxy;

/// Receives inbound messages that are not replies to a pending request.
pub type MessageHandler = dyn Fn(&RequestChannel, Message) + Send + Sync;

/// Called once when the underlying channel's inbound side ends.
pub type ChannelCloseHandler = dyn Fn(Option<&ProxyError>) + Send + Sync;

/// A channel proxy with request/response correlation.
#[derive(Clone)]
pub struct RequestChannel {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    proxy: ChannelProxy,
    pending: Mutex<HashMap<String, oneshot::Sender<Message>>>,
    message_handler: HandlerSlot<MessageHandler>,
    close_handler: HandlerSlot<ChannelCloseHandler>,
    /// Close notification for the owner, such as a host's registry. Not
    /// reachable through the public handler setters.
    owner_close: HandlerSlot<ChannelCloseHandler>,
    closed: AtomicBool,
    default_timeout: Option<Duration>,
}

/// Removes a pending record when the awaiting request goes away early.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<String, oneshot::Sender<Message>>>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

impl RequestChannel {
    /// Take over `proxy`'s data and close handlers.
    pub fn new(proxy: ChannelProxy, config: &ChannelConfig) -> Result<Self> {
        let channel = Self::new_paused(proxy, config, None, None)?;
        channel.inner.proxy.start();
        Ok(channel)
    }

    /// Like [`new`](Self::new), with a message handler installed up front
    /// and the reader held until [`start`](Self::start).
    ///
    /// `owner_close` runs once when the channel ends for any reason, including
    /// a local dispose of the channel or of its proxy. It runs before the
    /// public close handler and cannot be replaced.
    pub(crate) fn new_paused(
        proxy: ChannelProxy,
        config: &ChannelConfig,
        message_handler: Option<Arc<MessageHandler>>,
        owner_close: Option<Arc<ChannelCloseHandler>>,
    ) -> Result<Self> {
        let inner = Arc::new(RequestInner {
            proxy,
            pending: Mutex::new(HashMap::new()),
            message_handler: HandlerSlot::new(),
            close_handler: HandlerSlot::new(),
            owner_close: HandlerSlot::new(),
            closed: AtomicBool::new(false),
            default_timeout: config.request_timeout,
        });
        inner.message_handler.replace(message_handler);
        inner.owner_close.replace(owner_close);

        let weak = Arc::downgrade(&inner);
        inner.proxy.set_close_handler(move |err| {
            if let Some(channel) = upgrade(&weak) {
                channel.on_closed(err);
            }
        })?;

        let weak = Arc::downgrade(&inner);
        inner.proxy.set_dispose_hook(move || {
            if let Some(channel) = upgrade(&weak) {
                channel.on_disposed();
            }
        });

        let weak = Arc::downgrade(&inner);
        inner
            .proxy
            .stage_data_handler(Arc::new(move |_: &ChannelProxy, value: Value| {
                match upgrade(&weak) {
                    Some(channel) => channel.dispatch(value),
                    None => Ok(()),
                }
            }))?;

        Ok(Self { inner })
    }

    /// Begin delivering inbound messages.
    pub(crate) fn start(&self) {
        self.inner.proxy.start();
    }

    pub fn proxy(&self) -> &ChannelProxy {
        &self.inner.proxy
    }

    /// Whether the channel has closed or been disposed. Requests made
    /// afterwards fail immediately.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Send `message` and wait for the reply with the same id.
    ///
    /// A UUID v4 id is assigned when the message has none. `timeout` falls
    /// back to the configured request timeout; with neither, the request
    /// waits until a reply arrives or the channel closes.
    pub async fn send_request(
        &self,
        mut message: Message,
        timeout: Option<Duration>,
    ) -> Result<Message> {
        let id = match message.id() {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                message.set_id(id.clone());
                id
            }
        };

        let (tx, mut rx) = oneshot::channel();
        let registered = {
            let mut pending = lock(&self.inner.pending);
            match pending.entry(id.clone()) {
                Entry::Occupied(_) => false,
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    true
                }
            }
        };
        if !registered {
            return Err(ProxyError::DuplicateRequestId(id));
        }
        let _guard = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };

        if self.is_closed() {
            return Err(ProxyError::ChannelClosed { id });
        }

        message.strip_local_fields();
        if !self.inner.proxy.send_data(&message)? {
            return Err(ProxyError::ChannelClosed { id });
        }
        debug!(id = %id, "request sent");

        let started = Instant::now();
        let reply = match timeout.or(self.inner.default_timeout) {
            None => (&mut rx).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(reply) => reply.ok(),
                Err(_) => {
                    let expired = lock(&self.inner.pending).remove(&id).is_some();
                    if expired {
                        debug!(id = %id, ?limit, "request timed out");
                        return Err(ProxyError::Timeout {
                            id,
                            elapsed: started.elapsed(),
                        });
                    }
                    // A reply claimed the record first and is being delivered.
                    (&mut rx).await.ok()
                }
            },
        };

        reply.ok_or_else(|| ProxyError::ChannelClosed { id: id.clone() })
    }

    /// Fire-and-forget send. Returns whether the message was queued.
    pub fn send(&self, mut message: Message) -> Result<bool> {
        message.strip_local_fields();
        self.inner.proxy.send_data(&message)
    }

    pub fn set_message_handler<F>(&self, handler: F) -> Result<Option<Arc<MessageHandler>>>
    where
        F: Fn(&RequestChannel, Message) + Send + Sync + 'static,
    {
        if self.inner.proxy.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        Ok(self.inner.message_handler.replace(Some(Arc::new(handler))))
    }

    pub fn clear_message_handler(&self) -> Option<Arc<MessageHandler>> {
        self.inner.message_handler.take()
    }

    pub fn set_close_handler<F>(&self, handler: F) -> Result<Option<Arc<ChannelCloseHandler>>>
    where
        F: Fn(Option<&ProxyError>) + Send + Sync + 'static,
    {
        if self.inner.proxy.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        Ok(self.inner.close_handler.replace(Some(Arc::new(handler))))
    }

    /// Dispose the proxy and reject every pending request.
    ///
    /// Disposing [`proxy`](Self::proxy) directly has the same effect.
    pub fn dispose(&self) {
        self.on_disposed();
        self.inner.proxy.dispose();
        self.inner.message_handler.take();
    }

    /// Like [`dispose`](Self::dispose), waiting for queued messages to be
    /// written.
    pub async fn dispose_async(&self) {
        self.dispose();
        self.inner.proxy.dispose_async().await;
    }

    fn dispatch(&self, value: Value) -> std::result::Result<(), BoxError> {
        let message = match Message::try_from(value) {
            Ok(message) => message,
            Err(other) => {
                warn!(value = %other, "ignoring non-object message");
                return Ok(());
            }
        };

        if let Some(id) = message.id() {
            let waiter = lock(&self.inner.pending).remove(id);
            if let Some(waiter) = waiter {
                let id = id.to_string();
                if waiter.send(message).is_err() {
                    debug!(id = %id, "requester went away before its reply");
                }
                return Ok(());
            }
        }

        match self.inner.message_handler.get() {
            Some(handler) => handler(self, message),
            None => debug!(id = ?message.id(), "no message handler; unsolicited message dropped"),
        }
        Ok(())
    }

    fn on_closed(&self, err: Option<&ProxyError>) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let rejected = self.reject_pending();
        if rejected > 0 {
            debug!(rejected, "channel closed with pending requests");
        }
        // The owner may dispose this channel, which clears the public slot.
        let owner = self.inner.owner_close.take();
        let handler = self.inner.close_handler.take();
        if let Some(owner) = owner {
            owner(err);
        }
        if let Some(handler) = handler {
            handler(err);
        }
    }

    /// Local dispose: settle like a close, but only the owner is told.
    fn on_disposed(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let rejected = self.reject_pending();
        if rejected > 0 {
            debug!(rejected, "channel disposed with pending requests");
        }
        self.inner.close_handler.take();
        if let Some(owner) = self.inner.owner_close.take() {
            owner(None);
        }
    }

    /// Settle every pending record as closed.
    fn reject_pending(&self) -> usize {
        let drained: Vec<_> = lock(&self.inner.pending).drain().collect();
        // Dropping each sender wakes its requester with `ChannelClosed`.
        drained.len()
    }
}

fn upgrade(weak: &Weak<RequestInner>) -> Option<RequestChannel> {
    weak.upgrade().map(|inner| RequestChannel { inner })
}

impl fmt::Debug for RequestChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestChannel")
            .field("proxy", &self.inner.proxy)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn pair(config: &ChannelConfig) -> (RequestChannel, RequestChannel) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let client = RequestChannel::new(
            ChannelProxy::socket(a, config).expect("client proxy"),
            config,
        )
        .expect("client channel");
        let server = RequestChannel::new(
            ChannelProxy::socket(b, config).expect("server proxy"),
            config,
        )
        .expect("server channel");
        (client, server)
    }

    fn echo(server: &RequestChannel) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        server
            .set_message_handler(move |channel, message| {
                let reply = message.reply().with_field("echo", message.clone().into_value());
                let _ = tx.send(message);
                channel.send(reply).expect("reply should queue");
            })
            .expect("handler should install");
        rx
    }

    #[tokio::test]
    async fn request_resolves_with_matching_reply() {
        let (client, server) = pair(&ChannelConfig::default());
        let mut seen = echo(&server);

        let reply = client
            .send_request(
                Message::new()
                    .with_field("path", "/ping")
                    .with_field("operationName", "ping"),
                Some(Duration::from_secs(5)),
            )
            .await
            .expect("reply");

        let request = seen.recv().await.expect("server saw request");
        assert!(request.get("operationName").is_none(), "local fields stripped");
        assert_eq!(reply.id(), request.id());
        assert_eq!(reply.get("echo").unwrap()["path"], json!("/ping"));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn generated_ids_are_uuids() {
        let (client, server) = pair(&ChannelConfig::default());
        let mut seen = echo(&server);

        client
            .send_request(Message::new(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        let id = seen.recv().await.unwrap().id().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok(), "{id}");
    }

    #[tokio::test]
    async fn timeout_removes_record_and_late_reply_is_unsolicited() {
        let (client, server) = pair(&ChannelConfig::default());
        let (held_tx, mut held_rx) = mpsc::unbounded_channel();
        server
            .set_message_handler(move |_, message| {
                let _ = held_tx.send(message);
            })
            .unwrap();

        let (late_tx, mut late_rx) = mpsc::unbounded_channel();
        client
            .set_message_handler(move |_, message| {
                let _ = late_tx.send(message);
            })
            .unwrap();

        let result = client
            .send_request(Message::with_id("slow"), Some(Duration::from_millis(50)))
            .await;
        match result {
            Err(ProxyError::Timeout { id, elapsed }) => {
                assert_eq!(id, "slow");
                assert!(elapsed >= Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(client.pending_count(), 0);

        let request = held_rx.recv().await.unwrap();
        server.send(request.reply().with_field("late", true)).unwrap();
        let late = late_rx.recv().await.unwrap();
        assert_eq!(late.id(), Some("slow"));
    }

    #[tokio::test]
    async fn default_timeout_comes_from_config() {
        let config = ChannelConfig::default().with_request_timeout(Duration::from_millis(30));
        let (client, _server) = pair(&config);

        let result = client.send_request(Message::new(), None).await;
        assert!(matches!(result, Err(ProxyError::Timeout { .. })));
    }

    #[tokio::test]
    async fn duplicate_pending_id_is_rejected() {
        let (client, _server) = pair(&ChannelConfig::default());

        let first = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .send_request(Message::with_id("dup"), Some(Duration::from_millis(200)))
                    .await
            })
        };
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let second = client
            .send_request(Message::with_id("dup"), Some(Duration::from_millis(200)))
            .await;
        assert!(matches!(second, Err(ProxyError::DuplicateRequestId(id)) if id == "dup"));
        assert!(matches!(
            first.await.unwrap(),
            Err(ProxyError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn out_of_order_replies_resolve_their_own_requests() {
        let (client, server) = pair(&ChannelConfig::default());
        let held = Arc::new(Mutex::new(Vec::new()));
        let held_in_handler = Arc::clone(&held);
        server
            .set_message_handler(move |channel, message| {
                let mut held = lock(&held_in_handler);
                held.push(message);
                if held.len() == 3 {
                    for message in held.drain(..).rev() {
                        let n = message.get("n").cloned().unwrap();
                        channel.send(message.reply().with_field("n", n)).unwrap();
                    }
                }
            })
            .unwrap();

        let timeout = Some(Duration::from_secs(5));
        let (a, b, c) = tokio::join!(
            client.send_request(Message::new().with_field("n", 1), timeout),
            client.send_request(Message::new().with_field("n", 2), timeout),
            client.send_request(Message::new().with_field("n", 3), timeout),
        );
        assert_eq!(a.unwrap().get("n"), Some(&json!(1)));
        assert_eq!(b.unwrap().get("n"), Some(&json!(2)));
        assert_eq!(c.unwrap().get("n"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn dropped_request_future_removes_record() {
        let (client, _server) = pair(&ChannelConfig::default());

        let outer = tokio::time::timeout(
            Duration::from_millis(20),
            client.send_request(Message::new(), None),
        )
        .await;
        assert!(outer.is_err());
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn dispose_rejects_pending_requests() {
        let (client, _server) = pair(&ChannelConfig::default());

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request(Message::with_id("p"), None).await })
        };
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        client.dispose();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ProxyError::ChannelClosed { id }) if id == "p"
        ));
        assert!(matches!(
            client.send(Message::new()),
            Err(ProxyError::Disposed)
        ));
    }

    #[tokio::test]
    async fn disposing_the_proxy_rejects_pending_requests() {
        let (client, _server) = pair(&ChannelConfig::default());
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        client
            .set_close_handler(move |err| {
                let _ = closed_tx.send(err.is_some());
            })
            .unwrap();

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request(Message::with_id("p"), None).await })
        };
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        client.proxy().dispose();
        let outcome = tokio::time::timeout(Duration::from_secs(2), waiting)
            .await
            .expect("request should settle")
            .unwrap();
        assert!(matches!(outcome, Err(ProxyError::ChannelClosed { id }) if id == "p"));
        assert!(client.is_closed());
        assert_eq!(client.pending_count(), 0);
        assert_eq!(closed_rx.recv().await, None, "local dispose is not a close");
    }

    #[tokio::test]
    async fn owner_close_survives_public_close_handler_replacement() {
        let (a, b) = tokio::io::duplex(4096);
        let config = ChannelConfig::default();
        let (owner_tx, mut owner_rx) = mpsc::unbounded_channel();
        let owner: Arc<ChannelCloseHandler> = Arc::new(move |err: Option<&ProxyError>| {
            let _ = owner_tx.send(err.is_some());
        });
        let channel = RequestChannel::new_paused(
            ChannelProxy::socket(a, &config).unwrap(),
            &config,
            None,
            Some(owner),
        )
        .unwrap();
        channel.start();

        channel.set_close_handler(|_| {}).unwrap();
        assert!(channel.set_close_handler(|_| {}).unwrap().is_some());

        drop(b);
        assert_eq!(owner_rx.recv().await, Some(false));
        assert_eq!(owner_rx.recv().await, None, "owner is told once");
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn peer_close_rejects_pending_and_fires_close_handler() {
        let (client, server) = pair(&ChannelConfig::default());
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        client
            .set_close_handler(move |err| {
                let _ = closed_tx.send(err.is_some());
            })
            .unwrap();

        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.send_request(Message::new(), None).await })
        };
        while client.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        server.dispose();
        assert!(matches!(
            waiting.await.unwrap(),
            Err(ProxyError::ChannelClosed { .. })
        ));
        assert_eq!(closed_rx.recv().await, Some(false));
        assert!(client.is_closed());

        let after = client.send_request(Message::new(), None).await;
        assert!(matches!(after, Err(ProxyError::ChannelClosed { .. })));
    }

    #[tokio::test]
    async fn unsolicited_messages_reach_the_message_handler() {
        let (client, server) = pair(&ChannelConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        server
            .set_message_handler(move |_, message| {
                let _ = tx.send(message);
            })
            .unwrap();

        client.send(Message::new().with_field("event", "hello")).unwrap();
        client.send(Message::with_id("unknown")).unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.get("event"), Some(&json!("hello")));
        assert_eq!(first.id(), None);
        assert_eq!(rx.recv().await.unwrap().id(), Some("unknown"));
    }
}
