//! Path-routed requests over a [`RequestChannel`].
//!
//! Requests travel as `{ id, path, body }`. The receiving side runs the
//! first route whose pattern matches `path` and answers with
//! `{ id, path, succeeded, body }`.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chanproxy_route::RoutePattern;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BoxError, ProxyError, Result};
use crate::handler::lock;
use crate::message::Message;
use crate::request::RequestChannel;

const PATH: &str = "path";
const BODY: &str = "body";
const SUCCEEDED: &str = "succeeded";

pub type RouteFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, BoxError>> + Send>>;

/// Handles one routed request: `(communicator, path, body)`.
pub type RouteHandler = dyn Fn(Communicator, String, Value) -> RouteFuture + Send + Sync;

#[derive(Debug, Clone, Default)]
pub struct CommunicatorOptions {
    /// Identifier used in logs. Blank or missing ids get a UUID v4.
    pub id: Option<String>,
    /// Limit on each [`Communicator::send`]. `None` or zero falls back to the
    /// channel's request timeout.
    pub timeout: Option<Duration>,
}

struct Route {
    pattern: RoutePattern,
    handler: Arc<RouteHandler>,
}

#[derive(Clone)]
pub struct Communicator {
    inner: Arc<CommunicatorInner>,
}

struct CommunicatorInner {
    id: String,
    timeout: Option<Duration>,
    channel: RequestChannel,
    routes: Mutex<Vec<Route>>,
    disposed: AtomicBool,
}

impl Communicator {
    /// Take over `channel`'s unsolicited message handler.
    pub fn new(channel: RequestChannel, options: CommunicatorOptions) -> Result<Self> {
        let id = options
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let inner = Arc::new(CommunicatorInner {
            id,
            timeout: options.timeout.filter(|timeout| !timeout.is_zero()),
            channel,
            routes: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        inner.channel.set_message_handler(move |_, message| {
            if let Some(communicator) = upgrade(&weak) {
                communicator.on_message(message);
            }
        })?;

        Ok(Self { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn channel(&self) -> &RequestChannel {
        &self.inner.channel
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ProxyError::Disposed);
        }
        Ok(())
    }

    /// Add a route. Routes are tried in the order they were mapped.
    pub fn map<F, Fut>(&self, pattern: impl Into<RoutePattern>, handler: F) -> Result<()>
    where
        F: Fn(Communicator, String, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
    {
        self.ensure_live()?;
        let handler: Arc<RouteHandler> = Arc::new(
            move |communicator: Communicator, path: String, body: Value| -> RouteFuture {
                Box::pin(handler(communicator, path, body))
            },
        );
        lock(&self.inner.routes).push(Route {
            pattern: pattern.into(),
            handler,
        });
        Ok(())
    }

    /// Remove the first route whose pattern equals `pattern`.
    pub fn unmap(&self, pattern: &RoutePattern) -> Result<Option<Arc<RouteHandler>>> {
        self.ensure_live()?;
        let mut routes = lock(&self.inner.routes);
        let index = routes.iter().position(|route| &route.pattern == pattern);
        Ok(index.map(|index| routes.remove(index).handler))
    }

    /// Send `content` to `path` on the remote side and decode its answer.
    pub async fn send<T, R>(&self, path: &str, content: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.ensure_live()?;
        if path.trim().is_empty() {
            return Err(ProxyError::InvalidArgument(
                "path must not be empty or whitespace".to_string(),
            ));
        }

        let request = Message::new()
            .with_field(PATH, path)
            .with_field(BODY, serde_json::to_value(content)?);
        let mut reply = self
            .inner
            .channel
            .send_request(request, self.inner.timeout)
            .await?;

        let succeeded = reply.get(SUCCEEDED).and_then(Value::as_bool).unwrap_or(false);
        let body = reply.remove(BODY).unwrap_or(Value::Null);
        if succeeded {
            Ok(serde_json::from_value(body)?)
        } else {
            Err(ProxyError::Remote(body))
        }
    }

    /// Dispose the channel, rejecting pending requests, and drop all routes.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.channel.dispose();
        lock(&self.inner.routes).clear();
        debug!(communicator = %self.inner.id, "communicator disposed");
    }

    fn on_message(&self, message: Message) {
        if message.get(SUCCEEDED).is_some() {
            debug!(
                communicator = %self.inner.id,
                id = ?message.id(),
                "dropping reply with no pending request"
            );
            return;
        }
        let Some(id) = message.id().map(str::to_string) else {
            debug!(communicator = %self.inner.id, "dropping request without id");
            return;
        };
        let path = message
            .get(PATH)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let body = message.get(BODY).cloned().unwrap_or(Value::Null);

        let handler = lock(&self.inner.routes)
            .iter()
            .find(|route| route.pattern.is_match(&path))
            .map(|route| Arc::clone(&route.handler));

        let Some(handler) = handler else {
            debug!(communicator = %self.inner.id, %path, "no route matches");
            let body = Value::String(format!("no route matches path {path:?}"));
            self.reply(&id, &path, false, body);
            return;
        };

        let communicator = self.clone();
        tokio::spawn(async move {
            let outcome = handler(communicator.clone(), path.clone(), body).await;
            let (succeeded, body) = match outcome {
                Ok(body) => (true, body),
                Err(err) => {
                    debug!(communicator = %communicator.inner.id, %path, error = %err, "route failed");
                    (false, Value::String(err.to_string()))
                }
            };
            communicator.reply(&id, &path, succeeded, body);
        });
    }

    fn reply(&self, id: &str, path: &str, succeeded: bool, body: Value) {
        if self.is_disposed() {
            return;
        }
        let reply = Message::with_id(id)
            .with_field(PATH, path)
            .with_field(SUCCEEDED, succeeded)
            .with_field(BODY, body);
        match self.inner.channel.send(reply) {
            Ok(true) => {}
            Ok(false) => warn!(communicator = %self.inner.id, id, "failed to send reply; channel closed"),
            Err(err) => warn!(communicator = %self.inner.id, id, error = %err, "failed to send reply"),
        }
    }
}

fn upgrade(weak: &Weak<CommunicatorInner>) -> Option<Communicator> {
    weak.upgrade().map(|inner| Communicator { inner })
}

impl fmt::Debug for Communicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Communicator")
            .field("id", &self.inner.id)
            .field("routes", &lock(&self.inner.routes).len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
