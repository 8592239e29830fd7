//! Local handler and dispatch resolution.
//!
//! A [`Handler`] is an explicit registration table from (method name, arity)
//! to an async closure. Only registered closures are reachable from the wire,
//! so nothing on the link itself can be invoked by the peer.
//!
//! # Example
//!
//! ```rust,ignore
//! let handler = Handler::builder()
//!     .method("foo", 0, |_call| async { Ok(Reply::json(&-42)?) })
//!     .method("add", 2, |call| async move {
//!         let a: i64 = call.arg(0)?;
//!         let b: i64 = call.arg(1)?;
//!         Ok(Reply::json(&(a + b))?)
//!     })
//!     .void_method("log", 1, |call| async move {
//!         tracing::info!("peer says {}", call.arg::<String>(0)?);
//!         Ok(())
//!     })
//!     .on_disconnect(|reason| tracing::info!("link gone: {:?}", reason))
//!     .build();
//! ```

use super::protocol::CallId;
use crate::codec::{decode_value, SharedCodec, ValueCodec};
use crate::{LinkError, Result};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Why a link stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The embedding application called `close()`.
    Local,
    /// The peer closed its end of the channel.
    RemoteClosed,
    /// Reading or writing the channel failed.
    ChannelError(String),
}

/// Result of a value-returning local method.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Encoded with the link's codec.
    Value(Value),
    /// Sent back as raw bytes.
    Bytes(Bytes),
}

impl Reply {
    /// Build a structured reply from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Reply::Value(serde_json::to_value(value)?))
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Reply::Bytes(data.into())
    }

    pub(crate) fn into_payload(self, codec: &dyn ValueCodec) -> Result<Bytes> {
        match self {
            Reply::Value(value) => Ok(Bytes::from(codec.encode(&value)?)),
            Reply::Bytes(data) => Ok(data),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<Bytes> for Reply {
    fn from(data: Bytes) -> Self {
        Reply::Bytes(data)
    }
}

/// One incoming request, as seen by a local method.
pub struct Invocation {
    call_id: CallId,
    method: String,
    args: Vec<Bytes>,
    codec: SharedCodec,
}

impl Invocation {
    pub(crate) fn new(call_id: CallId, method: String, args: Vec<Bytes>, codec: SharedCodec) -> Self {
        Self {
            call_id,
            method,
            args,
            codec,
        }
    }

    /// Id of the request; pass it to `Link::transfer` to answer this call on handoff.
    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Decode argument `index` into `T`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let payload = self.payload(index)?;
        decode_value(self.codec.as_ref(), payload).map_err(|e| LinkError::Argument {
            index,
            message: e.to_string(),
        })
    }

    /// Argument `index` as raw bytes.
    pub fn bytes(&self, index: usize) -> Result<Bytes> {
        self.payload(index).cloned()
    }

    pub fn codec(&self) -> &dyn ValueCodec {
        self.codec.as_ref()
    }

    fn payload(&self, index: usize) -> Result<&Bytes> {
        self.args.get(index).ok_or_else(|| LinkError::Argument {
            index,
            message: format!("{} takes only {} arguments", self.method, self.args.len()),
        })
    }
}

type ValueFn = Arc<dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<Reply>> + Send + Sync>;
type VoidFn = Arc<dyn Fn(Invocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type Teardown = Box<dyn FnOnce(DisconnectReason) + Send>;

/// A resolved local member.
#[derive(Clone)]
pub(crate) enum Method {
    Value(ValueFn),
    Void(VoidFn),
}

/// Outcome of running a local member.
pub(crate) enum Invoked {
    Reply(anyhow::Result<Reply>),
    Void(anyhow::Result<()>),
}

impl Method {
    /// Run the member, turning a panic into an ordinary failure.
    pub(crate) async fn invoke(&self, call: Invocation) -> Invoked {
        let method = call.method.clone();
        match self {
            Method::Value(f) => {
                let result = std::panic::AssertUnwindSafe(f(call)).catch_unwind().await;
                Invoked::Reply(result.unwrap_or_else(|_| Err(panicked(&method))))
            }
            Method::Void(f) => {
                let result = std::panic::AssertUnwindSafe(f(call)).catch_unwind().await;
                Invoked::Void(result.unwrap_or_else(|_| Err(panicked(&method))))
            }
        }
    }
}

fn panicked(method: &str) -> anyhow::Error {
    anyhow::anyhow!("handler for {} panicked", method)
}

/// The object a link exposes to its peer.
pub struct Handler {
    methods: HashMap<(String, usize), Method>,
    teardown: Mutex<Option<Teardown>>,
}

impl Handler {
    pub fn builder() -> HandlerBuilder {
        HandlerBuilder::default()
    }

    /// A handler that exposes nothing.
    pub fn empty() -> Self {
        HandlerBuilder::default().build()
    }

    /// Whether a member with this name and arity is registered.
    pub fn exposes(&self, name: &str, arity: usize) -> bool {
        self.resolve(name, arity).is_some()
    }

    pub(crate) fn resolve(&self, name: &str, arity: usize) -> Option<&Method> {
        self.methods.get(&(name.to_string(), arity))
    }

    /// Run the teardown callback, if any. Later calls do nothing.
    pub(crate) fn teardown(&self, reason: DisconnectReason) {
        let teardown = self
            .teardown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(teardown) = teardown {
            teardown(reason);
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self
            .methods
            .keys()
            .map(|(name, arity)| format!("{}/{}", name, arity))
            .collect();
        names.sort();
        f.debug_struct("Handler").field("methods", &names).finish()
    }
}

/// Builder for [`Handler`].
#[derive(Default)]
pub struct HandlerBuilder {
    methods: HashMap<(String, usize), Method>,
    teardown: Option<Teardown>,
}

impl HandlerBuilder {
    /// Register a member that answers with a value.
    pub fn method<F, Fut>(self, name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Reply>> + Send + 'static,
    {
        let f: ValueFn = Arc::new(move |call| f(call).boxed());
        self.register(name.into(), arity, Method::Value(f))
    }

    /// Register a fire-and-forget member; the peer never gets a response.
    pub fn void_method<F, Fut>(self, name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Invocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let f: VoidFn = Arc::new(move |call| f(call).boxed());
        self.register(name.into(), arity, Method::Void(f))
    }

    /// Callback run exactly once when the link closes, locally or remotely.
    pub fn on_disconnect<F>(mut self, f: F) -> Self
    where
        F: FnOnce(DisconnectReason) + Send + 'static,
    {
        self.teardown = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Handler {
        Handler {
            methods: self.methods,
            teardown: Mutex::new(self.teardown),
        }
    }

    fn register(mut self, name: String, arity: usize, method: Method) -> Self {
        if name.is_empty() {
            warn!("Ignoring local method with an empty name; it is reserved for responses");
            return self;
        }
        let key = (name, arity);
        if self.methods.contains_key(&key) {
            warn!(
                "Local method {}/{} registered twice; keeping the first registration",
                key.0, key.1
            );
            return self;
        }
        self.methods.insert(key, method);
        self
    }
}
