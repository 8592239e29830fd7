//! Remote adapter: calls methods of the peer's local handler.
//!
//! Every call is checked against the remote [`Interface`] before anything is
//! written. Void methods are sent and forgotten; value and byte methods wait
//! on the pending-call table until answered, failed, closed or timed out.

use super::interface::{Interface, MethodSig, Returns};
use super::pending::CallFailure;
use super::protocol::Frame;
use super::Shared;
use crate::codec::{decode_value, exception_text, Arg};
use crate::{LinkError, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

/// Typed handle for calling the peer.
///
/// Holds the link weakly; once every `Link` clone is gone calls fail with
/// `LinkError::Closed`.
#[derive(Clone)]
pub struct Remote {
    shared: Weak<Shared>,
    interface: Arc<Interface>,
}

impl Remote {
    pub(crate) fn new(shared: Weak<Shared>, interface: Arc<Interface>) -> Self {
        Self { shared, interface }
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    /// Call a value-returning method and decode its result.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, args: Vec<Arg>) -> Result<T> {
        let shared = self.link()?;
        let timeout = shared.options().call_timeout;
        self.call_inner(&shared, method, args, timeout).await
    }

    /// Like [`Remote::call`] with an explicit deadline.
    pub async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        args: Vec<Arg>,
        timeout: Duration,
    ) -> Result<T> {
        let shared = self.link()?;
        self.call_inner(&shared, method, args, timeout).await
    }

    /// Call a method declared to return raw bytes.
    pub async fn call_bytes(&self, method: &str, args: Vec<Arg>) -> Result<Bytes> {
        let shared = self.link()?;
        let sig = self.signature(method, args.len(), Returns::Bytes)?;
        let timeout = shared.options().call_timeout;
        self.request(&shared, sig, args, timeout).await
    }

    /// Send a void method call without waiting for anything.
    ///
    /// Fails only for local reasons: an undeclared method, an argument that
    /// cannot be encoded, or a link that is no longer open. A write failure
    /// closes the link but is not reported to this caller.
    pub async fn notify(&self, method: &str, args: Vec<Arg>) -> Result<()> {
        let shared = self.link()?;
        let sig = self.signature(method, args.len(), Returns::Void)?;
        ensure_open(&shared)?;

        let frame = self.frame(&shared, sig, args)?;
        if let Err(e) = shared.send(&frame).await {
            debug!("Void call {} on link {} was not delivered: {}", sig.name, shared.name(), e);
        }
        Ok(())
    }

    /// Call any declared method, choosing the call style from its signature.
    ///
    /// Returns `None` for void methods and the undecoded payload otherwise.
    pub async fn invoke(&self, method: &str, args: Vec<Arg>) -> Result<Option<Bytes>> {
        let returns = self.lookup(method, args.len())?.returns;
        match returns {
            Returns::Void => self.notify(method, args).await.map(|_| None),
            Returns::Value | Returns::Bytes => {
                let shared = self.link()?;
                let sig = self.lookup(method, args.len())?;
                let timeout = shared.options().call_timeout;
                self.request(&shared, sig, args, timeout).await.map(Some)
            }
        }
    }

    async fn call_inner<T: DeserializeOwned>(
        &self,
        shared: &Shared,
        method: &str,
        args: Vec<Arg>,
        timeout: Duration,
    ) -> Result<T> {
        let sig = self.signature(method, args.len(), Returns::Value)?;
        let payload = self.request(shared, sig, args, timeout).await?;
        decode_value(shared.codec().as_ref(), &payload)
    }

    async fn request(
        &self,
        shared: &Shared,
        sig: &MethodSig,
        args: Vec<Arg>,
        timeout: Duration,
    ) -> Result<Bytes> {
        ensure_open(shared)?;
        let frame = self.frame(shared, sig, args)?;
        let pending = shared.pending().register(frame.call_id)?;
        shared.send(&frame).await?;

        match pending.wait(timeout).await {
            Ok(payload) => Ok(payload),
            Err(CallFailure::TimedOut) => Err(LinkError::Timeout {
                method: sig.name.clone(),
                after: timeout,
            }),
            Err(CallFailure::Exception(payload)) => Err(LinkError::Remote {
                method: sig.name.clone(),
                message: exception_text(shared.codec().as_ref(), &payload),
            }),
            Err(CallFailure::Closed(reason)) => Err(LinkError::Closed { reason }),
        }
    }

    fn frame(&self, shared: &Shared, sig: &MethodSig, args: Vec<Arg>) -> Result<Frame> {
        let codec = shared.codec();
        let payloads = args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| {
                arg.into_payload(codec.as_ref())
                    .map_err(|e| LinkError::Argument {
                        index,
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Frame::request(sig.name.clone(), shared.next_call_id(), payloads))
    }

    fn link(&self) -> Result<Arc<Shared>> {
        self.shared
            .upgrade()
            .ok_or_else(|| LinkError::closed("link dropped"))
    }

    fn lookup(&self, method: &str, arity: usize) -> Result<&MethodSig> {
        if method.is_empty() {
            return Err(LinkError::InvalidMethodName {
                message: "the empty name is reserved for responses".to_string(),
            });
        }
        self.interface
            .lookup(method, arity)
            .ok_or_else(|| LinkError::UnknownMethod {
                interface: self.interface.name().to_string(),
                name: method.to_string(),
                arity,
            })
    }

    fn signature(&self, method: &str, arity: usize, requested: Returns) -> Result<&MethodSig> {
        let sig = self.lookup(method, arity)?;
        if sig.returns != requested {
            return Err(LinkError::SignatureMismatch {
                name: sig.name.clone(),
                declared: sig.returns.as_str(),
                requested: requested.as_str(),
            });
        }
        Ok(sig)
    }
}

fn ensure_open(shared: &Shared) -> Result<()> {
    if shared.is_open() {
        Ok(())
    } else {
        Err(LinkError::closed(format!("link {} is not open", shared.name())))
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("interface", &self.interface.name())
            .finish()
    }
}
