//! Symmetric remote invocation over a duplex byte channel.
//!
//! A [`Link`] is one endpoint of a connection. Each side exposes a local
//! [`Handler`] and calls the peer through a [`Remote`] adapter shaped by an
//! [`Interface`]. Void methods are fire-and-forget; everything else blocks the
//! caller until the matching response arrives or the deadline expires.
//!
//! # Architecture
//!
//! - **Protocol**: self-framed wire format and the buffered frame reader
//! - **Pending**: correlation of call ids to waiting callers
//! - **Receive loop**: one task per open link reading channel-in
//! - **Lifecycle** (this module): open, close, transfer and remote disconnect
//! - **Server**: accepts TCP connections and opens one link per peer
//!
//! State machine: `Created -> Open -> {Closed, Transferred}`, with a short
//! `Closing` step while a link is being torn down or detached.

pub mod dispatch;
pub mod interface;
pub mod pending;
pub mod protocol;
mod receive;
pub mod remote;
pub mod server;

pub use dispatch::{DisconnectReason, Handler, HandlerBuilder, Invocation, Reply};
pub use interface::{Interface, MethodSig, Returns};
pub use pending::{CallFailure, PendingCall, PendingCalls};
pub use protocol::{BoxReader, BoxWriter, CallId, Frame, FrameReader};
pub use remote::Remote;
pub use server::{LinkServer, LinkServerHandle, ServerOptions};

use crate::codec::{JsonCodec, SharedCodec};
use crate::config::{LinkOptions, TimeoutConfig};
use crate::{LinkError, Result};
use bytes::BytesMut;
use protocol::write_frame;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Lifecycle state of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Created,
    Open,
    /// Quit flag raised; teardown or detach in progress.
    Closing,
    Closed,
    Transferred,
}

/// Channel halves detached from a transferred link.
pub struct Channel {
    reader: BoxReader,
    writer: BoxWriter,
    buffered: BytesMut,
}

impl Channel {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            buffered: BytesMut::new(),
        }
    }

    /// Bytes already read from channel-in that no frame has consumed yet.
    pub fn buffered(&self) -> &[u8] {
        &self.buffered
    }

    pub fn into_parts(self) -> (BoxReader, BoxWriter, BytesMut) {
        (self.reader, self.writer, self.buffered)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Link`].
#[derive(Clone)]
pub struct LinkBuilder {
    interface: Arc<Interface>,
    name: Option<String>,
    codec: SharedCodec,
    options: LinkOptions,
    handler: Option<Arc<Handler>>,
}

impl LinkBuilder {
    pub fn new(interface: Interface) -> Self {
        Self {
            interface: Arc::new(interface),
            name: None,
            codec: Arc::new(JsonCodec),
            options: LinkOptions::default(),
            handler: None,
        }
    }

    /// Name used in logs. Defaults to `link::<remote interface>`.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn codec(mut self, codec: SharedCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Bind the local handler up front; `open(None)` then starts the link.
    pub fn handler(mut self, handler: Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Build a link over separate read and write halves.
    pub fn build<R, W>(self, reader: R, writer: W) -> Link
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.adopt(Channel::new(reader, writer))
    }

    /// Build a link over one duplex stream.
    pub fn stream<S>(self, stream: S) -> Link
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.build(reader, writer)
    }

    /// Build a link over an accepted or connected TCP stream.
    pub fn tcp(self, stream: TcpStream) -> Link {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not disable Nagle on link socket: {}", e);
        }
        let (reader, writer) = stream.into_split();
        self.build(reader, writer)
    }

    /// Connect to a link server.
    ///
    /// Bounded by `TimeoutConfig::CONNECT_TIMEOUT`.
    pub async fn connect(self, addr: SocketAddr) -> Result<Link> {
        let stream = tokio::time::timeout(TimeoutConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| LinkError::Connect {
                addr: addr.to_string(),
                message: format!("timed out after {:?}", TimeoutConfig::CONNECT_TIMEOUT),
            })?
            .map_err(|e| LinkError::Connect {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        debug!("Link connected to {}", addr);
        Ok(self.tcp(stream))
    }

    /// Build a successor link over a channel detached by [`Link::transfer`].
    pub fn adopt(self, channel: Channel) -> Link {
        let Channel {
            reader,
            writer,
            buffered,
        } = channel;

        let mut options = self.options;
        options.initial_call_id = options.initial_call_id.max(1);

        let name = self
            .name
            .unwrap_or_else(|| format!("link::{}", self.interface.name()));
        let (stop_tx, _) = watch::channel(false);
        let (close_tx, _) = watch::channel(false);

        Link {
            shared: Arc::new(Shared {
                name,
                next_id: AtomicI32::new(options.initial_call_id),
                reader: Mutex::new(Some(
                    FrameReader::with_buffered(reader, buffered, options.max_payload_len)
                        .with_max_frame_len(options.max_frame_len),
                )),
                options,
                codec: self.codec,
                interface: self.interface,
                state: Mutex::new(LinkState::Created),
                writer: tokio::sync::Mutex::new(Some(writer)),
                handler: Mutex::new(self.handler),
                pending: PendingCalls::new(),
                stop_tx,
                close_tx,
                task: Mutex::new(None),
                remote: OnceLock::new(),
            }),
        }
    }
}

/// State shared between a link, its remote adapter, its receive loop and
/// in-flight dispatch tasks.
pub(crate) struct Shared {
    name: String,
    options: LinkOptions,
    codec: SharedCodec,
    interface: Arc<Interface>,
    state: Mutex<LinkState>,
    /// channel-out; one full frame is written per lock.
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    /// channel-in while the link is not running a receive loop.
    reader: Mutex<Option<FrameReader>>,
    handler: Mutex<Option<Arc<Handler>>>,
    pending: PendingCalls,
    next_id: AtomicI32,
    stop_tx: watch::Sender<bool>,
    /// Raised by close and disconnect, never by transfer; aborts in-flight writes.
    close_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<FrameReader>>>,
    remote: OnceLock<Remote>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn state(&self) -> LinkState {
        *locked(&self.state)
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    pub(crate) fn codec(&self) -> SharedCodec {
        self.codec.clone()
    }

    pub(crate) fn options(&self) -> &LinkOptions {
        &self.options
    }

    pub(crate) fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    pub(crate) fn handler(&self) -> Option<Arc<Handler>> {
        locked(&self.handler).clone()
    }

    /// Next call id; wraps back to the initial id instead of overflowing.
    pub(crate) fn next_call_id(&self) -> CallId {
        let initial = self.options.initial_call_id;
        self.next_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == i32::MAX { initial } else { id + 1 })
            })
            .unwrap_or_else(|id| id)
    }

    /// Write one frame to channel-out.
    ///
    /// An I/O failure here means the channel is gone and the link is torn down
    /// as a remote disconnect (or silently, if a local close is under way).
    /// A close while the write is waiting on a peer that stopped reading
    /// abandons the write with `LinkError::Closed`.
    pub(crate) async fn send(&self, frame: &Frame) -> Result<()> {
        let mut close_rx = self.close_tx.subscribe();
        let result = tokio::select! {
            biased;
            _ = close_rx.wait_for(|closed| *closed) => {
                return Err(LinkError::closed("link closed while writing"));
            }
            result = self.write(frame) => result,
        };

        if let Err(LinkError::Io { message, .. }) = &result {
            self.disconnect(DisconnectReason::ChannelError(message.clone()))
                .await;
        }
        result
    }

    async fn write(&self, frame: &Frame) -> Result<()> {
        let mut guard = self.writer.lock().await;
        match guard.as_mut() {
            Some(writer) => write_frame(writer, frame).await,
            None => Err(LinkError::closed("channel-out released")),
        }
    }

    /// Tear down after the channel failed or the peer went away.
    ///
    /// Returns false when the link was not open, in which case the failure is
    /// the expected echo of a local close or transfer and is swallowed.
    pub(crate) async fn disconnect(&self, reason: DisconnectReason) -> bool {
        {
            let mut state = locked(&self.state);
            if *state != LinkState::Open {
                return false;
            }
            *state = LinkState::Closing;
        }

        info!("Link {} disconnected: {:?}", self.name, reason);
        self.stop_tx.send_replace(true);
        self.close_tx.send_replace(true);
        self.pending.release_all("link closed");
        self.shutdown_writer().await;
        self.finish_close(reason);
        true
    }

    async fn shutdown_writer(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Link {} channel-out shutdown: {}", self.name, e);
            }
        }
    }

    fn finish_close(&self, reason: DisconnectReason) {
        *locked(&self.state) = LinkState::Closed;
        self.close_tx.send_replace(true);
        drop(locked(&self.reader).take());

        let handler = locked(&self.handler).take();
        if let Some(handler) = handler {
            handler.teardown(reason);
        }
    }

    /// Stop the receive loop and take back channel-in.
    ///
    /// Only returns once the loop task has fully exited.
    async fn stop_receive_loop(&self) -> Option<FrameReader> {
        self.stop_tx.send_replace(true);
        let task = locked(&self.task).take();
        match task {
            Some(task) => match task.await {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!("Receive loop for link {} ended abnormally: {}", self.name, e);
                    None
                }
            },
            None => locked(&self.reader).take(),
        }
    }
}

/// One endpoint of a bidirectional call connection.
///
/// Cloning is cheap; all clones drive the same endpoint. The bound handler is
/// owned by the link until it closes or transfers, so a handler that needs its
/// own link should capture a [`WeakLink`] rather than a clone.
#[derive(Clone)]
pub struct Link {
    shared: Arc<Shared>,
}

/// Non-owning reference to a [`Link`].
#[derive(Clone)]
pub struct WeakLink {
    shared: Weak<Shared>,
}

impl WeakLink {
    /// The link, if any strong reference to it is still alive.
    pub fn upgrade(&self) -> Option<Link> {
        self.shared.upgrade().map(|shared| Link { shared })
    }
}

impl fmt::Debug for WeakLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakLink")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl Link {
    pub fn builder(remote: Interface) -> LinkBuilder {
        LinkBuilder::new(remote)
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn downgrade(&self) -> WeakLink {
        WeakLink {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn state(&self) -> LinkState {
        self.shared.state()
    }

    /// True while open and no disconnect has been observed.
    pub fn is_open(&self) -> bool {
        self.shared.is_open()
    }

    pub fn interface(&self) -> &Interface {
        &self.shared.interface
    }

    pub fn options(&self) -> &LinkOptions {
        self.shared.options()
    }

    /// Number of synchronous calls still waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending().len()
    }

    /// Bind the local handler (unless bound at construction) and start the
    /// receive loop.
    ///
    /// Must be called from within a tokio runtime. Opening twice is an error.
    pub fn open(&self, handler: impl Into<Option<Handler>>) -> Result<()> {
        let mut state = locked(&self.shared.state);
        match *state {
            LinkState::Created => {}
            LinkState::Open => return Err(LinkError::AlreadyOpen),
            other => return Err(LinkError::closed(format!("cannot open a link in state {:?}", other))),
        }

        {
            let mut slot = locked(&self.shared.handler);
            match (handler.into(), slot.is_some()) {
                (Some(_), true) => return Err(LinkError::HandlerAlreadyBound),
                (Some(handler), false) => *slot = Some(Arc::new(handler)),
                (None, true) => {}
                (None, false) => return Err(LinkError::NoHandler),
            }
        }

        let reader = locked(&self.shared.reader)
            .take()
            .ok_or_else(|| LinkError::closed("channel-in already released"))?;

        *state = LinkState::Open;
        let stop_rx = self.shared.stop_tx.subscribe();
        let task = tokio::spawn(receive::run(self.shared.clone(), reader, stop_rx));
        *locked(&self.shared.task) = Some(task);

        debug!("Link {} opened", self.shared.name());
        Ok(())
    }

    /// The adapter for calling the peer, created once and cached.
    ///
    /// Fails once the link has been closed or transferred.
    pub fn remote(&self) -> Result<Remote> {
        match self.state() {
            LinkState::Created | LinkState::Open => {}
            other => return Err(LinkError::closed(format!("link is {:?}", other))),
        }
        Ok(self
            .shared
            .remote
            .get_or_init(|| Remote::new(Arc::downgrade(&self.shared), self.shared.interface.clone()))
            .clone())
    }

    /// Close the link: stop the loop, release pending calls and close both halves.
    ///
    /// Closing an already closed or transferred link does nothing.
    pub async fn close(&self) {
        {
            let mut state = locked(&self.shared.state);
            match *state {
                LinkState::Created | LinkState::Open => *state = LinkState::Closing,
                _ => return,
            }
        }

        debug!("Closing link {}", self.shared.name());
        self.shared.stop_tx.send_replace(true);
        self.shared.close_tx.send_replace(true);
        self.shared.pending.release_all("link closed");
        self.shared.shutdown_writer().await;
        drop(self.shared.stop_receive_loop().await);
        self.shared.finish_close(DisconnectReason::Local);
    }

    /// Stop the receive loop without closing the channel and hand the channel
    /// to a successor.
    ///
    /// When `reply` is given, one last response for that call id is written on
    /// this link first, so the call that asked for the handoff still gets its
    /// answer. Pending calls are released and the teardown callback is not run.
    pub async fn transfer(&self, reply: Option<(CallId, Reply)>) -> Result<Channel> {
        let reply = match reply {
            Some((id, reply)) => Some(Frame::response(
                id,
                reply.into_payload(self.shared.codec.as_ref())?,
            )),
            None => None,
        };

        {
            let mut state = locked(&self.shared.state);
            match *state {
                LinkState::Created | LinkState::Open => *state = LinkState::Closing,
                other => {
                    return Err(LinkError::closed(format!(
                        "cannot transfer a link in state {:?}",
                        other
                    )))
                }
            }
        }

        let reader = self.shared.stop_receive_loop().await;
        self.shared.pending.release_all("link transferred");

        let writer = {
            let mut guard = self.shared.writer.lock().await;
            let written = match (&reply, guard.as_mut()) {
                (Some(frame), Some(writer)) => write_frame(writer, frame).await,
                _ => Ok(()),
            };
            if let Err(e) = written {
                drop(guard.take());
                drop(guard);
                self.shared
                    .finish_close(DisconnectReason::ChannelError(e.to_string()));
                return Err(e);
            }
            guard.take()
        };

        let (Some(reader), Some(writer)) = (reader, writer) else {
            self.shared
                .finish_close(DisconnectReason::ChannelError("channel lost during transfer".into()));
            return Err(LinkError::closed("channel lost during transfer"));
        };

        *locked(&self.shared.state) = LinkState::Transferred;
        drop(locked(&self.shared.handler).take());

        info!("Link {} transferred its channel", self.shared.name());
        let (reader, buffered) = reader.into_parts();
        Ok(Channel {
            reader,
            writer,
            buffered,
        })
    }

    /// Wait until the link has left the open state, for whatever reason.
    pub async fn stopped(&self) {
        let mut rx = self.shared.stop_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Arg;
    use std::time::Duration;
    use tokio::sync::oneshot;

    const WAIT: Duration = Duration::from_secs(5);

    fn peer_interface() -> Interface {
        Interface::new("Peer").value("foo", 0).void("abort", 0)
    }

    fn pair() -> (Link, Link) {
        let (a, b) = tokio::io::duplex(4096);
        (
            Link::builder(peer_interface()).name("a").stream(a),
            Link::builder(peer_interface()).name("b").stream(b),
        )
    }

    #[tokio::test]
    async fn test_open_twice_is_error() {
        let (a, _b) = pair();
        a.open(Handler::empty()).unwrap();
        assert!(matches!(a.open(Handler::empty()), Err(LinkError::AlreadyOpen)));
        a.close().await;
    }

    #[tokio::test]
    async fn test_open_requires_handler() {
        let (a, _b) = pair();
        assert!(matches!(a.open(None), Err(LinkError::NoHandler)));
        assert_eq!(a.state(), LinkState::Created);
    }

    #[tokio::test]
    async fn test_handler_bound_at_construction() {
        let (a, _b) = tokio::io::duplex(1024);
        let link = Link::builder(peer_interface())
            .handler(Handler::empty())
            .stream(a);

        assert!(matches!(
            link.open(Handler::empty()),
            Err(LinkError::HandlerAlreadyBound)
        ));
        link.open(None).unwrap();
        assert!(link.is_open());
        link.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fires_teardown_once() {
        let (a, _b) = pair();
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        a.open(
            Handler::builder()
                .on_disconnect(move |reason| {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(reason);
                    }
                })
                .build(),
        )
        .unwrap();

        a.close().await;
        a.close().await;
        assert_eq!(a.state(), LinkState::Closed);
        assert_eq!(rx.await.unwrap(), DisconnectReason::Local);
    }

    #[tokio::test]
    async fn test_remote_unavailable_after_close() {
        let (a, _b) = pair();
        a.open(Handler::empty()).unwrap();
        assert!(a.remote().is_ok());
        a.close().await;
        assert!(matches!(a.remote(), Err(LinkError::Closed { .. })));
        assert!(!a.is_open());
    }

    #[tokio::test]
    async fn test_call_ids_start_high_and_wrap() {
        let (a, _b) = tokio::io::duplex(64);
        let mut options = LinkOptions::default();
        options.initial_call_id = i32::MAX - 1;
        let link = Link::builder(peer_interface()).options(options).stream(a);

        assert_eq!(link.shared.next_call_id(), i32::MAX - 1);
        assert_eq!(link.shared.next_call_id(), i32::MAX);
        assert_eq!(link.shared.next_call_id(), i32::MAX - 1);

        let (c, _d) = tokio::io::duplex(64);
        let fresh = Link::builder(peer_interface()).stream(c);
        assert_eq!(fresh.shared.next_call_id(), 10_000);
    }

    #[tokio::test]
    async fn test_peer_eof_closes_link() {
        let (a, b) = pair();
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        a.open(
            Handler::builder()
                .on_disconnect(move |reason| {
                    if let Some(tx) = tx.take() {
                        let _ = tx.send(reason);
                    }
                })
                .build(),
        )
        .unwrap();
        b.open(Handler::empty()).unwrap();

        b.close().await;
        let reason = tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::RemoteClosed);
        assert!(!a.is_open());
    }

    #[tokio::test]
    async fn test_void_call_fails_fast_when_closed() {
        let (a, _b) = pair();
        a.open(Handler::empty()).unwrap();
        let remote = a.remote().unwrap();
        a.close().await;

        let result = remote.notify("abort", vec![]).await;
        assert!(matches!(result, Err(LinkError::Closed { .. })));
        let result = remote.call::<i32>("foo", Vec::<Arg>::new()).await;
        assert!(matches!(result, Err(LinkError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_weak_link_does_not_keep_link_alive() {
        let (a, _b) = pair();
        let weak = a.downgrade();
        let aborting = a.downgrade();
        a.open(
            Handler::builder()
                .void_method("abort", 0, move |_| {
                    let link = aborting.clone();
                    async move {
                        if let Some(link) = link.upgrade() {
                            link.close().await;
                        }
                        Ok(())
                    }
                })
                .build(),
        )
        .unwrap();

        assert_eq!(weak.upgrade().unwrap().name(), "a");
        a.close().await;
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    fn stalled_peer_interface() -> Interface {
        Interface::new("Peer").void("log", 1).value("get", 1)
    }

    /// A link whose peer end is held open but never read.
    fn stalled_link() -> (Link, tokio::io::DuplexStream) {
        let (a, peer) = tokio::io::duplex(64);
        let link = Link::builder(stalled_peer_interface()).name("stalled").stream(a);
        link.open(Handler::empty()).unwrap();
        (link, peer)
    }

    #[tokio::test]
    async fn test_close_interrupts_blocked_void_write() {
        let (link, _peer) = stalled_link();
        let remote = link.remote().unwrap();

        let notify = tokio::spawn(async move {
            remote.notify("log", vec![Arg::bytes(vec![0u8; 4096])]).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!notify.is_finished());

        tokio::time::timeout(WAIT, link.close()).await.unwrap();
        let result = tokio::time::timeout(WAIT, notify).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(link.state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn test_close_releases_caller_blocked_in_write() {
        let (link, _peer) = stalled_link();
        let remote = link.remote().unwrap();

        let call = tokio::spawn(async move {
            remote.call::<i32>("get", vec![Arg::bytes(vec![0u8; 4096])]).await
        });
        while link.pending_calls() == 0 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!call.is_finished());

        tokio::time::timeout(WAIT, link.close()).await.unwrap();
        let result = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
        assert!(matches!(result, Err(LinkError::Closed { .. })));
        assert_eq!(link.pending_calls(), 0);
    }
}
