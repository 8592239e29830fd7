//! TCP link server.
//!
//! Accepts connections on a listener and opens one [`Link`] per peer. The
//! local handler for each link comes from an application factory, which sees
//! the new link and can keep a `WeakLink` to it to call the peer back later.

use super::{Handler, Link, LinkBuilder};
use crate::config::{ServerConfig, TimeoutConfig};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Accept policy for a [`LinkServer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Reject peers that do not connect from a loopback address.
    pub local_only: bool,
    /// Open links beyond this count are refused.
    pub max_connections: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            local_only: false,
            max_connections: ServerConfig::MAX_CONNECTIONS,
        }
    }
}

impl ServerOptions {
    pub fn local_only(mut self, local_only: bool) -> Self {
        self.local_only = local_only;
        self
    }

    /// Whether a peer connecting from `peer` passes the address policy.
    pub fn admits(&self, peer: &SocketAddr) -> bool {
        !self.local_only || peer.ip().is_loopback()
    }
}

type HandlerFactory = Arc<dyn Fn(&Link) -> Handler + Send + Sync>;
type LinkList = Arc<Mutex<Vec<Link>>>;

/// Handle to a running link server. Dropping stops accepting.
pub struct LinkServerHandle {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
    links: LinkList,
}

impl LinkServerHandle {
    /// Address the listener is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Links accepted so far that are still open.
    pub fn links(&self) -> Vec<Link> {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        links.retain(Link::is_open);
        links.clone()
    }

    /// Stop accepting and close every link this server opened.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Link server accept loop ended abnormally: {}", e);
            }
        }

        let links = std::mem::take(&mut *self.links.lock().unwrap_or_else(PoisonError::into_inner));
        for link in &links {
            link.close().await;
        }
        info!("Link server on {} stopped; closed {} link(s)", self.addr, links.len());
    }
}

impl Drop for LinkServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }

        let links = std::mem::take(&mut *self.links.lock().unwrap_or_else(PoisonError::into_inner));
        if links.is_empty() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                for link in links {
                    link.close().await;
                }
            });
        }
    }
}

/// Listens for peers and opens a link for each.
pub struct LinkServer;

impl LinkServer {
    /// Bind `addr` and start accepting in a background task.
    ///
    /// `builder` is cloned for every connection; `factory` is called once per
    /// accepted link to produce its local handler.
    pub async fn bind<F>(
        addr: SocketAddr,
        builder: LinkBuilder,
        options: ServerOptions,
        factory: F,
    ) -> Result<LinkServerHandle>
    where
        F: Fn(&Link) -> Handler + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!("Link server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let links: LinkList = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(Self::accept_loop(
            listener,
            builder,
            options,
            Arc::new(factory),
            links.clone(),
            shutdown_rx,
        ));

        Ok(LinkServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            links,
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        builder: LinkBuilder,
        options: ServerOptions,
        factory: HandlerFactory,
        links: LinkList,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Link server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        Self::admit(stream, peer, &builder, &options, &factory, &links);
                    }
                    Err(e) => {
                        error!("Link server accept error: {}", e);
                        tokio::time::sleep(TimeoutConfig::ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    fn admit(
        stream: TcpStream,
        peer: SocketAddr,
        builder: &LinkBuilder,
        options: &ServerOptions,
        factory: &HandlerFactory,
        links: &LinkList,
    ) {
        if !options.admits(&peer) {
            error!("Rejecting link from non-local peer {}", peer);
            return;
        }

        let mut links = links.lock().unwrap_or_else(PoisonError::into_inner);
        links.retain(Link::is_open);
        if links.len() >= options.max_connections {
            warn!(
                "Rejecting link from {}: at max capacity ({})",
                peer, options.max_connections
            );
            return;
        }

        let link = builder.clone().name(format!("link::{}", peer)).tcp(stream);
        let handler = factory(&link);
        match link.open(handler) {
            Ok(()) => {
                debug!("Accepted link from {}", peer);
                links.push(link);
            }
            Err(e) => warn!("Could not open link from {}: {}", peer, e),
        }
    }
}
