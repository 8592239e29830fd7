//! Wirelink - symmetric remote method invocation over a duplex byte channel.
//!
//! Two peers connected by any bidirectional byte stream (a TCP socket, a pair
//! of pipes, an in-memory duplex) each expose a local handler and call the
//! other side through a typed remote adapter. Either side may call at any
//! time, including from inside a handler that is answering the peer.
//!
//! # Example
//!
//! ```rust,ignore
//! use wirelink::{Handler, Interface, Link, Reply};
//!
//! #[tokio::main]
//! async fn main() -> wirelink::Result<()> {
//!     let (a, b) = tokio::io::duplex(8192);
//!
//!     let server = Link::builder(Interface::new("Client")).stream(a);
//!     server.open(
//!         Handler::builder()
//!             .method("foo", 0, |_| async { Ok(Reply::json(&-42)?) })
//!             .build(),
//!     )?;
//!
//!     let client = Link::builder(Interface::new("Server").value("foo", 0)).stream(b);
//!     client.open(Handler::empty())?;
//!
//!     let answer: i32 = client.remote()?.call("foo", vec![]).await?;
//!     assert_eq!(answer, -42);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod link;

pub use codec::{Arg, JsonCodec, SharedCodec, ValueCodec};
pub use config::{LinkOptions, ServerConfig, TimeoutConfig, WireConfig};
pub use error::{LinkError, Result};
pub use link::{
    CallId, Channel, DisconnectReason, Handler, HandlerBuilder, Interface, Invocation, Link,
    LinkBuilder, LinkServer, LinkServerHandle, LinkState, MethodSig, Remote, Reply, Returns,
    ServerOptions, WeakLink,
};
