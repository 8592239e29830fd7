//! Demo interface served by `wirelink-peer serve`.

use serde_json::Value;
use tracing::info;
use wirelink::{Handler, Interface, Link, Reply};

/// What a client sees when it connects to the demo server.
pub fn interface() -> Interface {
    Interface::new("Demo")
        .value("ping", 0)
        .value("echo", 1)
        .value("add", 2)
        .value("fail", 1)
        .void("log", 1)
        .void("abort", 0)
}

/// What the demo server may call on a client. Nothing, for now.
pub fn client_interface() -> Interface {
    Interface::new("DemoClient")
}

/// Local handler for one accepted link.
pub fn handler(link: &Link) -> Handler {
    let peer = link.name().to_string();
    let aborting = link.downgrade();

    Handler::builder()
        .method("ping", 0, |_| async { Ok(Reply::json("pong")?) })
        .method("echo", 1, |call| async move {
            let value: Value = call.arg(0)?;
            Ok(Reply::from(value))
        })
        .method("add", 2, |call| async move {
            let a: f64 = call.arg(0)?;
            let b: f64 = call.arg(1)?;
            Ok(Reply::json(&(a + b))?)
        })
        .method("fail", 1, |call| async move {
            let message: String = call.arg(0)?;
            anyhow::bail!("{}", message)
        })
        .void_method("log", 1, move |call| {
            let peer = peer.clone();
            async move {
                let message: String = call.arg(0)?;
                info!("{}: {}", peer, message);
                Ok(())
            }
        })
        .void_method("abort", 0, move |_| {
            let link = aborting.upgrade();
            async move {
                if let Some(link) = link {
                    info!("{} asked to abort", link.name());
                    link.close().await;
                }
                Ok(())
            }
        })
        .on_disconnect(|reason| info!("Peer disconnected: {:?}", reason))
        .build()
}
