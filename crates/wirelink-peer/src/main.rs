//! Wirelink peer - serves or calls the demo interface over TCP.
//!
//! `serve` prints `LINK_PORT=<port>` on stdout once the listener is bound so a
//! parent process can pick up an auto-assigned port.

mod service;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use wirelink::codec::decode_value;
use wirelink::{Arg, Handler, JsonCodec, Link, LinkServer, ServerOptions};

#[derive(Parser, Debug)]
#[command(name = "wirelink-peer")]
#[command(about = "Serve or call the wirelink demo interface")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept links and expose the demo interface on each
    Serve {
        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "0")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Refuse peers that do not connect from loopback
        #[arg(long)]
        local_only: bool,
    },
    /// Connect to a server and make one call
    Call {
        /// Server address, e.g. 127.0.0.1:4040
        #[arg(long)]
        addr: SocketAddr,

        /// Method to call
        method: String,

        /// Arguments as JSON; anything that does not parse is sent as a string
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Serve {
            port,
            host,
            local_only,
        } => serve(&host, port, local_only).await,
        Command::Call { addr, method, args } => call(addr, &method, &args).await,
    }
}

async fn serve(host: &str, port: u16, local_only: bool) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let mut server = LinkServer::bind(
        addr,
        Link::builder(service::client_interface()),
        ServerOptions::default().local_only(local_only),
        service::handler,
    )
    .await?;

    // Read by parent processes; keep the format stable.
    println!("LINK_PORT={}", server.addr().port());
    info!("Link server running on {}", server.addr());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing links");
    server.shutdown().await;

    Ok(())
}

async fn call(addr: SocketAddr, method: &str, raw_args: &[String]) -> Result<()> {
    let link = Link::builder(service::interface())
        .name(format!("peer::{}", addr))
        .connect(addr)
        .await?;
    link.open(Handler::empty())?;

    let args = raw_args
        .iter()
        .map(|raw| Arg::from(serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.clone()))))
        .collect();

    let outcome = link.remote()?.invoke(method, args).await;
    link.close().await;

    match outcome? {
        Some(payload) => {
            let value: Value = decode_value(&JsonCodec, &payload)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        None => info!("Sent {} (no response expected)", method),
    }
    Ok(())
}
