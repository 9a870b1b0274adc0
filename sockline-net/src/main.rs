// sockline: relay server or line client over tcp, udp, tls or unix sockets.

use std::sync::Arc;

use anyhow::Context;
use sockline_net::config::{self, Config, Role};
use sockline_net::{ChannelSink, Client, EventKind, Protocol, Server};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("sockline {}", VERSION);
            return Ok(());
        }
    }

    init_tracing();
    let cfg = config::load().context("load config")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        match cfg.role {
            Role::Server => run_server(cfg).await,
            Role::Client => run_client(cfg).await,
        }
    })
}

/// SOCKLINE_LOG, then RUST_LOG, then `info`; written to stderr.
fn init_tracing() {
    let filter = std::env::var("SOCKLINE_LOG")
        .ok()
        .and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_server(cfg: Config) -> anyhow::Result<()> {
    let (sink, mut messages, mut events) = ChannelSink::channel(cfg.queue_capacity);
    let server = match cfg.protocol {
        Protocol::Tls => {
            let cert = config::read_pem(cfg.cert_file.as_deref(), "cert_file")?;
            let key = config::read_pem(cfg.key_file.as_deref(), "key_file")?;
            Server::tls(cfg.host.clone(), cfg.port, sink, &cert, &key)?
        }
        protocol => Server::new(cfg.host.clone(), cfg.port, sink, protocol),
    };
    let server = Arc::new(server);
    server
        .listen_and_serve()
        .await
        .with_context(|| format!("listen on {}", sockline_net::address(&cfg.host, cfg.port)))?;

    let relay = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if let Err(e) = relay.broadcast(&msg.content).await {
                tracing::warn!(from = %msg.id, error = %e, "relay failed");
            }
        }
    });
    tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            match ev.kind {
                EventKind::Connected => tracing::debug!(peer = %ev.id, "peer active"),
                EventKind::Disconnected => tracing::info!(peer = %ev.id, "peer left"),
                EventKind::Error => tracing::warn!(peer = %ev.id, "peer error"),
            }
        }
    });

    shutdown_signal().await?;
    tracing::info!("shutting down");
    server.stop().await?;
    Ok(())
}

async fn run_client(cfg: Config) -> anyhow::Result<()> {
    let (sink, mut messages, mut events) = ChannelSink::channel(cfg.queue_capacity);
    let client = match cfg.protocol {
        Protocol::Tls => {
            let ca = config::read_pem(cfg.ca_file.as_deref(), "ca_file")?;
            Client::tls(cfg.host.clone(), cfg.port, sink, &ca, cfg.verify_peer)?
        }
        protocol => Client::new(cfg.host.clone(), cfg.port, sink, protocol),
    };
    let client = Arc::new(client);
    client
        .connect()
        .await
        .with_context(|| format!("connect to {}", sockline_net::address(&cfg.host, cfg.port)))?;

    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(msg) = messages.recv().await {
            let mut line = msg.content;
            line.push(b'\n');
            if stdout.write_all(&line).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let sender = client.clone();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Err(e) = sender.send(line.as_bytes()).await {
                tracing::warn!(error = %e, "send failed");
                break;
            }
        }
    });

    let closed = async move {
        while let Some(ev) = events.recv().await {
            if ev.kind == EventKind::Disconnected {
                break;
            }
        }
    };

    tokio::select! {
        r = shutdown_signal() => r?,
        _ = input => tracing::debug!("stdin closed"),
        _ = closed => tracing::info!("server closed the connection"),
    }
    if client.is_connected() {
        client.disconnect().await?;
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
