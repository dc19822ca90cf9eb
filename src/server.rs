//! The accept loop and process lifecycle: bind, spawn a dispatcher per
//! connection, watch for a shutdown signal between commands, drain
//! in-flight connections, then close every queue.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::codec::{Decoder, Encoder};

use bytes::BytesMut;

use crate::dispatcher::{Action, CommandDispatcher};
use crate::metrics::OpCounter;
use crate::registry::QueueRegistry;
use crate::resp::RespCodec;

pub async fn run(host_port: &str, registry: Arc<QueueRegistry>) -> std::io::Result<()> {
    let listener = TcpListener::bind(host_port).await?;
    log::info!("listening on {host_port}");

    let metrics = Arc::new(OpCounter::new());
    let sampler = crate::metrics::spawn_sampler(metrics.clone());

    let (done_tx, done_rx) = watch::channel(false);
    spawn_shutdown_signal_handler(done_tx);

    let mut connections = JoinSet::new();
    let mut shutdown = done_rx.clone();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        log::debug!("accepted connection from {addr}");
                        let registry = registry.clone();
                        let metrics = metrics.clone();
                        let shutdown = done_rx.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(socket, &registry, &metrics, shutdown).await {
                                log::warn!("connection from {addr} ended with error: {e}");
                            }
                        });
                    }
                    Err(e) => log::error!("accept failed: {e}"),
                }
            }
            _ = shutdown.changed() => {
                log::info!("shutdown signal received, draining connections");
                break;
            }
        }
    }

    while connections.join_next().await.is_some() {}
    sampler.abort();
    registry.close_all();
    Ok(())
}

async fn handle_connection(
    mut socket: tokio::net::TcpStream,
    registry: &QueueRegistry,
    metrics: &OpCounter,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut codec = RespCodec;
    let mut read_buf = BytesMut::with_capacity(4096);
    let mut write_buf = BytesMut::with_capacity(4096);
    let mut dispatcher = CommandDispatcher::new(registry, metrics);

    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let command = loop {
            if let Some(cmd) = codec.decode(&mut read_buf)? {
                break Some(cmd);
            }
            let mut chunk = [0u8; 4096];
            tokio::select! {
                n = socket.read(&mut chunk) => {
                    let n = n?;
                    if n == 0 {
                        return Ok(());
                    }
                    read_buf.extend_from_slice(&chunk[..n]);
                }
                _ = shutdown.changed() => break None,
            }
        };

        let Some(command) = command else {
            return Ok(());
        };
        if command.is_empty() {
            continue;
        }

        let action = dispatcher.dispatch(command).await;
        let (reply, should_close) = match action {
            Action::Reply(r) => (r, false),
            Action::Close(r) => (r, true),
        };

        write_buf.clear();
        codec.encode(reply, &mut write_buf)?;
        socket.write_all(&write_buf).await?;

        if should_close {
            return Ok(());
        }
    }
}

#[cfg(unix)]
fn spawn_shutdown_signal_handler(done: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => log::info!("received SIGINT"),
            _ = term.recv() => log::info!("received SIGTERM"),
        }
        let _ = done.send(true);
    });
}

#[cfg(not(unix))]
fn spawn_shutdown_signal_handler(done: watch::Sender<bool>) {
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        log::info!("received ctrl-c");
        let _ = done.send(true);
    });
}
