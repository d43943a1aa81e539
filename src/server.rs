//! Server accept loop and graceful shutdown.
//!
//! Contains the runtime infrastructure that sits between the TCP listener
//! and the request handlers. Kept apart from `main()` so that the server
//! can be started against an ephemeral port in tests without pulling in
//! signal handling or process exit.

use std::future::Future;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::{AppState, handle_request};

/// Accepts connections on `listener` and serves each one over HTTP/1.1
/// against the shared `state`.
///
/// Runs until `shutdown` resolves, then stops accepting new connections
/// and returns. Connections already spawned run to completion on their
/// own tasks.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: impl Future<Output = ()>) {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, client_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(%e, "failed to accept connection");
                        continue;
                    }
                };
                debug!(client = %client_addr, "accepted connection");

                let state = state.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: hyper::Request<Incoming>| {
                        let state = state.clone();
                        async move {
                            let resp = handle_request(req, state)
                                .await
                                .unwrap_or_else(|e| e.into_response());
                            Ok::<_, std::convert::Infallible>(resp)
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await
                    {
                        warn!(%e, client = %client_addr, "connection error");
                    }
                });
            }
            () = &mut shutdown => {
                info!("shutting down, no longer accepting connections");
                break;
            }
        }
    }
}

/// Awaits a shutdown signal (SIGINT or SIGTERM on Unix, Ctrl+C on all
/// platforms). Returns once the first signal is received.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(%e, "failed to register SIGTERM handler, waiting for Ctrl+C only");
                    if ctrl_c.await.is_ok() {
                        info!("received SIGINT, initiating graceful shutdown");
                    }
                    return;
                }
            };

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, initiating graceful shutdown"),
            _ = sigterm.recv() => info!("received SIGTERM, initiating graceful shutdown"),
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = ctrl_c.await {
            warn!(%e, "failed to listen for Ctrl+C");
            return;
        }
        info!("received Ctrl+C, initiating graceful shutdown");
    }
}
