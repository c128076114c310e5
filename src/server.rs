//! HTTP server and process wiring

use crate::cache_store::PanelCache;
use crate::cli::Cli;
use crate::config::{ConfigHandle, ConfigSource, GatewayConfig};
use crate::error::Result;
use crate::fetch_client::UpstreamClient;
use crate::gateway::PanelGateway;
use crate::metrics::GatewayMetrics;
use crate::metrics_endpoint::MetricsEndpoint;
use crate::reload::ConfigWatcher;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Time allowed for a client to send the request head
pub const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Time in-flight responses get to finish after a shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Accept loop serving a [`PanelGateway`] over HTTP/1
pub struct GatewayServer {
    gateway: PanelGateway,
    listener: TcpListener,
}

impl GatewayServer {
    pub async fn bind(gateway: PanelGateway, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(GatewayServer { gateway, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` completes, then drain open connections
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let graceful = GracefulShutdown::new();
        let mut shutdown = std::pin::pin!(shutdown);

        loop {
            let (stream, remote) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            let gateway = self.gateway.clone();
            let service = service_fn(move |req: Request<Incoming>| {
                let gateway = gateway.clone();
                async move { Ok::<_, Infallible>(gateway.handle(req, Some(remote)).await) }
            });

            let conn = http1::Builder::new()
                .timer(TokioTimer::new())
                .header_read_timeout(HEADER_READ_TIMEOUT)
                .serve_connection(TokioIo::new(stream), service);
            let conn = graceful.watch(conn);

            tokio::spawn(async move {
                if let Err(err) = conn.await {
                    debug!(remote = %remote, "error serving connection: {:?}", err);
                }
            });
        }

        info!("shutting down, waiting for open connections");
        tokio::select! {
            _ = graceful.shutdown() => info!("all connections closed"),
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => warn!("timed out waiting for connections to close"),
        }
        Ok(())
    }
}

/// Load configuration and run the gateway until Ctrl-C
///
/// Startup faults (bad config, unreadable CA file, listener bind failure)
/// are returned before any traffic is served.
pub async fn run(cli: &Cli) -> Result<()> {
    let source = ConfigSource::resolve(cli.config.clone())?;
    let overrides = cli.overrides();
    let config = GatewayConfig::load(&source, &overrides)?;

    info!(
        config = %source.path().display(),
        listen = %config.listen,
        url = %config.url,
        cache = ?config.cache_dir(),
        dashboards = config.dashboards.len(),
        "starting grafana-fetch"
    );

    let client = UpstreamClient::new(&config.tls_policy())?;

    if let Some(dir) = config.cache_dir() {
        if let Err(e) = PanelCache::new(dir).ensure_dir().await {
            warn!(error = %e, "cache directory unavailable, responses will not be cached");
        }
    }

    let listen = config.listen_addr()?;
    let metrics_addr = config.metrics_addr()?;
    let handle = ConfigHandle::new(config);
    let metrics = Arc::new(GatewayMetrics::new());

    ConfigWatcher::new(source, overrides, handle.clone()).await.start();

    if let Some(addr) = metrics_addr {
        let endpoint = MetricsEndpoint::bind(Arc::clone(&metrics), addr).await?;
        tokio::spawn(async move {
            if let Err(e) = endpoint.start().await {
                error!(error = %e, "metrics endpoint stopped");
            }
        });
    }

    let gateway = PanelGateway::with_metrics(handle, client, metrics);
    let server = GatewayServer::bind(gateway, listen).await?;
    info!(addr = %server.local_addr()?, "listening");

    server.serve_with_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl-C"),
        Err(e) => {
            error!(error = %e, "could not listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch_client::TlsPolicy;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_serves_over_tcp_and_shuts_down() {
        let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();
        let gateway = PanelGateway::new(ConfigHandle::new(GatewayConfig::default()), client);
        let server = GatewayServer::bind(gateway, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve_with_shutdown(async {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /not/a/panel HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 404"));
        assert!(response.ends_with("404 - Not Found"));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }
}
