//! Metrics HTTP endpoint
//!
//! A small side listener exposing gateway counters in Prometheus text format
//! at `/metrics`, as JSON at `/stats`, and a liveness probe at `/health`.

use crate::error::Result;
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics endpoint server
pub struct MetricsEndpoint {
    metrics: Arc<GatewayMetrics>,
    listener: TcpListener,
}

impl MetricsEndpoint {
    /// Bind the metrics listener
    ///
    /// # Example
    /// ```no_run
    /// use grafana_fetch::metrics::GatewayMetrics;
    /// use grafana_fetch::metrics_endpoint::MetricsEndpoint;
    /// use std::sync::Arc;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let metrics = Arc::new(GatewayMetrics::new());
    ///     let endpoint = MetricsEndpoint::bind(metrics, "127.0.0.1:9090".parse().unwrap())
    ///         .await
    ///         .unwrap();
    ///     endpoint.start().await.unwrap();
    /// }
    /// ```
    pub async fn bind(metrics: Arc<GatewayMetrics>, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { metrics, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the task is dropped or accepting fails
    pub async fn start(self) -> Result<()> {
        let addr = self.listener.local_addr()?;
        info!("Metrics endpoint listening on http://{}", addr);

        loop {
            let (stream, _) = self.listener.accept().await?;
            let io = TokioIo::new(stream);
            let metrics = Arc::clone(&self.metrics);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let metrics = Arc::clone(&metrics);
                    async move { handle_request(req, metrics).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving metrics connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request<B>(
    req: Request<B>,
    metrics: Arc<GatewayMetrics>,
) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(&metrics),
        "/stats" => stats_response(&metrics),
        "/health" => health_response(),
        _ => not_found_response(),
    };
    Ok(response)
}

fn text_response(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn metrics_response(metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    let body = format_prometheus_metrics(&metrics.get_stats());
    text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body)
}

fn stats_response(metrics: &GatewayMetrics) -> Response<Full<Bytes>> {
    match serde_json::to_vec(&metrics.get_stats()) {
        Ok(body) => text_response(StatusCode::OK, "application/json", body),
        Err(_) => text_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            "500 Internal Server Error",
        ),
    }
}

fn health_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::OK, "application/json", r#"{"status":"healthy"}"#)
}

fn not_found_response() -> Response<Full<Bytes>> {
    text_response(StatusCode::NOT_FOUND, "text/plain", "404 Not Found")
}

fn push_metric(output: &mut String, name: &str, kind: &str, help: &str, value: impl std::fmt::Display) {
    let _ = writeln!(output, "# HELP grafana_fetch_{} {}", name, help);
    let _ = writeln!(output, "# TYPE grafana_fetch_{} {}", name, kind);
    let _ = writeln!(output, "grafana_fetch_{} {}", name, value);
    output.push('\n');
}

/// Format metrics in Prometheus exposition format
///
/// Each metric carries a HELP line and a TYPE line.
pub fn format_prometheus_metrics(snapshot: &MetricsSnapshot) -> String {
    let mut output = String::new();

    push_metric(&mut output, "requests_total", "counter", "Total number of panel requests", snapshot.total_requests);
    push_metric(&mut output, "bad_requests_total", "counter", "Requests rejected for malformed options", snapshot.bad_requests);
    push_metric(&mut output, "not_found_total", "counter", "Requests for unknown dashboards or paths", snapshot.not_found);
    push_metric(&mut output, "config_errors_total", "counter", "Requests failed by a broken dashboard entry", snapshot.config_errors);

    push_metric(&mut output, "cache_hits_total", "counter", "Responses served from the cache", snapshot.cache_hits);
    push_metric(&mut output, "cache_misses_total", "counter", "Cache lookups that fell through to upstream", snapshot.cache_misses);
    push_metric(&mut output, "cache_write_errors_total", "counter", "Responses that could not be stored", snapshot.cache_write_errors);
    push_metric(&mut output, "cache_installs_total", "counter", "Cache entries installed", snapshot.cache_installs);
    push_metric(&mut output, "cache_hit_rate", "gauge", "Cache hit rate percentage", format!("{:.2}", snapshot.cache_hit_rate()));

    push_metric(&mut output, "upstream_requests_total", "counter", "Requests sent to the render service", snapshot.upstream_requests);
    push_metric(&mut output, "upstream_errors_total", "counter", "Upstream requests that failed", snapshot.upstream_errors);
    push_metric(&mut output, "upstream_failure_rate", "gauge", "Upstream failure rate percentage", format!("{:.2}", snapshot.upstream_failure_rate()));

    push_metric(&mut output, "bytes_from_cache_total", "counter", "Bytes served from the cache", snapshot.bytes_from_cache);
    push_metric(&mut output, "bytes_from_upstream_total", "counter", "Bytes received from upstream", snapshot.bytes_from_upstream);

    push_metric(&mut output, "request_duration_ms_avg", "gauge", "Average request duration in milliseconds", format!("{:.2}", snapshot.avg_request_duration_ms()));
    push_metric(&mut output, "upstream_duration_ms_avg", "gauge", "Average upstream duration in milliseconds", format!("{:.2}", snapshot.avg_upstream_duration_ms()));

    output
}
