//! Panel request orchestration
//!
//! [`PanelGateway`] turns a panel route into an upstream render request and
//! serves the result, from the disk cache when a fresh entry exists and
//! from the render service otherwise.
//!
//! # Flow
//!
//! ```text
//! parse options -> resolve dashboard -> build URL
//!     -> cache lookup --hit--> stream file
//!            |
//!           miss -> fetch upstream -> stream to client (tee into cache on 200)
//! ```
//!
//! Every request runs inside a `request` span carrying a fresh UUID, so
//! all events for one request, including those from the streaming task,
//! share the same correlation id.

use crate::body::{self, GatewayBody};
use crate::cache_key::derive_cache_key;
use crate::cache_store::{CacheLookup, CachedEntry, PanelCache, WriteThrough};
use crate::config::ConfigHandle;
use crate::error::{FetchError, Result};
use crate::fetch_client::UpstreamClient;
use crate::metrics::GatewayMetrics;
use crate::models::{PanelRoute, RenderRequest, ResolvedDashboard};
use crate::options::parse_options;
use crate::url_builder::build_render_url;
use futures::TryStreamExt;
use http::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};
use url::Url;
use uuid::Uuid;

/// Body of the catch-all 404 for paths that are not panel routes
pub const ROUTE_NOT_FOUND: &str = "404 - Not Found";

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// `Cache-Control` value for a response that may be kept `max_age` seconds
pub fn cache_control(max_age: u64) -> String {
    format!("public, max-age={}, immutable", max_age)
}

/// Serves panel renders from cache or upstream
#[derive(Clone)]
pub struct PanelGateway {
    config: ConfigHandle,
    client: UpstreamClient,
    metrics: Arc<GatewayMetrics>,
}

impl PanelGateway {
    pub fn new(config: ConfigHandle, client: UpstreamClient) -> Self {
        Self::with_metrics(config, client, Arc::new(GatewayMetrics::new()))
    }

    pub fn with_metrics(
        config: ConfigHandle,
        client: UpstreamClient,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        PanelGateway {
            config,
            client,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// Handle one inbound request
    ///
    /// Never fails: every error is turned into a response here. The request
    /// body is ignored.
    pub async fn handle<B>(&self, req: Request<B>, remote: Option<SocketAddr>) -> Response<GatewayBody> {
        let (parts, _) = req.into_parts();
        let remote = remote.map(|addr| addr.to_string()).unwrap_or_default();

        let span = info_span!(
            "request",
            uuid = %Uuid::new_v4(),
            method = %parts.method,
            path = parts.uri.path(),
            query = parts.uri.query().unwrap_or(""),
            remote = %remote,
        );

        self.route(parts.method, parts.uri).instrument(span).await
    }

    async fn route(&self, method: Method, uri: http::Uri) -> Response<GatewayBody> {
        let started = Instant::now();

        let Some(route) = PanelRoute::parse(uri.path()) else {
            self.metrics.record_not_found();
            info!(status = 404, "not found");
            return text_response(StatusCode::NOT_FOUND, ROUTE_NOT_FOUND);
        };

        if method != Method::GET {
            info!(status = 405, "method not allowed");
            let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "405 Method Not Allowed");
            response
                .headers_mut()
                .insert(ALLOW, http::HeaderValue::from_static("GET"));
            return response;
        }

        self.metrics.record_request();
        let raw_query = uri.query().unwrap_or("").to_string();

        let response = match self.serve_panel(route, raw_query, started).await {
            Ok(response) => response,
            Err(e) => self.error_response(&e),
        };

        self.metrics.record_request_duration(started.elapsed());
        response
    }

    async fn serve_panel(
        &self,
        route: PanelRoute,
        raw_query: String,
        started: Instant,
    ) -> Result<Response<GatewayBody>> {
        let options = parse_options(route.options.as_deref().unwrap_or(""))?;
        let request = RenderRequest::new(route, raw_query, options);

        let config = self.config.snapshot();
        let dashboard = config.resolve_dashboard(&request.dashboard)?;
        let base = config.base_url()?;
        let url = build_render_url(&base, &dashboard, &request);

        let mut cache_target = None;
        if let Some(dir) = config.cache_dir() {
            let cache = PanelCache::new(dir);
            let key = derive_cache_key(&dashboard.name, url.query().unwrap_or(""));
            let path = cache.entry_path(&key);

            match cache.try_serve(&path, dashboard.ttl_seconds).await {
                CacheLookup::Hit(entry) => return Ok(self.serve_cached(entry)),
                CacheLookup::Miss(reason) => {
                    self.metrics.record_cache_miss();
                    info!(cachefile = %path.display(), reason = %reason, "could not return cached response");
                }
            }
            cache_target = Some((cache, path));
        }

        self.serve_upstream(&url, &dashboard, cache_target, started).await
    }

    fn serve_cached(&self, entry: CachedEntry) -> Response<GatewayBody> {
        self.metrics.record_cache_hit();
        info!(
            cachefile = %entry.path().display(),
            age = entry.age().as_secs_f64(),
            ttl = entry.ttl().as_secs(),
            status = 200,
            "returned cached response"
        );

        let builder = Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, entry.content_type())
            .header(CACHE_CONTROL, cache_control(entry.max_age()));

        let metrics = Arc::clone(&self.metrics);
        let stream = entry
            .into_stream()
            .inspect_ok(move |chunk| metrics.record_bytes_from_cache(chunk.len() as u64));

        finish(builder, body::from_stream(stream))
    }

    async fn serve_upstream(
        &self,
        url: &Url,
        dashboard: &ResolvedDashboard,
        cache_target: Option<(PanelCache, PathBuf)>,
        started: Instant,
    ) -> Result<Response<GatewayBody>> {
        info!(url = %url, "sending request");
        let fetch_started = Instant::now();

        let upstream = match self.client.fetch(url, dashboard.auth_token.as_deref()).await {
            Ok(upstream) => {
                self.metrics.record_upstream(true, fetch_started.elapsed());
                upstream
            }
            Err(e) => {
                self.metrics.record_upstream(false, fetch_started.elapsed());
                error!(
                    error = %e,
                    dashboard = %dashboard.name,
                    url = %url,
                    status = 500,
                    "problem fetching graph"
                );
                return Err(e);
            }
        };

        let status = upstream.status();
        let content_type = upstream.content_type().map(str::to_owned);
        info!(
            url = %url,
            status = status.as_u16(),
            content_type = content_type.as_deref().unwrap_or(""),
            elapsed_ms = fetch_started.elapsed().as_millis() as u64,
            "request complete"
        );

        let mut builder = Response::builder().status(status);
        if let Some(content_type) = &content_type {
            builder = builder.header(CONTENT_TYPE, content_type.as_str());
        }

        // Only complete renders are cacheable
        let cache_target = if status == StatusCode::OK {
            builder = builder.header(CACHE_CONTROL, cache_control(dashboard.ttl_seconds.max(0) as u64));
            cache_target
        } else {
            None
        };

        let (tx, response_body) = body::channel();
        let metrics = Arc::clone(&self.metrics);
        let stream = upstream.into_stream();

        tokio::spawn(
            async move {
                let (copied, cached) = match cache_target {
                    Some((cache, target)) => match cache.write_through(&target, stream, &tx).await {
                        Ok(WriteThrough { bytes, installed }) => {
                            if installed {
                                metrics.record_cache_install();
                            } else {
                                metrics.record_cache_write_error();
                            }
                            (Ok(bytes), installed)
                        }
                        Err(e) => (Err(e), false),
                    },
                    None => (body::pipe(stream, &tx, body::CLIENT_WRITE_TIMEOUT).await, false),
                };
                drop(tx);

                match copied {
                    Ok(bytes) => {
                        metrics.record_bytes_from_upstream(bytes);
                        info!(
                            bytes,
                            cached,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "response complete"
                        );
                    }
                    Err(e) => warn!(error = %e, "response aborted"),
                }
            }
            .instrument(Span::current()),
        );

        Ok(finish(builder, response_body))
    }

    /// Log a request failure and turn it into a plain-text response
    ///
    /// Upstream failures are logged where they happen, with the URL.
    fn error_response(&self, err: &FetchError) -> Response<GatewayBody> {
        let status = err.to_http_status();
        match err {
            FetchError::InvalidOptions(_) => {
                self.metrics.record_bad_request();
                warn!(error = %err, status = status.as_u16(), "invalid options");
            }
            FetchError::DashboardNotFound(name) => {
                self.metrics.record_not_found();
                info!(dashboard = %name, status = status.as_u16(), "not found");
            }
            FetchError::DashboardConfigInvalid { .. } | FetchError::ConfigError(_) => {
                self.metrics.record_config_error();
                error!(error = %err, status = status.as_u16(), "invalid config");
            }
            FetchError::UpstreamRequestBuild(_) | FetchError::UpstreamFetch(_) => {}
            _ => debug!(error = %err, status = status.as_u16(), "request failed"),
        }
        text_response(status, status_text(status))
    }
}

fn status_text(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "400 Bad Request",
        StatusCode::NOT_FOUND => "404 Not Found",
        _ => "500 Internal Server Error",
    }
}

fn text_response(status: StatusCode, text: &'static str) -> Response<GatewayBody> {
    let mut response = Response::new(body::full(text));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static(TEXT_PLAIN));
    response
}

/// Attach `body` to a response under construction
///
/// Headers are built from values that already passed through `http` types,
/// so a failure here means a bug; the client gets a 500.
fn finish(builder: http::response::Builder, body: GatewayBody) -> Response<GatewayBody> {
    builder.body(body).unwrap_or_else(|e| {
        error!(error = %e, "could not build response");
        text_response(StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::fetch_client::TlsPolicy;
    use http_body_util::BodyExt;

    fn gateway(config: GatewayConfig) -> PanelGateway {
        let client = UpstreamClient::new(&TlsPolicy::default()).unwrap();
        PanelGateway::new(ConfigHandle::new(config), client)
    }

    async fn body_text(response: Response<GatewayBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<()> {
        Request::builder().uri(uri).body(()).unwrap()
    }

    #[test]
    fn test_cache_control_format() {
        assert_eq!(cache_control(60), "public, max-age=60, immutable");
        assert_eq!(cache_control(0), "public, max-age=0, immutable");
    }

    #[tokio::test]
    async fn test_unknown_path_is_catch_all_404() {
        let gateway = gateway(GatewayConfig::default());
        let response = gateway.handle(get("/only/three/segments"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, ROUTE_NOT_FOUND);
        assert_eq!(gateway.metrics().get_stats().not_found, 1);
    }

    #[tokio::test]
    async fn test_non_get_is_405() {
        let gateway = gateway(GatewayConfig::default());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/ops/4/now-6h/now/")
            .body(())
            .unwrap();
        let response = gateway.handle(request, None).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get(ALLOW).unwrap(), "GET");
    }

    #[tokio::test]
    async fn test_invalid_options_is_400() {
        let config = GatewayConfig::from_yaml_str("dashboards:\n  ops:\n    path: d-solo/x\n").unwrap();
        let gateway = gateway(config);
        let response = gateway.handle(get("/ops/4/a=b,c/now-6h/now/"), None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "400 Bad Request");
        assert_eq!(gateway.metrics().get_stats().bad_requests, 1);
    }

    #[tokio::test]
    async fn test_unknown_dashboard_is_404() {
        let gateway = gateway(GatewayConfig::default());
        let response = gateway.handle(get("/nope/4/now-6h/now"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "404 Not Found");
    }

    #[tokio::test]
    async fn test_broken_dashboard_is_500() {
        let config =
            GatewayConfig::from_yaml_str("dashboards:\n  ops:\n    path: d-solo/x\n    org: many\n").unwrap();
        let gateway = gateway(config);
        let response = gateway.handle(get("/ops/4/now-6h/now/"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(gateway.metrics().get_stats().config_errors, 1);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_500() {
        let config = GatewayConfig::from_yaml_str(
            "url: http://127.0.0.1:1/\ndashboards:\n  ops:\n    path: d-solo/x\n",
        )
        .unwrap();
        let gateway = gateway(config);
        let response = gateway.handle(get("/ops/4/now-6h/now/"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let stats = gateway.metrics().get_stats();
        assert_eq!(stats.upstream_requests, 1);
        assert_eq!(stats.upstream_errors, 1);
    }
}
