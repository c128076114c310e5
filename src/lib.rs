//! grafana-fetch
//!
//! A caching HTTP gateway in front of Grafana's image renderer. Clients ask
//! for a panel by dashboard name, panel id and time range; the gateway
//! builds the upstream `render/...` URL from its dashboard configuration,
//! serves a fresh copy from its disk cache when it has one, and otherwise
//! streams the render to the client while writing it into the cache.
//!
//! # Routes
//!
//! ```text
//! GET /{dashboard}/{panel}/{from}/{to}/
//! GET /{dashboard}/{panel}/{options}/{from}/{to}/
//! ```
//!
//! `options` is a comma-separated `key=value` list such as
//! `width=800,height=400`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use grafana_fetch::{ConfigHandle, GatewayConfig, GatewayServer, PanelGateway, UpstreamClient};
//!
//! # async fn example() -> grafana_fetch::Result<()> {
//! let config = GatewayConfig::from_file("grafana-fetch.yaml")?;
//! let client = UpstreamClient::new(&config.tls_policy())?;
//! let listen = config.listen_addr()?;
//!
//! let gateway = PanelGateway::new(ConfigHandle::new(config), client);
//! let server = GatewayServer::bind(gateway, listen).await?;
//! server.serve_with_shutdown(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! listen: ":8080"
//! url: "http://grafana:3000"
//! cache: /var/cache/grafana-fetch
//! ttl: 300
//! dashboards:
//!   ops:
//!     path: d-solo/abc123/operations
//!     ttl: 60
//!     theme: dark
//! ```

pub mod body;
pub mod cache_key;
pub mod cache_store;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch_client;
pub mod gateway;
pub mod metrics;
pub mod metrics_endpoint;
pub mod models;
pub mod options;
pub mod reload;
pub mod server;
pub mod telemetry;
pub mod url_builder;

pub use cache_store::{CacheLookup, PanelCache};
pub use config::{ConfigHandle, GatewayConfig};
pub use error::{FetchError, Result};
pub use fetch_client::{TlsPolicy, UpstreamClient};
pub use gateway::PanelGateway;
pub use metrics::GatewayMetrics;
pub use models::{DashboardSpec, PanelRoute, RenderOptions, RenderRequest, ResolvedDashboard};
pub use server::GatewayServer;
