//! Upstream fetch client for the render service

use crate::error::{FetchError, Result};
use bytes::Bytes;
use futures::Stream;
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::StatusCode;
use reqwest::{Certificate, Client};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for a whole upstream request, body included
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// TLS settings fixed at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsPolicy {
    /// Skip certificate verification
    pub insecure: bool,
    /// PEM file with extra trusted CA certificates
    pub ca_file: Option<PathBuf>,
}

/// Response from the render service with its body still unread
pub struct UpstreamResponse {
    status: StatusCode,
    content_type: Option<String>,
    response: reqwest::Response,
}

impl UpstreamResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Consume the response as a single-pass byte stream
    pub fn into_stream(self) -> impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static {
        self.response.bytes_stream()
    }
}

/// UpstreamClient issues GET requests to the render service
///
/// Built once at startup; the TLS trust configuration lives inside the
/// underlying `reqwest::Client`. No retries are attempted.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    /// Create a client with the default 30 second timeout
    ///
    /// # Returns
    /// * `Err(FetchError::ConfigError)` if the CA file cannot be read or the
    ///   client cannot be built
    pub fn new(tls: &TlsPolicy) -> Result<Self> {
        Self::with_timeout(tls, UPSTREAM_TIMEOUT)
    }

    /// Create a client with a custom timeout
    pub fn with_timeout(tls: &TlsPolicy, timeout: Duration) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(tls.insecure);

        if let Some(ca_file) = &tls.ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                FetchError::ConfigError(format!(
                    "could not load CA file {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;

            match Certificate::from_pem_bundle(&pem) {
                Ok(certs) if !certs.is_empty() => {
                    info!("Adding {} CA certificate(s) from {}", certs.len(), ca_file.display());
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                }
                Ok(_) => warn!(cafile = %ca_file.display(), "problem adding CA file to certificate pool"),
                Err(e) => warn!(
                    cafile = %ca_file.display(),
                    error = %e,
                    "problem adding CA file to certificate pool"
                ),
            }
        }

        if tls.insecure {
            warn!("TLS certificate verification is disabled for upstream requests");
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(UpstreamClient { client })
    }

    /// Fetch `url`, attaching `Authorization: Bearer <token>` when a
    /// non-empty token is given
    ///
    /// # Returns
    /// * `Ok(UpstreamResponse)` for any HTTP status
    /// * `Err(FetchError::UpstreamRequestBuild)` if the request cannot be built
    /// * `Err(FetchError::UpstreamFetch)` on DNS, connect or timeout failures
    pub async fn fetch(&self, url: &Url, token: Option<&str>) -> Result<UpstreamResponse> {
        let mut request = self.client.get(url.as_str());
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = request
            .build()
            .map_err(|e| FetchError::UpstreamRequestBuild(e.to_string()))?;

        debug!("Sending GET to url={}", url);

        let response = self.client.execute(request).await.map_err(|e| {
            if e.is_timeout() {
                FetchError::UpstreamFetch(format!("timed out: {}", e))
            } else {
                FetchError::UpstreamFetch(e.to_string())
            }
        })?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string());

        debug!(
            "Received response for url={}: status={}, content_type={:?}",
            url, status, content_type
        );

        Ok(UpstreamResponse {
            status,
            content_type,
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_creation() {
        assert!(UpstreamClient::new(&TlsPolicy::default()).is_ok());
    }

    #[test]
    fn test_insecure_client_creation() {
        let tls = TlsPolicy {
            insecure: true,
            ca_file: None,
        };
        assert!(UpstreamClient::with_timeout(&tls, Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_missing_ca_file_is_fatal() {
        let tls = TlsPolicy {
            insecure: false,
            ca_file: Some(PathBuf::from("/nonexistent/ca.pem")),
        };
        assert!(matches!(
            UpstreamClient::new(&tls),
            Err(FetchError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unparsable_ca_file_only_warns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate").unwrap();
        let tls = TlsPolicy {
            insecure: false,
            ca_file: Some(file.path().to_path_buf()),
        };
        assert!(UpstreamClient::new(&tls).is_ok());
    }

    #[tokio::test]
    async fn test_connection_refused_is_fetch_error() {
        let client = UpstreamClient::with_timeout(&TlsPolicy::default(), Duration::from_secs(2)).unwrap();
        let url = Url::parse("http://127.0.0.1:1/render").unwrap();
        let result = client.fetch(&url, None).await;
        assert!(matches!(result, Err(FetchError::UpstreamFetch(_))));
    }
}
