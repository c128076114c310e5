use grafana_fetch::config::{ConfigOverrides, ConfigSource, GatewayConfig};
use grafana_fetch::FetchError;
use std::path::Path;

#[test]
fn test_load_demo_config() {
    let config = GatewayConfig::from_file("demos/grafana-fetch.yaml");
    assert!(config.is_ok(), "Failed to load demo config: {:?}", config.err());

    let config = config.unwrap();
    assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:8080".parse().unwrap());
    assert_eq!(config.base_url().unwrap().as_str(), "http://grafana:3000/");
    assert_eq!(config.cache_dir(), Some(Path::new("/var/cache/grafana-fetch")));
    assert_eq!(config.ttl, Some(300));
    assert_eq!(config.metrics_addr().unwrap(), Some("127.0.0.1:9090".parse().unwrap()));
    assert_eq!(config.dashboards.len(), 3);

    let operations = config.resolve_dashboard("operations").unwrap();
    assert_eq!(operations.ttl_seconds, 60);
    assert_eq!(operations.theme, "dark");

    let sales = config.resolve_dashboard("sales").unwrap();
    assert_eq!(sales.ttl_seconds, 300);
    assert_eq!(sales.org_id, 2);
    assert_eq!(sales.theme, "light");
}

#[test]
fn test_load_minimal_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("minimal.yaml");
    std::fs::write(&path, "url: https://grafana.internal\n").unwrap();

    let config = GatewayConfig::from_file(&path).unwrap();
    assert_eq!(config.url, "https://grafana.internal");
    // Check defaults are applied
    assert_eq!(config.listen, ":8080");
    assert!(config.cache_dir().is_none());
    assert!(!config.insecure);
    assert!(config.dashboards.is_empty());
}

#[test]
fn test_load_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("invalid.yaml");
    std::fs::write(&path, "listen: \"not an address\"\n").unwrap();

    let config = GatewayConfig::from_file(&path);
    assert!(
        matches!(config, Err(FetchError::ConfigError(_))),
        "Should fail validation for a bad listen address"
    );
}

#[test]
fn test_load_malformed_yaml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.yaml");
    std::fs::write(&path, "dashboards: [unclosed\n").unwrap();

    assert!(GatewayConfig::from_file(&path).is_err());
}

#[test]
fn test_load_nonexistent_file() {
    let config = GatewayConfig::from_file("nonexistent.yaml");
    assert!(config.is_err(), "Should fail when file doesn't exist");
}

#[test]
fn test_overrides_apply_before_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "url: \"::not a url\"\n").unwrap();

    let source = ConfigSource::Explicit(path);
    assert!(GatewayConfig::load(&source, &ConfigOverrides::default()).is_err());

    let overrides = ConfigOverrides {
        url: Some("http://grafana.override:3000".to_string()),
        cache: Some(dir.path().join("cache")),
        ..Default::default()
    };
    let config = GatewayConfig::load(&source, &overrides).unwrap();
    assert_eq!(config.url, "http://grafana.override:3000");
    assert_eq!(config.cache_dir(), Some(dir.path().join("cache").as_path()));
}
