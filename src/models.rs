//! Core data models for the gateway

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-dashboard settings as written in the `dashboards` section of the config
///
/// Zero and empty values mean "not set" and fall back to the global setting.
/// Fields decode loosely: numbers may be written as strings and strings as
/// numbers, and an explicit null is the zero value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSpec {
    /// Upstream path below `render/`, e.g. `d-solo/abc123/my-dashboard`
    #[serde(default, rename = "path", deserialize_with = "loose::string")]
    pub path_template: String,

    /// Cache TTL in seconds
    #[serde(default, rename = "ttl", deserialize_with = "loose::int")]
    pub ttl_seconds: i64,

    /// Bearer token sent upstream
    #[serde(default, rename = "token", deserialize_with = "loose::string")]
    pub auth_token: String,

    /// Grafana organisation id
    #[serde(default, rename = "org", deserialize_with = "loose::int")]
    pub org_id: i64,

    #[serde(default, deserialize_with = "loose::string")]
    pub theme: String,
}

/// Scalar decoders for hand-edited dashboard entries
mod loose {
    use serde::de::{Error, Unexpected};
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Int(i64),
        Float(f64),
        Bool(bool),
        Text(String),
    }

    pub fn int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Option::<Scalar>::deserialize(deserializer)? {
            None => Ok(0),
            Some(Scalar::Int(n)) => Ok(n),
            Some(Scalar::Float(f)) => Ok(f as i64),
            Some(Scalar::Bool(b)) => Ok(i64::from(b)),
            Some(Scalar::Text(s)) if s.is_empty() => Ok(0),
            Some(Scalar::Text(s)) => s
                .parse()
                .map_err(|_| D::Error::invalid_value(Unexpected::Str(&s), &"an integer")),
        }
    }

    pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        Ok(match Option::<Scalar>::deserialize(deserializer)? {
            None => String::new(),
            Some(Scalar::Int(n)) => n.to_string(),
            Some(Scalar::Float(f)) => f.to_string(),
            Some(Scalar::Bool(b)) => b.to_string(),
            Some(Scalar::Text(s)) => s,
        })
    }
}

/// A dashboard with global fallbacks already applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDashboard {
    pub name: String,
    pub path_template: String,
    pub ttl_seconds: i64,
    pub auth_token: Option<String>,
    pub org_id: i64,
    pub theme: String,
}

/// Rendering options decoded from the inline option segment
///
/// Always holds `width`, `height` and `theme` once produced by
/// [`crate::options::parse_options`]. Keys iterate in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    values: BTreeMap<String, String>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn width(&self) -> &str {
        self.get("width").unwrap_or_default()
    }

    pub fn height(&self) -> &str {
        self.get("height").unwrap_or_default()
    }

    pub fn theme(&self) -> &str {
        self.get("theme").unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Path parameters of a panel route, percent-decoded
///
/// Matches `/{dashboard}/{panel}/{from}/{to}/` and
/// `/{dashboard}/{panel}/{options}/{from}/{to}/`, with or without the
/// trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelRoute {
    pub dashboard: String,
    pub panel: String,
    pub options: Option<String>,
    pub from: String,
    pub to: String,
}

impl PanelRoute {
    /// Match a request path against the two panel routes
    ///
    /// Returns `None` for any other shape, for empty segments and for
    /// segments that do not decode to UTF-8.
    pub fn parse(path: &str) -> Option<Self> {
        let trimmed = path.strip_prefix('/')?;
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);

        let mut segments = Vec::with_capacity(5);
        for raw in trimmed.split('/') {
            if raw.is_empty() {
                return None;
            }
            let decoded = percent_decode_str(raw).decode_utf8().ok()?;
            segments.push(decoded.into_owned());
        }

        let mut it = segments.into_iter();
        match it.len() {
            4 => Some(PanelRoute {
                dashboard: it.next()?,
                panel: it.next()?,
                options: None,
                from: it.next()?,
                to: it.next()?,
            }),
            5 => Some(PanelRoute {
                dashboard: it.next()?,
                panel: it.next()?,
                options: it.next(),
                from: it.next()?,
                to: it.next()?,
            }),
            _ => None,
        }
    }
}

/// Decoded identity of one inbound panel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    pub dashboard: String,
    pub panel_id: String,
    pub from: String,
    pub to: String,
    pub raw_query: String,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(route: PanelRoute, raw_query: impl Into<String>, options: RenderOptions) -> Self {
        RenderRequest {
            dashboard: route.dashboard,
            panel_id: route.panel,
            from: route.from,
            to: route.to,
            raw_query: raw_query.into(),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_without_options() {
        let route = PanelRoute::parse("/ops/4/now-6h/now/").unwrap();
        assert_eq!(route.dashboard, "ops");
        assert_eq!(route.panel, "4");
        assert_eq!(route.options, None);
        assert_eq!(route.from, "now-6h");
        assert_eq!(route.to, "now");
    }

    #[test]
    fn test_route_with_options_and_no_trailing_slash() {
        let route = PanelRoute::parse("/ops/4/width=200,height=100/now-1h/now").unwrap();
        assert_eq!(route.options.as_deref(), Some("width=200,height=100"));
        assert_eq!(route.to, "now");
    }

    #[test]
    fn test_route_percent_decoding() {
        let route = PanelRoute::parse("/my%20dash/4/width=200%2Cheight=100/now-1h/now/").unwrap();
        assert_eq!(route.dashboard, "my dash");
        assert_eq!(route.options.as_deref(), Some("width=200,height=100"));
    }

    #[test]
    fn test_route_rejects_other_shapes() {
        assert!(PanelRoute::parse("/").is_none());
        assert!(PanelRoute::parse("/ops/4/now").is_none());
        assert!(PanelRoute::parse("/a/b/c/d/e/f/").is_none());
        assert!(PanelRoute::parse("/ops//now-1h/now/").is_none());
        assert!(PanelRoute::parse("ops/4/now-1h/now/").is_none());
        assert!(PanelRoute::parse("/ops/4/%FF/now/").is_none());
    }

    #[test]
    fn test_dashboard_spec_yaml_keys() {
        let spec: DashboardSpec = serde_yaml::from_str(
            "path: d-solo/abc/ops\nttl: 60\ntoken: secret\norg: 2\ntheme: dark\n",
        )
        .unwrap();
        assert_eq!(spec.path_template, "d-solo/abc/ops");
        assert_eq!(spec.ttl_seconds, 60);
        assert_eq!(spec.auth_token, "secret");
        assert_eq!(spec.org_id, 2);
        assert_eq!(spec.theme, "dark");
    }

    #[test]
    fn test_dashboard_spec_loose_scalars() {
        let spec: DashboardSpec = serde_yaml::from_str(
            "path: d-solo/abc/ops\nttl: \"90\"\ntoken: 12345\norg: \"7\"\ntheme: ~\n",
        )
        .unwrap();
        assert_eq!(spec.ttl_seconds, 90);
        assert_eq!(spec.org_id, 7);
        assert_eq!(spec.auth_token, "12345");
        assert_eq!(spec.theme, "");

        let spec: DashboardSpec = serde_yaml::from_str("ttl: \"\"\n").unwrap();
        assert_eq!(spec.ttl_seconds, 0);

        let err = serde_yaml::from_str::<DashboardSpec>("ttl: soon\n").unwrap_err();
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn test_render_options_sorted_iteration() {
        let mut options = RenderOptions::new();
        options.insert("width", "10");
        options.insert("height", "5");
        options.insert("theme", "dark");
        let keys: Vec<_> = options.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["height", "theme", "width"]);
    }
}
