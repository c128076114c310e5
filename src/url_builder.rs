//! Upstream render URL construction
//!
//! The encoded query string feeds the cache key, so parameters are always
//! serialized in sorted key order regardless of how the inbound query was
//! written.

use crate::models::{RenderRequest, ResolvedDashboard};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::BTreeMap;
use url::form_urlencoded;
use url::Url;

/// Query parameters keyed by name, each holding its values in arrival order
pub type QueryParams = BTreeMap<String, Vec<String>>;

/// Bytes left as-is in query keys and values: letters, digits and `-_.~`
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the upstream render URL for a panel request
///
/// Starts from `base`, replaces its query with the inbound raw query and
/// then sets `orgId`, `theme`, `panelId`, `from`, `to`, `width` and
/// `height`, overriding any inbound values for those keys. The path becomes
/// `<base path>/render/<path template>`.
pub fn build_render_url(base: &Url, dashboard: &ResolvedDashboard, request: &RenderRequest) -> Url {
    let mut params = parse_query(&request.raw_query);

    let fixed = [
        ("orgId", dashboard.org_id.to_string()),
        ("theme", dashboard.theme.clone()),
        ("panelId", request.panel_id.clone()),
        ("from", request.from.clone()),
        ("to", request.to.clone()),
        ("width", request.options.width().to_string()),
        ("height", request.options.height().to_string()),
    ];
    for (key, value) in fixed {
        params.insert(key.to_string(), vec![value]);
    }

    let mut url = base.clone();
    url.set_path(&render_path(base.path(), &dashboard.path_template));
    url.set_query(Some(&encode_sorted(&params)));
    url.set_fragment(None);
    url
}

/// Parse a raw `application/x-www-form-urlencoded` query
pub fn parse_query(raw: &str) -> QueryParams {
    let mut params = QueryParams::new();
    for (key, value) in form_urlencoded::parse(raw.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    params
}

/// Encode parameters with keys in lexicographic order
///
/// Spaces become `+` and every byte outside [`QUERY_COMPONENT`] is
/// percent-encoded, so `~` stays literal and `*` becomes `%2A`.
pub fn encode_sorted(params: &QueryParams) -> String {
    let mut pairs = Vec::new();
    for (key, values) in params {
        for value in values {
            pairs.push(format!("{}={}", escape_component(key), escape_component(value)));
        }
    }
    pairs.join("&")
}

fn escape_component(raw: &str) -> String {
    raw.split(' ')
        .map(|part| utf8_percent_encode(part, QUERY_COMPONENT).to_string())
        .collect::<Vec<_>>()
        .join("+")
}

/// Join base path, `render` and the template, cleaning `.`/`..` and empty segments
fn render_path(base_path: &str, template: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    let parts = base_path
        .split('/')
        .chain(std::iter::once("render"))
        .chain(template.split('/'));

    for segment in parts {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}
