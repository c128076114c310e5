//! Inline option parsing
//!
//! The option segment of a panel route looks like `width=800,height=400`.
//! Only strings containing at least one comma are split into pairs; a lone
//! `width=800` carries no separator and yields defaults only. That matches
//! how existing dashboards link to the gateway, so it is kept as-is.

use crate::error::{FetchError, Result};
use crate::models::RenderOptions;

pub const DEFAULT_WIDTH: &str = "1000";
pub const DEFAULT_HEIGHT: &str = "500";
pub const DEFAULT_THEME: &str = "light";

const PAIR_SEPARATOR: char = ',';
const KEY_VALUE_SEPARATOR: char = '=';

/// Decode an option string and fill in defaults
///
/// # Returns
/// * `Ok(RenderOptions)` with `width`, `height` and `theme` always present
/// * `Err(FetchError::InvalidOptions)` if a token is not exactly `key=value`
pub fn parse_options(raw: &str) -> Result<RenderOptions> {
    let mut options = RenderOptions::new();

    if raw.contains(PAIR_SEPARATOR) {
        for token in raw.split(PAIR_SEPARATOR) {
            let parts: Vec<&str> = token.split(KEY_VALUE_SEPARATOR).collect();
            if parts.len() != 2 {
                return Err(FetchError::InvalidOptions(format!(
                    "expected key=value, got '{}'",
                    token
                )));
            }
            options.insert(parts[0], parts[1]);
        }
    }

    apply_defaults(&mut options);
    Ok(options)
}

/// A single given dimension is mirrored onto the missing one
fn apply_defaults(options: &mut RenderOptions) {
    let width = options.get("width").map(str::to_owned);
    let height = options.get("height").map(str::to_owned);

    match (width, height) {
        (None, Some(h)) => options.insert("width", h),
        (Some(w), None) => options.insert("height", w),
        (None, None) => {
            options.insert("width", DEFAULT_WIDTH);
            options.insert("height", DEFAULT_HEIGHT);
        }
        (Some(_), Some(_)) => {}
    }

    if !options.contains("theme") {
        options.insert("theme", DEFAULT_THEME);
    }
}
