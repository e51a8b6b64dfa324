//! Resolution of `base + path + query` into the URL that is sent and used as
//! the cache key.

use serde_json::{Map, Value};

const SLASH: char = '/';

/// Returns `true` for `scheme://host` and protocol-relative `//host` URLs.
pub fn is_absolute(url: &str) -> bool {
    if url.starts_with("//") {
        return true;
    }
    match url.split_once("://") {
        Some((scheme, _)) => !scheme.is_empty() && scheme.bytes().all(|b| b.is_ascii_lowercase()),
        None => false,
    }
}

/// Resolves `relative` against `base` and appends `params` as a query string.
///
/// Absolute `relative` URLs ignore `base`. Parameters keep their insertion
/// order and are not percent-encoded; string values are written raw, other
/// JSON values as JSON text. Trailing slashes are removed from the result.
///
/// ```
/// use callbox_core::format_url;
/// use serde_json::{Map, json};
///
/// let mut params = Map::new();
/// params.insert("page".into(), json!(2));
/// params.insert("q".into(), json!("rust"));
///
/// assert_eq!(format_url("https://api.test/v1/", "/items", Some(&params)),
///            "https://api.test/v1/items?page=2&q=rust");
/// assert_eq!(format_url("/", "users/", None), "/users");
/// ```
pub fn format_url(base: &str, relative: &str, params: Option<&Map<String, Value>>) -> String {
    let url = if is_absolute(relative) {
        relative.to_owned()
    } else if relative.is_empty() {
        let trimmed = base.trim_end_matches(SLASH);
        format!("{trimmed}{SLASH}")
    } else {
        format!(
            "{}{SLASH}{}",
            base.trim_end_matches(SLASH),
            relative.trim_start_matches(SLASH)
        )
    };
    with_query(url, params)
}

fn with_query(mut url: String, params: Option<&Map<String, Value>>) -> String {
    if let Some(params) = params.filter(|p| !p.is_empty()) {
        let query = params
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}={s}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join("&");
        url.push('?');
        url.push_str(&query);
    }
    let len = url.trim_end_matches(SLASH).len();
    url.truncate(len);
    url
}
