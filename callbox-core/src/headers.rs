//! Case-preserving header map.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const SEPARATOR: &str = ": ";

/// Header names mapped to values.
///
/// Names keep the case they were inserted with; lookups are exact. This is
/// the shape both request headers and parsed response headers take.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a raw header block (`Name: value` per line).
    ///
    /// Lines are split on the first `": "`; later separators stay in the
    /// value. Blank lines are ignored and a line without a separator maps to
    /// an empty value.
    ///
    /// ```
    /// use callbox_core::Headers;
    ///
    /// let headers = Headers::parse("Content-Type: text/plain\r\nX-Trace: a: b\r\n");
    /// assert_eq!(headers.get("Content-Type"), Some("text/plain"));
    /// assert_eq!(headers.get("X-Trace"), Some("a: b"));
    /// ```
    pub fn parse(block: &str) -> Self {
        block
            .trim()
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty())
            .map(|line| match line.split_once(SEPARATOR) {
                Some((name, value)) => (name.to_owned(), value.to_owned()),
                None => (line.to_owned(), String::new()),
            })
            .collect()
    }

    /// Inserts a header, replacing any value stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    /// Returns the value stored under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Removes a header.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    /// Overlays `other` on top of `self`; values from `other` win.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// Iterates over `(name, value)` pairs ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no header is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}
