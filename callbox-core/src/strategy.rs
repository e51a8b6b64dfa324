//! Cache rules and URL matching.
//!
//! A [`Strategy`] pairs a [`UrlMatcher`] with a freshness window ([`Ttl`]) and
//! an auto-retry flag. [`Strategies`] is the ordered rule set installed on a
//! client; [`Strategies::find_match`] returns the first rule that accepts a
//! resolved URL. URLs no rule accepts bypass caching entirely.
//!
//! ## Configuration
//!
//! Rules deserialize from configuration files. A matcher is either a plain
//! string (`"*"` matches everything, anything else matches exactly) or a
//! tagged `exact` / `pattern` value:
//!
//! ```
//! use callbox_core::{Strategies, Ttl};
//! use std::time::Duration;
//!
//! let yaml = r#"
//! - url: "/users"
//!   ttl: 30s
//! - url: { pattern: "^/static/" }
//!   auto_retry: false
//! - url: "*"
//!   ttl: 500ms
//! "#;
//!
//! let rules: Strategies = serde_saphyr::from_str(yaml).unwrap();
//! let rule = rules.find_match("/static/app.js").unwrap();
//! assert_eq!(rule.ttl, Ttl::Forever);
//! assert!(!rule.auto_retry);
//! assert_eq!(rules.find_match("/users").unwrap().ttl, Ttl::Window(Duration::from_secs(30)));
//! ```

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

const ANY: &str = "*";

/// Decides whether a rule applies to a resolved URL.
#[derive(Debug, Clone)]
pub enum UrlMatcher {
    /// Matches one URL, compared case-sensitively.
    Exact(String),
    /// Matches every URL.
    Any,
    /// Matches URLs the regular expression finds a match in.
    Pattern(Regex),
}

impl UrlMatcher {
    /// Builds a [`UrlMatcher::Pattern`] from a regular expression.
    pub fn pattern(expr: &str) -> Result<Self, regex::Error> {
        Regex::new(expr).map(UrlMatcher::Pattern)
    }

    /// Tests `url` against this matcher.
    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlMatcher::Exact(exact) => exact == url,
            UrlMatcher::Any => true,
            UrlMatcher::Pattern(regex) => regex.is_match(url),
        }
    }

    /// An empty exact matcher names no URL and is treated as invalid.
    pub fn is_valid(&self) -> bool {
        !matches!(self, UrlMatcher::Exact(exact) if exact.is_empty())
    }
}

impl PartialEq for UrlMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (UrlMatcher::Exact(a), UrlMatcher::Exact(b)) => a == b,
            (UrlMatcher::Any, UrlMatcher::Any) => true,
            (UrlMatcher::Pattern(a), UrlMatcher::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl Eq for UrlMatcher {}

impl fmt::Display for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrlMatcher::Exact(exact) => f.write_str(exact),
            UrlMatcher::Any => f.write_str(ANY),
            UrlMatcher::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

impl From<&str> for UrlMatcher {
    fn from(value: &str) -> Self {
        if value == ANY {
            UrlMatcher::Any
        } else {
            UrlMatcher::Exact(value.to_owned())
        }
    }
}

impl From<String> for UrlMatcher {
    fn from(value: String) -> Self {
        if value == ANY {
            UrlMatcher::Any
        } else {
            UrlMatcher::Exact(value)
        }
    }
}

impl From<Regex> for UrlMatcher {
    fn from(regex: Regex) -> Self {
        UrlMatcher::Pattern(regex)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatcherRepr {
    Plain(String),
    Tagged(TaggedMatcher),
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum TaggedMatcher {
    Exact(String),
    Pattern(String),
}

impl TryFrom<MatcherRepr> for UrlMatcher {
    type Error = regex::Error;

    fn try_from(repr: MatcherRepr) -> Result<Self, Self::Error> {
        match repr {
            MatcherRepr::Plain(plain) => Ok(plain.into()),
            MatcherRepr::Tagged(TaggedMatcher::Exact(exact)) => Ok(UrlMatcher::Exact(exact)),
            MatcherRepr::Tagged(TaggedMatcher::Pattern(expr)) => UrlMatcher::pattern(&expr),
        }
    }
}

impl<'de> Deserialize<'de> for UrlMatcher {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let repr = MatcherRepr::deserialize(deserializer)?;
        UrlMatcher::try_from(repr).map_err(serde::de::Error::custom)
    }
}

/// How long a cache entry stays fresh after its leader was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// The entry never expires.
    #[default]
    Forever,
    /// The entry expires this long after it was (re)filled.
    Window(Duration),
}

impl From<Option<Duration>> for Ttl {
    fn from(value: Option<Duration>) -> Self {
        match value {
            Some(window) if !window.is_zero() => Ttl::Window(window),
            _ => Ttl::Forever,
        }
    }
}

impl From<Duration> for Ttl {
    fn from(window: Duration) -> Self {
        Ttl::from(Some(window))
    }
}

/// A single cache rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "StrategyRepr")]
pub struct Strategy {
    /// Which URLs the rule applies to.
    pub matcher: UrlMatcher,
    /// Freshness window of entries created under this rule.
    pub ttl: Ttl,
    /// Whether each call that joins an in-flight leader adds one retry to
    /// the leader's budget.
    pub auto_retry: bool,
}

impl Strategy {
    /// Creates a rule. A zero or missing `ttl` means the entry never expires.
    ///
    /// An empty exact matcher is accepted but logged: such a rule is skipped
    /// during matching.
    pub fn new(matcher: impl Into<UrlMatcher>, ttl: impl Into<Ttl>, auto_retry: bool) -> Self {
        let matcher = matcher.into();
        if !matcher.is_valid() {
            warn!("url matcher in store strategy is invalid");
        }
        Self {
            matcher,
            ttl: ttl.into(),
            auto_retry,
        }
    }
}

#[derive(Deserialize)]
struct StrategyRepr {
    url: UrlMatcher,
    #[serde(default, with = "humantime_serde")]
    ttl: Option<Duration>,
    #[serde(default = "auto_retry_default")]
    auto_retry: bool,
}

fn auto_retry_default() -> bool {
    true
}

impl From<StrategyRepr> for Strategy {
    fn from(repr: StrategyRepr) -> Self {
        Strategy::new(repr.url, repr.ttl, repr.auto_retry)
    }
}

/// Ordered set of cache rules. The first matching rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Strategies(Vec<Strategy>);

impl Strategies {
    /// Creates an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first rule accepting `url`.
    ///
    /// Invalid rules are skipped with a warning instead of failing the call.
    pub fn find_match(&self, url: &str) -> Option<&Strategy> {
        self.0.iter().find(|rule| {
            if !rule.matcher.is_valid() {
                warn!(url, "skipping store strategy with an invalid url matcher");
                return false;
            }
            rule.matcher.matches(url)
        })
    }

    /// Appends a rule with the lowest precedence.
    pub fn push(&mut self, rule: Strategy) {
        self.0.push(rule);
    }

    /// Removes every rule whose matcher equals `matcher`.
    pub fn remove(&mut self, matcher: &UrlMatcher) {
        self.0.retain(|rule| &rule.matcher != matcher);
    }

    /// Removes all rules.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no rules, i.e. nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over rules in precedence order.
    pub fn iter(&self) -> impl Iterator<Item = &Strategy> {
        self.0.iter()
    }
}

impl From<Strategy> for Strategies {
    fn from(rule: Strategy) -> Self {
        Self(vec![rule])
    }
}

impl From<Vec<Strategy>> for Strategies {
    fn from(rules: Vec<Strategy>) -> Self {
        Self(rules)
    }
}

impl FromIterator<Strategy> for Strategies {
    fn from_iter<I: IntoIterator<Item = Strategy>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
