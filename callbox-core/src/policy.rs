//! Routing decision taken for every call at hand-off.

/// Whether a call goes through the cache store or straight to the transport.
///
/// Both variants keep their payload, so the caller can act on either branch
/// without re-fetching anything.
///
/// ```
/// use callbox_core::{CachePolicy, Method, Strategies, Strategy};
///
/// fn route<'a>(
///     rules: &'a Strategies,
///     method: Method,
///     url: &str,
/// ) -> CachePolicy<&'a Strategy, ()> {
///     CachePolicy::for_call(rules, method, url)
/// }
///
/// let rules = Strategies::from(Strategy::new("/users", None, true));
/// assert!(route(&rules, Method::Get, "/users").is_cacheable());
/// assert!(!route(&rules, Method::Post, "/users").is_cacheable());
/// assert!(!route(&rules, Method::Get, "/teams").is_cacheable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy<C, N> {
    /// The call is served through the cache entry governed by `C`.
    Cacheable(C),
    /// The call bypasses caching.
    NonCacheable(N),
}

impl<C, N> CachePolicy<C, N> {
    /// Returns `true` for [`CachePolicy::Cacheable`].
    pub fn is_cacheable(&self) -> bool {
        matches!(self, CachePolicy::Cacheable(_))
    }
}

impl<'a> CachePolicy<&'a crate::Strategy, ()> {
    /// Picks the rule governing a call, if the method is cacheable and a rule
    /// matches the resolved URL.
    pub fn for_call(rules: &'a crate::Strategies, method: crate::Method, url: &str) -> Self {
        if !method.is_cacheable() || rules.is_empty() {
            return CachePolicy::NonCacheable(());
        }
        match rules.find_match(url) {
            Some(rule) => CachePolicy::Cacheable(rule),
            None => CachePolicy::NonCacheable(()),
        }
    }
}
