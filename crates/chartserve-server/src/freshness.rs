//! HTTP freshness evaluation
//!
//! A small evaluator for auditing served responses: decides whether a cache
//! may store a response and until when it stays fresh. It covers the
//! directives chartserve itself emits plus `Expires` and the heuristic
//! fallback; it is not a complete cache-control implementation.

use axum::http::{HeaderMap, HeaderValue, header};
use headers::{CacheControl, HeaderMapExt};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fmt;
use std::time::Duration;

/// Heuristic lifetimes beyond this get a 113 warning
const HEURISTIC_WARNING_THRESHOLD: Duration = Duration::from_secs(24 * 60 * 60);

/// Statuses a cache may store without explicit freshness information
const CACHEABLE_BY_DEFAULT: &[u16] = &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// The subset of `Cache-Control` directives the evaluator understands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub no_store: bool,
    pub no_cache: bool,
    pub private: bool,
    pub public: bool,
    pub must_revalidate: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
}

impl CacheDirectives {
    /// Directives of every `Cache-Control` header in `headers`
    ///
    /// A header that does not decode counts as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .typed_get::<CacheControl>()
            .map(|cc| Self::from(&cc))
            .unwrap_or_default()
    }

    /// Parse a single `Cache-Control` header value
    pub fn parse(value: &str) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        Self::from_headers(&headers)
    }
}

impl From<&CacheControl> for CacheDirectives {
    fn from(cc: &CacheControl) -> Self {
        Self {
            no_store: cc.no_store(),
            no_cache: cc.no_cache(),
            private: cc.private(),
            public: cc.public(),
            must_revalidate: cc.must_revalidate(),
            max_age: cc.max_age(),
            s_maxage: cc.s_max_age(),
        }
    }
}

/// Everything the evaluator looks at
#[derive(Debug, Clone)]
pub struct FreshnessInput {
    pub method: String,
    pub request: CacheDirectives,
    pub response: CacheDirectives,
    pub status: u16,
    pub expires: Option<DateTime<Utc>>,
    pub date: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

impl FreshnessInput {
    /// Build from the headers of one exchange
    pub fn from_headers(
        method: &str,
        request_headers: &HeaderMap,
        status: u16,
        response_headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Self {
        let text = |headers: &HeaderMap, name: header::HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let date = |name: header::HeaderName| text(response_headers, name).and_then(|v| parse_http_date(&v));

        Self {
            method: method.to_ascii_uppercase(),
            request: CacheDirectives::from_headers(request_headers),
            response: CacheDirectives::from_headers(response_headers),
            status,
            expires: date(header::EXPIRES),
            date: date(header::DATE),
            last_modified: date(header::LAST_MODIFIED),
            now,
        }
    }
}

/// Parse an HTTP date in any of its three forms: IMF-fixdate, RFC 850 or asctime
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    httpdate::parse_http_date(value.trim())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Why a response may not be stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCacheableReason {
    RequestMethod,
    RequestNoStore,
    ResponseNoStore,
    ResponsePrivate,
    ResponseStatus,
}

impl fmt::Display for NotCacheableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotCacheableReason::RequestMethod => "request method is not GET or HEAD",
            NotCacheableReason::RequestNoStore => "request carries no-store",
            NotCacheableReason::ResponseNoStore => "response carries no-store",
            NotCacheableReason::ResponsePrivate => "response is private and the cache is shared",
            NotCacheableReason::ResponseStatus => {
                "status is not cacheable by default and has no explicit freshness"
            }
        };
        f.write_str(text)
    }
}

/// Warning a cache would attach when serving the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessWarning {
    HeuristicExpiration,
}

impl FreshnessWarning {
    pub fn code(&self) -> u16 {
        match self {
            FreshnessWarning::HeuristicExpiration => 113,
        }
    }
}

impl fmt::Display for FreshnessWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreshnessWarning::HeuristicExpiration => write!(f, "{} - \"Heuristic Expiration\"", self.code()),
        }
    }
}

/// Outcome of an evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessResult {
    pub cacheable: bool,
    pub reasons: Vec<NotCacheableReason>,
    pub warnings: Vec<FreshnessWarning>,

    /// When the stored response stops being fresh; `None` when nothing
    /// determines a lifetime
    pub expiration: Option<DateTime<Utc>>,
}

/// Decides cacheability and expiration of one response
pub trait FreshnessEvaluator: Send + Sync {
    fn evaluate(&self, input: &FreshnessInput) -> FreshnessResult;
}

/// Evaluator for a private (browser) or shared (proxy) cache
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEvaluator {
    shared: bool,
}

impl DefaultEvaluator {
    pub fn private() -> Self {
        Self { shared: false }
    }

    pub fn shared() -> Self {
        Self { shared: true }
    }

    fn has_explicit_freshness(&self, input: &FreshnessInput) -> bool {
        input.response.max_age.is_some()
            || (self.shared && input.response.s_maxage.is_some())
            || input.response.public
            || input.expires.is_some()
    }

    fn reasons(&self, input: &FreshnessInput) -> Vec<NotCacheableReason> {
        let mut reasons = Vec::new();
        if !matches!(input.method.as_str(), "GET" | "HEAD") {
            reasons.push(NotCacheableReason::RequestMethod);
        }
        if input.request.no_store {
            reasons.push(NotCacheableReason::RequestNoStore);
        }
        if input.response.no_store {
            reasons.push(NotCacheableReason::ResponseNoStore);
        }
        if self.shared && input.response.private {
            reasons.push(NotCacheableReason::ResponsePrivate);
        }
        if !CACHEABLE_BY_DEFAULT.contains(&input.status) && !self.has_explicit_freshness(input) {
            reasons.push(NotCacheableReason::ResponseStatus);
        }
        reasons
    }

    fn expiration(&self, input: &FreshnessInput, warnings: &mut Vec<FreshnessWarning>) -> Option<DateTime<Utc>> {
        let after = |lifetime: Duration| {
            ChronoDuration::from_std(lifetime)
                .ok()
                .and_then(|d| input.now.checked_add_signed(d))
        };

        if input.response.no_cache {
            return Some(input.now);
        }
        if self.shared
            && let Some(s_maxage) = input.response.s_maxage
        {
            return after(s_maxage);
        }
        if let Some(max_age) = input.response.max_age {
            return after(max_age);
        }
        if let Some(expires) = input.expires {
            // Expires is relative to the origin's clock
            let lifetime = match input.date {
                Some(date) => expires - date,
                None => expires - input.now,
            };
            return Some(input.now + lifetime.max(ChronoDuration::zero()));
        }
        if let Some(last_modified) = input.last_modified {
            let age = (input.date.unwrap_or(input.now) - last_modified).to_std().ok()?;
            let lifetime = age / 10;
            if lifetime > HEURISTIC_WARNING_THRESHOLD {
                warnings.push(FreshnessWarning::HeuristicExpiration);
            }
            return after(lifetime);
        }
        None
    }
}

impl FreshnessEvaluator for DefaultEvaluator {
    fn evaluate(&self, input: &FreshnessInput) -> FreshnessResult {
        let reasons = self.reasons(input);
        let mut warnings = Vec::new();
        let expiration = if reasons.is_empty() {
            self.expiration(input, &mut warnings)
        } else {
            None
        };

        FreshnessResult {
            cacheable: reasons.is_empty(),
            reasons,
            warnings,
            expiration,
        }
    }
}
