//! Conditional serving of chart files
//!
//! Every served file carries a strong `ETag` (SHA-256 of the bytes actually
//! sent) and a `Cache-Control` lifetime that depends on whether the request
//! named an exact version. A matching `If-None-Match` yields 304.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chartserve_core::format::{self, DataFormat};
use chartserve_core::{CachedChart, version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::{Result, ServerError};

/// Ten years, the lifetime of anything addressed by an exact version
pub const PINNED_MAX_AGE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// One day, the lifetime of anything addressed by a range or "latest"
pub const FLOATING_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Freshness lifetimes handed out in `Cache-Control`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    #[serde(default = "default_pinned", with = "humantime_serde")]
    pub pinned: Duration,

    #[serde(default = "default_floating", with = "humantime_serde")]
    pub floating: Duration,
}

fn default_pinned() -> Duration {
    PINNED_MAX_AGE
}

fn default_floating() -> Duration {
    FLOATING_MAX_AGE
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            pinned: PINNED_MAX_AGE,
            floating: FLOATING_MAX_AGE,
        }
    }
}

impl FreshnessPolicy {
    /// Lifetime for a response to a request made with `constraint`
    pub fn max_age(&self, constraint: &str) -> Duration {
        if version::is_pinned(constraint) {
            self.pinned
        } else {
            self.floating
        }
    }
}

/// Hex SHA-256 of the served bytes
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn cache_control(max_age: Duration) -> String {
    format!("private, must-revalidate, max-age={}", max_age.as_secs())
}

/// Whether an `If-None-Match` header value matches `fingerprint`
///
/// Accepts `*`, comma separated lists, weak validators and bare
/// (unquoted) tags.
pub fn etag_matches(if_none_match: &str, fingerprint: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|tag| {
        if tag == "*" {
            return true;
        }
        let tag = tag.strip_prefix("W/").unwrap_or(tag);
        let tag = tag
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(tag);
        tag == fingerprint
    })
}

/// A file ready to be sent, with its validators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedFile {
    pub data: Vec<u8>,
    pub content_type: &'static str,
    pub fingerprint: String,
    pub max_age: Duration,
}

impl ServedFile {
    /// Look up `path` in `chart`, converting it to `format`
    pub fn from_chart(
        chart: &CachedChart,
        path: &str,
        format: DataFormat,
        max_age: Duration,
    ) -> Result<Self> {
        let path = path.trim_start_matches('/');
        let data = chart.file(path).ok_or_else(|| {
            ServerError::NotFound(format!("file {} not found in chart {}", path, chart.key))
        })?;

        let converted = format::convert(path, data, format)?;
        Ok(Self {
            fingerprint: fingerprint(&converted.data),
            data: converted.data,
            content_type: converted.content_type,
            max_age,
        })
    }

    fn etag(&self) -> String {
        format!("\"{}\"", self.fingerprint)
    }

    /// 304 when the request already holds this representation, else 200
    pub fn respond(self, request_headers: &HeaderMap) -> Response {
        let not_modified = request_headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| etag_matches(v, &self.fingerprint));

        let mut headers = HeaderMap::new();
        insert(&mut headers, header::ETAG, &self.etag());
        insert(&mut headers, header::CACHE_CONTROL, &cache_control(self.max_age));

        if not_modified {
            return (StatusCode::NOT_MODIFIED, headers).into_response();
        }

        insert(&mut headers, header::CONTENT_TYPE, self.content_type);
        (StatusCode::OK, headers, Body::from(self.data)).into_response()
    }
}

fn insert(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(e) => tracing::warn!(header = %name, error = %e, "dropping invalid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chartserve_core::CacheKey;
    use chartserve_core::chart::pack_archive;

    fn chart() -> CachedChart {
        let archive = pack_archive(
            "nginx",
            [
                ("Chart.yaml", b"apiVersion: v2\nname: nginx\nversion: 1.0.0\n".as_slice()),
                ("values.yaml", b"replicas: 1\n".as_slice()),
                ("README.md", b"# nginx\n".as_slice()),
            ],
        )
        .unwrap();
        CachedChart::from_archive(CacheKey::new("https://charts.example.com/", "nginx", "1.0.0"), &archive)
            .unwrap()
    }

    #[test]
    fn test_max_age_depends_on_pinning() {
        let policy = FreshnessPolicy::default();
        assert_eq!(policy.max_age("1.2.3").as_secs(), 315_360_000);
        assert_eq!(policy.max_age("v1.2.3").as_secs(), 315_360_000);
        assert_eq!(policy.max_age("^1.2").as_secs(), 86_400);
        assert_eq!(policy.max_age("1.2").as_secs(), 86_400);
        assert_eq!(policy.max_age("").as_secs(), 86_400);
    }

    #[test]
    fn test_cache_control() {
        assert_eq!(
            cache_control(FLOATING_MAX_AGE),
            "private, must-revalidate, max-age=86400"
        );
    }

    #[test]
    fn test_etag_matches() {
        let fp = fingerprint(b"hello");
        assert!(etag_matches(&format!("\"{}\"", fp), &fp));
        assert!(etag_matches(&fp, &fp));
        assert!(etag_matches(&format!("W/\"{}\"", fp), &fp));
        assert!(etag_matches(&format!("\"other\", \"{}\"", fp), &fp));
        assert!(etag_matches("*", &fp));
        assert!(!etag_matches("\"other\"", &fp));
        assert!(!etag_matches("", &fp));
    }

    #[tokio::test]
    async fn test_respond_full_then_not_modified() {
        let file = ServedFile::from_chart(&chart(), "values.yaml", DataFormat::Keep, PINNED_MAX_AGE).unwrap();
        let etag = format!("\"{}\"", fingerprint(b"replicas: 1\n"));

        let response = file.clone().respond(&HeaderMap::new());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ETAG], etag.as_str());
        assert_eq!(
            response.headers()[header::CACHE_CONTROL],
            "private, must-revalidate, max-age=315360000"
        );
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/yaml");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"replicas: 1\n");

        let mut request = HeaderMap::new();
        request.insert(header::IF_NONE_MATCH, HeaderValue::from_str(&etag).unwrap());
        let response = file.respond(&request);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], etag.as_str());
        assert!(response.headers().get(header::CACHE_CONTROL).is_some());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_converted_file_is_fingerprinted_after_conversion() {
        let chart = chart();
        let raw = ServedFile::from_chart(&chart, "values.yaml", DataFormat::Keep, FLOATING_MAX_AGE).unwrap();
        let json = ServedFile::from_chart(&chart, "/values.yaml", DataFormat::Json, FLOATING_MAX_AGE).unwrap();

        assert_eq!(json.data, br#"{"replicas":1}"#);
        assert_eq!(json.content_type, "application/json");
        assert_eq!(json.fingerprint, fingerprint(&json.data));
        assert_ne!(raw.fingerprint, json.fingerprint);
    }

    #[test]
    fn test_missing_and_unconvertible_files() {
        let chart = chart();
        let err = ServedFile::from_chart(&chart, "missing.yaml", DataFormat::Keep, FLOATING_MAX_AGE).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ServedFile::from_chart(&chart, "README.md", DataFormat::Json, FLOATING_MAX_AGE).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
