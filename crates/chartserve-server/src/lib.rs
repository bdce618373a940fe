//! chartserve HTTP serving layer
//!
//! Serves chart files out of the chart cache with conditional-request
//! support. Responses for exact versions are cacheable for ten years,
//! everything else for a day; clients revalidate with `If-None-Match`.
//!
//! The [`freshness`] module is the other side of the coin: it evaluates how
//! long a cache would keep a response, and backs `chartserve cache-check`.

pub mod config;
pub mod error;
pub mod freshness;
pub mod routes;
pub mod serve;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use freshness::{CacheDirectives, DefaultEvaluator, FreshnessEvaluator, FreshnessInput, FreshnessResult};
pub use routes::{AppState, router, run};
pub use serve::{FreshnessPolicy, ServedFile, fingerprint};
