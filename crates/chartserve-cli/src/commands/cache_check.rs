//! Cache-check command - audit how caches would treat a response

use chartserve_server::freshness::{DefaultEvaluator, FreshnessEvaluator, FreshnessInput, FreshnessResult};
use chrono::{DateTime, Utc};
use console::style;
use reqwest::header::HeaderMap;

use crate::error::Result;

pub async fn run(url: &str, shared: bool) -> Result<()> {
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response.bytes().await?;
    tracing::debug!(url = %url, status, bytes = body.len(), "fetched response");

    let now = Utc::now();
    let input = FreshnessInput::from_headers("GET", &HeaderMap::new(), status, &headers, now);
    let evaluator = if shared {
        DefaultEvaluator::shared()
    } else {
        DefaultEvaluator::private()
    };
    let result = evaluator.evaluate(&input);

    println!(
        "{} {} {}",
        style(url).cyan(),
        style(format!("({})", status)).dim(),
        style(if shared { "shared cache" } else { "private cache" }).dim()
    );
    print!("{}", report(&result, now));
    Ok(())
}

fn report(result: &FreshnessResult, now: DateTime<Utc>) -> String {
    let mut out = String::new();

    let cacheable = if result.cacheable {
        style("yes").green()
    } else {
        style("no").red()
    };
    out.push_str(&format!("{} {}\n", style("Cacheable:").bold(), cacheable));

    out.push_str(&format!("{}\n", style("Reasons to not cache:").bold()));
    for reason in &result.reasons {
        out.push_str(&format!("  - {}\n", reason));
    }

    out.push_str(&format!("{}\n", style("Warning headers to add:").bold()));
    for warning in &result.warnings {
        out.push_str(&format!("  - {}\n", warning));
    }

    let expiration = match result.expiration {
        Some(at) => {
            let lifetime = (at - now).num_seconds().max(0);
            format!("{} (in {}s)", at.to_rfc2822(), lifetime)
        }
        None => "none".to_string(),
    };
    out.push_str(&format!("{} {}\n", style("Expiration:").bold(), expiration));
    out
}
