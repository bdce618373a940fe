//! CLI commands

pub mod cache_check;
pub mod files;
pub mod pull;
pub mod serve;

use chartserve_repo::ChartService;
use chartserve_server::ServerConfig;
use std::path::Path;

use crate::error::Result;

/// Chart service configured from the `--config` file (or the default one)
pub async fn service(config: Option<&Path>) -> Result<(ServerConfig, ChartService)> {
    let config = ServerConfig::load_or_default(config)?;
    let service = config.build_service().await?;
    Ok((config, service))
}
