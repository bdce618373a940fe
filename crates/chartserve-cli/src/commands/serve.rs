//! Serve command - run the HTTP server

use console::style;
use chartserve_server::ServerConfig;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::Result;

pub async fn run(config: Option<&Path>, listen: Option<SocketAddr>) -> Result<()> {
    let mut config = ServerConfig::load_or_default(config)?;
    if let Some(listen) = listen {
        config.listen = listen;
    }

    println!(
        "{} {} {}",
        style("chartserve").cyan().bold(),
        style("─").dim(),
        style(format!("http://{}", config.listen)).green()
    );
    println!(
        "{} {} configured source(s), press Ctrl-C to stop",
        style("Sources:").dim(),
        config.sources.len()
    );

    chartserve_server::run(config).await?;
    Ok(())
}
