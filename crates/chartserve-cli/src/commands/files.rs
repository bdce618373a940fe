//! Files command - list or print the files of a chart

use chartserve_core::{CachedChart, DataFormat};
use chartserve_server::ServedFile;
use console::style;
use std::io::Write;
use std::path::Path;

use crate::error::Result;

pub async fn run(
    config: Option<&Path>,
    url: &str,
    name: &str,
    path: Option<&str>,
    version: Option<&str>,
    format: &str,
    show_headers: bool,
) -> Result<()> {
    let format = DataFormat::parse(format)?;
    let (config, service) = super::service(config).await?;
    let constraint = version.unwrap_or_default();
    let resolved = service.get_chart(url, name, constraint).await?;

    let Some(path) = path else {
        print!("{}", listing(&resolved.chart));
        return Ok(());
    };

    let file = ServedFile::from_chart(&resolved.chart, path, format, config.freshness.max_age(constraint))?;
    if show_headers {
        eprintln!("{} \"{}\"", style("ETag:").dim(), file.fingerprint);
        eprintln!(
            "{} {}",
            style("Cache-Control:").dim(),
            chartserve_server::serve::cache_control(file.max_age)
        );
        eprintln!("{} {}", style("Content-Type:").dim(), file.content_type);
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&file.data)?;
    stdout.flush()?;
    Ok(())
}

/// Header line plus one `size  name` line per file
fn listing(chart: &CachedChart) -> String {
    let mut out = format!(
        "{} {}\n",
        style(format!("{}:{}", chart.key.name, chart.key.version)).cyan().bold(),
        style(format!("({} files)", chart.len())).dim()
    );
    for (name, data) in &chart.files {
        out.push_str(&format!("{:>8}  {}\n", data.len(), name));
    }
    out
}
