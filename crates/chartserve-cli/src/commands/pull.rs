//! Pull command - download a chart archive from a repository

use console::style;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Pull a chart from a repository
pub async fn run(
    config: Option<&Path>,
    url: &str,
    name: &str,
    version: Option<&str>,
    output: Option<&Path>,
    untar: bool,
) -> Result<()> {
    let (_, service) = super::service(config).await?;

    println!(
        "Pulling {} from {}...",
        style(format!("{}:{}", name, version.unwrap_or("latest"))).cyan(),
        style(url).dim()
    );

    let (version, data) = service.fetch_archive(url, name, version.unwrap_or_default()).await?;
    let output_path = output_path(name, &version, output, untar);

    if untar {
        extract_archive(&data, &output_path)?;
        println!("{} Extracted to {}/", style("✓").green(), output_path.display());
    } else {
        std::fs::write(&output_path, &data)?;
        println!("{} Saved to {}", style("✓").green(), output_path.display());
    }

    Ok(())
}

fn output_path(name: &str, version: &str, output: Option<&Path>, untar: bool) -> PathBuf {
    match output {
        Some(output) => output.to_path_buf(),
        None if untar => PathBuf::from(name),
        None => PathBuf::from(format!("{}-{}.tgz", name, version)),
    }
}

fn extract_archive(data: &[u8], dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(std::io::Cursor::new(data));
    let mut archive = Archive::new(gz);

    std::fs::create_dir_all(dest)?;
    archive.unpack(dest)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chartserve_core::chart::pack_archive;

    #[test]
    fn test_output_path() {
        assert_eq!(output_path("nginx", "1.0.0", None, false), PathBuf::from("nginx-1.0.0.tgz"));
        assert_eq!(output_path("nginx", "1.0.0", None, true), PathBuf::from("nginx"));
        assert_eq!(
            output_path("nginx", "1.0.0", Some(Path::new("out.tgz")), false),
            PathBuf::from("out.tgz")
        );
    }

    #[test]
    fn test_extract_archive() {
        let data = pack_archive("nginx", [("values.yaml", b"replicas: 1\n".as_slice())]).unwrap();
        let dir = tempfile::tempdir().unwrap();

        extract_archive(&data, dir.path()).unwrap();
        let values = std::fs::read_to_string(dir.path().join("nginx").join("values.yaml")).unwrap();
        assert_eq!(values, "replicas: 1\n");
    }
}
