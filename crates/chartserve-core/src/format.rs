//! Serving-time format conversion of chart files

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CoreError, Result};

/// Requested output format of a served file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// Serve the file as stored
    #[default]
    Keep,
    Json,
    Yaml,
}

impl DataFormat {
    /// Parse the `format` query parameter (empty means keep)
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "keep" => Ok(DataFormat::Keep),
            "json" => Ok(DataFormat::Json),
            "yaml" | "yml" => Ok(DataFormat::Yaml),
            other => Err(CoreError::Validation {
                key: "format".to_string(),
                message: format!("unknown format '{}', expected json or yaml", other),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Keep => "keep",
            DataFormat::Json => "json",
            DataFormat::Yaml => "yaml",
        }
    }

    /// Format implied by a file extension
    pub fn of_file(file_name: &str) -> Option<Self> {
        match extension(file_name).as_deref() {
            Some("json") => Some(DataFormat::Json),
            Some("yaml" | "yml") => Some(DataFormat::Yaml),
            _ => None,
        }
    }
}

/// Converted file bytes and their content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converted {
    pub data: Vec<u8>,
    pub content_type: &'static str,
}

/// Content type for a file name
pub fn content_type(file_name: &str) -> &'static str {
    match extension(file_name).as_deref() {
        Some("json") => "application/json",
        Some("yaml" | "yml") => "text/yaml",
        Some("md") => "text/markdown",
        Some("txt" | "tpl") => "text/plain",
        _ => "application/octet-stream",
    }
}

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// Convert a chart file to the requested format
///
/// `Keep`, or a target equal to the file's own format, returns the bytes
/// untouched. Only JSON and YAML files can be converted.
pub fn convert(file_name: &str, data: &[u8], format: DataFormat) -> Result<Converted> {
    let source = DataFormat::of_file(file_name);

    if format == DataFormat::Keep || Some(format) == source {
        return Ok(Converted {
            data: data.to_vec(),
            content_type: content_type(file_name),
        });
    }

    let conversion_error = |message: String| CoreError::Conversion {
        file: file_name.to_string(),
        format: format.as_str().to_string(),
        message,
    };

    let value: serde_json::Value = match source {
        Some(DataFormat::Yaml) => {
            serde_yaml::from_slice(data).map_err(|e| conversion_error(e.to_string()))?
        }
        Some(DataFormat::Json) => {
            serde_json::from_slice(data).map_err(|e| conversion_error(e.to_string()))?
        }
        _ => return Err(conversion_error("file is neither JSON nor YAML".to_string())),
    };

    match format {
        DataFormat::Json => Ok(Converted {
            data: serde_json::to_vec(&value)?,
            content_type: "application/json",
        }),
        DataFormat::Yaml => Ok(Converted {
            data: serde_yaml::to_string(&value)?.into_bytes(),
            content_type: "text/yaml",
        }),
        DataFormat::Keep => unreachable!("keep handled above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(DataFormat::parse("").unwrap(), DataFormat::Keep);
        assert_eq!(DataFormat::parse("JSON").unwrap(), DataFormat::Json);
        assert_eq!(DataFormat::parse(" yml ").unwrap(), DataFormat::Yaml);
        assert!(DataFormat::parse("toml").is_err());
    }

    #[test]
    fn test_keep_returns_bytes_untouched() {
        let out = convert("values.yaml", b"a:   1\n", DataFormat::Keep).unwrap();
        assert_eq!(out.data, b"a:   1\n");
        assert_eq!(out.content_type, "text/yaml");

        let out = convert("README.md", b"# hi", DataFormat::Keep).unwrap();
        assert_eq!(out.content_type, "text/markdown");
    }

    #[test]
    fn test_same_format_is_not_reencoded() {
        let out = convert("values.schema.json", b"{ \"a\": 1 }", DataFormat::Json).unwrap();
        assert_eq!(out.data, b"{ \"a\": 1 }");
    }

    #[test]
    fn test_yaml_to_json() {
        let out = convert("values.yaml", b"replicas: 2\nimage:\n  tag: latest\n", DataFormat::Json).unwrap();
        assert_eq!(out.content_type, "application/json");
        let value: serde_json::Value = serde_json::from_slice(&out.data).unwrap();
        assert_eq!(value["replicas"], 2);
        assert_eq!(value["image"]["tag"], "latest");
    }

    #[test]
    fn test_json_to_yaml() {
        let out = convert("values.json", br#"{"replicas": 2}"#, DataFormat::Yaml).unwrap();
        assert_eq!(out.content_type, "text/yaml");
        assert_eq!(String::from_utf8(out.data).unwrap().trim(), "replicas: 2");
    }

    #[test]
    fn test_unstructured_file_cannot_be_converted() {
        let err = convert("templates/_helpers.tpl", b"{{ define }}", DataFormat::Json).unwrap_err();
        assert!(matches!(err, CoreError::Conversion { .. }));

        let err = convert("values.yaml", b"a: [", DataFormat::Json).unwrap_err();
        assert!(matches!(err, CoreError::Conversion { .. }));
    }
}
