//! Guards for values interpolated into generated shell commands

use crate::error::{CoreError, Result};

/// Reject values containing a line break
pub fn ensure_single_line(key: &str, value: &str) -> Result<()> {
    if value.contains(['\n', '\r']) {
        return Err(CoreError::Validation {
            key: key.to_string(),
            message: "value contains a line break".to_string(),
        });
    }
    Ok(())
}

/// Render `--set key=value` continuation lines for an install command
///
/// Every pair is validated before anything is rendered, so a bad value
/// never yields partial output.
pub fn render_set_flags(values: &[(String, String)], indent: &str) -> Result<String> {
    for (key, value) in values {
        ensure_single_line(key, key)?;
        ensure_single_line(key, value)?;
    }

    let lines: Vec<String> = values
        .iter()
        .map(|(key, value)| format!("{}--set {}={}", indent, key, value))
        .collect();

    let mut out = lines.join(" \\\n");
    if !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}
