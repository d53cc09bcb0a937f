//! Output rendering
//!
//! Collections and reports are printed as JSON (default) or YAML documents.

use crate::error::{Error, Result};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Render `value` as a document in `format`, newline-terminated
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    let mut text = match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).map_err(|e| Error::Render(e.to_string()))?
        }
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| Error::Render(e.to_string()))?,
    };
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}
