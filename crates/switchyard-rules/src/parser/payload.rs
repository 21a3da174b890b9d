//! Provider payload formats.
//!
//! - `yaml`: a document with a `payload:` sequence of strings.
//! - `text`: one entry per line; blank lines and `#` comments are skipped.
//! - `binary`: an encoded [`RangeSet`](crate::matcher::RangeSet), read by
//!   the provider directly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RulesError;

/// Encoding of fetched provider content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Yaml,
    Text,
    Binary,
}

impl FromStr for PayloadFormat {
    type Err = RulesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "text" | "txt" | "list" => Ok(Self::Text),
            "binary" | "mrs" => Ok(Self::Binary),
            other => Err(RulesError::Provider(format!(
                "unsupported payload format: {other}"
            ))),
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Yaml => "yaml",
            Self::Text => "text",
            Self::Binary => "binary",
        })
    }
}

/// Split textual provider content into trimmed, non-empty entries.
pub fn read_entries(format: PayloadFormat, content: &[u8]) -> Result<Vec<String>, RulesError> {
    match format {
        PayloadFormat::Yaml => yaml_entries(content),
        PayloadFormat::Text => text_entries(content),
        PayloadFormat::Binary => Err(RulesError::Provider(
            "binary payloads carry no text entries".into(),
        )),
    }
}

fn yaml_entries(content: &[u8]) -> Result<Vec<String>, RulesError> {
    let yaml: serde_yaml::Value = serde_yaml::from_slice(content)?;
    let Some(payload) = yaml.get("payload") else {
        return Err(RulesError::Parse("missing 'payload' sequence in YAML".into()));
    };
    // `payload:` with nothing under it is an empty list.
    if payload.is_null() {
        return Ok(Vec::new());
    }
    let seq = payload
        .as_sequence()
        .ok_or_else(|| RulesError::Parse("'payload' must be a sequence".into()))?;

    let mut entries = Vec::with_capacity(seq.len());
    for item in seq {
        let entry = item
            .as_str()
            .ok_or_else(|| RulesError::Parse(format!("payload entry must be a string: {item:?}")))?
            .trim();
        if !entry.is_empty() {
            entries.push(entry.to_string());
        }
    }
    Ok(entries)
}

fn text_entries(content: &[u8]) -> Result<Vec<String>, RulesError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| RulesError::Parse(format!("payload is not valid UTF-8: {e}")))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
