//! Writer and reader configuration
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! writer:
//!   ascii: true
//!   byte_order: big_endian
//!   inline_values_limit: 20
//! reader:
//!   flatten_joins: false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::types::ByteOrder;
use crate::types::time::MAX_FRACTION_DIGITS;
use crate::{QStreamError, Result};

/// How [`format_join`](crate::writer::StreamFormatter::format_join) lays out
/// the slices of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    /// Re-declare the same name once per slice
    #[default]
    Redeclare,
    /// Write each slice under its own name, then a `<join children=".."/>` plane
    Children,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterConfig {
    /// Write text fields (`asciiN`, `timeN`) instead of binary doubles
    pub ascii: bool,
    pub byte_order: ByteOrder,
    /// Largest coordinate written inline in its descriptor
    pub inline_values_limit: usize,
    /// Significant digits of scientific ASCII fields
    pub ascii_significant_digits: usize,
    /// Upper bound on fraction digits the precision heuristic will choose
    pub max_fraction_digits: usize,
    /// Fraction digits of `timeN` fields in ASCII mode
    pub time_fraction_digits: u8,
    /// Reuse a live, structurally identical packet descriptor
    pub reuse_descriptors: bool,
    pub join_mode: JoinMode,
}

impl Default for FormatterConfig {
    fn default() -> Self {
        Self {
            ascii: false,
            byte_order: ByteOrder::LittleEndian,
            inline_values_limit: 10,
            ascii_significant_digits: 7,
            max_fraction_digits: 9,
            time_fraction_digits: 3,
            reuse_descriptors: true,
            join_mode: JoinMode::Redeclare,
        }
    }
}

impl FormatterConfig {
    /// ASCII output with the default precision settings.
    pub fn ascii() -> Self {
        Self { ascii: true, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=17).contains(&self.ascii_significant_digits) {
            return Err(config_error(format!(
                "writer.ascii_significant_digits must be within 1..=17, got {}",
                self.ascii_significant_digits
            )));
        }
        if self.max_fraction_digits > 17 {
            return Err(config_error(format!(
                "writer.max_fraction_digits must be at most 17, got {}",
                self.max_fraction_digits
            )));
        }
        if self.time_fraction_digits > MAX_FRACTION_DIGITS {
            return Err(config_error(format!(
                "writer.time_fraction_digits must be at most {}, got {}",
                MAX_FRACTION_DIGITS, self.time_fraction_digits
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Concatenate joins whose slices share trailing shape and coordinates
    pub flatten_joins: bool,
    /// Bytes requested from the source per read
    pub read_buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { flatten_joins: true, read_buffer_size: 64 * 1024 }
    }
}

impl ReaderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(config_error("reader.read_buffer_size must be positive"));
        }
        Ok(())
    }
}

/// Complete configuration for one writer and one reader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QStreamConfig {
    pub writer: FormatterConfig,
    pub reader: ReaderConfig,
}

impl QStreamConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self =
            if yaml.trim().is_empty() { Self::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.validate()?;
        debug!(?config, "loaded configuration");
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QStreamError::io(format!("reading configuration {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.reader.validate()
    }
}

fn config_error(details: impl Into<String>) -> QStreamError {
    QStreamError::Config { details: details.into(), source: None }
}
