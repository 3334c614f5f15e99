//! Single-placeholder patterns used to name drive instances.

use std::fmt::Display;

use crate::{constants::PATTERN_PLACEHOLDER, error::ConfigError};

/// A string with exactly one `{}` substitution point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    prefix: String,
    suffix: String,
}

impl Pattern {
    /// Parses `raw`, rejecting strings with zero or more than one placeholder.
    ///
    /// `field` only names the offending configuration field in the error.
    pub fn parse(field: &str, raw: &str) -> Result<Self, ConfigError> {
        match raw.matches(PATTERN_PLACEHOLDER).count() {
            0 => Err(ConfigError::PatternMissingPlaceholder {
                field: field.to_string(),
                pattern: raw.to_string(),
            }),
            1 => {
                let (prefix, suffix) = raw.split_once(PATTERN_PLACEHOLDER).ok_or_else(|| {
                    ConfigError::PatternMissingPlaceholder {
                        field: field.to_string(),
                        pattern: raw.to_string(),
                    }
                })?;
                Ok(Self {
                    prefix: prefix.to_string(),
                    suffix: suffix.to_string(),
                })
            }
            count => Err(ConfigError::PatternMultiplePlaceholders {
                field: field.to_string(),
                pattern: raw.to_string(),
                count,
            }),
        }
    }

    pub fn render(&self, value: impl Display) -> String {
        format!("{}{}{}", self.prefix, value, self.suffix)
    }

    /// Renders `index` as zero-padded upper-case hex.
    pub fn render_hex(&self, index: u32, width: usize) -> String {
        self.render(format_args!("{index:0width$X}"))
    }
}
