//! The per-run timestamp.
//!
//! A [`RunStamp`] is rendered once from the process start time and then
//! shared by the feature branch name, the commit message and the pull request
//! title, so all three name the same update.

use std::fmt::{self, Write as _};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, TimeZone, Utc};

use crate::errors::ConfigError;

/// Characters git refuses (or that break shell-free ref handling) in a
/// branch name component.
const FORBIDDEN_IN_REF: &[char] = &[' ', '\t', ':', '~', '^', '?', '*', '[', '\\'];

/// A timestamp string rendered exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp(String);

impl RunStamp {
    /// Render `started_at` (UTC) with the strftime `pattern`.
    pub fn render(started_at: DateTime<Utc>, pattern: &str) -> Result<Self, ConfigError> {
        validate_format(pattern)?;
        let mut out = String::new();
        write!(out, "{}", started_at.format(pattern)).map_err(|_| invalid(pattern))?;
        Ok(Self(out))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check that `pattern` is a valid strftime string whose output can be used
/// inside a branch name.
pub fn validate_format(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() || StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(invalid(pattern));
    }

    let sample = Utc
        .with_ymd_and_hms(2001, 2, 3, 4, 5, 6)
        .single()
        .ok_or_else(|| invalid(pattern))?;
    let mut rendered = String::new();
    write!(rendered, "{}", sample.format(pattern)).map_err(|_| invalid(pattern))?;

    if !usable_in_ref(&rendered) {
        return Err(ConfigError::InvalidValue {
            field: "timestamp_format".into(),
            detail: format!("'{pattern}' renders to '{rendered}', which is not usable in a branch name"),
        });
    }
    Ok(())
}

/// The stamp ends the branch name, so git's rules for the end of a ref apply.
fn usable_in_ref(rendered: &str) -> bool {
    !(rendered.contains(FORBIDDEN_IN_REF)
        || rendered.chars().any(char::is_control)
        || rendered.contains("..")
        || rendered.contains('/')
        || rendered.contains("@{")
        || rendered.ends_with('.')
        || rendered.ends_with(".lock"))
}

fn invalid(pattern: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: "timestamp_format".into(),
        detail: format!("'{pattern}' is not a valid strftime pattern"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, h, m, s).single().unwrap()
    }

    #[test]
    fn test_render_default_format() {
        let stamp = RunStamp::render(at(7, 8, 9), "%Y%m%d%H%M%S").unwrap();
        assert_eq!(stamp.as_str(), "20240309070809");
        assert_eq!(stamp.to_string(), "20240309070809");
    }

    #[test]
    fn test_render_dashed_format() {
        let stamp = RunStamp::render(at(23, 0, 0), "%Y-%m-%d-%H%M").unwrap();
        assert_eq!(stamp.as_str(), "2024-03-09-2300");
    }

    #[test]
    fn test_invalid_specifier_rejected() {
        assert!(matches!(
            validate_format("%Y%Q"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(validate_format("").is_err());
    }

    #[test]
    fn test_branch_unsafe_output_rejected() {
        assert!(validate_format("%H:%M").is_err());
        assert!(validate_format("%Y %m").is_err());
        assert!(validate_format("%Y/%m").is_err());
        assert!(validate_format("%Y%m%d").is_ok());
    }

    #[test]
    fn test_ref_ending_rules() {
        assert!(validate_format("%Y.").is_err());
        assert!(validate_format("%Y.lock").is_err());
        assert!(validate_format("%Y@{%m").is_err());
        assert!(validate_format("%Y%t%m").is_err());
        assert!(validate_format("%Y.%m").is_ok());
        assert!(validate_format("%Y.locked").is_ok());
    }
}
