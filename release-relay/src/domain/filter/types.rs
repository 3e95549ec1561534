//! Filter types.

use serde::{Deserialize, Serialize};

/// Payload field matched by pattern filters when none is configured.
pub const DEFAULT_PATTERN_FIELD: &str = "tag_name";

fn default_pattern_field() -> String {
    DEFAULT_PATTERN_FIELD.to_string()
}

/// Filter type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    All,
    Prerelease,
    Pattern,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Prerelease => "prerelease",
            Self::Pattern => "pattern",
        }
    }
}

/// A subscription's filter, stored as tagged JSON.
///
/// Validated into this shape when read from storage; the pipeline never
/// handles the raw JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionFilter {
    /// Deliver every event.
    #[default]
    All,
    /// Suppress events flagged as pre-release unless `include_prereleases` is set.
    Prerelease { include_prereleases: bool },
    /// Deliver only when `pattern` matches the whole of the payload's `field`.
    #[serde(alias = "tag_pattern")]
    Pattern {
        pattern: String,
        #[serde(default = "default_pattern_field")]
        field: String,
    },
}

impl SubscriptionFilter {
    /// Pattern filter against the default payload field.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern {
            pattern: pattern.into(),
            field: default_pattern_field(),
        }
    }

    /// Pre-release suppression filter.
    pub fn prereleases(include_prereleases: bool) -> Self {
        Self::Prerelease {
            include_prereleases,
        }
    }

    pub fn filter_type(&self) -> FilterType {
        match self {
            Self::All => FilterType::All,
            Self::Prerelease { .. } => FilterType::Prerelease,
            Self::Pattern { .. } => FilterType::Pattern,
        }
    }

    /// Parse a stored filter column. Malformed JSON is reported to the caller,
    /// which decides how to degrade.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_serialization() {
        let filter = SubscriptionFilter::prereleases(false);
        let json = serde_json::to_string(&filter).unwrap();
        assert_eq!(json, r#"{"type":"prerelease","include_prereleases":false}"#);
    }

    #[test]
    fn test_pattern_field_defaults_to_tag_name() {
        let filter = SubscriptionFilter::from_json(r#"{"type":"pattern","pattern":"^v1"}"#).unwrap();
        assert_eq!(filter, SubscriptionFilter::pattern("^v1"));
        assert_eq!(filter.filter_type(), FilterType::Pattern);
    }

    #[test]
    fn test_unknown_filter_type_rejected() {
        assert!(SubscriptionFilter::from_json(r#"{"type":"cron"}"#).is_err());
        assert!(SubscriptionFilter::from_json("not json").is_err());
    }
}
