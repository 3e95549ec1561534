//! Subscription filter evaluation.

use regex::Regex;

use super::types::SubscriptionFilter;
use crate::domain::event::Event;

/// Error type for filter evaluation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterEvalError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegexPattern(String),
}

/// Outcome of evaluating a filter against an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    /// The filter accepts the event.
    Deliver,
    /// The filter rejects the event.
    Suppress,
    /// The filter is misconfigured and degrades to delivering.
    DeliverFailOpen { reason: FilterEvalError },
}

impl FilterDecision {
    pub fn should_deliver(&self) -> bool {
        !matches!(self, Self::Suppress)
    }
}

/// Pure evaluator for subscription filters.
///
/// Evaluation has no side effects; callers log fail-open decisions.
pub struct FilterEngine;

impl FilterEngine {
    /// Evaluate `filter` against `event`.
    pub fn evaluate(filter: &SubscriptionFilter, event: &Event) -> FilterDecision {
        match filter {
            SubscriptionFilter::All => FilterDecision::Deliver,
            SubscriptionFilter::Prerelease {
                include_prereleases,
            } => {
                if !include_prereleases && event.is_prerelease() {
                    FilterDecision::Suppress
                } else {
                    FilterDecision::Deliver
                }
            }
            SubscriptionFilter::Pattern { pattern, field } => {
                // Missing or non-string fields match as the empty string.
                let value = event
                    .payload
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();

                match Self::evaluate_pattern(pattern, value) {
                    Ok(true) => FilterDecision::Deliver,
                    Ok(false) => FilterDecision::Suppress,
                    Err(reason) => FilterDecision::DeliverFailOpen { reason },
                }
            }
        }
    }

    /// Anchored match: the pattern must cover the whole value.
    pub fn evaluate_pattern(pattern: &str, value: &str) -> Result<bool, FilterEvalError> {
        let anchored = format!("^(?:{})$", pattern);
        let regex =
            Regex::new(&anchored).map_err(|e| FilterEvalError::InvalidRegexPattern(e.to_string()))?;
        Ok(regex.is_match(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventKind;
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;

    fn release(tag: &str, prerelease: bool) -> Event {
        Event {
            id: 1,
            resource_id: 1,
            kind: EventKind::Release,
            external_id: 1,
            payload: json!({"tag_name": tag, "prerelease": prerelease}),
            occurred_at: Utc::now(),
            inserted_at: Utc::now(),
        }
    }

    #[rstest]
    #[case(SubscriptionFilter::All, "v1.0.0", true, true)]
    #[case(SubscriptionFilter::prereleases(false), "v2.0.0-rc1", true, false)]
    #[case(SubscriptionFilter::prereleases(false), "v2.0.0", false, true)]
    #[case(SubscriptionFilter::prereleases(true), "v2.0.0-rc1", true, true)]
    #[case(SubscriptionFilter::pattern(r"^v\d+\.\d+\.\d+$"), "v2.0.0", false, true)]
    #[case(SubscriptionFilter::pattern(r"^v\d+\.\d+\.\d+$"), "v2.0.0-rc1", true, false)]
    #[case(SubscriptionFilter::pattern(r"v\d+"), "v2.0.0", false, false)]
    #[case(SubscriptionFilter::pattern(r"v\d+.*"), "v2.0.0", false, true)]
    fn test_filter_decisions(
        #[case] filter: SubscriptionFilter,
        #[case] tag: &str,
        #[case] prerelease: bool,
        #[case] expected: bool,
    ) {
        let decision = FilterEngine::evaluate(&filter, &release(tag, prerelease));
        assert_eq!(decision.should_deliver(), expected, "{filter:?} on {tag}");
    }

    #[test]
    fn test_invalid_pattern_fails_open() {
        let filter = SubscriptionFilter::pattern("v(unclosed");
        let decision = FilterEngine::evaluate(&filter, &release("v1.0.0", false));

        assert!(matches!(decision, FilterDecision::DeliverFailOpen { .. }));
        assert!(decision.should_deliver());
    }

    #[test]
    fn test_missing_field_matches_empty_string() {
        let filter = SubscriptionFilter::Pattern {
            pattern: ".*".to_string(),
            field: "nonexistent".to_string(),
        };
        let decision = FilterEngine::evaluate(&filter, &release("v1.0.0", false));
        assert_eq!(decision, FilterDecision::Deliver);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let filter = SubscriptionFilter::pattern(r"v1\..*");
        let event = release("v1.2.3", false);
        let first = FilterEngine::evaluate(&filter, &event);
        assert!((0..10).all(|_| FilterEngine::evaluate(&filter, &event) == first));
    }
}
