//! Subscription filter domain module.

mod evaluator;
mod types;

pub use evaluator::{FilterDecision, FilterEngine, FilterEvalError};
pub use types::{DEFAULT_PATTERN_FIELD, FilterType, SubscriptionFilter};
