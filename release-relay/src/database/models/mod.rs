//! Database row models.
//!
//! Rows hold raw column values; conversions into domain types validate the
//! stored JSON and enum columns at this boundary.

pub mod cursor;
pub mod event;
pub mod notification;
pub mod resource;
pub mod subscription;

pub use cursor::PollCursorDbModel;
pub use event::EventDbModel;
pub use notification::NotificationDbModel;
pub use resource::TrackedResourceDbModel;
pub use subscription::SubscriptionDbModel;

use crate::domain::EventKind;
use crate::{Error, Result};

pub(crate) fn parse_kind(raw: &str) -> Result<EventKind> {
    EventKind::parse(raw).ok_or_else(|| Error::Database(format!("Unknown event kind: {}", raw)))
}
