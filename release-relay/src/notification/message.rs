use serde::{Deserialize, Serialize};

use crate::domain::{Event, EventKind, TrackedResource};

/// Channel-agnostic notification content. Sinks own rendering and truncation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    pub link: Option<String>,
}

impl NotificationMessage {
    pub fn for_event(resource: &TrackedResource, event: &Event) -> Self {
        let key = resource.key();

        match (event.kind, event.release()) {
            (EventKind::Release, Some(release)) => {
                let label = if release.prerelease {
                    "pre-release"
                } else {
                    "release"
                };
                let heading = release
                    .name
                    .as_deref()
                    .filter(|n| !n.trim().is_empty() && *n != release.tag_name);
                let title = match heading {
                    Some(name) => format!("{key} {label} {} ({name})", release.tag_name),
                    None => format!("{key} {label} {}", release.tag_name),
                };

                Self {
                    title,
                    body: release.body.unwrap_or_default(),
                    link: release.html_url,
                }
            }
            _ => {
                let tag = event.tag_name().unwrap_or("unknown");
                Self {
                    title: format!("{key} {} {tag}", event.kind),
                    body: String::new(),
                    link: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn resource() -> TrackedResource {
        TrackedResource {
            id: 1,
            owner: "acme".to_string(),
            name: "widget".to_string(),
            consecutive_errors: 0,
            last_polled_at: None,
        }
    }

    fn event(kind: EventKind, payload: serde_json::Value) -> Event {
        Event {
            id: 7,
            resource_id: 1,
            kind,
            external_id: 4,
            payload,
            occurred_at: Utc::now(),
            inserted_at: Utc::now(),
        }
    }

    #[test]
    fn test_release_message() {
        let message = NotificationMessage::for_event(
            &resource(),
            &event(
                EventKind::Release,
                json!({
                    "tag_name": "v4",
                    "name": "Spring",
                    "body": "Changelog",
                    "html_url": "https://github.com/acme/widget/releases/v4"
                }),
            ),
        );

        assert_eq!(message.title, "acme/widget release v4 (Spring)");
        assert_eq!(message.body, "Changelog");
        assert_eq!(
            message.link.as_deref(),
            Some("https://github.com/acme/widget/releases/v4")
        );
    }

    #[test]
    fn test_prerelease_and_fallback_titles() {
        let pre = NotificationMessage::for_event(
            &resource(),
            &event(
                EventKind::Release,
                json!({"tag_name": "v2.0.0-rc1", "name": "v2.0.0-rc1", "prerelease": true}),
            ),
        );
        assert_eq!(pre.title, "acme/widget pre-release v2.0.0-rc1");
        assert!(pre.link.is_none());

        let tag = NotificationMessage::for_event(
            &resource(),
            &event(EventKind::Tag, json!({"tag_name": "v1"})),
        );
        assert_eq!(tag.title, "acme/widget tag v1");
    }
}
