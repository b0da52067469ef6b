//! Tag label aggregate and its domain events.

use std::any::Any;

use chrono::{DateTime, Utc};
use ecm_events::{DomainEvent, EventBuffer, HasDomainEvents};
use serde::Serialize;
use uuid::Uuid;

pub const TAG_LABEL_AGGREGATE: &str = "tag-label";

pub const TAG_LABEL_CREATED: &str = "tag-label.created";
pub const TAG_LABEL_UPDATED: &str = "tag-label.updated";
pub const TAG_LABEL_DELETED: &str = "tag-label.deleted";

/// A label documents can be tagged with.
pub struct TagLabel {
    id: Uuid,
    name: String,
    color: Option<String>,
    is_active: bool,
    events: EventBuffer,
}

impl TagLabel {
    pub fn create(name: impl Into<String>, color: Option<String>, created_by: &str) -> Self {
        let name = name.into();
        let mut label = Self {
            id: Uuid::new_v4(),
            name: name.clone(),
            color: color.clone(),
            is_active: true,
            events: EventBuffer::new(),
        };

        label.events.raise(Box::new(TagLabelCreated {
            tag_id: label.id,
            name,
            color,
            created_by: created_by.to_string(),
            occurred_at: Utc::now(),
        }));

        label
    }

    pub fn rename(&mut self, name: impl Into<String>, updated_by: &str) {
        self.name = name.into();
        self.events.raise(Box::new(TagLabelUpdated {
            tag_id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
            is_active: self.is_active,
            updated_by: updated_by.to_string(),
            occurred_at: Utc::now(),
        }));
    }

    pub fn deactivate(&mut self, deleted_by: &str) {
        if !self.is_active {
            return;
        }
        self.is_active = false;
        self.events.raise(Box::new(TagLabelDeleted {
            tag_id: self.id,
            deleted_by: deleted_by.to_string(),
            occurred_at: Utc::now(),
        }));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

impl HasDomainEvents for TagLabel {
    fn domain_events(&self) -> &[Box<dyn DomainEvent>] {
        self.events.events()
    }

    fn clear_domain_events(&mut self) {
        self.events.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLabelCreated {
    pub tag_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub created_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLabelUpdated {
    pub tag_id: Uuid,
    pub name: String,
    pub color: Option<String>,
    pub is_active: bool,
    pub updated_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLabelDeleted {
    pub tag_id: Uuid,
    pub deleted_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

macro_rules! impl_tag_event {
    ($event:ty, $tag:expr) => {
        impl DomainEvent for $event {
            fn event_type(&self) -> &'static str {
                $tag
            }

            fn aggregate_id(&self) -> Uuid {
                self.tag_id
            }

            fn occurred_at(&self) -> DateTime<Utc> {
                self.occurred_at
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

impl_tag_event!(TagLabelCreated, TAG_LABEL_CREATED);
impl_tag_event!(TagLabelUpdated, TAG_LABEL_UPDATED);
impl_tag_event!(TagLabelDeleted, TAG_LABEL_DELETED);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_raises_created_event() {
        let label = TagLabel::create("ops", Some("#ff0000".to_string()), "user-1");

        let events = label.domain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), TAG_LABEL_CREATED);
        assert_eq!(events[0].aggregate_id(), label.id());
    }

    #[test]
    fn test_operations_append_in_order() {
        let mut label = TagLabel::create("ops", None, "user-1");
        label.rename("operations", "user-2");
        label.deactivate("user-2");

        let types: Vec<&str> = label
            .domain_events()
            .iter()
            .map(|event| event.event_type())
            .collect();
        assert_eq!(
            types,
            vec![TAG_LABEL_CREATED, TAG_LABEL_UPDATED, TAG_LABEL_DELETED]
        );
    }

    #[test]
    fn test_deactivate_is_idempotent_in_memory() {
        let mut label = TagLabel::create("ops", None, "user-1");
        label.deactivate("user-1");
        label.deactivate("user-1");

        assert_eq!(label.domain_events().len(), 2);
    }

    #[test]
    fn test_clear_drops_pending_events() {
        let mut label = TagLabel::create("ops", None, "user-1");
        label.clear_domain_events();
        assert!(label.domain_events().is_empty());
    }
}
