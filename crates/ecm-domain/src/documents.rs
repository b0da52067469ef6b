//! Document aggregate and its domain events.

use std::any::Any;

use chrono::{DateTime, Utc};
use ecm_events::{DomainEvent, EventBuffer, HasDomainEvents};
use serde::Serialize;
use uuid::Uuid;

pub const DOCUMENT_AGGREGATE: &str = "document";

pub const DOCUMENT_CREATED: &str = "document.created";
pub const DOCUMENT_UPDATED: &str = "document.updated";
pub const DOCUMENT_TAG_ASSIGNED: &str = "document.tag-assigned";
pub const DOCUMENT_TAG_REMOVED: &str = "document.tag-removed";

pub struct Document {
    id: Uuid,
    title: String,
    owner_id: Uuid,
    tag_ids: Vec<Uuid>,
    events: EventBuffer,
}

impl Document {
    pub fn create(title: impl Into<String>, owner_id: Uuid, created_by: &str) -> Self {
        let title = title.into();
        let mut document = Self {
            id: Uuid::new_v4(),
            title: title.clone(),
            owner_id,
            tag_ids: Vec::new(),
            events: EventBuffer::new(),
        };

        document.events.raise(Box::new(DocumentCreated {
            document_id: document.id,
            title,
            owner_id,
            created_by: created_by.to_string(),
            occurred_at: Utc::now(),
        }));

        document
    }

    pub fn retitle(&mut self, title: impl Into<String>, updated_by: &str) {
        self.title = title.into();
        self.events.raise(Box::new(DocumentUpdated {
            document_id: self.id,
            title: self.title.clone(),
            updated_by: updated_by.to_string(),
            occurred_at: Utc::now(),
        }));
    }

    pub fn assign_tag(&mut self, tag_id: Uuid, applied_by: &str) {
        if self.tag_ids.contains(&tag_id) {
            return;
        }
        self.tag_ids.push(tag_id);
        self.events.raise(Box::new(DocumentTagAssigned {
            document_id: self.id,
            tag_id,
            applied_by: applied_by.to_string(),
            occurred_at: Utc::now(),
        }));
    }

    pub fn remove_tag(&mut self, tag_id: Uuid) {
        let before = self.tag_ids.len();
        self.tag_ids.retain(|candidate| *candidate != tag_id);
        if self.tag_ids.len() == before {
            return;
        }
        self.events.raise(Box::new(DocumentTagRemoved {
            document_id: self.id,
            tag_id,
            occurred_at: Utc::now(),
        }));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn tag_ids(&self) -> &[Uuid] {
        &self.tag_ids
    }
}

impl HasDomainEvents for Document {
    fn domain_events(&self) -> &[Box<dyn DomainEvent>] {
        self.events.events()
    }

    fn clear_domain_events(&mut self) {
        self.events.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCreated {
    pub document_id: Uuid,
    pub title: String,
    pub owner_id: Uuid,
    pub created_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdated {
    pub document_id: Uuid,
    pub title: String,
    pub updated_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTagAssigned {
    pub document_id: Uuid,
    pub tag_id: Uuid,
    pub applied_by: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentTagRemoved {
    pub document_id: Uuid,
    pub tag_id: Uuid,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

macro_rules! impl_document_event {
    ($event:ty, $tag:expr) => {
        impl DomainEvent for $event {
            fn event_type(&self) -> &'static str {
                $tag
            }

            fn aggregate_id(&self) -> Uuid {
                self.document_id
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

impl_document_event!(DocumentCreated, DOCUMENT_CREATED);
impl_document_event!(DocumentUpdated, DOCUMENT_UPDATED);
impl_document_event!(DocumentTagAssigned, DOCUMENT_TAG_ASSIGNED);
impl_document_event!(DocumentTagRemoved, DOCUMENT_TAG_REMOVED);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_assignment_raises_once() {
        let mut document = Document::create("Q3 report", Uuid::new_v4(), "user-1");
        let tag_id = Uuid::new_v4();

        document.assign_tag(tag_id, "user-1");
        document.assign_tag(tag_id, "user-1");

        let types: Vec<&str> = document
            .domain_events()
            .iter()
            .map(|event| event.event_type())
            .collect();
        assert_eq!(types, vec![DOCUMENT_CREATED, DOCUMENT_TAG_ASSIGNED]);
    }

    #[test]
    fn test_remove_unassigned_tag_raises_nothing() {
        let mut document = Document::create("Q3 report", Uuid::new_v4(), "user-1");
        document.clear_domain_events();

        document.remove_tag(Uuid::new_v4());
        assert!(document.domain_events().is_empty());
    }
}
