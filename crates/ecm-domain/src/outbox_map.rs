//! Outbox mapper registrations for the business modules.
//!
//! One mapping function per event type; each serializes the event's
//! self-contained snapshot as the outbox payload. The registrations are the
//! only thing that changes when a module adds an event type.

use ecm_common::OutboxRecord;
use ecm_events::{downcast_event, DomainEvent, MappingError, OutboxMapperRegistry};

use crate::documents::{
    DocumentCreated, DocumentTagAssigned, DocumentTagRemoved, DocumentUpdated, DOCUMENT_AGGREGATE,
    DOCUMENT_CREATED, DOCUMENT_TAG_ASSIGNED, DOCUMENT_TAG_REMOVED, DOCUMENT_UPDATED,
};
use crate::tags::{
    TagLabelCreated, TagLabelDeleted, TagLabelUpdated, TAG_LABEL_AGGREGATE, TAG_LABEL_CREATED,
    TAG_LABEL_DELETED, TAG_LABEL_UPDATED,
};
use crate::users::{UserCreated, UserUpdated, USER_AGGREGATE, USER_CREATED, USER_UPDATED};

fn record_for<E>(
    event: &dyn DomainEvent,
    expected: &'static str,
    aggregate_type: &str,
) -> Result<OutboxRecord, MappingError>
where
    E: serde::Serialize + 'static,
{
    let concrete: &E = downcast_event(event, expected)?;
    let payload = serde_json::to_value(concrete).map_err(|source| MappingError::Serialization {
        tag: event.event_type(),
        source,
    })?;

    Ok(OutboxRecord {
        aggregate_type: aggregate_type.to_string(),
        aggregate_id: event.aggregate_id(),
        event_type: event.event_type().to_string(),
        payload,
        occurred_at: event.occurred_at(),
    })
}

pub fn register_document_mappers(registry: &mut OutboxMapperRegistry) {
    registry.register(DOCUMENT_CREATED, |event| {
        record_for::<DocumentCreated>(event, "DocumentCreated", DOCUMENT_AGGREGATE)
    });
    registry.register(DOCUMENT_UPDATED, |event| {
        record_for::<DocumentUpdated>(event, "DocumentUpdated", DOCUMENT_AGGREGATE)
    });
    registry.register(DOCUMENT_TAG_ASSIGNED, |event| {
        record_for::<DocumentTagAssigned>(event, "DocumentTagAssigned", DOCUMENT_AGGREGATE)
    });
    registry.register(DOCUMENT_TAG_REMOVED, |event| {
        record_for::<DocumentTagRemoved>(event, "DocumentTagRemoved", DOCUMENT_AGGREGATE)
    });
}

pub fn register_tag_mappers(registry: &mut OutboxMapperRegistry) {
    registry.register(TAG_LABEL_CREATED, |event| {
        record_for::<TagLabelCreated>(event, "TagLabelCreated", TAG_LABEL_AGGREGATE)
    });
    registry.register(TAG_LABEL_UPDATED, |event| {
        record_for::<TagLabelUpdated>(event, "TagLabelUpdated", TAG_LABEL_AGGREGATE)
    });
    registry.register(TAG_LABEL_DELETED, |event| {
        record_for::<TagLabelDeleted>(event, "TagLabelDeleted", TAG_LABEL_AGGREGATE)
    });
}

pub fn register_user_mappers(registry: &mut OutboxMapperRegistry) {
    registry.register(USER_CREATED, |event| {
        record_for::<UserCreated>(event, "UserCreated", USER_AGGREGATE)
    });
    registry.register(USER_UPDATED, |event| {
        record_for::<UserUpdated>(event, "UserUpdated", USER_AGGREGATE)
    });
}

/// Registry with every business module's mappers installed.
pub fn default_registry() -> OutboxMapperRegistry {
    let mut registry = OutboxMapperRegistry::new();
    register_document_mappers(&mut registry);
    register_tag_mappers(&mut registry);
    register_user_mappers(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::TagLabel;
    use ecm_events::HasDomainEvents;

    #[test]
    fn test_tag_created_maps_to_tag_label_row() {
        let registry = default_registry();
        let label = TagLabel::create("ops", None, "user-1");
        let event = &label.domain_events()[0];

        let record = registry.map(event.as_ref()).unwrap().unwrap();
        assert_eq!(record.aggregate_type, "tag-label");
        assert_eq!(record.event_type, TAG_LABEL_CREATED);
        assert_eq!(record.aggregate_id, label.id());
        assert_eq!(record.payload["name"], "ops");
        assert_eq!(record.payload["createdBy"], "user-1");
        assert!(record.payload.get("occurredAtUtc").is_some());
    }

    #[test]
    fn test_every_module_event_type_is_registered() {
        let registry = default_registry();
        for tag in [
            DOCUMENT_CREATED,
            DOCUMENT_UPDATED,
            DOCUMENT_TAG_ASSIGNED,
            DOCUMENT_TAG_REMOVED,
            TAG_LABEL_CREATED,
            TAG_LABEL_UPDATED,
            TAG_LABEL_DELETED,
            USER_CREATED,
            USER_UPDATED,
        ] {
            assert!(registry.contains(tag), "missing mapper for {tag}");
        }
    }
}
