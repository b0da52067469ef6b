//! Event-type → outbox mapper registry
//!
//! Each business module registers one pure mapping function per event type
//! it emits. Adding an event type is a data change (a new registration),
//! not a control-flow change. Event types with no registered mapper are
//! assumed to have no external consumers and are skipped by the writer.

use std::collections::HashMap;

use ecm_common::OutboxRecord;

use crate::DomainEvent;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("Event tagged '{tag}' is not a {expected}")]
    WrongEventType {
        tag: &'static str,
        expected: &'static str,
    },

    #[error("Failed to serialize payload for '{tag}': {source}")]
    Serialization {
        tag: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A pure function turning a raised event into a broker-agnostic outbox
/// record `(aggregate_type, event_type, payload)`.
pub type MapperFn = fn(&dyn DomainEvent) -> Result<OutboxRecord, MappingError>;

/// Downcast helper for mapper functions.
pub fn downcast_event<'a, T: 'static>(
    event: &'a dyn DomainEvent,
    expected: &'static str,
) -> Result<&'a T, MappingError> {
    event
        .as_any()
        .downcast_ref::<T>()
        .ok_or(MappingError::WrongEventType {
            tag: event.event_type(),
            expected,
        })
}

#[derive(Default)]
pub struct OutboxMapperRegistry {
    mappers: HashMap<&'static str, MapperFn>,
}

impl OutboxMapperRegistry {
    pub fn new() -> Self {
        Self {
            mappers: HashMap::new(),
        }
    }

    /// Register a mapper for an event-type tag. Last registration wins.
    pub fn register(&mut self, tag: &'static str, mapper: MapperFn) {
        self.mappers.insert(tag, mapper);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.mappers.contains_key(tag)
    }

    /// Map an event to its outbox record, or `None` if no mapper is
    /// registered for its type tag.
    pub fn map(&self, event: &dyn DomainEvent) -> Option<Result<OutboxRecord, MappingError>> {
        self.mappers
            .get(event.event_type())
            .map(|mapper| mapper(event))
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }
}
