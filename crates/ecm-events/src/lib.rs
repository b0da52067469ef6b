//! Domain event capture
//!
//! Business aggregates record what happened as immutable in-memory events.
//! Raising an event has no side effect; the events only become durable when
//! the outbox writer maps them into outbox rows at commit time and clears
//! the buffer.

pub mod registry;

use std::any::Any;

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use registry::{downcast_event, MapperFn, MappingError, OutboxMapperRegistry};

/// A fact about something that happened inside an aggregate.
///
/// Events are named in past tense and carry a complete, self-contained
/// snapshot of the facts downstream consumers need. They have no identity
/// and no persistence of their own.
pub trait DomainEvent: Send + Sync {
    /// Stable type tag used to look up the outbox mapper, e.g.
    /// `tag-label.created`.
    fn event_type(&self) -> &'static str;

    /// Id of the aggregate the event is about. Used as the broker ordering
    /// key downstream.
    fn aggregate_id(&self) -> Uuid;

    /// When the event occurred. Set once at raise time.
    fn occurred_at(&self) -> DateTime<Utc>;

    /// Concrete-type access for the mapper functions.
    fn as_any(&self) -> &dyn Any;
}

/// Ordered buffer of events raised since the last flush.
#[derive(Default)]
pub struct EventBuffer {
    events: Vec<Box<dyn DomainEvent>>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event. Pure in-memory bookkeeping.
    pub fn raise(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Box<dyn DomainEvent>] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("len", &self.events.len())
            .finish()
    }
}

/// Implemented by aggregates that raise domain events.
///
/// The outbox writer reads the pending events through this trait and clears
/// them once they have been staged into the outbox, so an event is never
/// flushed twice.
pub trait HasDomainEvents {
    fn domain_events(&self) -> &[Box<dyn DomainEvent>];
    fn clear_domain_events(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ThingHappened {
        id: Uuid,
        at: DateTime<Utc>,
    }

    impl DomainEvent for ThingHappened {
        fn event_type(&self) -> &'static str {
            "thing.happened"
        }

        fn aggregate_id(&self) -> Uuid {
            self.id
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_buffer_preserves_order() {
        let mut buffer = EventBuffer::new();
        let id = Uuid::new_v4();
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);

        buffer.raise(Box::new(ThingHappened { id, at: first }));
        buffer.raise(Box::new(ThingHappened { id, at: second }));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.events()[0].occurred_at(), first);
        assert_eq!(buffer.events()[1].occurred_at(), second);
    }

    #[test]
    fn test_clear_empties_buffer() {
        let mut buffer = EventBuffer::new();
        buffer.raise(Box::new(ThingHappened {
            id: Uuid::new_v4(),
            at: Utc::now(),
        }));

        buffer.clear();
        assert!(buffer.is_empty());
    }
}
