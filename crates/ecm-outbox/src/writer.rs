//! Unit-of-work outbox flush.
//!
//! Immediately before a unit of work commits, the writer maps every pending
//! domain event on the participating aggregates into an `OutboxRecord` and
//! clears the buffers. The caller inserts the records through its backend
//! store inside the same transaction as the business writes.

use ecm_common::OutboxRecord;
use ecm_events::{HasDomainEvents, MappingError, OutboxMapperRegistry};
use tracing::warn;

pub struct OutboxWriter {
    registry: OutboxMapperRegistry,
}

impl OutboxWriter {
    pub fn new(registry: OutboxMapperRegistry) -> Self {
        Self { registry }
    }

    /// Map all pending events to outbox records and clear the aggregates'
    /// buffers.
    ///
    /// Event types with no registered mapper are skipped with a diagnostic;
    /// they are assumed to have no external consumers. A mapper failure is a
    /// defect and fails the whole flush (the surrounding transaction never
    /// commits, so no event is half-recorded). Buffers are cleared only when
    /// every event mapped cleanly, so nothing is dropped on the error path.
    pub fn drain(
        &self,
        aggregates: &mut [&mut dyn HasDomainEvents],
    ) -> Result<Vec<OutboxRecord>, MappingError> {
        let mut records = Vec::new();

        for aggregate in aggregates.iter() {
            for event in aggregate.domain_events() {
                match self.registry.map(event.as_ref()) {
                    Some(mapped) => records.push(mapped?),
                    None => {
                        warn!(
                            event_type = %event.event_type(),
                            aggregate_id = %event.aggregate_id(),
                            "No outbox mapper registered, skipping event"
                        );
                    }
                }
            }
        }

        for aggregate in aggregates.iter_mut() {
            aggregate.clear_domain_events();
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ecm_events::{downcast_event, DomainEvent, EventBuffer};
    use uuid::Uuid;

    struct Ticket {
        id: Uuid,
        events: EventBuffer,
    }

    struct TicketOpened {
        ticket_id: Uuid,
        at: DateTime<Utc>,
    }

    struct TicketClosed {
        ticket_id: Uuid,
        at: DateTime<Utc>,
    }

    impl DomainEvent for TicketOpened {
        fn event_type(&self) -> &'static str {
            "ticket.opened"
        }
        fn aggregate_id(&self) -> Uuid {
            self.ticket_id
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    impl DomainEvent for TicketClosed {
        fn event_type(&self) -> &'static str {
            "ticket.closed"
        }
        fn aggregate_id(&self) -> Uuid {
            self.ticket_id
        }
        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    fn opened_registry() -> OutboxMapperRegistry {
        let mut registry = OutboxMapperRegistry::new();
        registry.register("ticket.opened", |event| {
            let opened: &TicketOpened = downcast_event(event, "TicketOpened")?;
            Ok(OutboxRecord {
                aggregate_type: "ticket".to_string(),
                aggregate_id: opened.ticket_id,
                event_type: "ticket.opened".to_string(),
                payload: serde_json::json!({ "ticketId": opened.ticket_id }),
                occurred_at: opened.at,
            })
        });
        registry
    }

    impl HasDomainEvents for Ticket {
        fn domain_events(&self) -> &[Box<dyn DomainEvent>] {
            self.events.events()
        }
        fn clear_domain_events(&mut self) {
            self.events.clear();
        }
    }

    #[test]
    fn test_drain_maps_and_clears() {
        let writer = OutboxWriter::new(opened_registry());
        let mut ticket = Ticket {
            id: Uuid::new_v4(),
            events: EventBuffer::new(),
        };
        ticket.events.raise(Box::new(TicketOpened {
            ticket_id: ticket.id,
            at: Utc::now(),
        }));

        let records = writer.drain(&mut [&mut ticket]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].aggregate_type, "ticket");
        assert!(ticket.domain_events().is_empty());
    }

    #[test]
    fn test_unmapped_event_is_skipped_not_failed() {
        let writer = OutboxWriter::new(opened_registry());
        let mut ticket = Ticket {
            id: Uuid::new_v4(),
            events: EventBuffer::new(),
        };
        ticket.events.raise(Box::new(TicketOpened {
            ticket_id: ticket.id,
            at: Utc::now(),
        }));
        ticket.events.raise(Box::new(TicketClosed {
            ticket_id: ticket.id,
            at: Utc::now(),
        }));

        let records = writer.drain(&mut [&mut ticket]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event_type, "ticket.opened");
        assert!(ticket.domain_events().is_empty());
    }

    #[test]
    fn test_drain_spans_multiple_aggregates() {
        let writer = OutboxWriter::new(opened_registry());
        let mut first = Ticket {
            id: Uuid::new_v4(),
            events: EventBuffer::new(),
        };
        let mut second = Ticket {
            id: Uuid::new_v4(),
            events: EventBuffer::new(),
        };
        first.events.raise(Box::new(TicketOpened {
            ticket_id: first.id,
            at: Utc::now(),
        }));
        second.events.raise(Box::new(TicketOpened {
            ticket_id: second.id,
            at: Utc::now(),
        }));

        let records = writer.drain(&mut [&mut first, &mut second]).unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].aggregate_id, records[1].aggregate_id);
    }
}
