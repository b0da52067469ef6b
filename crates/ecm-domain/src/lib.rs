//! Business modules feeding the event pipeline
//!
//! Each aggregate buffers domain events describing what happened; the
//! module's outbox mappers turn those events into broker-agnostic outbox
//! records. The CRUD surface around these aggregates lives elsewhere and is
//! deliberately not part of this crate.

pub mod documents;
pub mod outbox_map;
pub mod tags;
pub mod users;

pub use outbox_map::default_registry;
