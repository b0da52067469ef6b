//! User aggregate and its domain events.

use std::any::Any;

use chrono::{DateTime, Utc};
use ecm_events::{DomainEvent, EventBuffer, HasDomainEvents};
use serde::Serialize;
use uuid::Uuid;

pub const USER_AGGREGATE: &str = "user";

pub const USER_CREATED: &str = "user.created";
pub const USER_UPDATED: &str = "user.updated";

pub struct User {
    id: Uuid,
    display_name: String,
    email: String,
    events: EventBuffer,
}

impl User {
    pub fn register(display_name: impl Into<String>, email: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let email = email.into();
        let mut user = Self {
            id: Uuid::new_v4(),
            display_name: display_name.clone(),
            email: email.clone(),
            events: EventBuffer::new(),
        };

        user.events.raise(Box::new(UserCreated {
            user_id: user.id,
            display_name,
            email,
            occurred_at: Utc::now(),
        }));

        user
    }

    pub fn rename(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.events.raise(Box::new(UserUpdated {
            user_id: self.id,
            display_name: self.display_name.clone(),
            email: self.email.clone(),
            occurred_at: Utc::now(),
        }));
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl HasDomainEvents for User {
    fn domain_events(&self) -> &[Box<dyn DomainEvent>] {
        self.events.events()
    }

    fn clear_domain_events(&mut self) {
        self.events.clear();
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreated {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdated {
    pub user_id: Uuid,
    pub display_name: String,
    pub email: String,
    #[serde(rename = "occurredAtUtc")]
    pub occurred_at: DateTime<Utc>,
}

macro_rules! impl_user_event {
    ($event:ty, $tag:expr) => {
        impl DomainEvent for $event {
            fn event_type(&self) -> &'static str {
                $tag
            }

            fn aggregate_id(&self) -> Uuid {
                self.user_id
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

impl_user_event!(UserCreated, USER_CREATED);
impl_user_event!(UserUpdated, USER_UPDATED);
