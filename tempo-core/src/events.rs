//! Typed event bus for plan-database lifecycle notifications.
//!
//! Listeners receive immutable event records, synchronously, in the causal
//! order of the mutations that produced them. During a purge the dispatcher is
//! muted and nothing is delivered.

use crate::keys::{ObjectKey, TokenKey};

/// Lifecycle event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbEvent {
    ObjectAdded { object: ObjectKey },
    ObjectRemoved { object: ObjectKey },
    TokenAdded { token: TokenKey },
    TokenRemoved { token: TokenKey },
    TokenActivated { token: TokenKey },
    TokenDeactivated { token: TokenKey },
    TokenMerged { token: TokenKey, active: TokenKey },
    TokenSplit { token: TokenKey, active: TokenKey },
    TokenRejected { token: TokenKey },
    TokenReinstated { token: TokenKey },
    TokenCommitted { token: TokenKey },
    TokenTerminated { token: TokenKey },
    Constrained {
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    },
    Freed {
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    },
    OrderingRequired { object: ObjectKey, token: TokenKey },
    OrderingNoLongerRequired { object: ObjectKey, token: TokenKey },
    TypeClosed { type_name: String },
    DatabaseClosed,
}

/// Coarse event families, for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Object,
    Token,
    Ordering,
    Schema,
}

impl DbEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DbEvent::ObjectAdded { .. } | DbEvent::ObjectRemoved { .. } => EventKind::Object,
            DbEvent::TokenAdded { .. }
            | DbEvent::TokenRemoved { .. }
            | DbEvent::TokenActivated { .. }
            | DbEvent::TokenDeactivated { .. }
            | DbEvent::TokenMerged { .. }
            | DbEvent::TokenSplit { .. }
            | DbEvent::TokenRejected { .. }
            | DbEvent::TokenReinstated { .. }
            | DbEvent::TokenCommitted { .. }
            | DbEvent::TokenTerminated { .. } => EventKind::Token,
            DbEvent::Constrained { .. }
            | DbEvent::Freed { .. }
            | DbEvent::OrderingRequired { .. }
            | DbEvent::OrderingNoLongerRequired { .. } => EventKind::Ordering,
            DbEvent::TypeClosed { .. } | DbEvent::DatabaseClosed => EventKind::Schema,
        }
    }
}

/// A registered listener. `wants` filters by family before `handle` is called.
pub trait DbEventHandler {
    fn wants(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    fn handle(&mut self, event: &DbEvent);
}

/// Synchronous dispatcher owned by the plan database.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn DbEventHandler>>,
    muted: bool,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Box<dyn DbEventHandler>) {
        self.handlers.push(handler);
    }

    /// Mute delivery (raised for the duration of a purge).
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn publish(&mut self, event: &DbEvent) {
        if self.muted {
            return;
        }
        let kind = event.kind();
        for handler in &mut self.handlers {
            if handler.wants(kind) {
                handler.handle(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EntityKey;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Recorder {
        seen: Rc<RefCell<Vec<DbEvent>>>,
        only: Option<EventKind>,
    }

    impl DbEventHandler for Recorder {
        fn wants(&self, kind: EventKind) -> bool {
            self.only.map_or(true, |k| k == kind)
        }

        fn handle(&mut self, event: &DbEvent) {
            self.seen.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn delivery_preserves_causal_order_and_filters() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventDispatcher::new();
        bus.subscribe(Box::new(Recorder {
            seen: seen.clone(),
            only: Some(EventKind::Token),
        }));

        let token = TokenKey(EntityKey(5));
        let object = ObjectKey(EntityKey(1));
        bus.publish(&DbEvent::TokenAdded { token });
        bus.publish(&DbEvent::OrderingRequired { object, token });
        bus.publish(&DbEvent::TokenActivated { token });

        let events = seen.borrow();
        assert_eq!(
            *events,
            vec![
                DbEvent::TokenAdded { token },
                DbEvent::TokenActivated { token }
            ]
        );
    }

    #[test]
    fn muted_dispatcher_drops_everything() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventDispatcher::new();
        bus.subscribe(Box::new(Recorder {
            seen: seen.clone(),
            only: None,
        }));
        bus.set_muted(true);
        bus.publish(&DbEvent::DatabaseClosed);
        assert!(seen.borrow().is_empty());
    }
}
