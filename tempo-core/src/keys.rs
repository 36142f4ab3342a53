//! Typed entity keys.
//!
//! Every persistent entity is addressed by a monotonically increasing `u32`
//! key handed out by the arena. The per-kind newtypes below keep object,
//! token, variable, and constraint keys from being mixed up at compile time;
//! all of them are thin wrappers around [`EntityKey`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Raw entity key. Unique across every entity kind for the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(pub u32);

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! key_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub EntityKey);

        impl $name {
            /// The underlying raw entity key.
            pub fn entity(self) -> EntityKey {
                self.0
            }

            /// Raw numeric value, for ordering and display.
            pub fn raw(self) -> u32 {
                self.0 .0
            }
        }

        impl From<$name> for EntityKey {
            fn from(key: $name) -> EntityKey {
                key.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

key_type!(
    /// Key of an object (or timeline) in the plan database.
    ObjectKey
);
key_type!(
    /// Key of a token.
    TokenKey
);
key_type!(
    /// Key of a constrained variable.
    VarKey
);
key_type!(
    /// Key of a constraint posted on the engine.
    ConstraintKey
);
