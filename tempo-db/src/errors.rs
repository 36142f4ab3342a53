//! Plan-database errors.
//!
//! The database is strict: a structural precondition violation indicates a
//! modelling bug, so the operation fails loudly instead of accommodating.

use tempo_core::errors::EngineError;
use tempo_core::keys::{ObjectKey, TokenKey, VarKey};

/// Structural precondition violated by a mutation.
#[derive(Debug, thiserror::Error)]
pub enum ModellingError {
    #[error("an object named {name:?} already exists")]
    DuplicateObjectName { name: String },

    #[error("a global variable named {name:?} already exists")]
    DuplicateGlobalName { name: String },

    #[error("object type {name:?} is not registered")]
    UnknownType { name: String },

    #[error("object type {name:?} is already closed")]
    TypeAlreadyClosed { name: String },

    #[error("unknown object {0}")]
    UnknownObject(ObjectKey),

    #[error("unknown token {0}")]
    UnknownToken(TokenKey),

    #[error("unknown variable {0}")]
    UnknownVariable(VarKey),

    #[error("object {0} is still under construction")]
    ObjectIncomplete(ObjectKey),

    #[error("object {0} is closed; member variables may no longer be added")]
    ObjectComplete(ObjectKey),

    #[error("token {token} is {actual:?}, expected {expected:?}")]
    WrongTokenState {
        token: TokenKey,
        expected: crate::token::TokenState,
        actual: crate::token::TokenState,
    },

    #[error("token {token} is not rejectable")]
    NotRejectable { token: TokenKey },

    #[error("tokens {predecessor} and {successor} are already ordered on object {object}")]
    AlreadyConstrained {
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    },

    #[error("no precedence constraint between {predecessor} and {successor} on object {object}")]
    NoSuchPrecedence {
        object: ObjectKey,
        predecessor: TokenKey,
        successor: TokenKey,
    },

    #[error("token {token} is not assigned to object {object}")]
    TokenNotOnObject { object: ObjectKey, token: TokenKey },

    #[error("object {object} is not a candidate of token {token}")]
    ObjectNotCandidate { object: ObjectKey, token: TokenKey },

    #[error("token {0} is already sequenced; ordering choices are undefined")]
    TokenAlreadySequenced(TokenKey),

    #[error("token {token} is not sequenced on timeline {object}")]
    NotSequenced { object: ObjectKey, token: TokenKey },

    #[error("no explicit self-ordering marker for token {token} on object {object}")]
    NoExplicitMarker { object: ObjectKey, token: TokenKey },

    #[error("the constraint network is proven inconsistent")]
    EngineInconsistent,

    #[error("tokens {a} and {b} have incompatible predicates")]
    IncompatiblePredicates { a: TokenKey, b: TokenKey },

    #[error("token {0} still has merged tokens; cancel or re-merge them first")]
    ActiveHasMergedTokens(TokenKey),

    #[error("token {0} is committed and can no longer be cancelled")]
    TokenCommitted(TokenKey),

    #[error("the database is closed")]
    DatabaseClosed,

    #[error("operation is illegal while purging")]
    Purging,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Database-client surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Modelling(#[from] ModellingError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("token path {path:?} does not resolve")]
    BadTokenPath { path: Vec<u32> },

    #[error("transaction logging is not enabled")]
    LoggingDisabled,
}
