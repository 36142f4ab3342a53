//! # tempo-db
//!
//! The plan database: tokens, objects, timelines, the temporal advisors, and
//! the client surface through which every external agent mutates the plan.

pub mod advisor;
pub mod client;
pub mod database;
pub mod errors;
pub mod object;
pub mod token;

pub use advisor::{DefaultTemporalAdvisor, StnTemporalAdvisor, TemporalAdvisor};
pub use client::{DbClient, Transaction};
pub use database::{DbState, OrderingChoice, PlanDatabase};
pub use errors::{ClientError, ModellingError};
pub use object::{ObjectBehavior, ObjectData, ObjectState, TimelineState};
pub use token::{Token, TokenSpec, TokenState};
