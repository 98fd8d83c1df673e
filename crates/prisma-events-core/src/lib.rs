//! Core listener registry, matching and dispatch for prisma-events

pub mod dedup;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod filter;
pub mod listener;
pub mod registry;

pub use dedup::*;
pub use dispatcher::*;
pub use envelope::*;
pub use error::*;
pub use event::*;
pub use filter::{Condition, FieldFilter, FieldPredicate};
pub use listener::*;
pub use registry::*;
