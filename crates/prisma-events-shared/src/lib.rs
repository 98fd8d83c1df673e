//! Configuration, observability and health checks shared by prisma-events crates

pub mod config;
pub mod health;
pub mod observability;

pub use config::*;
pub use health::*;
pub use observability::*;
