//! Campus Finds Core
//!
//! Layered architecture:
//! - domain: Core entities and business rules
//! - repository: Item store, live feed and blob storage contracts plus adapters
//! - tagging: AI tag generation over HTTP
//! - store: Live, order-preserving item list with optimistic entries
//! - submission: Upload -> tag -> persist pipeline
//! - visibility: University scoping, search, tabs, ownership and detail view
//! - config / session: Runtime configuration and per-user wiring

pub mod config;
pub mod domain;
pub mod repository;
pub mod session;
pub mod store;
pub mod submission;
pub mod tagging;
pub mod visibility;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use session::{bootstrap, Services, Session, SessionError};
