//! The drink resource: records, persistence and HTTP handlers.

pub mod handler;
pub mod store;
pub mod types;

pub use store::{DrinkStore, StoreError};
