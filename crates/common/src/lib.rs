//! Shared types for the TCC workspace.

pub mod types;

pub use types::TransactionId;
