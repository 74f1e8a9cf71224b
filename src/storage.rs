//! Persistence boundary: record/counter/block/batch/balance/token store
//! contracts, the chain source contract, shared value types, and an
//! in-memory backend for tests and database-free deployments.

pub mod interfaces;
pub mod memory;
pub mod types;
