//! Incremental multi-dimensional counter aggregation with reorg-safe revert:
//! pure combination math, the per-table processing engine, and the worker and
//! service wrappers that drive it.

pub mod aggregation;
pub mod processor;
pub mod service;
pub mod worker;
