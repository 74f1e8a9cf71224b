//! Cooperative polling-worker primitives shared by every background loop:
//! run-loop lifecycle, cancellable polling delay, and the exponential
//! retry-delay policy.

pub mod backoff;
pub mod engine;
pub mod wait;
