//! Concrete indexing loops: block ingestion, batch sealing, block status
//! promotion, balance cleanup, and token off-chain data refresh.

pub mod balances;
pub mod batch;
pub mod block;
pub mod status;
pub mod token;
