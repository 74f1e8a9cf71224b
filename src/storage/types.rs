use std::sync::Arc;

/// One dimension value as observed on a countable record.
///
/// Counter keys must distinguish an explicit null from a field the entity
/// does not carry at all; both still feed a bucket of their own instead of
/// being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Text(String),
    Null,
    Undefined,
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    pub fn numeric(value: u64) -> Self {
        FieldValue::Text(value.to_string())
    }

    /// Literal used when the value is embedded in a canonical counter key.
    pub fn as_key_str(&self) -> &str {
        match self {
            FieldValue::Text(value) => value,
            FieldValue::Null => "null",
            FieldValue::Undefined => "undefined",
        }
    }
}

/// Append-only, monotonically-numbered row the counter engine can aggregate.
///
/// `number` is a global sequence assigned at insertion and never reused; for
/// a fixed table the values are unique and contiguous from 0. Dimension
/// fields are reached through [`Countable::field`] so the engine never needs
/// reflection over the entity type.
pub trait Countable: Send + Sync + 'static {
    /// Canonical table name used in counter keys and cursor rows.
    const TABLE: &'static str;

    fn number(&self) -> u64;

    fn block_number(&self) -> u64;

    /// Value of one dimension field; [`FieldValue::Undefined`] when the
    /// entity has no such field.
    fn field(&self, name: &str) -> FieldValue;
}

/// Filter handed to [`crate::storage::interfaces::RecordStore::find`].
///
/// Results are always ordered ascending by `number`. `select` is a
/// projection hint listing the only fields the caller will read; SQL-backed
/// stores can narrow their column list with it, in-memory ones ignore it.
#[derive(Debug, Clone)]
pub struct RecordQuery {
    /// Lowest record `number` to include.
    pub from_number: u64,
    /// Highest record `number` to include, when bounded.
    pub to_number: Option<u64>,
    /// Restrict to records with `block_number` strictly above this value.
    pub above_block: Option<u64>,
    pub select: Arc<[String]>,
    pub take: usize,
}

impl RecordQuery {
    pub fn matches<R: Countable>(&self, record: &R) -> bool {
        record.number() >= self.from_number
            && self.to_number.map_or(true, |hi| record.number() <= hi)
            && self
                .above_block
                .map_or(true, |block| record.block_number() > block)
    }
}

/// Commitment level of a stored block, ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BlockStatus {
    Included,
    Safe,
    Finalized,
}

/// Block as reported by the chain source and persisted by the block store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBlock {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    /// L1 batch the block is sealed into.
    pub batch_number: u64,
    pub status: BlockStatus,
    pub timestamp: u64,
}

/// Cheap `(number, hash)` projection used for reorg checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlockRef {
    pub number: u64,
    pub hash: String,
}

/// Commitment progress of an L1 batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BatchStage {
    New,
    Committed,
    Proven,
    Executed,
}

impl BatchStage {
    pub const ALL: [BatchStage; 4] = [
        BatchStage::New,
        BatchStage::Committed,
        BatchStage::Proven,
        BatchStage::Executed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStage::New => "new",
            BatchStage::Committed => "committed",
            BatchStage::Proven => "proven",
            BatchStage::Executed => "executed",
        }
    }
}

/// Batch details as reported by the chain source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchDetails {
    pub number: u64,
    pub timestamp: u64,
    pub root_hash: Option<String>,
    pub committed_at: Option<u64>,
    pub proven_at: Option<u64>,
    pub executed_at: Option<u64>,
}

impl BatchDetails {
    /// Most advanced stage the batch has reached, derived from which
    /// commitment timestamps are set.
    pub fn stage(&self) -> BatchStage {
        if self.executed_at.is_some() {
            BatchStage::Executed
        } else if self.proven_at.is_some() {
            BatchStage::Proven
        } else if self.committed_at.is_some() {
            BatchStage::Committed
        } else {
            BatchStage::New
        }
    }

    pub fn has_reached(&self, stage: BatchStage) -> bool {
        self.stage() >= stage
    }
}

/// Off-chain market data for one bridged token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenOffChainData {
    pub l1_address: String,
    pub l2_address: Option<String>,
    pub liquidity: Option<f64>,
    pub usd_price: Option<f64>,
    pub icon_url: Option<String>,
}
