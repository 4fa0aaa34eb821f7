use thiserror::Error;

/// Failure local to a single transaction. Never aborts the surrounding batch.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("malformed transaction encoding: {0}")]
    Malformed(#[from] bincode::Error),
    #[error("signature does not verify against the sender key")]
    InvalidSignature,
    #[error("signature is {actual} bytes, expected {expected}")]
    SignatureLength { expected: usize, actual: usize },
    #[error("sender public key is {actual} bytes, expected {expected}")]
    PublicKeyLength { expected: usize, actual: usize },
}

/// Structural failure of a whole batch payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("empty batch payload")]
    Empty,
    #[error("malformed batch envelope: {0}")]
    Envelope(#[source] bincode::Error),
    #[error("truncated frame at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("frame of {0} bytes does not fit a u32 length prefix")]
    FrameTooLarge(usize),
    #[error("failed to encode batch: {0}")]
    Encode(#[source] bincode::Error),
}

/// Errors surfaced by a [`TxPool`](crate::pool::TxPool) implementation.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool refused this one transaction; the rest of the batch continues.
    #[error("transaction refused by pool: {0}")]
    InvalidTransaction(String),
    /// The pool's backing store failed; the drain pass stops and reports it.
    #[error("pool storage failure: {0}")]
    Storage(String),
}

impl PoolError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PoolError::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("pool failure after {imported} imports ({requeued} shards requeued): {source}")]
    Pool {
        #[source]
        source: PoolError,
        imported: usize,
        requeued: usize,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("router.branching must be at least 1")]
    ZeroBranching,
    #[error("pool.capacity must be at least 1")]
    ZeroCapacity,
    #[error("sync.verify_chunk must be at least 1")]
    ZeroVerifyChunk,
    #[error("sync.drain_interval_ms must be at least 1")]
    ZeroDrainInterval,
    #[error("unsupported protocol version {0}")]
    ProtocolVersion(u32),
}
