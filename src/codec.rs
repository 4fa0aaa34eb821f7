//! Batch encoding for transactions exchanged between peers.
//!
//! Two layouts exist, selected by protocol version:
//!
//! * **nested** (v2+): a bincode [`BatchEnvelope`] whose `txs` field is one
//!   opaque payload of `u32` little-endian length-prefixed frames, each frame
//!   holding one encoded [`TxBody`](crate::transaction::TxBody). The envelope
//!   also carries the consensus index used for tree routing. Frames are
//!   located sequentially and decoded in parallel.
//! * **legacy** (v1): a bincode `Vec<Vec<u8>>`, one entry per transaction,
//!   decoded one at a time.
//!
//! A bad frame costs only that transaction. A payload whose framing cannot be
//! read at all decodes to an empty batch.

use crate::error::{CodecError, TxError};
use crate::transaction::Transaction;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const LEGACY_PROTOCOL_VERSION: u32 = 1;
pub const NESTED_BATCH_PROTOCOL_VERSION: u32 = 2;
pub const LATEST_PROTOCOL_VERSION: u32 = NESTED_BATCH_PROTOCOL_VERSION;

const FRAME_LEN_BYTES: usize = 4;

/// Borrows the frames from the received payload; nothing is copied to read it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct BatchEnvelope<'a> {
    txs: &'a [u8],
    consensus_index: i64,
}

/// How much signature work to do while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureCheck {
    /// Leave signatures to the verifier.
    #[default]
    None,
    /// Reject keys and signatures of the wrong length.
    Cheap,
    /// Recover the sender now and drop transactions that fail.
    Everything,
}

#[derive(Debug)]
pub struct SkippedTx {
    /// Position of the transaction within its batch.
    pub index: usize,
    pub reason: TxError,
}

#[derive(Debug)]
enum DecodeOutcome {
    Decoded(Arc<Transaction>),
    Skipped(SkippedTx),
}

/// Result of decoding one batch: transactions in encoded order plus the
/// entries that were dropped.
#[derive(Debug, Default)]
pub struct DecodeReport {
    pub txs: Vec<Arc<Transaction>>,
    pub skipped: Vec<SkippedTx>,
}

impl DecodeReport {
    fn collect(outcomes: Vec<DecodeOutcome>) -> Self {
        let mut report = DecodeReport::default();
        for outcome in outcomes {
            match outcome {
                DecodeOutcome::Decoded(tx) => report.txs.push(tx),
                DecodeOutcome::Skipped(skipped) => report.skipped.push(skipped),
            }
        }
        report
    }

    pub fn is_empty(&self) -> bool {
        self.txs.is_empty() && self.skipped.is_empty()
    }
}

pub fn uses_nested_batches(protocol_version: u32) -> bool {
    protocol_version >= NESTED_BATCH_PROTOCOL_VERSION
}

/// Decodes a received batch payload.
pub fn decode_batch(payload: &[u8], protocol_version: u32, check: SignatureCheck) -> DecodeReport {
    let decoded = if uses_nested_batches(protocol_version) {
        decode_nested(payload, check)
    } else {
        decode_legacy(payload, check)
    };
    match decoded {
        Ok(report) => report,
        Err(e) => {
            debug!(error = %e, bytes = payload.len(), version = protocol_version, "dropping undecodable batch");
            DecodeReport::default()
        }
    }
}

fn decode_nested(payload: &[u8], check: SignatureCheck) -> Result<DecodeReport, CodecError> {
    let envelope = open_envelope(payload)?;
    let frames = split_frames(envelope.txs)?;
    let outcomes: Vec<DecodeOutcome> = frames
        .par_iter()
        .enumerate()
        .map(|(index, raw)| decode_one(index, raw, check))
        .collect();
    Ok(DecodeReport::collect(outcomes))
}

fn decode_legacy(payload: &[u8], check: SignatureCheck) -> Result<DecodeReport, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    let items: Vec<Vec<u8>> = bincode::deserialize(payload).map_err(CodecError::Envelope)?;
    let outcomes = items
        .iter()
        .enumerate()
        .map(|(index, raw)| decode_one(index, raw, check))
        .collect();
    Ok(DecodeReport::collect(outcomes))
}

fn decode_one(index: usize, raw: &[u8], check: SignatureCheck) -> DecodeOutcome {
    let checked = Transaction::decode(raw).and_then(|tx| {
        match check {
            SignatureCheck::None => {}
            SignatureCheck::Cheap => tx.body().check_format()?,
            SignatureCheck::Everything => {
                tx.sender()?;
            }
        }
        Ok(tx)
    });
    match checked {
        Ok(tx) => DecodeOutcome::Decoded(Arc::new(tx)),
        Err(reason) => {
            warn!(index, reason = %reason, raw = %hex::encode(raw), "invalid transaction received");
            DecodeOutcome::Skipped(SkippedTx { index, reason })
        }
    }
}

fn open_envelope(payload: &[u8]) -> Result<BatchEnvelope<'_>, CodecError> {
    if payload.is_empty() {
        return Err(CodecError::Empty);
    }
    bincode::deserialize(payload).map_err(CodecError::Envelope)
}

/// Locates every frame in a nested payload. Any truncation invalidates the
/// whole payload.
fn split_frames(bytes: &[u8]) -> Result<Vec<&[u8]>, CodecError> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let available = bytes.len() - offset;
        if available < FRAME_LEN_BYTES {
            return Err(CodecError::Truncated { offset, needed: FRAME_LEN_BYTES, available });
        }
        let mut len_bytes = [0u8; FRAME_LEN_BYTES];
        len_bytes.copy_from_slice(&bytes[offset..offset + FRAME_LEN_BYTES]);
        let len = u32::from_le_bytes(len_bytes) as usize;
        let start = offset + FRAME_LEN_BYTES;
        if bytes.len() - start < len {
            return Err(CodecError::Truncated { offset, needed: len, available: bytes.len() - start });
        }
        frames.push(&bytes[start..start + len]);
        offset = start + len;
    }
    Ok(frames)
}

/// Reads the routing consensus index. Legacy batches do not carry one.
pub fn consensus_index(payload: &[u8], protocol_version: u32) -> Option<i64> {
    if !uses_nested_batches(protocol_version) {
        return None;
    }
    open_envelope(payload).ok().map(|envelope| envelope.consensus_index)
}

/// Concatenates already-encoded transactions into the nested frame layout.
pub fn encode_frames<I, B>(items: I) -> Result<Vec<u8>, CodecError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for item in items {
        let item = item.as_ref();
        let len = u32::try_from(item.len()).map_err(|_| CodecError::FrameTooLarge(item.len()))?;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(item);
    }
    Ok(out)
}

/// Encodes raw transaction encodings as a batch payload for `protocol_version`.
/// `consensus_index` is ignored by the legacy layout.
pub fn encode_raw_batch<B: AsRef<[u8]>>(
    items: &[B],
    protocol_version: u32,
    consensus_index: i64,
) -> Result<Vec<u8>, CodecError> {
    if uses_nested_batches(protocol_version) {
        let frames = encode_frames(items.iter())?;
        let envelope = BatchEnvelope { txs: &frames, consensus_index };
        bincode::serialize(&envelope).map_err(CodecError::Encode)
    } else {
        let list: Vec<&[u8]> = items.iter().map(|item| item.as_ref()).collect();
        bincode::serialize(&list).map_err(CodecError::Encode)
    }
}

pub fn encode_batch<T: AsRef<Transaction>>(
    txs: &[T],
    protocol_version: u32,
    consensus_index: i64,
) -> Result<Vec<u8>, CodecError> {
    let raw: Vec<&[u8]> = txs.iter().map(|tx| tx.as_ref().encoded()).collect();
    encode_raw_batch(&raw, protocol_version, consensus_index)
}
