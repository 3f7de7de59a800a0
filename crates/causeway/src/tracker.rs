//! ConfirmationTracker: reorg-safe "wait until transaction T is D blocks deep".
//!
//! [ConfirmationTracker::track] subscribes to new heads, then re-checks the
//! transaction on every head until its receipt sits on the canonical chain
//! with enough blocks on top. A receipt whose block was reorged out is not a
//! failure; the transaction may be re-mined, so the tracker keeps waiting.
//! Exactly one of {receipt, [TrackError::Cancelled], [TrackError::Chain]} is
//! ever delivered per call.

use crate::chain::{ChainError, ChainReader, TxHash, TxReceipt};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Confirmation counts are clamped here; a requirement beyond this is already
/// satisfied by any clamped count.
const MAX_CONFIRMATION_COUNT: u64 = i32::MAX as u64;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("confirmation wait cancelled")]
    Cancelled,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Tracks transactions to a required confirmation depth over a [ChainReader].
pub struct ConfirmationTracker<C> {
    chain: C,
}

impl<C: ChainReader> ConfirmationTracker<C> {
    pub fn new(chain: C) -> Self {
        Self { chain }
    }

    /// Wait until `tx_hash` is mined on the canonical chain with at least
    /// `required_confirmations` blocks on top (0 = just mined), and return its
    /// receipt. Read errors surface immediately; retry policy belongs to the
    /// caller. The head subscription is dropped on every exit path.
    pub async fn track(
        &self,
        tx_hash: TxHash,
        required_confirmations: u32,
        cancel: CancellationToken,
    ) -> Result<TxReceipt, TrackError> {
        let mut heads = self.chain.subscribe_new_heads().await?;

        // Check once before waiting: the transaction may already be deep enough.
        if let Some(receipt) = self.check(tx_hash, required_confirmations).await? {
            return Ok(receipt);
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(tx = %hex::encode(tx_hash), "confirmation wait cancelled");
                    return Err(TrackError::Cancelled);
                }
                head = heads.recv() => {
                    if head.is_none() {
                        return Err(TrackError::Chain(ChainError::SubscriptionClosed));
                    }
                    if let Some(receipt) = self.check(tx_hash, required_confirmations).await? {
                        return Ok(receipt);
                    }
                }
            }
        }
    }

    /// One confirmation check. Ok(None) means "wait for more blocks": the
    /// transaction is pending, its receipt is off-canonical, or it is not deep
    /// enough yet.
    async fn check(
        &self,
        tx_hash: TxHash,
        required_confirmations: u32,
    ) -> Result<Option<TxReceipt>, ChainError> {
        let receipt = match self.chain.transaction_receipt(tx_hash).await? {
            Some(receipt) => receipt,
            None => return Ok(None),
        };
        let count = match self.confirmation_count(&receipt).await? {
            Some(count) => count,
            None => {
                tracing::debug!(
                    tx = %hex::encode(tx_hash),
                    block = receipt.block_number,
                    "receipt no longer canonical, waiting for re-inclusion"
                );
                return Ok(None);
            }
        };
        if count >= u64::from(required_confirmations) {
            tracing::debug!(
                tx = %hex::encode(tx_hash),
                confirmations = count,
                required = required_confirmations,
                "transaction confirmed"
            );
            return Ok(Some(receipt));
        }
        Ok(None)
    }

    /// Confirmation depth of `receipt`, or None when its block is no longer
    /// the canonical block at that height (reorged out).
    async fn confirmation_count(&self, receipt: &TxReceipt) -> Result<Option<u64>, ChainError> {
        match self.chain.block_hash_at(receipt.block_number).await? {
            Some(hash) if hash == receipt.block_hash => {}
            _ => return Ok(None),
        }
        let head = self.chain.head_number().await?;
        let count = head
            .saturating_sub(receipt.block_number)
            .min(MAX_CONFIRMATION_COUNT);
        Ok(Some(count))
    }
}
