//! EventWatcher: exactly-once wait for a confirmed occurrence of an event.
//!
//! [EventWatcher::wait_for_confirmed_event] scans a contract's historical
//! logs and its live feed for logs matching an [EventMatch] predicate, and
//! runs one confirmation wait (see [crate::tracker]) per matching sighting.
//! Sightings can overlap (reorg re-emissions, distinct transactions that both
//! match); the first wait to confirm wins and everything else is torn down. A
//! retracted log (`removed == true`) cancels the wait spawned for that same
//! transaction hash, and only that one.

use crate::chain::{Address, ChainError, ChainReader, LogObserved, LogReader, TxHash, TxReceipt};
use crate::tracker::{ConfirmationTracker, TrackError};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use futures_util::FutureExt;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Decides whether a decoded log is the event being awaited.
///
/// Must be pure: it may be applied to the same logical event more than once
/// (backlog plus live feed, or across reorg re-emissions).
pub trait EventMatch: Send + Sync {
    fn matches(&self, log: &LogObserved) -> bool;
}

impl<F> EventMatch for F
where
    F: Fn(&LogObserved) -> bool + Send + Sync,
{
    fn matches(&self, log: &LogObserved) -> bool {
        self(log)
    }
}

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("event wait cancelled")]
    Cancelled,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

type WaitOutcome = (TxHash, u64, Result<TxReceipt, TrackError>);

/// Watches one contract address over a chain capability with log access.
pub struct EventWatcher<C> {
    chain: C,
    contract_address: Address,
}

impl<C> EventWatcher<C>
where
    C: ChainReader + LogReader + Clone + 'static,
{
    pub fn new(chain: C, contract_address: Address) -> Self {
        Self {
            chain,
            contract_address,
        }
    }

    /// Wait until a log matching `predicate` is confirmed to
    /// `required_confirmations` depth and return the receipt of the
    /// transaction that emitted it.
    ///
    /// The live subscription is opened before the backlog query so nothing
    /// falls between them, and the backlog is fully evaluated before live
    /// logs are consumed (they buffer in the subscription meanwhile). With
    /// depth 0 and a sufficiently old backlog match, the outcome can be
    /// delivered without a single live log.
    pub async fn wait_for_confirmed_event<P: EventMatch>(
        &self,
        predicate: P,
        required_confirmations: u32,
        cancel: CancellationToken,
    ) -> Result<TxReceipt, WatchError> {
        let mut live = self.chain.subscribe_logs(self.contract_address).await?;
        let mut waits: FuturesUnordered<BoxFuture<'static, WaitOutcome>> = FuturesUnordered::new();
        // Keyed by transaction hash; the id tells a finished wait's stale
        // outcome apart from a replacement spawned after a retraction.
        let mut children: HashMap<TxHash, (u64, CancellationToken)> = HashMap::new();
        let mut next_wait_id = 0u64;

        let backlog = self.chain.logs(self.contract_address).await?;
        for log in backlog {
            if !log.removed && predicate.matches(&log) {
                self.spawn_wait(&mut waits, &mut children, &mut next_wait_id, &cancel, log.tx_hash, required_confirmations);
            }
        }

        let outcome = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Err(WatchError::Cancelled),
                Some((tx_hash, wait_id, result)) = waits.next(), if !waits.is_empty() => {
                    if children.get(&tx_hash).is_some_and(|(id, _)| *id == wait_id) {
                        children.remove(&tx_hash);
                    }
                    match result {
                        Ok(receipt) => break Ok(receipt),
                        // A wait we cancelled after a retraction; not this watch's failure.
                        Err(TrackError::Cancelled) => continue,
                        Err(TrackError::Chain(e)) => break Err(WatchError::Chain(e)),
                    }
                }
                log = live.recv() => {
                    let log = match log {
                        Some(log) => log,
                        None => break Err(WatchError::Chain(ChainError::SubscriptionClosed)),
                    };
                    if !predicate.matches(&log) {
                        continue;
                    }
                    if log.removed {
                        if let Some((_, child)) = children.remove(&log.tx_hash) {
                            tracing::debug!(
                                tx = %hex::encode(log.tx_hash),
                                "matching log retracted by reorg, cancelling its wait"
                            );
                            child.cancel();
                        }
                        continue;
                    }
                    self.spawn_wait(&mut waits, &mut children, &mut next_wait_id, &cancel, log.tx_hash, required_confirmations);
                }
            }
        };

        for (_, child) in children.values() {
            child.cancel();
        }
        outcome
    }

    /// Start a confirmation wait for one sighting, keyed by transaction hash.
    /// A second sighting of the same transaction is already covered by the
    /// wait in flight.
    fn spawn_wait(
        &self,
        waits: &mut FuturesUnordered<BoxFuture<'static, WaitOutcome>>,
        children: &mut HashMap<TxHash, (u64, CancellationToken)>,
        next_wait_id: &mut u64,
        cancel: &CancellationToken,
        tx_hash: TxHash,
        required_confirmations: u32,
    ) {
        if children.contains_key(&tx_hash) {
            return;
        }
        let wait_id = *next_wait_id;
        *next_wait_id += 1;
        let child = cancel.child_token();
        children.insert(tx_hash, (wait_id, child.clone()));
        tracing::debug!(tx = %hex::encode(tx_hash), "matching log seen, waiting for confirmation");
        let chain = self.chain.clone();
        waits.push(
            async move {
                let tracker = ConfirmationTracker::new(chain);
                let result = tracker.track(tx_hash, required_confirmations, child).await;
                (tx_hash, wait_id, result)
            }
            .boxed(),
        );
    }
}
