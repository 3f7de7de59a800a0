//! Event watching: backlog + live feed, reorg retraction, first-wins races.

mod common;

use causeway::testing::MockChain;
use causeway::{claim_match, ChainError, EventWatcher, TxHash, TxReceipt, WatchError};
use common::{addr, assert_pending, claim_topics};
use tokio_util::sync::CancellationToken;

const MANAGER: causeway::Address = [0xcc; 20];

fn spawn_watch(
    chain: &MockChain,
    recipient: causeway::Address,
    amount: u128,
    nonce: u128,
    depth: u32,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<Result<TxReceipt, WatchError>> {
    let watcher = EventWatcher::new(chain.clone(), MANAGER);
    tokio::spawn(async move {
        watcher
            .wait_for_confirmed_event(claim_match(recipient, amount, nonce), depth, cancel)
            .await
    })
}

/// Submit a transaction carrying the claim log; mined on the next mine.
fn submit_claim(chain: &MockChain, recipient: causeway::Address, amount: u128, nonce: u128) -> TxHash {
    let tx = chain.submit_transfer(addr(9), MANAGER, 0);
    chain.queue_log(MANAGER, claim_topics(recipient, amount, nonce), tx);
    tx
}

#[tokio::test]
async fn backlog_match_confirms_without_live_logs() {
    let chain = MockChain::new();
    let recipient = addr(0x11);
    let tx = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    chain.mine_blocks(3);

    let receipt = EventWatcher::new(chain.clone(), MANAGER)
        .wait_for_confirmed_event(claim_match(recipient, 100, 1), 3, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(receipt.tx_hash, tx);
}

#[tokio::test]
async fn live_match_confirms_at_depth() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    let mut handle = spawn_watch(&chain, recipient, 100, 1, 2, CancellationToken::new());
    assert_pending(&mut handle).await;

    let tx = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    chain.mine();
    assert_pending(&mut handle).await;

    chain.mine();
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.tx_hash, tx);
}

#[tokio::test]
async fn non_matching_logs_are_ignored() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    let mut handle = spawn_watch(&chain, recipient, 100, 1, 0, CancellationToken::new());
    assert_pending(&mut handle).await;

    // Same recipient, wrong nonce; different recipient, right amounts.
    submit_claim(&chain, recipient, 100, 2);
    submit_claim(&chain, addr(0x22), 100, 1);
    chain.mine();
    assert_pending(&mut handle).await;

    let tx = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.tx_hash, tx);
}

#[tokio::test]
async fn retraction_cancels_only_its_own_wait() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    // First sighting mined and partly buried.
    let survivor = submit_claim(&chain, recipient, 100, 1);
    chain.mine();

    let mut handle = spawn_watch(&chain, recipient, 100, 1, 4, CancellationToken::new());
    assert_pending(&mut handle).await;

    // Second sighting in a block that gets reorged out and never re-mined.
    let doomed = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    assert_pending(&mut handle).await;
    chain.reorg(1);
    chain.drop_pending_transaction(doomed);

    // The survivor's wait is untouched and confirms once deep enough.
    chain.mine_blocks(4);
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.tx_hash, survivor);
    assert_ne!(receipt.tx_hash, doomed);
}

#[tokio::test]
async fn retracted_then_remined_event_yields_one_outcome() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    let mut handle = spawn_watch(&chain, recipient, 100, 1, 2, CancellationToken::new());
    assert_pending(&mut handle).await;

    let tx = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    let orphaned = chain.head().hash;
    assert_pending(&mut handle).await;

    // Retract the block; the mock re-queues the transaction and its log, so
    // the next mines re-emit the sighting under a fresh block hash.
    chain.reorg(1);
    chain.mine();
    chain.mine_blocks(2);

    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.tx_hash, tx);
    assert_ne!(receipt.block_hash, orphaned);
}

#[tokio::test]
async fn repeated_retractions_cancel_the_replacement_wait() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    let mut handle = spawn_watch(&chain, recipient, 100, 1, 3, CancellationToken::new());
    assert_pending(&mut handle).await;

    let tx = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    assert_pending(&mut handle).await;

    // Retract and re-mine back to back, so the first wait's cancellation
    // outcome can drain after the replacement wait is already in flight.
    chain.reorg(1);
    chain.mine();
    assert_pending(&mut handle).await;

    // Retract the replacement too and drop the transaction for good. Its
    // wait must be cancelled, releasing the head subscription it held.
    chain.reorg(1);
    chain.drop_pending_transaction(tx);
    assert_pending(&mut handle).await;
    assert_eq!(chain.open_head_subscriptions(), 0);

    // A fresh sighting still resolves the watch exactly once.
    let fresh = submit_claim(&chain, recipient, 100, 1);
    chain.mine();
    chain.mine_blocks(3);
    let receipt = handle.await.unwrap().unwrap();
    assert_eq!(receipt.tx_hash, fresh);
}

#[tokio::test]
async fn duplicate_sightings_share_one_wait() {
    let chain = MockChain::new();
    let recipient = addr(0x11);

    // The same claim appears twice in one block; both backlog sightings
    // resolve to a single wait on the emitting transaction.
    let tx = chain.submit_transfer(addr(9), MANAGER, 0);
    chain.queue_log(MANAGER, claim_topics(recipient, 100, 1), tx);
    chain.queue_log(MANAGER, claim_topics(recipient, 100, 1), tx);
    chain.mine();

    let receipt = EventWatcher::new(chain.clone(), MANAGER)
        .wait_for_confirmed_event(claim_match(recipient, 100, 1), 0, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(receipt.tx_hash, tx);
}

#[tokio::test]
async fn cancellation_tears_the_watch_down() {
    let chain = MockChain::new();
    let cancel = CancellationToken::new();
    let handle = spawn_watch(&chain, addr(0x11), 100, 1, 2, cancel.clone());
    cancel.cancel();
    assert!(matches!(handle.await.unwrap(), Err(WatchError::Cancelled)));
}

#[tokio::test]
async fn closed_log_subscription_is_a_chain_error() {
    let chain = MockChain::new();
    let handle = spawn_watch(&chain, addr(0x11), 100, 1, 2, CancellationToken::new());
    tokio::task::yield_now().await;
    chain.break_subscriptions();
    assert!(matches!(
        handle.await.unwrap(),
        Err(WatchError::Chain(ChainError::SubscriptionClosed))
    ));
}
