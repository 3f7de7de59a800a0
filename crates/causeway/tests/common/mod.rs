//! Common fixtures for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use causeway::abi::{address_topic, claim_topic0, uint_topic};
use causeway::{Address, TxHash};
use std::future::Future;
use std::time::Duration;

pub fn addr(byte: u8) -> Address {
    [byte; 20]
}

pub fn hash(byte: u8) -> TxHash {
    [byte; 32]
}

/// Topics of a TokensClaimed(recipient, amount, nonce) log.
pub fn claim_topics(recipient: Address, amount: u128, nonce: u128) -> Vec<[u8; 32]> {
    vec![
        claim_topic0(),
        address_topic(recipient),
        uint_topic(amount),
        uint_topic(nonce),
    ]
}

/// Assert that `future` does not complete within a short grace period.
pub async fn assert_pending<F: Future>(future: F) {
    assert!(
        tokio::time::timeout(Duration::from_millis(100), future)
            .await
            .is_err(),
        "expected the wait to still be pending"
    );
}
