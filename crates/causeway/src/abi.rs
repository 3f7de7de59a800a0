//! Selectors, calldata and event decoding for the token/manager contracts.
//!
//! Only the two shapes the engine needs: the `mint(address,uint256)` call it
//! dispatches, and the manager's `TokensClaimed` event it watches for. Both
//! are static-word ABI layouts, encoded and decoded by hand.

use crate::chain::{Address, LogObserved};
use sha3::{Digest, Keccak256};

/// Claim event emitted by the manager contract:
/// `TokensClaimed(address indexed recipient, uint256 indexed amount,
/// uint256 indexed nonce, bytes signature)`.
pub const CLAIM_EVENT_SIGNATURE: &str = "TokensClaimed(address,uint256,uint256,bytes)";

const MINT_FUNCTION_SIGNATURE: &str = "mint(address,uint256)";

fn keccak(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// 4-byte selector of `mint(address,uint256)`.
pub fn mint_selector() -> [u8; 4] {
    let hash = keccak(MINT_FUNCTION_SIGNATURE.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// topic0 of the claim event.
pub fn claim_topic0() -> [u8; 32] {
    keccak(CLAIM_EVENT_SIGNATURE.as_bytes())
}

/// An address as a 32-byte topic/word (left-padded).
pub fn address_topic(address: Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(&address);
    word
}

/// A uint256 topic/word holding a u128 value.
pub fn uint_topic(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_from_topic(topic: &[u8; 32]) -> Address {
    let mut address = [0u8; 20];
    address.copy_from_slice(&topic[12..]);
    address
}

/// None when the word does not fit in a u128.
fn uint_from_topic(topic: &[u8; 32]) -> Option<u128> {
    if topic[..16].iter().any(|b| *b != 0) {
        return None;
    }
    Some(u128::from_be_bytes(topic[16..].try_into().expect("16 bytes")))
}

/// Calldata for `mint(recipient, amount)`: selector plus two static words.
pub fn mint_calldata(recipient: Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&mint_selector());
    data.extend_from_slice(&address_topic(recipient));
    data.extend_from_slice(&uint_topic(amount));
    data
}

/// A decoded claim event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimObserved {
    pub recipient: Address,
    pub amount: u128,
    pub nonce: u128,
}

/// Decode a claim event from a raw log; None when the log is not a claim
/// (wrong topic0 or shape) or its amounts exceed u128.
pub fn decode_claim_log(log: &LogObserved) -> Option<ClaimObserved> {
    if log.topics.len() < 4 || log.topics[0] != claim_topic0() {
        return None;
    }
    Some(ClaimObserved {
        recipient: address_from_topic(&log.topics[1]),
        amount: uint_from_topic(&log.topics[2])?,
        nonce: uint_from_topic(&log.topics[3])?,
    })
}

/// Predicate matching the claim event for one (recipient, amount, nonce)
/// triple, for use with [crate::watcher::EventWatcher].
pub fn claim_match(
    recipient: Address,
    amount: u128,
    nonce: u128,
) -> impl Fn(&LogObserved) -> bool + Send + Sync {
    move |log| {
        decode_claim_log(log)
            .map(|claim| {
                claim.recipient == recipient && claim.amount == amount && claim.nonce == nonce
            })
            .unwrap_or(false)
    }
}
