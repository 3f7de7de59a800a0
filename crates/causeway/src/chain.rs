//! Chain capability traits and wire types.
//!
//! The engine never talks to a node directly; it consumes one of three narrow
//! capabilities. [ChainReader] is what confirmation tracking needs (heads,
//! canonical block hashes, receipts), [LogReader] adds historical + live log
//! access for event watching, and [ExchangeChain] widens [ChainReader] with
//! the balance/gas/submit calls the bridge exchange uses. Smaller surfaces
//! keep test fakes small; see [crate::testing::MockChain] and the default
//! JSON-RPC implementation in [crate::rpc].

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// 20-byte account/contract address.
pub type Address = [u8; 20];

/// 32-byte transaction or block hash.
pub type TxHash = [u8; 32];

/// Live feed of items from a node subscription.
///
/// The channel closing means the underlying transport failed or shut down;
/// dropping the receiver releases the subscription.
pub type Subscription<T> = mpsc::UnboundedReceiver<T>;

/// A new canonical chain head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadRef {
    pub number: u64,
    pub hash: [u8; 32],
}

/// Inclusion proof for a mined transaction, as of the moment it was fetched.
///
/// `block_hash` may stop being canonical after a reorg; consumers must
/// cross-check it against the block currently at `block_number`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub block_hash: [u8; 32],
}

/// A transaction looked up by hash. `pending` is true while it has no block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxLookup {
    pub hash: TxHash,
    pub from: Address,
    /// None for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: u128,
    pub pending: bool,
}

/// One sighting of a contract event, from backlog or the live feed.
///
/// `removed` is true when a previously delivered sighting was retracted by a
/// reorg; such a log carries the same `tx_hash` as the sighting it cancels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogObserved {
    pub address: Address,
    pub topics: Vec<[u8; 32]>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: [u8; 32],
    pub tx_hash: TxHash,
    pub log_index: u64,
    pub removed: bool,
}

/// Call to simulate for gas estimation.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: Address,
    pub to: Address,
    pub value: u128,
    pub gas_price: u128,
    pub data: Vec<u8>,
}

/// Transaction to submit. Signing is the node's (or a signer middleware's)
/// concern, never this crate's.
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub from: Address,
    pub to: Address,
    pub value: u128,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub data: Vec<u8>,
}

/// Transport/read failure from the chain capability.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("subscription closed")]
    SubscriptionClosed,
}

/// Read-only view for confirmation tracking.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Number of the current canonical head.
    async fn head_number(&self) -> Result<u64, ChainError>;

    /// Hash of the canonical block at `number`, or None if the chain has no
    /// block at that height.
    async fn block_hash_at(&self, number: u64) -> Result<Option<[u8; 32]>, ChainError>;

    /// Receipt for a mined transaction; None while pending or unknown.
    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, ChainError>;

    /// Subscribe to new canonical heads.
    async fn subscribe_new_heads(&self) -> Result<Subscription<HeadRef>, ChainError>;
}

/// Historical and live log access for one contract address.
#[async_trait]
pub trait LogReader: Send + Sync {
    /// All historical logs emitted by `address`.
    async fn logs(&self, address: Address) -> Result<Vec<LogObserved>, ChainError>;

    /// Subscribe to new logs emitted by `address`, including reorg
    /// retractions (`removed == true`).
    async fn subscribe_logs(&self, address: Address) -> Result<Subscription<LogObserved>, ChainError>;
}

/// Everything the bridge exchange needs: [ChainReader] plus transaction
/// lookup, balances, gas and the single submission call.
#[async_trait]
pub trait ExchangeChain: ChainReader {
    async fn transaction_by_hash(&self, tx_hash: TxHash) -> Result<Option<TxLookup>, ChainError>;

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError>;

    async fn suggest_gas_price(&self) -> Result<u128, ChainError>;

    async fn estimate_gas(&self, call: CallRequest) -> Result<u64, ChainError>;

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError>;
}
