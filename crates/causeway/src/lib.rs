//! Causeway: reorg-safe confirmation tracking and bridge exchange over an
//! Ethereum-style chain.
//!
//! - **ConfirmationTracker**: wait until a transaction sits on the canonical
//!   chain with a required number of blocks on top, surviving reorgs (an
//!   off-canonical receipt keeps waiting, it is not a failure).
//! - **EventWatcher**: wait for a confirmed occurrence of a contract event,
//!   scanning backlog plus live feed and racing one confirmation wait per
//!   matching sighting; reorg retractions cancel only their own wait.
//! - **BridgeExchangeEngine**: validate fee deposits, quote exchange fees
//!   with exact never-under-quoting arithmetic, and dispatch token mints.
//!
//! Chain access goes through the narrow capability traits in [chain]
//! ([chain::ChainReader], [chain::LogReader], [chain::ExchangeChain]);
//! [rpc::JsonRpcChain] implements them over JSON-RPC and
//! [testing::MockChain] in memory.

pub mod abi;
pub mod chain;
pub mod config;
pub mod exchange;
mod fee;
pub mod rpc;
pub mod testing;
pub mod tracker;
pub mod watcher;

pub use abi::{claim_match, decode_claim_log, ClaimObserved, CLAIM_EVENT_SIGNATURE};
pub use chain::{
    Address, ChainError, ChainReader, ExchangeChain, HeadRef, LogObserved, LogReader,
    Subscription, TxHash, TxLookup, TxReceipt,
};
pub use config::ChainRpcConfig;
pub use exchange::{BridgeExchangeEngine, DepositValidation, ExchangeError, FeeQuote};
pub use rpc::JsonRpcChain;
pub use tracker::{ConfirmationTracker, TrackError};
pub use watcher::{EventMatch, EventWatcher, WatchError};
