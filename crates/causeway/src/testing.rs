//! In-memory chain fake implementing every capability trait.
//!
//! [MockChain] is a single-threaded model of a reorg-capable chain: submit
//! transactions, queue logs, mine blocks, then rewind the tip to retract
//! them again. Mining pushes heads and logs into open subscriptions, so the
//! tracker and watcher loops run against it unmodified. Clones share state.

use crate::chain::{
    Address, CallRequest, ChainError, ChainReader, ExchangeChain, HeadRef, LogObserved, LogReader,
    Subscription, TxHash, TxLookup, TxReceipt, TxRequest,
};
use async_trait::async_trait;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct Block {
    number: u64,
    hash: [u8; 32],
    txs: Vec<TxHash>,
}

#[derive(Debug, Clone)]
struct StoredTx {
    from: Address,
    to: Option<Address>,
    value: u128,
}

#[derive(Debug, Clone)]
struct QueuedLog {
    address: Address,
    topics: Vec<[u8; 32]>,
    data: Vec<u8>,
    tx_hash: TxHash,
}

struct Inner {
    blocks: Vec<Block>,
    txs: HashMap<TxHash, StoredTx>,
    pending: Vec<TxHash>,
    queued_logs: Vec<QueuedLog>,
    logs: Vec<LogObserved>,
    balances: HashMap<Address, u128>,
    gas_price: u128,
    estimate_gas: Result<u64, String>,
    sent: Vec<TxRequest>,
    head_subs: Vec<mpsc::UnboundedSender<HeadRef>>,
    log_subs: Vec<(Address, mpsc::UnboundedSender<LogObserved>)>,
    auto_mine: bool,
    read_error: Option<String>,
    // Bumped on every rewind so re-mined blocks get fresh hashes.
    fork: u64,
    seq: u64,
}

/// Shared-state in-memory chain for tests and examples.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// A chain with only the genesis block mined.
    pub fn new() -> Self {
        let genesis = Block {
            number: 0,
            hash: digest(&[b"block", &0u64.to_be_bytes()[..], &0u64.to_be_bytes()[..]]),
            txs: Vec::new(),
        };
        Self {
            inner: Arc::new(Mutex::new(Inner {
                blocks: vec![genesis],
                txs: HashMap::new(),
                pending: Vec::new(),
                queued_logs: Vec::new(),
                logs: Vec::new(),
                balances: HashMap::new(),
                gas_price: 1_000_000_000,
                estimate_gas: Ok(21_000),
                sent: Vec::new(),
                head_subs: Vec::new(),
                log_subs: Vec::new(),
                auto_mine: false,
                read_error: None,
                fork: 0,
                seq: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("mock chain lock poisoned")
    }

    /// Submit a value transfer; it stays pending until the next mine.
    pub fn submit_transfer(&self, from: Address, to: Address, value: u128) -> TxHash {
        let mut inner = self.lock();
        let seq = inner.next_seq();
        let hash = digest(&[b"tx", &seq.to_be_bytes()[..]]);
        inner.txs.insert(
            hash,
            StoredTx {
                from,
                to: Some(to),
                value,
            },
        );
        inner.pending.push(hash);
        hash
    }

    /// Queue a log to be emitted by the block that mines `tx_hash`. The
    /// transaction must be pending (or be queued alongside via
    /// [Self::submit_transfer]).
    pub fn queue_log(&self, address: Address, topics: Vec<[u8; 32]>, tx_hash: TxHash) {
        self.lock().queued_logs.push(QueuedLog {
            address,
            topics,
            data: Vec::new(),
            tx_hash,
        });
    }

    /// Mine one block containing all pending transactions and queued logs,
    /// and push the new head to subscribers.
    pub fn mine(&self) -> HeadRef {
        self.lock().mine()
    }

    pub fn mine_blocks(&self, n: u64) {
        let mut inner = self.lock();
        for _ in 0..n {
            inner.mine();
        }
    }

    /// Rewind the tip by `depth` blocks. Transactions in the dropped blocks
    /// go back to pending and their logs are re-queued, so the next mines
    /// re-include them under fresh block hashes; subscribers see each
    /// dropped log again with `removed == true`.
    pub fn reorg(&self, depth: u64) {
        let mut inner = self.lock();
        inner.fork += 1;
        for _ in 0..depth {
            if inner.blocks.len() <= 1 {
                break;
            }
            let block = match inner.blocks.pop() {
                Some(block) => block,
                None => break,
            };
            let mut repend = block.txs.clone();
            repend.extend(inner.pending.drain(..));
            inner.pending = repend;
            let (dropped, kept): (Vec<_>, Vec<_>) = inner
                .logs
                .drain(..)
                .partition(|log| log.block_number == block.number);
            inner.logs = kept;
            for log in dropped {
                let mut retraction = log.clone();
                retraction.removed = true;
                inner.broadcast_log(retraction);
                inner.queued_logs.push(QueuedLog {
                    address: log.address,
                    topics: log.topics,
                    data: log.data,
                    tx_hash: log.tx_hash,
                });
            }
        }
    }

    /// Permanently discard a pending transaction and its queued logs, so a
    /// retracted transaction is never re-mined.
    pub fn drop_pending_transaction(&self, tx_hash: TxHash) {
        let mut inner = self.lock();
        inner.pending.retain(|h| *h != tx_hash);
        inner.queued_logs.retain(|l| l.tx_hash != tx_hash);
    }

    pub fn set_balance(&self, address: Address, balance: u128) {
        self.lock().balances.insert(address, balance);
    }

    pub fn set_gas_price(&self, gas_price: u128) {
        self.lock().gas_price = gas_price;
    }

    pub fn set_estimate_gas(&self, gas: u64) {
        self.lock().estimate_gas = Ok(gas);
    }

    /// Make gas estimation fail with an RPC error carrying `message`.
    pub fn set_estimate_gas_error(&self, message: impl Into<String>) {
        self.lock().estimate_gas = Err(message.into());
    }

    /// Mine a block immediately whenever a transaction is sent.
    pub fn set_auto_mine(&self, auto_mine: bool) {
        self.lock().auto_mine = auto_mine;
    }

    /// Make every read fail with a transport error until cleared with None.
    pub fn set_read_error(&self, message: Option<String>) {
        self.lock().read_error = message;
    }

    /// Head subscriptions whose receiver is still alive. Each in-flight
    /// confirmation wait holds exactly one.
    pub fn open_head_subscriptions(&self) -> usize {
        self.lock()
            .head_subs
            .iter()
            .filter(|sub| !sub.is_closed())
            .count()
    }

    /// Drop all open subscription senders, closing their channels.
    pub fn break_subscriptions(&self) {
        let mut inner = self.lock();
        inner.head_subs.clear();
        inner.log_subs.clear();
    }

    /// Transactions submitted through [ExchangeChain::send_transaction].
    pub fn sent_transactions(&self) -> Vec<TxRequest> {
        self.lock().sent.clone()
    }

    pub fn head(&self) -> HeadRef {
        let inner = self.lock();
        let tip = &inner.blocks[inner.blocks.len() - 1];
        HeadRef {
            number: tip.number,
            hash: tip.hash,
        }
    }
}

impl Inner {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn mine(&mut self) -> HeadRef {
        let number = self.blocks.len() as u64;
        let hash = digest(&[
            b"block",
            &number.to_be_bytes()[..],
            &self.fork.to_be_bytes()[..],
        ]);
        let txs: Vec<TxHash> = self.pending.drain(..).collect();
        let mined: Vec<QueuedLog> = std::mem::take(&mut self.queued_logs);
        for (index, queued) in mined.into_iter().enumerate() {
            let log = LogObserved {
                address: queued.address,
                topics: queued.topics,
                data: queued.data,
                block_number: number,
                block_hash: hash,
                tx_hash: queued.tx_hash,
                log_index: index as u64,
                removed: false,
            };
            self.logs.push(log.clone());
            self.broadcast_log(log);
        }
        self.blocks.push(Block { number, hash, txs });
        let head = HeadRef { number, hash };
        self.head_subs.retain(|sub| sub.send(head).is_ok());
        head
    }

    fn broadcast_log(&mut self, log: LogObserved) {
        self.log_subs
            .retain(|(address, sub)| *address != log.address || sub.send(log.clone()).is_ok());
    }

    fn check_read_error(&self) -> Result<(), ChainError> {
        match &self.read_error {
            Some(message) => Err(ChainError::Transport(message.clone())),
            None => Ok(()),
        }
    }

    fn receipt_of(&self, tx_hash: TxHash) -> Option<TxReceipt> {
        self.blocks.iter().find_map(|block| {
            block.txs.contains(&tx_hash).then_some(TxReceipt {
                tx_hash,
                block_number: block.number,
                block_hash: block.hash,
            })
        })
    }
}

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[async_trait]
impl ChainReader for MockChain {
    async fn head_number(&self) -> Result<u64, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner.blocks.len() as u64 - 1)
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<[u8; 32]>, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner.blocks.get(number as usize).map(|b| b.hash))
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner.receipt_of(tx_hash))
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<HeadRef>, ChainError> {
        let mut inner = self.lock();
        inner.check_read_error()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.head_subs.push(sender);
        Ok(receiver)
    }
}

#[async_trait]
impl LogReader for MockChain {
    async fn logs(&self, address: Address) -> Result<Vec<LogObserved>, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner
            .logs
            .iter()
            .filter(|log| log.address == address)
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self, address: Address) -> Result<Subscription<LogObserved>, ChainError> {
        let mut inner = self.lock();
        inner.check_read_error()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.log_subs.push((address, sender));
        Ok(receiver)
    }
}

#[async_trait]
impl ExchangeChain for MockChain {
    async fn transaction_by_hash(&self, tx_hash: TxHash) -> Result<Option<TxLookup>, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        let Some(tx) = inner.txs.get(&tx_hash) else {
            return Ok(None);
        };
        Ok(Some(TxLookup {
            hash: tx_hash,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            pending: inner.pending.contains(&tx_hash),
        }))
    }

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner.balances.get(&address).copied().unwrap_or(0))
    }

    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        Ok(inner.gas_price)
    }

    async fn estimate_gas(&self, _call: CallRequest) -> Result<u64, ChainError> {
        let inner = self.lock();
        inner.check_read_error()?;
        inner
            .estimate_gas
            .clone()
            .map_err(ChainError::Rpc)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let mut inner = self.lock();
        inner.check_read_error()?;
        let seq = inner.next_seq();
        let hash = digest(&[b"tx", &seq.to_be_bytes()[..]]);
        inner.txs.insert(
            hash,
            StoredTx {
                from: tx.from,
                to: Some(tx.to),
                value: tx.value,
            },
        );
        inner.pending.push(hash);
        inner.sent.push(tx);
        if inner.auto_mine {
            inner.mine();
        }
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mined_transfer_gets_a_receipt() {
        let chain = MockChain::new();
        let tx = chain.submit_transfer([1; 20], [2; 20], 500);
        assert!(chain.transaction_receipt(tx).await.unwrap().is_none());
        chain.mine();
        let receipt = chain.transaction_receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 1);
        assert_eq!(chain.head_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn reorg_changes_the_block_hash_at_a_height() {
        let chain = MockChain::new();
        let tx = chain.submit_transfer([1; 20], [2; 20], 500);
        chain.mine();
        let before = chain.block_hash_at(1).await.unwrap().unwrap();
        chain.reorg(1);
        assert!(chain.block_hash_at(1).await.unwrap().is_none());
        chain.mine();
        let after = chain.block_hash_at(1).await.unwrap().unwrap();
        assert_ne!(before, after);
        // The transaction was re-mined into the replacement block.
        let receipt = chain.transaction_receipt(tx).await.unwrap().unwrap();
        assert_eq!(receipt.block_hash, after);
    }

    #[tokio::test]
    async fn retracted_logs_are_rebroadcast_as_removed() {
        let chain = MockChain::new();
        let contract = [0xcc; 20];
        let mut sub = chain.subscribe_logs(contract).await.unwrap();
        let tx = chain.submit_transfer([1; 20], contract, 0);
        chain.queue_log(contract, vec![[7; 32]], tx);
        chain.mine();
        let seen = sub.recv().await.unwrap();
        assert!(!seen.removed);
        chain.reorg(1);
        let retracted = sub.recv().await.unwrap();
        assert!(retracted.removed);
        assert_eq!(retracted.tx_hash, tx);
    }
}
