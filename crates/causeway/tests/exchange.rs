//! Bridge exchange: deposit validation, fee quoting and mint dispatch.

mod common;

use causeway::abi::mint_calldata;
use causeway::testing::MockChain;
use causeway::{BridgeExchangeEngine, ChainError, ExchangeError};
use common::{addr, hash};
use tokio_util::sync::CancellationToken;

const TOKEN: causeway::Address = [0xee; 20];
const BRIDGE: causeway::Address = [0xbb; 20];

fn engine(chain: &MockChain) -> BridgeExchangeEngine<MockChain> {
    BridgeExchangeEngine::new(chain.clone(), TOKEN)
}

#[tokio::test]
async fn accepts_a_deposit_buried_deep_enough() {
    let chain = MockChain::new();
    let depositor = addr(0x11);
    let deposit = chain.submit_transfer(depositor, BRIDGE, 1000);
    chain.mine();
    chain.mine_blocks(6);

    let validation = engine(&chain)
        .validate_deposit(deposit, BRIDGE, 6)
        .await
        .unwrap();
    assert_eq!(validation.recipient, depositor);
    assert_eq!(validation.deposit_amount, 1000);
    assert_eq!(validation.source_tx_hash, deposit);
}

#[tokio::test]
async fn rejects_a_deposit_below_required_depth() {
    let chain = MockChain::new();
    let deposit = chain.submit_transfer(addr(0x11), BRIDGE, 1000);
    chain.mine();
    chain.mine_blocks(5);

    let err = engine(&chain)
        .validate_deposit(deposit, BRIDGE, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::UnconfirmedTransaction));
}

#[tokio::test]
async fn rejects_unknown_and_pending_deposits() {
    let chain = MockChain::new();
    let err = engine(&chain)
        .validate_deposit(hash(0xde), BRIDGE, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::UnknownTransaction));

    let pending = chain.submit_transfer(addr(0x11), BRIDGE, 1000);
    let err = engine(&chain)
        .validate_deposit(pending, BRIDGE, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::UnconfirmedTransaction));
}

#[tokio::test]
async fn rejects_a_deposit_paid_to_someone_else() {
    let chain = MockChain::new();
    let deposit = chain.submit_transfer(addr(0x11), addr(0x99), 1000);
    chain.mine();
    chain.mine_blocks(6);

    let err = engine(&chain)
        .validate_deposit(deposit, BRIDGE, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InvalidDeposit));
}

#[tokio::test]
async fn rejects_a_deposit_whose_block_was_reorged_out() {
    let chain = MockChain::new();
    let deposit = chain.submit_transfer(addr(0x11), BRIDGE, 1000);
    chain.mine();
    chain.mine_blocks(6);
    chain.reorg(7);
    chain.drop_pending_transaction(deposit);
    chain.mine_blocks(7);

    let err = engine(&chain)
        .validate_deposit(deposit, BRIDGE, 6)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::UnknownTransaction));
}

#[tokio::test]
async fn quotes_a_fee_from_the_live_estimate() {
    let chain = MockChain::new();
    chain.set_gas_price(10);
    chain.set_estimate_gas(21_000);

    let quote = engine(&chain)
        .estimate_exchange_fee(addr(0x11), 100, BRIDGE, 0, 0.0)
        .await
        .unwrap();
    assert_eq!(quote.estimated_gas, 21_000);
    assert_eq!(quote.gas_price, 10);
    assert_eq!(quote.required_transfer_amount, 210_000);
}

#[tokio::test]
async fn quote_rounds_up_and_respects_the_gas_floor() {
    let chain = MockChain::new();
    chain.set_gas_price(10);
    chain.set_estimate_gas(5);

    // Floor lifts the estimate to 10; binary 0.1 makes 10*10*1.1 non-integral,
    // so the quote rounds up by a whole gas_price unit.
    let quote = engine(&chain)
        .estimate_exchange_fee(addr(0x11), 100, BRIDGE, 10, 0.1)
        .await
        .unwrap();
    assert_eq!(quote.estimated_gas, 10);
    assert_eq!(quote.required_transfer_amount, 120);
}

#[tokio::test]
async fn unfunded_account_falls_back_to_the_default_mint_gas() {
    let chain = MockChain::new();
    chain.set_gas_price(10);
    chain.set_estimate_gas_error("insufficient funds for gas * price + value");

    let quote = engine(&chain)
        .estimate_exchange_fee(addr(0x11), 100, BRIDGE, 21_000, 0.0)
        .await
        .unwrap();
    assert_eq!(quote.estimated_gas, 60_000);
    assert_eq!(quote.required_transfer_amount, 600_000);
}

#[tokio::test]
async fn other_estimation_failures_propagate() {
    let chain = MockChain::new();
    chain.set_estimate_gas_error("execution reverted");

    let err = engine(&chain)
        .estimate_exchange_fee(addr(0x11), 100, BRIDGE, 0, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Chain(ChainError::Rpc(_))));
}

#[tokio::test]
async fn rejects_bad_fee_rates_before_touching_the_chain() {
    let chain = MockChain::new();
    chain.set_read_error(Some("must not be called".into()));

    let err = engine(&chain)
        .estimate_exchange_fee(addr(0x11), 100, BRIDGE, 0, f64::NAN)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InvalidFeeRate));

    let err = engine(&chain)
        .send_mint(addr(0x11), 100, BRIDGE, 1000, 0, 0, -0.1)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InvalidFeeRate));
}

#[tokio::test]
async fn mint_requires_the_minter_to_hold_the_deposit() {
    let chain = MockChain::new();
    chain.set_balance(BRIDGE, 999);

    let err = engine(&chain)
        .send_mint(addr(0x11), 100, BRIDGE, 1000, 0, 1, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientBalance));
}

#[tokio::test]
async fn mint_rejects_a_stale_gas_estimate() {
    let chain = MockChain::new();
    chain.set_balance(BRIDGE, 1_000_000);
    chain.set_estimate_gas(21_000);

    let err = engine(&chain)
        .send_mint(addr(0x11), 100, BRIDGE, 1_000_000, 20_000, 1, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientGas));
}

#[tokio::test]
async fn mint_estimation_failure_propagates_without_fallback() {
    let chain = MockChain::new();
    chain.set_balance(BRIDGE, 1_000_000);
    chain.set_estimate_gas_error("insufficient funds for gas * price + value");

    let err = engine(&chain)
        .send_mint(addr(0x11), 100, BRIDGE, 1_000_000, 0, 1, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::Chain(ChainError::Rpc(_))));
}

#[tokio::test]
async fn mint_derives_the_gas_price_from_the_deposit() {
    let chain = MockChain::new();
    chain.set_balance(BRIDGE, 100);
    chain.set_estimate_gas(10);
    let recipient = addr(0x11);

    // deposit 100, rate 0.1, gas 10: budget ~90.9, per-gas price truncates to 9.
    engine(&chain)
        .send_mint(recipient, 42, BRIDGE, 100, 0, 0, 0.1)
        .await
        .unwrap();

    let sent = chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, TOKEN);
    assert_eq!(sent[0].gas_limit, 10);
    assert_eq!(sent[0].gas_price, 9);
    assert_eq!(sent[0].data, mint_calldata(recipient, 42));
}

#[tokio::test]
async fn mint_rejects_a_fee_the_deposit_cannot_cover() {
    let chain = MockChain::new();
    chain.set_balance(BRIDGE, 50);
    chain.set_estimate_gas(10);

    let err = engine(&chain)
        .send_mint(addr(0x11), 42, BRIDGE, 50, 0, 10, 0.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientTransactionFee));
}

#[tokio::test]
async fn exchange_mints_for_the_depositor_and_confirms() {
    let chain = MockChain::new();
    let depositor = addr(0x11);
    let deposit = chain.submit_transfer(depositor, BRIDGE, 1000);
    chain.mine();
    chain.mine_blocks(2);
    chain.set_gas_price(10);
    chain.set_estimate_gas(21_000);
    chain.set_auto_mine(true);

    let engine = engine(&chain);
    let (recipient, mint_tx) = engine.exchange(deposit, 42, BRIDGE, 2).await.unwrap();
    assert_eq!(recipient, depositor);

    let receipt = engine
        .wait_mint_confirmed(mint_tx, 0, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(receipt.tx_hash, mint_tx);

    let sent = chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].data, mint_calldata(depositor, 42));
    assert_eq!(sent[0].gas_price, 10);
}

#[tokio::test]
async fn exchange_does_not_gate_on_the_counterparty() {
    let chain = MockChain::new();
    let depositor = addr(0x11);
    let deposit = chain.submit_transfer(depositor, addr(0x99), 1000);
    chain.mine();
    chain.mine_blocks(2);
    chain.set_auto_mine(true);

    let (recipient, _) = engine(&chain).exchange(deposit, 42, BRIDGE, 2).await.unwrap();
    assert_eq!(recipient, depositor);
}
