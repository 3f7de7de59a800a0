//! BridgeExchangeEngine: deposit validation and fee-aware mint dispatch.
//!
//! The bridge flow: a user deposits value to the bridge account on the source
//! side, the engine validates that deposit (canonical inclusion at the
//! required depth, correct counterparty), quotes the fee the deposit must
//! cover, and dispatches a `mint` to the token contract for the deposit's
//! sender. Confirmation of the mint itself is a separate step
//! ([BridgeExchangeEngine::wait_mint_confirmed]).

use crate::abi;
use crate::chain::{Address, CallRequest, ChainError, ExchangeChain, TxHash, TxLookup, TxReceipt, TxRequest};
use crate::fee;
use crate::tracker::{ConfirmationTracker, TrackError};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Gas limit assumed for an ERC20 mint when estimation fails only because
/// the bridge account cannot fund the simulation. Applies to fee quoting
/// only; mint dispatch propagates the estimation failure instead.
const FALLBACK_MINT_GAS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("transaction hash not known to the chain")]
    UnknownTransaction,
    #[error("transaction is not confirmed on the canonical chain")]
    UnconfirmedTransaction,
    #[error("deposit was not sent to the bridge account")]
    InvalidDeposit,
    #[error("minter balance does not cover the received deposit")]
    InsufficientBalance,
    #[error("supplied gas estimate is below the current estimate")]
    InsufficientGas,
    #[error("deposit fee budget does not cover the transaction fee")]
    InsufficientTransactionFee,
    #[error("fee rate must be a finite non-negative number")]
    InvalidFeeRate,
    #[error("confirmation wait cancelled")]
    Cancelled,
    #[error(transparent)]
    Chain(#[from] ChainError),
}

impl From<TrackError> for ExchangeError {
    fn from(err: TrackError) -> Self {
        match err {
            TrackError::Cancelled => ExchangeError::Cancelled,
            TrackError::Chain(e) => ExchangeError::Chain(e),
        }
    }
}

/// Outcome of validating a fee deposit. Consumed immediately to drive a
/// mint; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DepositValidation {
    /// The deposit's sender, who receives the minted tokens.
    pub recipient: Address,
    /// The deposited value in wei.
    pub deposit_amount: u128,
    pub source_tx_hash: TxHash,
}

/// A fee quote snapshot. Goes stale as the gas price moves; re-quote if
/// significant time passes before the deposit is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeQuote {
    /// Amount the depositor must transfer so the fee is always covered.
    pub required_transfer_amount: u128,
    pub estimated_gas: u64,
    pub gas_price: u128,
}

/// Validates deposits and dispatches mints against one token contract.
pub struct BridgeExchangeEngine<C> {
    chain: C,
    token_address: Address,
}

impl<C> BridgeExchangeEngine<C>
where
    C: ExchangeChain + Clone + 'static,
{
    pub fn new(chain: C, token_address: Address) -> Self {
        Self {
            chain,
            token_address,
        }
    }

    /// Validate that `deposit_tx_hash` is a settled transfer to
    /// `bridge_address`, canonically included with at least
    /// `required_confirmations` blocks on top.
    pub async fn validate_deposit(
        &self,
        deposit_tx_hash: TxHash,
        bridge_address: Address,
        required_confirmations: u32,
    ) -> Result<DepositValidation, ExchangeError> {
        let tx = self.lookup_settled(deposit_tx_hash).await?;
        if tx.to != Some(bridge_address) {
            return Err(ExchangeError::InvalidDeposit);
        }
        self.ensure_canonical_depth(deposit_tx_hash, required_confirmations)
            .await?;
        tracing::info!(
            tx = %hex::encode(deposit_tx_hash),
            recipient = %hex::encode(tx.from),
            amount = tx.value,
            "deposit validated"
        );
        Ok(DepositValidation {
            recipient: tx.from,
            deposit_amount: tx.value,
            source_tx_hash: deposit_tx_hash,
        })
    }

    /// Quote the transfer amount a depositor must send to cover one mint of
    /// `mint_amount` to `recipient`, with the fee margin applied.
    pub async fn estimate_exchange_fee(
        &self,
        recipient: Address,
        mint_amount: u128,
        bridge_account: Address,
        min_gas: u64,
        fee_rate: f64,
    ) -> Result<FeeQuote, ExchangeError> {
        check_fee_rate(fee_rate)?;
        let gas_price = self.chain.suggest_gas_price().await?;
        let data = abi::mint_calldata(recipient, mint_amount);
        let estimated = self
            .chain
            .estimate_gas(CallRequest {
                from: bridge_account,
                to: self.token_address,
                value: 0,
                gas_price,
                data,
            })
            .await;
        let estimated_gas = match estimated {
            Ok(gas) => gas,
            // A brand-new bridge account with zero balance cannot even
            // simulate the call; quote with a conservative mint gas limit.
            Err(ChainError::Rpc(message)) if message.contains("insufficient funds") => {
                tracing::debug!(
                    account = %hex::encode(bridge_account),
                    "gas estimation failed for unfunded account, using fallback"
                );
                FALLBACK_MINT_GAS
            }
            Err(e) => return Err(e.into()),
        };
        let estimated_gas = estimated_gas.max(min_gas);
        let required_transfer_amount =
            fee::required_transfer_amount(gas_price, estimated_gas, fee_rate)
                .ok_or(ExchangeError::InvalidFeeRate)?;
        Ok(FeeQuote {
            required_transfer_amount,
            estimated_gas,
            gas_price,
        })
    }

    /// Dispatch a mint of `mint_amount` to `recipient`, funded by a deposit
    /// of `received_deposit_amount` already credited to `minter`.
    ///
    /// `estimated_gas == 0` adopts a fresh estimate; a positive value below
    /// the fresh estimate is rejected as stale. `gas_price == 0` derives the
    /// price from the deposit's fee budget. Returns the mint transaction
    /// hash without waiting for confirmation.
    #[allow(clippy::too_many_arguments)]
    pub async fn send_mint(
        &self,
        recipient: Address,
        mint_amount: u128,
        minter: Address,
        received_deposit_amount: u128,
        estimated_gas: u64,
        gas_price: u128,
        fee_rate: f64,
    ) -> Result<TxHash, ExchangeError> {
        check_fee_rate(fee_rate)?;
        let balance = self.chain.balance_of(minter).await?;
        if balance < received_deposit_amount {
            return Err(ExchangeError::InsufficientBalance);
        }
        let data = abi::mint_calldata(recipient, mint_amount);
        let fresh_estimate = self
            .chain
            .estimate_gas(CallRequest {
                from: minter,
                to: self.token_address,
                value: 0,
                gas_price,
                data: data.clone(),
            })
            .await?;
        let gas_limit = if estimated_gas == 0 {
            fresh_estimate
        } else if estimated_gas < fresh_estimate {
            return Err(ExchangeError::InsufficientGas);
        } else {
            estimated_gas
        };
        let gas_price = if gas_price == 0 {
            fee::derive_gas_price(received_deposit_amount, fee_rate, gas_limit)
                .ok_or(ExchangeError::InvalidFeeRate)?
        } else {
            gas_price
        };
        let covered = fee::covers_transaction_fee(received_deposit_amount, fee_rate, gas_limit, gas_price)
            .ok_or(ExchangeError::InvalidFeeRate)?;
        if !covered {
            return Err(ExchangeError::InsufficientTransactionFee);
        }
        let mint_tx_hash = self
            .chain
            .send_transaction(TxRequest {
                from: minter,
                to: self.token_address,
                value: 0,
                gas_limit,
                gas_price,
                data,
            })
            .await?;
        tracing::info!(
            tx = %hex::encode(mint_tx_hash),
            recipient = %hex::encode(recipient),
            amount = mint_amount,
            gas_limit,
            gas_price,
            "mint dispatched"
        );
        Ok(mint_tx_hash)
    }

    /// Validate the deposit's canonical inclusion depth and immediately
    /// dispatch a plain mint of `mint_amount` to the deposit's sender.
    ///
    /// Unlike [Self::validate_deposit] this does not gate on the deposit's
    /// counterparty, and unlike [Self::estimate_exchange_fee] a failed gas
    /// estimate propagates instead of falling back.
    pub async fn exchange(
        &self,
        deposit_tx_hash: TxHash,
        mint_amount: u128,
        minter: Address,
        required_confirmations: u32,
    ) -> Result<(Address, TxHash), ExchangeError> {
        let tx = self.lookup_settled(deposit_tx_hash).await?;
        self.ensure_canonical_depth(deposit_tx_hash, required_confirmations)
            .await?;
        let recipient = tx.from;
        let gas_price = self.chain.suggest_gas_price().await?;
        let data = abi::mint_calldata(recipient, mint_amount);
        let gas_limit = self
            .chain
            .estimate_gas(CallRequest {
                from: minter,
                to: self.token_address,
                value: 0,
                gas_price,
                data: data.clone(),
            })
            .await?;
        let mint_tx_hash = self
            .chain
            .send_transaction(TxRequest {
                from: minter,
                to: self.token_address,
                value: 0,
                gas_limit,
                gas_price,
                data,
            })
            .await?;
        Ok((recipient, mint_tx_hash))
    }

    /// Wait until a dispatched mint reaches `required_confirmations` depth.
    pub async fn wait_mint_confirmed(
        &self,
        mint_tx_hash: TxHash,
        required_confirmations: u32,
        cancel: CancellationToken,
    ) -> Result<TxReceipt, ExchangeError> {
        let tracker = ConfirmationTracker::new(self.chain.clone());
        let receipt = tracker
            .track(mint_tx_hash, required_confirmations, cancel)
            .await?;
        Ok(receipt)
    }

    /// Look the transaction up, rejecting unknown hashes and still-pending
    /// transactions.
    async fn lookup_settled(&self, tx_hash: TxHash) -> Result<TxLookup, ExchangeError> {
        let tx = self
            .chain
            .transaction_by_hash(tx_hash)
            .await?
            .ok_or(ExchangeError::UnknownTransaction)?;
        if tx.pending {
            return Err(ExchangeError::UnconfirmedTransaction);
        }
        Ok(tx)
    }

    /// Reject unless the receipt's block is still canonical and buried under
    /// at least `required_confirmations` newer blocks.
    async fn ensure_canonical_depth(
        &self,
        tx_hash: TxHash,
        required_confirmations: u32,
    ) -> Result<(), ExchangeError> {
        let receipt = self
            .chain
            .transaction_receipt(tx_hash)
            .await?
            .ok_or(ExchangeError::UnknownTransaction)?;
        match self.chain.block_hash_at(receipt.block_number).await? {
            Some(hash) if hash == receipt.block_hash => {}
            _ => return Err(ExchangeError::UnconfirmedTransaction),
        }
        let head = self.chain.head_number().await?;
        if head.saturating_sub(receipt.block_number) < u64::from(required_confirmations) {
            return Err(ExchangeError::UnconfirmedTransaction);
        }
        Ok(())
    }
}

fn check_fee_rate(fee_rate: f64) -> Result<(), ExchangeError> {
    if !fee_rate.is_finite() || fee_rate < 0.0 {
        return Err(ExchangeError::InvalidFeeRate);
    }
    Ok(())
}
