//! Example: validate a fee deposit and mint tokens for its sender.
//!
//! Validates that the deposit transaction paid the bridge account and is
//! buried deep enough, dispatches a mint of the requested amount to the
//! depositor, then waits for the mint itself to confirm. Prints one-line
//! JSON for the validation and the final receipt (works with local chains
//! e.g. Anvil, using node-managed accounts).
//!
//! Usage:
//!
//!   cargo run -p causeway --example bridge_exchange -- \
//!     --http-url <HTTP_URL> --token <TOKEN_ADDRESS> --bridge <BRIDGE_ACCOUNT> \
//!     --deposit-tx <TX_HASH> --amount <TOKENS>
//!
//! Options:
//!   --ws-url <URL>        WebSocket URL. Default: derived from --http-url.
//!   --confirmations <K>   Required confirmation depth. Default: 6.
//!   --fee-rate <R>        Exchange fee rate (e.g. 0.01). Default: 0.01.

use causeway::{BridgeExchangeEngine, ChainRpcConfig, JsonRpcChain};
use tokio_util::sync::CancellationToken;

fn parse_hex_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], String> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| e.to_string())?;
    if bytes.len() != N {
        return Err(format!("{what} must be {N} bytes ({} hex chars)", N * 2));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url = String::new();
    let mut token = String::new();
    let mut bridge = String::new();
    let mut deposit_tx = String::new();
    let mut amount: u128 = 0;
    let mut confirmations: u32 = 6;
    let mut fee_rate: f64 = 0.01;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--http-url" => {
                i += 1;
                http_url = args.get(i).cloned().unwrap_or_default();
            }
            "--ws-url" => {
                i += 1;
                ws_url = args.get(i).cloned().unwrap_or_default();
            }
            "--token" => {
                i += 1;
                token = args.get(i).cloned().unwrap_or_default();
            }
            "--bridge" => {
                i += 1;
                bridge = args.get(i).cloned().unwrap_or_default();
            }
            "--deposit-tx" => {
                i += 1;
                deposit_tx = args.get(i).cloned().unwrap_or_default();
            }
            "--amount" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    amount = s.parse().unwrap_or(0);
                }
            }
            "--confirmations" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    confirmations = s.parse().unwrap_or(6);
                }
            }
            "--fee-rate" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    fee_rate = s.parse().unwrap_or(0.01);
                }
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: bridge_exchange --http-url <HTTP_URL> --token <TOKEN_ADDRESS> \
                     --bridge <BRIDGE_ACCOUNT> --deposit-tx <TX_HASH> --amount <TOKENS> \
                     [--ws-url <URL>] [--confirmations K] [--fee-rate R]"
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || token.is_empty() || bridge.is_empty() || deposit_tx.is_empty() {
        eprintln!(
            "Usage: bridge_exchange --http-url <HTTP_URL> --token <TOKEN_ADDRESS> \
             --bridge <BRIDGE_ACCOUNT> --deposit-tx <TX_HASH> --amount <TOKENS>"
        );
        std::process::exit(1);
    }
    let token_address: [u8; 20] = parse_hex_fixed(&token, "token")?;
    let bridge_account: [u8; 20] = parse_hex_fixed(&bridge, "bridge")?;
    let deposit_tx_hash: [u8; 32] = parse_hex_fixed(&deposit_tx, "deposit-tx")?;

    let config = if ws_url.is_empty() {
        ChainRpcConfig::from_http_url(http_url)
    } else {
        ChainRpcConfig::new(http_url, ws_url)
    };
    let chain = JsonRpcChain::new(config)?;
    let engine = BridgeExchangeEngine::new(chain, token_address);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_cancel.cancel();
            }
        });

        let validation = engine
            .validate_deposit(deposit_tx_hash, bridge_account, confirmations)
            .await?;
        println!("{}", serde_json::to_string(&validation)?);

        let mint_tx = engine
            .send_mint(
                validation.recipient,
                amount,
                bridge_account,
                validation.deposit_amount,
                0,
                0,
                fee_rate,
            )
            .await?;
        tracing::info!(tx = %hex::encode(mint_tx), "mint dispatched, waiting for confirmation");

        let receipt = engine
            .wait_mint_confirmed(mint_tx, confirmations, cancel)
            .await?;
        println!(
            "{{\"mint_tx\":\"0x{}\",\"block_number\":{}}}",
            hex::encode(receipt.tx_hash),
            receipt.block_number
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
