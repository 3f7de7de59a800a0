//! Example: wait for a confirmed TokensClaimed event.
//!
//! Watches the manager contract for the claim matching one
//! (recipient, amount, nonce) triple, surviving reorgs: a retracted sighting
//! keeps the watch alive until the claim is re-mined and buried deep enough.
//! Prints the receipt of the emitting transaction as one-line JSON.
//!
//! Usage:
//!
//!   cargo run -p causeway --example claim_watch -- \
//!     --http-url <HTTP_URL> --contract <MANAGER_ADDRESS> \
//!     --recipient <ADDRESS> --amount <TOKENS> --nonce <N>
//!
//! Options:
//!   --ws-url <URL>  WebSocket URL. Default: derived from --http-url.
//!   --depth <K>     Confirmation depth. Default: 6.

use causeway::{claim_match, ChainRpcConfig, EventWatcher, JsonRpcChain};
use tokio_util::sync::CancellationToken;

fn parse_address(s: &str) -> Result<[u8; 20], String> {
    let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| e.to_string())?;
    if bytes.len() != 20 {
        return Err("address must be 20 bytes (40 hex chars)".into());
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    let mut http_url = String::new();
    let mut ws_url = String::new();
    let mut contract = String::new();
    let mut recipient = String::new();
    let mut amount: u128 = 0;
    let mut nonce: u128 = 0;
    let mut depth: u32 = 6;
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
            "--contract" => {
                i += 1;
                contract = args.get(i).cloned().unwrap_or_default();
            }
            "--recipient" => {
                i += 1;
                recipient = args.get(i).cloned().unwrap_or_default();
            }
            "--amount" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    amount = s.parse().unwrap_or(0);
                }
            }
            "--nonce" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    nonce = s.parse().unwrap_or(0);
                }
            }
            "--depth" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    depth = s.parse().unwrap_or(6);
                }
            }
            "--help" | "-h" => {
                eprintln!(
                    "Usage: claim_watch --http-url <HTTP_URL> --contract <MANAGER_ADDRESS> \
                     --recipient <ADDRESS> --amount <TOKENS> --nonce <N> \
                     [--ws-url <URL>] [--depth K]"
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }
    if http_url.is_empty() || contract.is_empty() || recipient.is_empty() {
        eprintln!(
            "Usage: claim_watch --http-url <HTTP_URL> --contract <MANAGER_ADDRESS> \
             --recipient <ADDRESS> --amount <TOKENS> --nonce <N>"
        );
        std::process::exit(1);
    }
    let contract_address = parse_address(&contract)?;
    let recipient_address = parse_address(&recipient)?;

    let config = if ws_url.is_empty() {
        ChainRpcConfig::from_http_url(http_url)
    } else {
        ChainRpcConfig::new(http_url, ws_url)
    };
    let chain = JsonRpcChain::new(config)?;
    let watcher = EventWatcher::new(chain, contract_address);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c_cancel.cancel();
            }
        });
        let receipt = watcher
            .wait_for_confirmed_event(
                claim_match(recipient_address, amount, nonce),
                depth,
                cancel,
            )
            .await?;
        println!(
            "{{\"claim_tx\":\"0x{}\",\"block_number\":{}}}",
            hex::encode(receipt.tx_hash),
            receipt.block_number
        );
        Ok::<_, Box<dyn std::error::Error>>(())
    })?;
    Ok(())
}
