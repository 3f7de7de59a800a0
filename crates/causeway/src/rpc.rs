//! Default ChainClient over JSON-RPC: HTTP for reads and submission,
//! WebSocket `eth_subscribe` for live heads and logs.
//!
//! One pump task per subscription; any transport error ends the task and
//! closes the channel, which consumers see as the subscription failing. No
//! reconnection happens here: the watching layers surface errors and leave
//! retry policy to their callers.

use crate::chain::{
    Address, CallRequest, ChainError, ChainReader, ExchangeChain, HeadRef, LogObserved, LogReader,
    Subscription, TxHash, TxLookup, TxReceipt, TxRequest,
};
use crate::config::ChainRpcConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON-RPC chain client. Cheap to clone; clones share the HTTP pool.
#[derive(Debug, Clone)]
pub struct JsonRpcChain {
    config: ChainRpcConfig,
    http: reqwest::Client,
}

impl JsonRpcChain {
    pub fn new(config: ChainRpcConfig) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    async fn http_json_rpc(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });
        let resp = self
            .http
            .post(&self.config.http_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let json: Value = resp
            .json()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        if let Some(err) = json.get("error") {
            return Err(ChainError::Rpc(rpc_error_message(err)));
        }
        json.get("result")
            .cloned()
            .ok_or_else(|| ChainError::Decode("missing result".into()))
    }

    async fn ws_subscribe(&self, params: Value) -> Result<WsStream, ChainError> {
        let (mut ws, _) = connect_async(&self.config.ws_url)
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_subscribe",
            "params": params
        });
        ws.send(Message::Text(request.to_string()))
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let response = timeout(SUBSCRIBE_TIMEOUT, ws.next())
            .await
            .map_err(|_| ChainError::Transport("subscribe timeout".into()))?
            .ok_or(ChainError::SubscriptionClosed)?
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        let text = match response {
            Message::Text(text) => text,
            _ => return Err(ChainError::Decode("unexpected subscribe response".into())),
        };
        let value: Value =
            serde_json::from_str(&text).map_err(|e| ChainError::Decode(e.to_string()))?;
        if let Some(err) = value.get("error") {
            return Err(ChainError::Rpc(rpc_error_message(err)));
        }
        value
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| ChainError::Decode("missing subscription id".into()))?;
        Ok(ws)
    }
}

#[async_trait]
impl ChainReader for JsonRpcChain {
    async fn head_number(&self) -> Result<u64, ChainError> {
        let result = self.http_json_rpc("eth_blockNumber", json!([])).await?;
        parse_hex_u64(as_str(&result)?)
    }

    async fn block_hash_at(&self, number: u64) -> Result<Option<[u8; 32]>, ChainError> {
        let result = self
            .http_json_rpc(
                "eth_getBlockByNumber",
                json!([format!("0x{:x}", number), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let hash = result
            .get("hash")
            .and_then(|h| h.as_str())
            .ok_or_else(|| ChainError::Decode("block missing hash".into()))?;
        Ok(Some(parse_hex_32(hash)?))
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let result = self
            .http_json_rpc("eth_getTransactionReceipt", json!([fmt_hex(&tx_hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(TxReceipt {
            tx_hash: parse_hex_32(field_str(&result, "transactionHash")?)?,
            block_number: parse_hex_u64(field_str(&result, "blockNumber")?)?,
            block_hash: parse_hex_32(field_str(&result, "blockHash")?)?,
        }))
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<HeadRef>, ChainError> {
        let ws = self.ws_subscribe(json!(["newHeads"])).await?;
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_pump(ws, sender, decode_head);
        Ok(receiver)
    }
}

#[async_trait]
impl LogReader for JsonRpcChain {
    async fn logs(&self, address: Address) -> Result<Vec<LogObserved>, ChainError> {
        let filter = json!({
            "address": fmt_hex(&address),
            "fromBlock": "0x0",
            "toBlock": "latest"
        });
        let result = self.http_json_rpc("eth_getLogs", json!([filter])).await?;
        let array = result
            .as_array()
            .ok_or_else(|| ChainError::Decode("getLogs result not an array".into()))?;
        Ok(array
            .iter()
            .filter_map(|raw| {
                decode_log(raw)
                    .map_err(|e| tracing::debug!(reason = %e, "skipping undecodable log"))
                    .ok()
            })
            .collect())
    }

    async fn subscribe_logs(&self, address: Address) -> Result<Subscription<LogObserved>, ChainError> {
        let filter = json!({ "address": fmt_hex(&address) });
        let ws = match self.ws_subscribe(json!(["logs", filter])).await {
            Ok(ws) => ws,
            // Some nodes (Anvil among them) reject the filter parameter
            // shape; resubscribe unfiltered and filter client-side below.
            Err(ChainError::Rpc(message))
                if message.contains("data did not match") || message.contains("variant") =>
            {
                tracing::warn!("node rejected logs filter, filtering client-side");
                self.ws_subscribe(json!(["logs"])).await?
            }
            Err(e) => return Err(e),
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        spawn_pump(ws, sender, move |result| {
            let log = decode_log(result).ok()?;
            (log.address == address).then_some(log)
        });
        Ok(receiver)
    }
}

#[async_trait]
impl ExchangeChain for JsonRpcChain {
    async fn transaction_by_hash(&self, tx_hash: TxHash) -> Result<Option<TxLookup>, ChainError> {
        let result = self
            .http_json_rpc("eth_getTransactionByHash", json!([fmt_hex(&tx_hash)]))
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        let pending = result
            .get("blockNumber")
            .map(|n| n.is_null())
            .unwrap_or(true);
        let to = match result.get("to") {
            Some(Value::String(s)) => Some(parse_hex_20(s)?),
            _ => None,
        };
        Ok(Some(TxLookup {
            hash: parse_hex_32(field_str(&result, "hash")?)?,
            from: parse_hex_20(field_str(&result, "from")?)?,
            to,
            value: parse_hex_u128(field_str(&result, "value")?)?,
            pending,
        }))
    }

    async fn balance_of(&self, address: Address) -> Result<u128, ChainError> {
        let result = self
            .http_json_rpc("eth_getBalance", json!([fmt_hex(&address), "latest"]))
            .await?;
        parse_hex_u128(as_str(&result)?)
    }

    async fn suggest_gas_price(&self) -> Result<u128, ChainError> {
        let result = self.http_json_rpc("eth_gasPrice", json!([])).await?;
        parse_hex_u128(as_str(&result)?)
    }

    async fn estimate_gas(&self, call: CallRequest) -> Result<u64, ChainError> {
        let request = json!({
            "from": fmt_hex(&call.from),
            "to": fmt_hex(&call.to),
            "value": format!("0x{:x}", call.value),
            "gasPrice": format!("0x{:x}", call.gas_price),
            "data": fmt_hex(&call.data),
        });
        let result = self.http_json_rpc("eth_estimateGas", json!([request])).await?;
        parse_hex_u64(as_str(&result)?)
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let request = json!({
            "from": fmt_hex(&tx.from),
            "to": fmt_hex(&tx.to),
            "value": format!("0x{:x}", tx.value),
            "gas": format!("0x{:x}", tx.gas_limit),
            "gasPrice": format!("0x{:x}", tx.gas_price),
            "data": fmt_hex(&tx.data),
        });
        let result = self
            .http_json_rpc("eth_sendTransaction", json!([request]))
            .await?;
        parse_hex_32(as_str(&result)?)
    }
}

/// Forward `eth_subscription` notifications into `sender` until the socket
/// errors/closes or the receiver is dropped. Receiver drop must hang the
/// socket up immediately, not on the next inbound frame; a quiet logs
/// subscription would otherwise pin the connection indefinitely.
fn spawn_pump<T, F>(mut ws: WsStream, sender: mpsc::UnboundedSender<T>, decode: F)
where
    T: Send + 'static,
    F: Fn(&Value) -> Option<T> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                _ = sender.closed() => break,
                message = ws.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(reason = %e, "subscription socket failed");
                    break;
                }
            };
            let value: Value = match serde_json::from_str(&text) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if value.get("method").and_then(|m| m.as_str()) != Some("eth_subscription") {
                continue;
            }
            let result = match value.get("params").and_then(|p| p.get("result")) {
                Some(result) => result,
                None => continue,
            };
            if let Some(item) = decode(result) {
                if sender.send(item).is_err() {
                    break;
                }
            }
        }
    });
}

fn decode_head(result: &Value) -> Option<HeadRef> {
    let number = parse_hex_u64(result.get("number")?.as_str()?).ok()?;
    let hash = parse_hex_32(result.get("hash")?.as_str()?).ok()?;
    Some(HeadRef { number, hash })
}

fn decode_log(result: &Value) -> Result<LogObserved, ChainError> {
    let topics = result
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| ChainError::Decode("log missing topics".into()))?
        .iter()
        .map(|t| parse_hex_32(as_str(t)?))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LogObserved {
        address: parse_hex_20(field_str(result, "address")?)?,
        topics,
        data: parse_hex_bytes(field_str(result, "data")?)?,
        block_number: parse_hex_u64(field_str(result, "blockNumber")?)?,
        block_hash: parse_hex_32(field_str(result, "blockHash")?)?,
        tx_hash: parse_hex_32(field_str(result, "transactionHash")?)?,
        log_index: parse_hex_u64(field_str(result, "logIndex")?)?,
        removed: result
            .get("removed")
            .and_then(|r| r.as_bool())
            .unwrap_or(false),
    })
}

fn rpc_error_message(err: &Value) -> String {
    err.get("message")
        .and_then(|m| m.as_str())
        .map(str::to_owned)
        .unwrap_or_else(|| err.to_string())
}

fn as_str(value: &Value) -> Result<&str, ChainError> {
    value
        .as_str()
        .ok_or_else(|| ChainError::Decode("expected string".into()))
}

fn field_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, ChainError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ChainError::Decode(format!("missing field {field}")))
}

fn fmt_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn parse_hex_u64(s: &str) -> Result<u64, ChainError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(s, 16).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_hex_u128(s: &str) -> Result<u128, ChainError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u128::from_str_radix(s, 16).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_hex_bytes(s: &str) -> Result<Vec<u8>, ChainError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_hex_20(s: &str) -> Result<[u8; 20], ChainError> {
    let bytes = parse_hex_bytes(s)?;
    match bytes.len() {
        20 => {
            let mut out = [0u8; 20];
            out.copy_from_slice(&bytes);
            Ok(out)
        }
        // Addresses inside 32-byte words are left-padded.
        32 => {
            let mut out = [0u8; 20];
            out.copy_from_slice(&bytes[12..]);
            Ok(out)
        }
        n => Err(ChainError::Decode(format!("expected 20 bytes, got {n}"))),
    }
}

fn parse_hex_32(s: &str) -> Result<[u8; 32], ChainError> {
    let bytes = parse_hex_bytes(s)?;
    if bytes.len() != 32 {
        return Err(ChainError::Decode(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
