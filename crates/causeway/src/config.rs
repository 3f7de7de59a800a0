//! RPC endpoint configuration.

use serde::{Deserialize, Serialize};

/// Endpoints for [crate::rpc::JsonRpcChain].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRpcConfig {
    /// HTTP RPC URL for reads and submission.
    pub http_url: String,
    /// WebSocket RPC URL for live subscriptions.
    pub ws_url: String,
}

impl ChainRpcConfig {
    pub fn new(http_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            http_url: http_url.into(),
            ws_url: ws_url.into(),
        }
    }

    /// Derive the WebSocket URL from the HTTP URL (http -> ws, https -> wss).
    pub fn from_http_url(http_url: impl Into<String>) -> Self {
        let http_url = http_url.into();
        let ws_url = http_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        Self { http_url, ws_url }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_ws_url() {
        let c = ChainRpcConfig::from_http_url("http://127.0.0.1:8545");
        assert_eq!(c.ws_url, "ws://127.0.0.1:8545");
        let c = ChainRpcConfig::from_http_url("https://node.example");
        assert_eq!(c.ws_url, "wss://node.example");
    }
}
