//! Node RPC client.
//!
//! One JSON-RPC 2.0 request per line over a persistent TCP socket.
//! Requests carry a process-monotonic id; the client reads lines until the
//! matching response arrives. Failures surface as [`RpcError`] so callers
//! pattern-match on the failure kind instead of probing response payloads.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use witscan_core::{ConsensusConstants, Hash};

mod pool;

pub use pool::{NodeLease, NodePool};

/// Reason string the node pool manager reports when every backend is busy.
const REASON_NO_AVAILABLE: &str = "no available nodes found";
/// Reason string reported when backends exist but none is synced.
const REASON_NO_SYNCED: &str = "no synced nodes found";

/// RPC failure taxonomy.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Every node in the upstream pool is busy. Retry shortly.
    #[error("no available nodes found")]
    NoAvailableNodes,

    /// No upstream node is synced to the chain tip. Retry after a long wait.
    #[error("no synced nodes found")]
    NoSyncedNodes,

    /// The call did not complete within its timeout.
    #[error("rpc call timed out after {0:?}")]
    Timeout(Duration),

    /// Socket-level failure; the connection is dropped and re-dialed on the
    /// next call.
    #[error("node i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The node answered with a non-retryable error, returned to the caller
    /// unchanged.
    #[error("node error: {0}")]
    Node(String),

    /// The response line was not valid JSON-RPC.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RpcError {
    /// Suggested delay before retrying, or `None` for a fatal error.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RpcError::NoAvailableNodes => Some(Duration::from_millis(500)),
            RpcError::NoSyncedNodes => Some(Duration::from_secs(60)),
            RpcError::Timeout(_) | RpcError::Io(_) => Some(Duration::from_secs(1)),
            RpcError::Node(_) | RpcError::Protocol(_) => None,
        }
    }

    /// Whether retrying can help at all.
    pub fn is_transient(&self) -> bool {
        self.retry_after().is_some()
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A single persistent JSON-RPC connection to a full node.
pub struct NodeClient {
    addr: String,
    connection: Option<Connection>,
    next_id: u64,
    default_timeout: Duration,
}

impl NodeClient {
    /// Create a client for the given address. The socket is dialed lazily
    /// on the first call.
    pub fn new(addr: impl Into<String>, default_timeout: Duration) -> Self {
        NodeClient {
            addr: addr.into(),
            connection: None,
            next_id: 0,
            default_timeout,
        }
    }

    async fn ensure_connected(&mut self) -> Result<&mut Connection, RpcError> {
        if self.connection.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            let (read, write) = stream.into_split();
            self.connection = Some(Connection {
                reader: BufReader::new(read),
                writer: write,
            });
        }
        Ok(self.connection.as_mut().expect("connection just set"))
    }

    /// Issue `method(params)` with the default timeout.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, RpcError> {
        self.call_with_timeout(method, params, self.default_timeout)
            .await
    }

    /// Issue `method(params)` with a per-call timeout override.
    pub async fn call_with_timeout(
        &mut self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        self.next_id += 1;
        let id = self.next_id;

        let result = tokio::time::timeout(timeout, self.exchange(id, method, params)).await;
        match result {
            Ok(response) => response,
            Err(_) => {
                // The pairing on this socket is now ambiguous; re-dial.
                self.connection = None;
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    async fn exchange(&mut self, id: u64, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = serde_json::to_string(&request)
            .map_err(|e| RpcError::Protocol(e.to_string()))?;
        line.push('\n');

        let connection = self.ensure_connected().await?;
        if let Err(e) = connection.writer.write_all(line.as_bytes()).await {
            self.connection = None;
            return Err(e.into());
        }

        let mut buf = String::new();
        loop {
            buf.clear();
            let read = match connection.reader.read_line(&mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    self.connection = None;
                    return Err(e.into());
                }
            };
            if read == 0 {
                self.connection = None;
                return Err(RpcError::Protocol("connection closed by node".to_string()));
            }

            let response: Value = serde_json::from_str(buf.trim_end())
                .map_err(|e| RpcError::Protocol(e.to_string()))?;
            // Responses to timed-out earlier requests are skipped.
            if response.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            return Self::unwrap_envelope(response);
        }
    }

    fn unwrap_envelope(mut response: Value) -> Result<Value, RpcError> {
        if let Some(result) = response.get_mut("result") {
            return Ok(result.take());
        }

        let reason = response
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        match reason.as_deref() {
            Some(REASON_NO_AVAILABLE) => Err(RpcError::NoAvailableNodes),
            Some(REASON_NO_SYNCED) => Err(RpcError::NoSyncedNodes),
            Some(other) => Err(RpcError::Node(other.to_string())),
            None => match response.get("error") {
                Some(error) => Err(RpcError::Node(error.to_string())),
                None => Err(RpcError::Protocol(format!(
                    "response without result or error: {response}"
                ))),
            },
        }
    }

    /// Fetch one block by hash.
    pub async fn get_block(&mut self, hash: &Hash) -> Result<Value, RpcError> {
        self.call("getBlock", json!([hash.to_string()])).await
    }

    /// Fetch the chain digest: `(epoch, block hash)` pairs starting at
    /// `epoch`, at most `limit` entries.
    pub async fn get_blockchain(
        &mut self,
        epoch: i64,
        limit: i64,
    ) -> Result<Vec<(u32, String)>, RpcError> {
        let value = self.call("getBlockChain", json!([epoch, limit])).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    /// Fetch the mempool split by transaction kind.
    pub async fn get_mempool(&mut self) -> Result<Mempool, RpcError> {
        let value = self.call("getMempool", json!([])).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    /// Fetch one transaction by hash.
    pub async fn get_transaction(&mut self, hash: &Hash) -> Result<Value, RpcError> {
        self.call("getTransaction", json!([hash.to_string()])).await
    }

    /// Fetch the network's consensus constants.
    pub async fn get_consensus_constants(&mut self) -> Result<ConsensusConstants, RpcError> {
        let value = self.call("getConsensusConstants", json!([])).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }

    /// Fetch UTXO metadata for an address.
    pub async fn get_utxo_info(&mut self, address: &str) -> Result<Value, RpcError> {
        self.call("getUtxoInfo", json!([address])).await
    }

    /// Broadcast a transaction.
    pub async fn send_inventory(&mut self, transaction: Value) -> Result<Value, RpcError> {
        self.call("inventory", json!({ "transaction": transaction }))
            .await
    }

    /// Query the node's own sync status.
    pub async fn get_sync_status(&mut self) -> Result<Value, RpcError> {
        self.call("syncStatus", json!([])).await
    }

    /// Fetch protocol-upgrade activation windows, keyed by upgrade title.
    pub async fn get_supported_wips(&mut self) -> Result<HashMap<String, u32>, RpcError> {
        let value = self.call("getSupportedWips", json!([])).await?;
        serde_json::from_value(value).map_err(|e| RpcError::Protocol(e.to_string()))
    }
}

/// Mempool snapshot: pending transaction hashes per kind.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Mempool {
    /// Pending data-request hashes.
    #[serde(default)]
    pub data_request: Vec<Hash>,
    /// Pending value-transfer hashes.
    #[serde(default)]
    pub value_transfer: Vec<Hash>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Stub node: answers each request line with `respond(request)`.
    async fn spawn_stub<F>(respond: F) -> String
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let request: Value = serde_json::from_str(&line).unwrap();
                let mut response = respond(request.clone());
                response["id"] = request["id"].clone();
                let mut out = serde_json::to_string(&response).unwrap();
                out.push('\n');
                write.write_all(out.as_bytes()).await.unwrap();
            }
        });
        addr
    }

    #[tokio::test]
    async fn call_pairs_response_by_id() {
        let addr = spawn_stub(|_| json!({"result": 42})).await;
        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let value = client.call("anything", json!([])).await.unwrap();
        assert_eq!(value, json!(42));
        // Ids keep incrementing across calls on the same socket.
        let value = client.call("anything", json!([])).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn busy_pool_reason_maps_to_no_available() {
        let addr =
            spawn_stub(|_| json!({"error": {"code": -1}, "reason": "no available nodes found"}))
                .await;
        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let err = client.call("getBlock", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::NoAvailableNodes));
        assert_eq!(err.retry_after(), Some(Duration::from_millis(500)));
    }

    #[tokio::test]
    async fn unsynced_pool_reason_maps_to_long_backoff() {
        let addr =
            spawn_stub(|_| json!({"error": {"code": -1}, "reason": "no synced nodes found"}))
                .await;
        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let err = client.call("getBlock", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::NoSyncedNodes));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn fatal_node_errors_are_not_retryable() {
        let addr = spawn_stub(|_| {
            json!({"error": {"code": -32602, "message": "invalid params"}})
        })
        .await;
        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let err = client.call("getBlock", json!([])).await.unwrap_err();
        assert!(matches!(err, RpcError::Node(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn blockchain_digest_deserializes_pairs() {
        let addr = spawn_stub(|request| {
            assert_eq!(request["method"], "getBlockChain");
            json!({"result": [[100, "aa".repeat(32)], [101, "bb".repeat(32)]]})
        })
        .await;
        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let digest = client.get_blockchain(100, 2).await.unwrap();
        assert_eq!(digest.len(), 2);
        assert_eq!(digest[0].0, 100);
        assert_eq!(digest[1].1, "bb".repeat(32));
    }

    #[tokio::test]
    async fn timeout_is_reported_and_connection_recycled() {
        // A listener that accepts but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut client = NodeClient::new(addr, Duration::from_secs(5));
        let err = client
            .call_with_timeout("getBlock", json!([]), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Timeout(_)));
        assert!(client.connection.is_none());
    }
}
