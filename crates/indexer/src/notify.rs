//! Address-cache notifications.
//!
//! Best-effort, fire-and-forget line JSON towards the address caching
//! server. A refused or broken connection gets exactly one reconnect and
//! retry; after that the notification for this call is dropped and logged,
//! never surfaced as an ingestion failure.

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// What a notification announces about the named addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFunction {
    Blocks,
    ValueTransfers,
    DataRequestsSolved,
    DataRequestsLaunched,
    Utxos,
}

impl CacheFunction {
    fn as_str(&self) -> &'static str {
        match self {
            CacheFunction::Blocks => "blocks",
            CacheFunction::ValueTransfers => "value-transfers",
            CacheFunction::DataRequestsSolved => "data-requests-solved",
            CacheFunction::DataRequestsLaunched => "data-requests-launched",
            CacheFunction::Utxos => "utxos",
        }
    }
}

#[derive(Serialize)]
struct CacheMessage<'a> {
    method: &'a str,
    epoch: u32,
    function: &'a str,
    addresses: &'a [String],
}

/// Client for the address caching server. Disabled (all sends are no-ops)
/// when no address is configured.
pub struct AddressCacheClient {
    address: Option<String>,
    connection: Option<TcpStream>,
}

impl AddressCacheClient {
    pub fn new(address: Option<String>) -> Self {
        AddressCacheClient {
            address,
            connection: None,
        }
    }

    /// Whether notifications are configured at all.
    pub fn enabled(&self) -> bool {
        self.address.is_some()
    }

    /// Announce new activity for a set of addresses.
    pub async fn update(&mut self, epoch: u32, function: CacheFunction, addresses: &[String]) {
        self.send("update", epoch, function.as_str(), addresses).await;
    }

    /// Announce that a block's activity is now final.
    pub async fn confirm(&mut self, epoch: u32, addresses: &[String]) {
        self.send("confirm", epoch, CacheFunction::Blocks.as_str(), addresses)
            .await;
    }

    /// Announce that a block's activity was rolled back.
    pub async fn revert(&mut self, epoch: u32, addresses: &[String]) {
        self.send("revert", epoch, CacheFunction::Blocks.as_str(), addresses)
            .await;
    }

    /// Ask the cache to start tracking addresses.
    pub async fn track(&mut self, epoch: u32, addresses: &[String]) {
        self.send("track", epoch, CacheFunction::Utxos.as_str(), addresses)
            .await;
    }

    async fn send(&mut self, method: &str, epoch: u32, function: &str, addresses: &[String]) {
        let Some(target) = self.address.clone() else {
            return;
        };
        if addresses.is_empty() && method == "update" {
            return;
        }

        let message = CacheMessage {
            method,
            epoch,
            function,
            addresses,
        };
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize cache notification");
                return;
            }
        };
        line.push('\n');

        // One write attempt on the live socket, one reconnect-and-retry.
        for attempt in 0..2 {
            if self.connection.is_none() {
                match TcpStream::connect(&target).await {
                    Ok(stream) => self.connection = Some(stream),
                    Err(e) => {
                        if attempt == 1 {
                            warn!(target = %target, error = %e,
                                  "Address cache unreachable, dropping notification");
                        }
                        continue;
                    }
                }
            }
            let stream = self.connection.as_mut().expect("connection just set");
            match stream.write_all(line.as_bytes()).await {
                Ok(()) => {
                    debug!(method, epoch, count = addresses.len(), "Cache notified");
                    return;
                }
                Err(e) => {
                    self.connection = None;
                    if attempt == 1 {
                        warn!(target = %target, error = %e,
                              "Address cache write failed, dropping notification");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn disabled_client_is_a_noop() {
        let mut client = AddressCacheClient::new(None);
        assert!(!client.enabled());
        client.update(1, CacheFunction::Blocks, &["wit1a".to_string()]).await;
    }

    #[tokio::test]
    async fn sends_line_json() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let reader = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let mut client = AddressCacheClient::new(Some(addr));
        client
            .update(77, CacheFunction::ValueTransfers, &["wit1a".to_string()])
            .await;

        let line = reader.await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["method"], "update");
        assert_eq!(parsed["epoch"], 77);
        assert_eq!(parsed["function"], "value-transfers");
        assert_eq!(parsed["addresses"][0], "wit1a");
    }

    #[tokio::test]
    async fn unreachable_cache_never_errors() {
        // Nothing listens here; both attempts fail silently.
        let mut client = AddressCacheClient::new(Some("127.0.0.1:1".to_string()));
        client.revert(5, &["wit1a".to_string()]).await;
    }
}
