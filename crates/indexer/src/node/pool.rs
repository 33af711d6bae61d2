//! Client pool.
//!
//! A fixed set of [`NodeClient`]s behind a semaphore. Each ingestion loop
//! borrows a client for the duration of one call sequence; leases return
//! their client on drop, keeping sockets warm across borrows.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::NodeClient;

/// Shared pool of persistent node connections.
///
/// The idle deque sits behind a synchronous mutex that is never held
/// across an await, so a dropping lease can push its client back before
/// the semaphore permit releases. A waiter that wins a permit therefore
/// always finds a client waiting.
#[derive(Clone)]
pub struct NodePool {
    idle: Arc<Mutex<VecDeque<NodeClient>>>,
    permits: Arc<Semaphore>,
    size: usize,
}

impl NodePool {
    /// Build a pool with one client per address entry. Repeating an address
    /// in the config widens the pool for that node.
    pub fn new(addresses: &[String], default_timeout: Duration) -> Self {
        let clients: VecDeque<NodeClient> = addresses
            .iter()
            .map(|addr| NodeClient::new(addr.clone(), default_timeout))
            .collect();
        let size = clients.len();
        let permits = Arc::new(Semaphore::new(size));
        NodePool {
            idle: Arc::new(Mutex::new(clients)),
            permits,
            size,
        }
    }

    /// Borrow a client, waiting until one is idle.
    pub async fn acquire(&self) -> NodeLease {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");
        let client = self
            .idle
            .lock()
            .expect("idle mutex poisoned")
            .pop_front()
            .expect("permit guarantees an idle client");
        NodeLease {
            client: Some(client),
            idle: Arc::clone(&self.idle),
            _permit: permit,
        }
    }

    /// Number of clients in the pool.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// A borrowed [`NodeClient`]. Dereferences to the client; returns it to the
/// pool when dropped.
pub struct NodeLease {
    client: Option<NodeClient>,
    idle: Arc<Mutex<VecDeque<NodeClient>>>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for NodeLease {
    type Target = NodeClient;

    fn deref(&self) -> &NodeClient {
        self.client.as_ref().expect("client present until drop")
    }
}

impl std::ops::DerefMut for NodeLease {
    fn deref_mut(&mut self) -> &mut NodeClient {
        self.client.as_mut().expect("client present until drop")
    }
}

impl Drop for NodeLease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Must complete before `_permit` drops and releases the
            // semaphore, or a waiter could find the deque empty.
            if let Ok(mut idle) = self.idle.lock() {
                idle.push_back(client);
            }
        }
    }
}
