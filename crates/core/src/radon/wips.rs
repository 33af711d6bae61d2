//! Epoch-gated protocol upgrades (WIPs) affecting bytecode encoding.
//!
//! Three network upgrades changed which wire values are valid for
//! `RADRetrieve.kind`. Rather than scattering title-string checks through
//! the encoder, activations sit behind [`WipActivations`] and the encoder
//! selects one era table with a single comparison chain.

use std::collections::HashMap;

/// Upgrade that introduced the explicit kind enumeration (Unknown=0,
/// HTTP-GET=1, RNG=2). Before it, HTTP-GET was the only kind and encoded
/// as 0.
pub const WIP_RETRIEVAL_KINDS: &str = "WIP0017-0018-0019";

/// Upgrade that added HTTP-POST (wire value 3) along with request bodies
/// and headers.
pub const WIP_HTTP_POST: &str = "WIP0020-0021";

/// Upgrade after which an `Unknown` kind is rejected outright instead of
/// being encoded as the default 0.
pub const WIP_REJECT_UNKNOWN: &str = "WIP0027";

/// Activation lookup keyed by upgrade title.
///
/// `is_active(title, epoch)` answers whether the named upgrade is in force
/// at the given epoch. Unknown titles are never active. Implementations
/// ride inside spawned ingestion tasks, hence the `Send + Sync` bound.
pub trait WipActivations: Send + Sync {
    /// Whether `title` has activated at or before `epoch`.
    fn is_active(&self, title: &str, epoch: u32) -> bool;
}

/// Mainnet activation epochs, used until the store has synced the
/// node-reported windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainnetActivations;

/// (title, activation epoch) pairs for mainnet.
pub const MAINNET_ACTIVATIONS: [(&str, u32); 3] = [
    (WIP_RETRIEVAL_KINDS, 683_541),
    (WIP_HTTP_POST, 1_059_861),
    (WIP_REJECT_UNKNOWN, 1_708_901),
];

impl WipActivations for MainnetActivations {
    fn is_active(&self, title: &str, epoch: u32) -> bool {
        MAINNET_ACTIVATIONS
            .iter()
            .any(|(t, activation)| *t == title && epoch >= *activation)
    }
}

/// Activations backed by a snapshot of the store's `wips` table.
#[derive(Debug, Clone, Default)]
pub struct TableActivations {
    activations: HashMap<String, u32>,
}

impl TableActivations {
    /// Build from `(title, activation epoch)` rows.
    pub fn new(activations: HashMap<String, u32>) -> Self {
        TableActivations { activations }
    }

    /// Whether the snapshot carries any rows at all.
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }
}

impl WipActivations for TableActivations {
    fn is_active(&self, title: &str, epoch: u32) -> bool {
        self.activations
            .get(title)
            .is_some_and(|activation| epoch >= *activation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_activation_boundaries() {
        let wips = MainnetActivations;
        assert!(!wips.is_active(WIP_RETRIEVAL_KINDS, 683_540));
        assert!(wips.is_active(WIP_RETRIEVAL_KINDS, 683_541));
        assert!(!wips.is_active("WIP9999", u32::MAX));
    }

    #[test]
    fn activations_cross_task_boundaries() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn WipActivations>();
        assert_send_sync::<MainnetActivations>();
        assert_send_sync::<TableActivations>();
    }

    #[test]
    fn table_activations_lookup() {
        let wips = TableActivations::new(HashMap::from([(WIP_HTTP_POST.to_string(), 100)]));
        assert!(!wips.is_active(WIP_HTTP_POST, 99));
        assert!(wips.is_active(WIP_HTTP_POST, 100));
        assert!(!wips.is_active(WIP_RETRIEVAL_KINDS, 100));
    }
}
