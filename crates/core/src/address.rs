//! Address derivation.
//!
//! Addresses are purely derived values: the first 20 bytes of
//! SHA-256(compressed-flag byte followed by the 32-byte public key),
//! rendered as bech32. This must match the network's own derivation
//! exactly, byte for byte.

use bech32::{ToBase32, Variant};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// Mainnet human-readable part for bech32 addresses.
pub const MAINNET_HRP: &str = "wit";

/// Public-key hash: the first 20 bytes of SHA-256 over the serialized key.
pub fn pkh_from_public_key(compressed: u8, key: &[u8]) -> Result<[u8; 20]> {
    if key.len() != 32 {
        return Err(CoreError::InvalidPublicKey(key.len()));
    }
    let mut hasher = Sha256::new();
    hasher.update([compressed]);
    hasher.update(key);
    let digest = hasher.finalize();

    let mut pkh = [0u8; 20];
    pkh.copy_from_slice(&digest[..20]);
    Ok(pkh)
}

/// Render a public-key hash as a bech32 address under the given prefix.
pub fn address_from_pkh(hrp: &str, pkh: &[u8; 20]) -> Result<String> {
    Ok(bech32::encode(hrp, pkh.to_base32(), Variant::Bech32)?)
}

/// Derive a bech32 address straight from a signature's public key.
pub fn address_from_public_key(hrp: &str, compressed: u8, key: &[u8]) -> Result<String> {
    let pkh = pkh_from_public_key(compressed, key)?;
    address_from_pkh(hrp, &pkh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let key = [0x42u8; 32];
        let a = address_from_public_key(MAINNET_HRP, 0x02, &key).unwrap();
        let b = address_from_public_key(MAINNET_HRP, 0x02, &key).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn compressed_flag_changes_address() {
        let key = [0x42u8; 32];
        let even = address_from_public_key(MAINNET_HRP, 0x02, &key).unwrap();
        let odd = address_from_public_key(MAINNET_HRP, 0x03, &key).unwrap();
        assert_ne!(even, odd);
    }

    #[test]
    fn address_shape() {
        let key = [0x11u8; 32];
        let address = address_from_public_key(MAINNET_HRP, 0x02, &key).unwrap();
        // hrp + separator + 32 data chars for 20 bytes + 6 checksum chars.
        assert!(address.starts_with("wit1"));
        assert_eq!(address.len(), 42);
    }

    #[test]
    fn rejects_short_key() {
        assert!(matches!(
            address_from_public_key(MAINNET_HRP, 0x02, &[0u8; 16]),
            Err(CoreError::InvalidPublicKey(16))
        ));
    }
}
