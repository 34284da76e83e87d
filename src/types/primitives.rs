// Primitives - fundamental types of the interoperability engine
use serde::{Deserialize, Serialize};
use std::fmt;

/// Universal hash (Blake3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash data with Blake3
    pub fn hash(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Hash(*hash.as_bytes())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

/// Blake3 hash of the empty input; doubles as the root of an empty message tree
pub const EMPTY_HASH: Hash = Hash([
    0xaf, 0x13, 0x49, 0xb9, 0xf5, 0xf9, 0xa1, 0xa6, 0xa0, 0x40, 0x4d, 0xea, 0x36, 0xdc, 0xc9,
    0x49, 0x9b, 0xcb, 0x25, 0xc9, 0xad, 0xc1, 0x12, 0xb7, 0xcc, 0x9a, 0x93, 0xca, 0xe4, 0x1f,
    0x32, 0x62,
]);

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Block height
pub type BlockHeight = u64;

/// Nonce to prevent replay of cross-chain messages
pub type Nonce = u64;

/// Token identifier for message fees (network prefix + local suffix)
pub type TokenId = [u8; 8];

/// 4-byte chain identifier; the first byte is the network prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChainId(pub [u8; 4]);

impl ChainId {
    pub const LENGTH: usize = 4;

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        ChainId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Network prefix shared by every chain of one network
    pub fn network_prefix(&self) -> u8 {
        self.0[0]
    }

    /// The mainchain of a network is always `[prefix, 0, 0, 0]`
    pub fn mainchain_of(prefix: u8) -> Self {
        ChainId([prefix, 0, 0, 0])
    }

    pub fn is_mainchain(&self) -> bool {
        self.0[1] == 0 && self.0[2] == 0 && self.0[3] == 0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "chain:{}", hex::encode(self.0))
    }
}

/// BLS12-381 public key (min_pk, compressed); always
/// `BLS_PUBLIC_KEY_LENGTH` bytes, enforced wherever keys enter the engine
pub type BlsPublicKey = Vec<u8>;

pub const BLS_PUBLIC_KEY_LENGTH: usize = 48;
pub const BLS_SIGNATURE_LENGTH: usize = 96;

/// Maximum staleness of a certificate before its chain stops being live
pub const LIVENESS_LIMIT: Timestamp = 2_592_000; // 30 days

/// Maximum serialized size of a cross-chain message
pub const MAX_CCM_SIZE: usize = 10_240;

/// Upper bound on the active validator set of a registered chain
pub const MAX_NUM_VALIDATORS: usize = 199;

/// Chain names are lowercase and bounded
pub const MAX_CHAIN_NAME_LENGTH: usize = 40;

/// Flat fee burned when registering a sidechain (in fee units)
pub const CHAIN_REGISTRATION_FEE: u64 = 1_000_000_000;

/// Default per-byte fee a bounced message must be able to pay
pub const MIN_RETURN_FEE_PER_BYTE: u64 = 1_000;

/// Header fields of the block a command executes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: BlockHeight,
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let data = b"lattice";
        assert_eq!(Hash::hash(data), Hash::hash(data));
    }

    #[test]
    fn test_empty_hash_matches_blake3_of_empty_input() {
        assert_eq!(EMPTY_HASH, Hash::hash(&[]));
    }

    #[test]
    fn test_mainchain_id() {
        let mainchain = ChainId::mainchain_of(4);
        assert_eq!(mainchain.as_bytes(), &[4, 0, 0, 0]);
        assert!(mainchain.is_mainchain());
        assert!(!ChainId::from_bytes([4, 0, 0, 1]).is_mainchain());
        assert_eq!(mainchain.network_prefix(), 4);
    }

    #[test]
    fn test_chain_id_display() {
        let id = ChainId::from_bytes([0, 0, 0, 20]);
        assert_eq!(id.to_string(), "chain:00000014");
    }
}
