// Chain records - per-partner-chain accounts, channels, validators and termination state
use super::merkle::IncrementalTree;
use super::primitives::{BlsPublicKey, ChainId, Hash, Nonce, Timestamp, TokenId, EMPTY_HASH};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a registered partner chain.
///
/// Transitions are monotonic: Registered -> Active -> Terminated, and
/// Terminated is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainStatus {
    /// Registered but no certificate processed yet
    Registered,
    /// At least one certificate processed, channel open
    Active,
    /// Channel permanently closed locally
    Terminated,
}

impl ChainStatus {
    pub fn can_transition_to(self, next: ChainStatus) -> bool {
        match (self, next) {
            (ChainStatus::Registered, ChainStatus::Active) => true,
            (ChainStatus::Registered, ChainStatus::Terminated) => true,
            (ChainStatus::Active, ChainStatus::Terminated) => true,
            _ => false,
        }
    }
}

/// Fields of the last certificate accepted for a partner chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCertificate {
    pub height: u64,
    pub timestamp: Timestamp,
    pub state_root: Hash,
    pub validators_hash: Hash,
}

/// The local view of a registered partner chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainAccount {
    pub name: String,
    pub status: ChainStatus,
    pub last_certificate: LastCertificate,
}

impl ChainAccount {
    /// Freshly registered chain: no certificate yet, only the validators hash
    /// the registrant committed to
    pub fn new(name: String, validators_hash: Hash) -> Self {
        Self {
            name,
            status: ChainStatus::Registered,
            last_certificate: LastCertificate {
                height: 0,
                timestamp: 0,
                state_root: EMPTY_HASH,
                validators_hash,
            },
        }
    }
}

/// Messaging channel with one partner chain.
///
/// `inbox` tracks messages received from the partner, `outbox` messages sent
/// to it. Sizes only ever grow and roots change only through appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelData {
    pub inbox: IncrementalTree,
    pub outbox: IncrementalTree,
    /// Partner outbox root as of the last processed cross-chain update
    pub partner_chain_outbox_root: Hash,
    pub message_fee_token_id: TokenId,
    pub min_return_fee_per_byte: u64,
}

impl ChannelData {
    pub fn new(message_fee_token_id: TokenId, min_return_fee_per_byte: u64) -> Self {
        Self {
            inbox: IncrementalTree::empty(),
            outbox: IncrementalTree::empty(),
            partner_chain_outbox_root: EMPTY_HASH,
            message_fee_token_id,
            min_return_fee_per_byte,
        }
    }
}

/// One member of a partner chain's active validator set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveValidator {
    pub bls_key: BlsPublicKey,
    pub bft_weight: u64,
}

/// Active validator set snapshot for a partner chain, replaced wholesale on a
/// validated update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValidators {
    pub active_validators: Vec<ActiveValidator>,
    pub certificate_threshold: u64,
}

impl ChainValidators {
    /// Sum of BFT weights, None on u64 overflow
    pub fn total_weight(&self) -> Option<u64> {
        self.active_validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.bft_weight))
    }
}

/// Marks a partner chain as terminated in local state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatedStateAccount {
    pub state_root: Hash,
    pub mainchain_state_root: Hash,
    /// Once true, stays true
    pub initialized: bool,
}

/// Snapshot of the local outbox toward a terminated chain, driving recovery.
///
/// Leaves at positions below `partner_chain_inbox_size` were already consumed
/// by the partner; positions in `[partner_chain_inbox_size, outbox_size)` are
/// pending recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminatedOutboxAccount {
    pub outbox_root: Hash,
    pub outbox_size: u64,
    pub partner_chain_inbox_size: u64,
}

/// The local chain's own identity and send nonce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnChainAccount {
    pub name: String,
    pub chain_id: ChainId,
    pub nonce: Nonce,
}
