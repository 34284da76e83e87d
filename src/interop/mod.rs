// Interoperability - cross-chain update processing and message recovery
// Principle: contain misbehavior per chain; the local chain never stalls for a
// remote chain's protocol violation

pub mod dispatch;
pub mod liveness;
pub mod recovery;
pub mod register;
pub mod store;
pub mod update;

pub use dispatch::*;
pub use liveness::*;
pub use recovery::*;
pub use register::*;
pub use store::*;
pub use update::*;

use crate::codec::CodecError;
use crate::crypto::BlsError;
use crate::registry::ModuleRegistry;
use crate::storage::{EventQueue, StateStore, StoreError};
use crate::types::{
    BlockHeader, CertificateError, ChainId, MerkleError, MessageError, SmtError, LIVENESS_LIMIT,
};

/// Module name under which the engine's own cross-chain commands run
pub const MODULE_NAME_INTEROPERABILITY: &str = "interoperability";

/// Cross-chain command carried by the first message of a new channel
pub const CROSS_CHAIN_COMMAND_REGISTRATION: &str = "registration";

/// Cross-chain command notifying a sender that its target was terminated
pub const CROSS_CHAIN_COMMAND_SIDECHAIN_TERMINATED: &str = "sidechainTerminated";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InteropError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Bls(#[from] BlsError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Smt(#[from] SmtError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    // --- registration ---
    #[error("chain name '{0}' is already registered")]
    NameAlreadyRegistered(String),

    #[error("chain name '{0}' must be 1-40 lowercase alphanumeric characters or underscores")]
    InvalidChainName(String),

    #[error("chain ID {0} does not belong to this network")]
    WrongNetworkPrefix(ChainId),

    #[error("chain ID {0} is reserved")]
    ReservedChainId(ChainId),

    #[error("chain ID {0} is already registered")]
    ChainIdAlreadyRegistered(ChainId),

    #[error("validator set must contain between 1 and {max} validators")]
    InvalidValidatorCount { max: usize },

    #[error("certificate threshold {threshold} outside the range [{min}, {max}]")]
    InvalidCertificateThreshold { threshold: u64, min: u64, max: u64 },

    #[error("insufficient transaction fee for chain registration: {fee} < {required}")]
    InsufficientRegistrationFee { fee: u64, required: u64 },

    #[error("own chain account is not initialized")]
    OwnChainMissing,

    // --- cross-chain updates ---
    #[error(
        "a cross-chain update must contain a non-empty certificate and/or a non-empty inbox update"
    )]
    EmptyCrossChainUpdate,

    #[error("the sending chain is not registered")]
    SendingChainNotRegistered,

    #[error("the sending chain is terminated")]
    SendingChainTerminated,

    #[error("the sending chain is not live")]
    SendingChainNotLive,

    #[error("the first cross-chain update from a registered chain must contain a certificate")]
    CertificateRequired,

    #[error("certificate height {height} is not greater than the last certificate height {last}")]
    CertificateHeightNotIncreasing { height: u64, last: u64 },

    #[error("certificate validators hash does not match the active validator set")]
    ValidatorsHashMismatch,

    #[error(
        "the first CCU with a non-empty inbox update cannot contain a certificate older than \
         {0} seconds"
    )]
    FirstCcuCertificateTooOld(u64),

    #[error("an active validators update requires a non-empty certificate")]
    ValidatorsUpdateWithoutCertificate,

    #[error("inbox root does not match the partner chain outbox root")]
    PartnerOutboxRootMismatch,

    #[error("cross-chain message processing is already in progress")]
    CcmProcessingInProgress,

    // --- recovery ---
    #[error("chain {0} is not registered")]
    ChainNotRegistered(ChainId),

    #[error("chain is not terminated")]
    ChainNotTerminated,

    #[error("terminated outbox account does not exist for chain {0}")]
    TerminatedOutboxMissing(ChainId),

    #[error("terminated outbox account already exists for chain {0}")]
    TerminatedOutboxExists(ChainId),

    #[error("recovery is not available for the mainchain or the own chain")]
    RecoveryForbiddenChain,

    #[error("No cross-chain messages to recover")]
    NoMessagesToRecover,

    #[error("cross-chain message index and message counts differ")]
    RecoveryLengthMismatch,

    #[error("cross-chain message indices are not strictly increasing")]
    IndicesNotStrictlyIncreasing,

    #[error("cross-chain message is not pending recovery")]
    MessageNotPending,

    #[error("cross-chain message was never in the outbox")]
    MessageNeverInOutbox,

    #[error("cross-chain message status must be ok to be recovered")]
    RecoveryStatusNotOk,

    #[error("cross-chain message receiving chain does not match the terminated chain")]
    RecoveryWrongReceivingChain,

    #[error("proof of inclusion is not valid")]
    InvalidInclusionProof,

    #[error("no store entries to recover")]
    NoEntriesToRecover,

    #[error("recoverable store keys are not pairwise distinct")]
    DuplicateStoreKeys,

    #[error("Recovery not available for module {0}")]
    RecoveryNotAvailable(String),

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    // --- liveness termination ---
    #[error("chain {0} is still live")]
    ChainStillLive(ChainId),

    #[error("chain {0} is not active")]
    ChainNotActive(ChainId),
}

/// Half of the liveness limit: the maximum certificate age accepted for the
/// first cross-chain update that also carries messages
pub const FIRST_CCU_MAX_CERTIFICATE_AGE: u64 = LIVENESS_LIMIT / 2;

/// Everything a command needs from the surrounding block pipeline: the state
/// store, the event queue, the registry of interoperable modules, the block
/// header, the transaction fee and the per-block reentrancy flag.
pub struct CommandContext<'a> {
    pub store: &'a mut StateStore,
    pub events: &'a mut EventQueue,
    pub registry: &'a ModuleRegistry,
    pub header: BlockHeader,
    pub fee: u64,
    pub ccm_processing: bool,
}

impl<'a> CommandContext<'a> {
    pub fn new(
        store: &'a mut StateStore,
        events: &'a mut EventQueue,
        registry: &'a ModuleRegistry,
        header: BlockHeader,
        fee: u64,
    ) -> Self {
        Self {
            store,
            events,
            registry,
            header,
            fee,
            ccm_processing: false,
        }
    }
}
