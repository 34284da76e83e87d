// Messages - the unit of cross-chain communication
use super::primitives::{ChainId, Hash, Nonce, MAX_CCM_SIZE};
use crate::codec::{self, CodecError};
use serde::{Deserialize, Serialize};

/// Module and command names are short alphanumeric identifiers
pub const MAX_HANDLER_NAME_LENGTH: usize = 32;

/// Delivery status carried inside a cross-chain message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcmStatus {
    /// Normal message, not yet failed or recovered
    Ok = 0,
    /// Target module unknown on the receiving chain
    ModuleNotSupported = 1,
    /// Target command unknown on the receiving chain
    CommandNotSupported = 2,
    /// Receiving channel closed or not yet open; message was bounced
    ChannelUnavailable = 3,
    /// Message re-injected from a terminated chain's outbox
    Recovered = 4,
    /// Message application failed on the receiving chain
    FailedCcm = 5,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("serialized message size {size} exceeds the maximum of {max} bytes")]
    Oversized { size: usize, max: usize },

    #[error("sending and receiving chain of a message must differ")]
    SameChain,

    #[error("invalid module name '{0}'")]
    InvalidModuleName(String),

    #[error("invalid command name '{0}'")]
    InvalidCommandName(String),
}

/// A cross-chain message. Immutable once constructed; bouncing and recovery
/// derive new messages instead of mutating in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainMessage {
    pub module: String,
    pub cross_chain_command: String,
    pub nonce: Nonce,
    pub fee: u64,
    pub sending_chain_id: ChainId,
    pub receiving_chain_id: ChainId,
    pub status: CcmStatus,
    pub params: Vec<u8>,
}

impl CrossChainMessage {
    /// Canonical encoding of the message
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }

    /// Hash of the canonical encoding, used as event topic and for audit
    /// correlation
    pub fn id(&self) -> Result<Hash, CodecError> {
        Ok(Hash::hash(&self.to_bytes()?))
    }

    /// Wire-format validity: bounded size, distinct endpoints, well-formed
    /// handler names
    pub fn validate_format(&self) -> Result<(), MessageError> {
        if self.sending_chain_id == self.receiving_chain_id {
            return Err(MessageError::SameChain);
        }
        if !valid_handler_name(&self.module) {
            return Err(MessageError::InvalidModuleName(self.module.clone()));
        }
        if !valid_handler_name(&self.cross_chain_command) {
            return Err(MessageError::InvalidCommandName(
                self.cross_chain_command.clone(),
            ));
        }
        let size = self.to_bytes().map(|b| b.len()).unwrap_or(usize::MAX);
        if size > MAX_CCM_SIZE {
            return Err(MessageError::Oversized {
                size,
                max: MAX_CCM_SIZE,
            });
        }
        Ok(())
    }

    /// Reply sent back toward the original sender when the receiving channel
    /// is unavailable
    pub fn bounced(&self, status: CcmStatus, fee: u64) -> Self {
        Self {
            sending_chain_id: self.receiving_chain_id,
            receiving_chain_id: self.sending_chain_id,
            status,
            fee,
            ..self.clone()
        }
    }

    /// Variant re-injected during message recovery: endpoints swapped, status
    /// Recovered, everything else unchanged
    pub fn recovered(&self) -> Self {
        Self {
            sending_chain_id: self.receiving_chain_id,
            receiving_chain_id: self.sending_chain_id,
            status: CcmStatus::Recovered,
            ..self.clone()
        }
    }
}

fn valid_handler_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_HANDLER_NAME_LENGTH
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}
