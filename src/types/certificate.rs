// Certificates - signed claims about a partner chain's state at a height
use super::primitives::{ChainId, Hash, Timestamp, LIVENESS_LIMIT};
use crate::codec::{self, CodecError};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CertificateError {
    #[error("certificate timestamp is older than the liveness limit of {limit} seconds")]
    LivenessExpired { limit: u64 },

    #[error("certificate timestamp {certificate} is not earlier than the block timestamp {block}")]
    InvalidTimestamp { certificate: u64, block: u64 },
}

/// A certificate: height-stamped state claim aggregately signed by a weighted
/// quorum of the partner chain's validators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub block_id: Hash,
    pub height: u64,
    pub timestamp: Timestamp,
    pub state_root: Hash,
    pub validators_hash: Hash,
    pub aggregation_bits: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The signed portion of a certificate
#[derive(Serialize)]
struct UnsignedCertificate<'a> {
    block_id: &'a Hash,
    height: u64,
    timestamp: Timestamp,
    state_root: &'a Hash,
    validators_hash: &'a Hash,
}

impl Certificate {
    /// Canonical signing payload, domain-separated by the certified chain's ID
    /// so a certificate for one chain can never validate for another
    pub fn signing_message(&self, chain_id: &ChainId) -> Result<Vec<u8>, CodecError> {
        let unsigned = UnsignedCertificate {
            block_id: &self.block_id,
            height: self.height,
            timestamp: self.timestamp,
            state_root: &self.state_root,
            validators_hash: &self.validators_hash,
        };
        let mut message = chain_id.as_bytes().to_vec();
        message.extend_from_slice(&codec::encode(&unsigned)?);
        Ok(message)
    }

    /// A certificate older than the liveness limit cannot advance a channel
    pub fn verify_liveness(&self, now: Timestamp) -> Result<(), CertificateError> {
        if now.saturating_sub(self.timestamp) > LIVENESS_LIMIT {
            return Err(CertificateError::LivenessExpired {
                limit: LIVENESS_LIMIT,
            });
        }
        Ok(())
    }

    /// A certificate must predate the block that processes it
    pub fn verify_timestamp(&self, block_timestamp: Timestamp) -> Result<(), CertificateError> {
        if self.timestamp >= block_timestamp {
            return Err(CertificateError::InvalidTimestamp {
                certificate: self.timestamp,
                block: block_timestamp,
            });
        }
        Ok(())
    }
}
