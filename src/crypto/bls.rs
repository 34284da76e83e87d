// BLS - weighted aggregate signature verification for certificates
use crate::codec::{self, CodecError};
use crate::types::{ActiveValidator, BlsPublicKey, Hash};
use blst::min_pk::{AggregatePublicKey, PublicKey, Signature};
use blst::BLST_ERROR;

/// Domain separation tag for certificate signatures (proof-of-possession
/// scheme over G2)
pub const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlsError {
    #[error("public key and weight counts differ")]
    KeyWeightMismatch,

    #[error("aggregation bits length {got} does not match a validator count of {validators}")]
    AggregationBitsLength { got: usize, validators: usize },

    #[error("aggregation bits select validators beyond the set")]
    StrayAggregationBits,

    #[error("invalid BLS public key at index {0}")]
    InvalidPublicKey(usize),

    #[error("invalid BLS signature encoding")]
    InvalidSignature,

    #[error("no validator selected by the aggregation bits")]
    NoParticipants,

    #[error("total validator weight overflows")]
    WeightOverflow,

    #[error("aggregate weight {got} is below the certificate threshold {threshold}")]
    InsufficientWeight { got: u64, threshold: u64 },

    #[error("failed to aggregate public keys")]
    AggregationFailed,

    #[error("aggregate signature verification failed")]
    VerificationFailed,

    #[error("validator BLS keys are not in strictly ascending lexicographic order")]
    KeysNotSorted,

    #[error("validator BLS key must be {0} bytes")]
    InvalidKeyLength(usize),

    #[error("validator BFT weight must be positive")]
    ZeroWeight,
}

/// Verify an aggregate signature of the validators selected by
/// `aggregation_bits`, requiring their combined BFT weight to reach
/// `threshold`. Any mismatch fails closed.
pub fn verify_weighted_agg_sig(
    keys: &[BlsPublicKey],
    weights: &[u64],
    threshold: u64,
    aggregation_bits: &[u8],
    signature: &[u8],
    message: &[u8],
) -> Result<(), BlsError> {
    if keys.len() != weights.len() {
        return Err(BlsError::KeyWeightMismatch);
    }
    let expected_len = keys.len().div_ceil(8);
    if aggregation_bits.len() != expected_len {
        return Err(BlsError::AggregationBitsLength {
            got: aggregation_bits.len(),
            validators: keys.len(),
        });
    }
    // bits past the validator count must be zero
    for i in keys.len()..expected_len * 8 {
        if aggregation_bits[i / 8] >> (i % 8) & 1 == 1 {
            return Err(BlsError::StrayAggregationBits);
        }
    }

    let mut participants = Vec::new();
    let mut weight: u64 = 0;
    for (i, key) in keys.iter().enumerate() {
        if aggregation_bits[i / 8] >> (i % 8) & 1 == 0 {
            continue;
        }
        let pk = PublicKey::key_validate(key).map_err(|_| BlsError::InvalidPublicKey(i))?;
        participants.push(pk);
        weight = weight
            .checked_add(weights[i])
            .ok_or(BlsError::WeightOverflow)?;
    }
    if participants.is_empty() {
        return Err(BlsError::NoParticipants);
    }
    if weight < threshold {
        return Err(BlsError::InsufficientWeight {
            got: weight,
            threshold,
        });
    }

    if signature.len() != crate::types::BLS_SIGNATURE_LENGTH {
        return Err(BlsError::InvalidSignature);
    }
    let refs: Vec<&PublicKey> = participants.iter().collect();
    let aggregate =
        AggregatePublicKey::aggregate(&refs, false).map_err(|_| BlsError::AggregationFailed)?;
    let signature = Signature::from_bytes(signature).map_err(|_| BlsError::InvalidSignature)?;

    match signature.verify(true, message, DST, &[], &aggregate.to_public_key(), false) {
        BLST_ERROR::BLST_SUCCESS => Ok(()),
        _ => Err(BlsError::VerificationFailed),
    }
}

/// Deterministic commitment to a validator set and its certificate threshold
pub fn compute_validators_hash(
    validators: &[ActiveValidator],
    certificate_threshold: u64,
) -> Result<Hash, CodecError> {
    let bytes = codec::encode(&(validators, certificate_threshold))?;
    Ok(Hash::hash(&bytes))
}

/// A validator set (or set update) is well-formed only if the BLS keys have
/// the right length, are strictly ascending and every weight is positive
pub fn verify_validators_update(validators: &[ActiveValidator]) -> Result<(), BlsError> {
    use crate::types::BLS_PUBLIC_KEY_LENGTH;

    if validators
        .iter()
        .any(|v| v.bls_key.len() != BLS_PUBLIC_KEY_LENGTH)
    {
        return Err(BlsError::InvalidKeyLength(BLS_PUBLIC_KEY_LENGTH));
    }
    for pair in validators.windows(2) {
        if pair[0].bls_key >= pair[1].bls_key {
            return Err(BlsError::KeysNotSorted);
        }
    }
    if validators.iter().any(|v| v.bft_weight == 0) {
        return Err(BlsError::ZeroWeight);
    }
    Ok(())
}
