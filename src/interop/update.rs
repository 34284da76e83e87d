// Cross-chain updates - the central state transition advancing a partner chain
use super::{
    dispatch, store, CommandContext, InteropError, CROSS_CHAIN_COMMAND_REGISTRATION,
    FIRST_CCU_MAX_CERTIFICATE_AGE, MODULE_NAME_INTEROPERABILITY,
};
use crate::codec;
use crate::crypto;
use crate::storage::{CcmProcessedCode, CcmProcessedResult, Event};
use crate::types::{
    merkle, smt, ActiveValidator, Certificate, ChainId, ChainStatus, CrossChainMessage, Hash,
    SmtQuery,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Witness binding the recomputed partner outbox root to a certified state
/// root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxRootWitness {
    pub bitmap: Vec<u8>,
    pub sibling_hashes: Vec<Hash>,
}

/// Messages plus the witnesses proving they extend the partner's outbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxUpdate {
    pub cross_chain_messages: Vec<Vec<u8>>,
    pub message_witness_hashes: Vec<Hash>,
    pub outbox_root_witness: OutboxRootWitness,
}

impl InboxUpdate {
    pub fn is_empty(&self) -> bool {
        self.cross_chain_messages.is_empty()
            && self.message_witness_hashes.is_empty()
            && self.outbox_root_witness.bitmap.is_empty()
            && self.outbox_root_witness.sibling_hashes.is_empty()
    }
}

/// Parameters of a cross-chain update transaction. An empty `certificate`
/// blob means no certificate; an empty validators update leaves the set
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainUpdateParams {
    pub sending_chain_id: ChainId,
    pub certificate: Vec<u8>,
    pub active_validators_update: Vec<ActiveValidator>,
    pub certificate_threshold: u64,
    pub inbox_update: InboxUpdate,
}

pub struct CrossChainUpdateCommand;

impl CrossChainUpdateCommand {
    /// Read-only validation against proposal-time state. Any failure names
    /// the violated rule; nothing is mutated.
    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &CrossChainUpdateParams,
    ) -> Result<(), InteropError> {
        if params.certificate.is_empty() && params.inbox_update.is_empty() {
            return Err(InteropError::EmptyCrossChainUpdate);
        }

        let account = store::get_chain_account(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::SendingChainNotRegistered)?;
        if account.status == ChainStatus::Terminated {
            return Err(InteropError::SendingChainTerminated);
        }
        if !store::is_live(ctx.store, &params.sending_chain_id, ctx.header.timestamp)? {
            return Err(InteropError::SendingChainNotLive);
        }
        if account.status == ChainStatus::Registered && params.certificate.is_empty() {
            return Err(InteropError::CertificateRequired);
        }

        let validators = store::get_chain_validators(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.sending_chain_id))?;

        let certificate = if params.certificate.is_empty() {
            None
        } else {
            let certificate: Certificate = codec::decode(&params.certificate)?;
            if certificate.height <= account.last_certificate.height {
                return Err(InteropError::CertificateHeightNotIncreasing {
                    height: certificate.height,
                    last: account.last_certificate.height,
                });
            }
            let expected = crypto::compute_validators_hash(
                &validators.active_validators,
                validators.certificate_threshold,
            )?;
            if certificate.validators_hash != expected {
                return Err(InteropError::ValidatorsHashMismatch);
            }
            let keys: Vec<_> = validators
                .active_validators
                .iter()
                .map(|v| v.bls_key.clone())
                .collect();
            let weights: Vec<_> = validators
                .active_validators
                .iter()
                .map(|v| v.bft_weight)
                .collect();
            crypto::verify_weighted_agg_sig(
                &keys,
                &weights,
                validators.certificate_threshold,
                &certificate.aggregation_bits,
                &certificate.signature,
                &certificate.signing_message(&params.sending_chain_id)?,
            )?;

            // the very first message-carrying update must be reasonably fresh
            let first_ccu = account.last_certificate.height == 0;
            if first_ccu && !params.inbox_update.is_empty() {
                let age = ctx.header.timestamp.saturating_sub(certificate.timestamp);
                if age > FIRST_CCU_MAX_CERTIFICATE_AGE {
                    return Err(InteropError::FirstCcuCertificateTooOld(
                        FIRST_CCU_MAX_CERTIFICATE_AGE,
                    ));
                }
            }
            Some(certificate)
        };

        if !params.active_validators_update.is_empty()
            || params.certificate_threshold != validators.certificate_threshold
        {
            if certificate.is_none() {
                return Err(InteropError::ValidatorsUpdateWithoutCertificate);
            }
            crypto::verify_validators_update(&params.active_validators_update)?;
        }

        if !params.inbox_update.is_empty() {
            self.verify_partner_chain_outbox_root(ctx, params, certificate.as_ref())?;
        }
        Ok(())
    }

    /// The partner's outbox root implied by the stored inbox plus the new
    /// messages must match either the certified state (via sparse-Merkle
    /// witness) or, without a certificate, the root recorded at the last
    /// update.
    fn verify_partner_chain_outbox_root(
        &self,
        ctx: &mut CommandContext,
        params: &CrossChainUpdateParams,
        certificate: Option<&Certificate>,
    ) -> Result<(), InteropError> {
        let channel = store::get_channel(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.sending_chain_id))?;

        let mut inbox = channel.inbox.clone();
        for message in &params.inbox_update.cross_chain_messages {
            inbox.append(message);
        }
        let new_root =
            merkle::root_from_right_witness(&inbox, &params.inbox_update.message_witness_hashes);

        match certificate {
            None => {
                if new_root != channel.partner_chain_outbox_root {
                    return Err(InteropError::PartnerOutboxRootMismatch);
                }
                Ok(())
            }
            Some(certificate) => {
                let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;
                let query = SmtQuery {
                    key: store::channel_store_key(&own_chain_id),
                    value: codec::encode(&new_root)?,
                    bitmap: params.inbox_update.outbox_root_witness.bitmap.clone(),
                };
                smt::verify(
                    &certificate.state_root,
                    &[query],
                    &params.inbox_update.outbox_root_witness.sibling_hashes,
                )
                .map_err(|e| match e {
                    smt::SmtError::InvalidProof => InteropError::InvalidInclusionProof,
                    other => InteropError::Smt(other),
                })
            }
        }
    }

    /// Side-effecting application against inclusion-time state.
    ///
    /// Certificate staleness is fatal here (the verify phase used
    /// proposal-time clocks). Per-message protocol violations terminate the
    /// offending chain and continue; hook failures are contained by the
    /// dispatcher. Inbox appends always happen, even for messages that turn
    /// out to be garbage.
    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &CrossChainUpdateParams,
    ) -> Result<(), InteropError> {
        if ctx.ccm_processing {
            return Err(InteropError::CcmProcessingInProgress);
        }

        let account = store::get_chain_account(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::SendingChainNotRegistered)?;
        let status_at_start = account.status;
        let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

        let certificate = if params.certificate.is_empty() {
            None
        } else {
            let certificate: Certificate = codec::decode(&params.certificate)?;
            certificate.verify_liveness(ctx.header.timestamp)?;
            certificate.verify_timestamp(ctx.header.timestamp)?;
            Some(certificate)
        };

        if let Some(certificate) = &certificate {
            self.apply_certificate_update(ctx, params, certificate)?;
        }

        let inbox_size_before = store::get_channel(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.sending_chain_id))?
            .inbox
            .size;

        ctx.ccm_processing = true;
        let result = self.process_messages(
            ctx,
            params,
            status_at_start,
            own_chain_id,
            inbox_size_before,
        );
        ctx.ccm_processing = false;
        result?;

        if !params.inbox_update.is_empty() {
            let mut channel = store::get_channel(ctx.store, &params.sending_chain_id)?
                .ok_or(InteropError::ChainNotRegistered(params.sending_chain_id))?;
            channel.partner_chain_outbox_root = merkle::root_from_right_witness(
                &channel.inbox,
                &params.inbox_update.message_witness_hashes,
            );
            store::set_channel(ctx.store, &params.sending_chain_id, &channel)?;
        }
        Ok(())
    }

    /// Commit the validator-set replacement, the threshold and the new last
    /// certificate; a registered chain turns active with its first
    /// certificate.
    fn apply_certificate_update(
        &self,
        ctx: &mut CommandContext,
        params: &CrossChainUpdateParams,
        certificate: &Certificate,
    ) -> Result<(), InteropError> {
        let mut validators = store::get_chain_validators(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.sending_chain_id))?;
        if !params.active_validators_update.is_empty() {
            validators.active_validators = params.active_validators_update.clone();
        }
        validators.certificate_threshold = params.certificate_threshold;
        store::set_chain_validators(ctx.store, &params.sending_chain_id, &validators)?;

        let mut account = store::get_chain_account(ctx.store, &params.sending_chain_id)?
            .ok_or(InteropError::SendingChainNotRegistered)?;
        account.last_certificate.height = certificate.height;
        account.last_certificate.timestamp = certificate.timestamp;
        account.last_certificate.state_root = certificate.state_root;
        account.last_certificate.validators_hash = certificate.validators_hash;
        if account.status == ChainStatus::Registered {
            debug!("{} activated at height {}", params.sending_chain_id, certificate.height);
            account.status = ChainStatus::Active;
        }
        store::set_chain_account(ctx.store, &params.sending_chain_id, &account)?;

        ctx.events.log(Event::ChainAccountUpdated {
            chain_id: params.sending_chain_id,
            certificate_height: certificate.height,
        });
        Ok(())
    }

    fn process_messages(
        &self,
        ctx: &mut CommandContext,
        params: &CrossChainUpdateParams,
        status_at_start: ChainStatus,
        own_chain_id: ChainId,
        inbox_size_before: u64,
    ) -> Result<(), InteropError> {
        for (index, bytes) in params.inbox_update.cross_chain_messages.iter().enumerate() {
            // the inbox records what was relayed, valid or not
            store::append_to_inbox(ctx.store, &params.sending_chain_id, bytes)?;

            let ccm: CrossChainMessage = match codec::decode(bytes) {
                Ok(ccm) => ccm,
                Err(e) => {
                    // garbage on the wire: close the channel and fail the
                    // transaction
                    warn!("undecodable message from {}", params.sending_chain_id);
                    ctx.events.log(Event::CcmProcessed {
                        sending_chain_id: params.sending_chain_id,
                        receiving_chain_id: own_chain_id,
                        code: CcmProcessedCode::InvalidCcmDecodeException,
                        result: CcmProcessedResult::Discarded,
                    });
                    store::terminate_chain_internal(
                        ctx.store,
                        ctx.events,
                        &params.sending_chain_id,
                    )?;
                    return Err(e.into());
                }
            };

            if status_at_start == ChainStatus::Registered {
                let is_registration = index == 0
                    && inbox_size_before == 0
                    && ccm.module == MODULE_NAME_INTEROPERABILITY
                    && ccm.cross_chain_command == CROSS_CHAIN_COMMAND_REGISTRATION;
                if !is_registration {
                    store::terminate_chain_internal(
                        ctx.store,
                        ctx.events,
                        &params.sending_chain_id,
                    )?;
                    continue;
                }
            }

            if ccm.sending_chain_id != params.sending_chain_id {
                // the message lies about its origin; terminate the chain it
                // claims to come from
                store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
                continue;
            }

            if ccm.validate_format().is_err() {
                store::terminate_chain_internal(ctx.store, ctx.events, &params.sending_chain_id)?;
                continue;
            }

            ctx.events.enter_scope(ccm.id()?);
            let outcome = if ccm.receiving_chain_id == own_chain_id {
                dispatch::apply(ctx, &ccm)
            } else {
                dispatch::forward(ctx, &ccm)
            };
            ctx.events.exit_scope();
            outcome?;
        }
        Ok(())
    }
}
