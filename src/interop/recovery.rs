// Recovery - re-injecting messages and state trapped behind a terminated chain
use super::{dispatch, store, CommandContext, InteropError};
use crate::codec;
use crate::storage::Event;
use crate::types::{
    merkle, smt, CcmStatus, ChainId, ChannelData, CrossChainMessage, Hash, SmtQuery,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Proof that the terminated chain's copy of our channel had a given content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializeMessageRecoveryParams {
    pub chain_id: ChainId,
    /// The channel record as serialized on the terminated chain
    pub channel: Vec<u8>,
    pub bitmap: Vec<u8>,
    pub sibling_hashes: Vec<Hash>,
}

pub struct InitializeMessageRecoveryCommand;

impl InitializeMessageRecoveryCommand {
    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &InitializeMessageRecoveryParams,
    ) -> Result<(), InteropError> {
        let own = store::get_own_chain_account(ctx.store)?;
        if params.chain_id.is_mainchain() || params.chain_id == own.chain_id {
            return Err(InteropError::RecoveryForbiddenChain);
        }
        if store::get_chain_account(ctx.store, &params.chain_id)?.is_none() {
            return Err(InteropError::ChainNotRegistered(params.chain_id));
        }
        let terminated = store::get_terminated_state(ctx.store, &params.chain_id)?;
        let terminated = match terminated {
            Some(account) if account.initialized => account,
            _ => return Err(InteropError::ChainNotTerminated),
        };
        if store::has_terminated_outbox(ctx.store, &params.chain_id) {
            return Err(InteropError::TerminatedOutboxExists(params.chain_id));
        }

        // the terminated chain stored our channel under our chain ID
        let query = SmtQuery {
            key: store::channel_store_key(&own.chain_id),
            value: params.channel.clone(),
            bitmap: params.bitmap.clone(),
        };
        smt::verify(&terminated.state_root, &[query], &params.sibling_hashes).map_err(|e| {
            ctx.events.log(Event::InvalidSmtVerification {
                chain_id: params.chain_id,
            });
            match e {
                smt::SmtError::InvalidProof => InteropError::InvalidInclusionProof,
                other => InteropError::Smt(other),
            }
        })
    }

    /// Snapshot the recovery window: our outbox toward the chain, bounded by
    /// how far the partner's proven inbox got
    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &InitializeMessageRecoveryParams,
    ) -> Result<(), InteropError> {
        let partner_channel: ChannelData = codec::decode(&params.channel)?;
        let local_channel = store::get_channel(ctx.store, &params.chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.chain_id))?;
        store::create_terminated_outbox_account(
            ctx.store,
            &params.chain_id,
            local_channel.outbox.root,
            local_channel.outbox.size,
            partner_channel.inbox.size,
        )?;
        debug!(
            "message recovery initialized for {}: {} of {} delivered",
            params.chain_id, partner_channel.inbox.size, local_channel.outbox.size
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverMessageParams {
    pub chain_id: ChainId,
    pub cross_chain_messages: Vec<Vec<u8>>,
    /// Outbox leaf positions of the messages, strictly increasing
    pub idxs: Vec<u64>,
    pub sibling_hashes: Vec<Hash>,
}

pub struct RecoverMessageCommand;

impl RecoverMessageCommand {
    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &RecoverMessageParams,
    ) -> Result<(), InteropError> {
        let outbox = store::get_terminated_outbox(ctx.store, &params.chain_id)?
            .ok_or(InteropError::TerminatedOutboxMissing(params.chain_id))?;

        if params.cross_chain_messages.is_empty() {
            return Err(InteropError::NoMessagesToRecover);
        }
        if params.idxs.len() != params.cross_chain_messages.len() {
            return Err(InteropError::RecoveryLengthMismatch);
        }
        if !params.idxs.windows(2).all(|w| w[0] < w[1]) {
            return Err(InteropError::IndicesNotStrictlyIncreasing);
        }
        // positions below the partner's inbox size were already delivered
        if params.idxs[0] < outbox.partner_chain_inbox_size {
            return Err(InteropError::MessageNotPending);
        }
        if params.idxs[params.idxs.len() - 1] >= outbox.outbox_size {
            return Err(InteropError::MessageNeverInOutbox);
        }

        for bytes in &params.cross_chain_messages {
            let ccm: CrossChainMessage = codec::decode(bytes)?;
            if ccm.status != CcmStatus::Ok {
                return Err(InteropError::RecoveryStatusNotOk);
            }
            if ccm.receiving_chain_id != params.chain_id {
                return Err(InteropError::RecoveryWrongReceivingChain);
            }
            if !store::is_live(ctx.store, &ccm.sending_chain_id, ctx.header.timestamp)? {
                return Err(InteropError::SendingChainNotLive);
            }
        }

        let leaves: Vec<(u64, Hash)> = params
            .idxs
            .iter()
            .zip(&params.cross_chain_messages)
            .map(|(&idx, bytes)| (idx, merkle::leaf_hash(bytes)))
            .collect();
        let recomputed = merkle::calculate_root_from_update_data(
            &leaves,
            outbox.outbox_size,
            &params.sibling_hashes,
        );
        match recomputed {
            Ok(root) if root == outbox.outbox_root => Ok(()),
            _ => {
                ctx.events.log(Event::InvalidRmtVerification {
                    chain_id: params.chain_id,
                });
                Err(InteropError::InvalidInclusionProof)
            }
        }
    }

    /// Re-inject every message with swapped endpoints, then advance the
    /// delivered watermark past the recovered range exactly once
    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &RecoverMessageParams,
    ) -> Result<(), InteropError> {
        if ctx.ccm_processing {
            return Err(InteropError::CcmProcessingInProgress);
        }
        let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

        ctx.ccm_processing = true;
        let result = (|| -> Result<(), InteropError> {
            for bytes in &params.cross_chain_messages {
                let ccm: CrossChainMessage = codec::decode(bytes)?;
                let recovered = ccm.recovered();
                ctx.events.enter_scope(recovered.id()?);
                let outcome = if recovered.receiving_chain_id == own_chain_id {
                    dispatch::apply_recovery(ctx, &recovered)
                } else {
                    dispatch::forward_recovery(ctx, &recovered)
                };
                ctx.events.exit_scope();
                outcome?;
            }
            Ok(())
        })();
        ctx.ccm_processing = false;
        result?;

        let mut outbox = store::get_terminated_outbox(ctx.store, &params.chain_id)?
            .ok_or(InteropError::TerminatedOutboxMissing(params.chain_id))?;
        outbox.partner_chain_inbox_size = params.idxs[params.idxs.len() - 1] + 1;
        store::set_terminated_outbox(ctx.store, &params.chain_id, &outbox)?;
        Ok(())
    }
}

/// One state entry to recover, proven against the terminated state root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub substore_prefix: Vec<u8>,
    pub store_key: Vec<u8>,
    pub store_value: Vec<u8>,
    pub bitmap: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecoveryParams {
    pub chain_id: ChainId,
    pub module: String,
    pub store_entries: Vec<StoreEntry>,
    pub sibling_hashes: Vec<Hash>,
}

pub struct StateRecoveryCommand;

impl StateRecoveryCommand {
    fn queries(params: &StateRecoveryParams, recovered: bool) -> Vec<SmtQuery> {
        params
            .store_entries
            .iter()
            .map(|entry| {
                let mut key = params.module.as_bytes().to_vec();
                key.extend_from_slice(&entry.substore_prefix);
                key.extend_from_slice(&entry.store_key);
                SmtQuery {
                    key,
                    value: if recovered {
                        Vec::new()
                    } else {
                        entry.store_value.clone()
                    },
                    bitmap: entry.bitmap.clone(),
                }
            })
            .collect()
    }

    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &StateRecoveryParams,
    ) -> Result<(), InteropError> {
        let terminated = store::get_terminated_state(ctx.store, &params.chain_id)?;
        let terminated = match terminated {
            Some(account) if account.initialized => account,
            _ => return Err(InteropError::ChainNotTerminated),
        };
        if params.store_entries.is_empty() {
            return Err(InteropError::NoEntriesToRecover);
        }
        let mut keys: Vec<(&[u8], &[u8])> = params
            .store_entries
            .iter()
            .map(|e| (e.substore_prefix.as_slice(), e.store_key.as_slice()))
            .collect();
        keys.sort();
        if keys.windows(2).any(|w| w[0] == w[1]) {
            return Err(InteropError::DuplicateStoreKeys);
        }

        smt::verify(
            &terminated.state_root,
            &Self::queries(params, false),
            &params.sibling_hashes,
        )
        .map_err(|e| {
            ctx.events.log(Event::InvalidSmtVerification {
                chain_id: params.chain_id,
            });
            match e {
                smt::SmtError::InvalidProof => InteropError::InvalidInclusionProof,
                other => InteropError::Smt(other),
            }
        })
    }

    /// Hand each entry to the owning module's recover hook, then commit the
    /// state root with the recovered entries blanked out
    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &StateRecoveryParams,
    ) -> Result<(), InteropError> {
        let registry = ctx.registry;
        let method = registry
            .method(&params.module)
            .ok_or_else(|| InteropError::RecoveryNotAvailable(params.module.clone()))?;
        if !method.supports_recovery() {
            return Err(InteropError::RecoveryNotAvailable(params.module.clone()));
        }

        let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;
        for entry in &params.store_entries {
            let mut hctx = crate::registry::HookContext {
                store: &mut *ctx.store,
                events: &mut *ctx.events,
                header: ctx.header,
                own_chain_id,
            };
            method
                .recover(
                    &mut hctx,
                    &entry.substore_prefix,
                    &entry.store_key,
                    &entry.store_value,
                )
                .map_err(|e| InteropError::RecoveryFailed(e.to_string()))?;
        }

        let mut terminated = store::get_terminated_state(ctx.store, &params.chain_id)?
            .ok_or(InteropError::ChainNotTerminated)?;
        terminated.state_root =
            smt::calculate_root(&Self::queries(params, true), &params.sibling_hashes)?;
        store::set_terminated_state(ctx.store, &params.chain_id, &terminated)?;
        Ok(())
    }
}
