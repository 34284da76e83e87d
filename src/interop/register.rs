// Registration - admitting a new sidechain and opening its channel
use super::{
    store, CommandContext, InteropError, CROSS_CHAIN_COMMAND_REGISTRATION,
    MODULE_NAME_INTEROPERABILITY,
};
use crate::codec;
use crate::crypto;
use crate::registry::{CrossChainCommand, CrossChainMethod, HookContext, HookError};
use crate::types::{
    ActiveValidator, ChainAccount, ChainId, ChainValidators, ChannelData, CrossChainMessage,
    TokenId, CHAIN_REGISTRATION_FEE, MAX_CHAIN_NAME_LENGTH, MAX_NUM_VALIDATORS,
    MIN_RETURN_FEE_PER_BYTE,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payload of the registration message sent to a freshly registered chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationParams {
    pub name: String,
    pub message_fee_token_id: TokenId,
    pub min_return_fee_per_byte: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSidechainParams {
    pub name: String,
    pub chain_id: ChainId,
    pub validators: Vec<ActiveValidator>,
    pub certificate_threshold: u64,
}

/// Fees are denominated in the mainchain's own token
fn main_token_id(network_prefix: u8) -> TokenId {
    [network_prefix, 0, 0, 0, 0, 0, 0, 0]
}

fn valid_chain_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CHAIN_NAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

pub struct RegisterSidechainCommand;

impl RegisterSidechainCommand {
    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &RegisterSidechainParams,
    ) -> Result<(), InteropError> {
        if !valid_chain_name(&params.name) {
            return Err(InteropError::InvalidChainName(params.name.clone()));
        }
        if store::get_registered_name(ctx.store, &params.name)?.is_some() {
            return Err(InteropError::NameAlreadyRegistered(params.name.clone()));
        }

        let own = store::get_own_chain_account(ctx.store)?;
        if params.chain_id.network_prefix() != own.chain_id.network_prefix() {
            return Err(InteropError::WrongNetworkPrefix(params.chain_id));
        }
        if params.chain_id.is_mainchain() || params.chain_id == own.chain_id {
            return Err(InteropError::ReservedChainId(params.chain_id));
        }
        if store::get_chain_account(ctx.store, &params.chain_id)?.is_some() {
            return Err(InteropError::ChainIdAlreadyRegistered(params.chain_id));
        }

        if params.validators.is_empty() || params.validators.len() > MAX_NUM_VALIDATORS {
            return Err(InteropError::InvalidValidatorCount {
                max: MAX_NUM_VALIDATORS,
            });
        }
        crypto::verify_validators_update(&params.validators)?;
        let total = params
            .validators
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.bft_weight))
            .ok_or(crypto::BlsError::WeightOverflow)?;
        let min_threshold = total / 3 + 1;
        if params.certificate_threshold < min_threshold || params.certificate_threshold > total {
            return Err(InteropError::InvalidCertificateThreshold {
                threshold: params.certificate_threshold,
                min: min_threshold,
                max: total,
            });
        }

        if ctx.fee < CHAIN_REGISTRATION_FEE {
            return Err(InteropError::InsufficientRegistrationFee {
                fee: ctx.fee,
                required: CHAIN_REGISTRATION_FEE,
            });
        }
        Ok(())
    }

    /// Atomically create the chain account, empty channel, validator set and
    /// name index, then send the registration message over the new channel
    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &RegisterSidechainParams,
    ) -> Result<(), InteropError> {
        let own = store::get_own_chain_account(ctx.store)?;
        let validators_hash = crypto::compute_validators_hash(
            &params.validators,
            params.certificate_threshold,
        )?;

        store::set_chain_account(
            ctx.store,
            &params.chain_id,
            &ChainAccount::new(params.name.clone(), validators_hash),
        )?;

        let message_fee_token_id = main_token_id(own.chain_id.network_prefix());
        store::set_channel(
            ctx.store,
            &params.chain_id,
            &ChannelData::new(message_fee_token_id, MIN_RETURN_FEE_PER_BYTE),
        )?;
        store::set_chain_validators(
            ctx.store,
            &params.chain_id,
            &ChainValidators {
                active_validators: params.validators.clone(),
                certificate_threshold: params.certificate_threshold,
            },
        )?;
        store::set_registered_name(ctx.store, &params.name, &params.chain_id)?;

        let registration = RegistrationParams {
            name: params.name.clone(),
            message_fee_token_id,
            min_return_fee_per_byte: MIN_RETURN_FEE_PER_BYTE,
        };
        store::send_internal(
            ctx.store,
            ctx.events,
            &params.chain_id,
            MODULE_NAME_INTEROPERABILITY,
            CROSS_CHAIN_COMMAND_REGISTRATION,
            codec::encode(&registration)?,
            0,
        )?;
        debug!("registered {} as '{}'", params.chain_id, params.name);
        Ok(())
    }
}

/// Hook object of the interoperability module itself; all hooks are no-ops
pub struct InteroperabilityCcMethod;

impl CrossChainMethod for InteroperabilityCcMethod {}

/// Inbound registration message: the first message a partner chain must send
/// over a fresh channel. It has to echo the channel configuration this side
/// committed to at registration time.
pub struct RegistrationCcCommand;

impl CrossChainCommand for RegistrationCcCommand {
    fn verify(&self, ctx: &mut HookContext, ccm: &CrossChainMessage) -> Result<(), HookError> {
        let registration: RegistrationParams =
            codec::decode(&ccm.params).map_err(|e| HookError::new(e.to_string()))?;
        let own = store::get_own_chain_account(ctx.store)
            .map_err(|e| HookError::new(e.to_string()))?;
        if registration.name != own.name {
            return Err(HookError::new("registration name does not match own chain"));
        }
        let channel = store::get_channel(ctx.store, &ccm.sending_chain_id)
            .map_err(|e| HookError::new(e.to_string()))?
            .ok_or_else(|| HookError::new("no channel with the sending chain"))?;
        if registration.message_fee_token_id != channel.message_fee_token_id {
            return Err(HookError::new("registration message fee token mismatch"));
        }
        if ccm.nonce != 0 {
            return Err(HookError::new("registration message must be the first sent"));
        }
        Ok(())
    }

    fn execute(&self, _ctx: &mut HookContext, _ccm: &CrossChainMessage) -> Result<(), HookError> {
        // the channel opens through the accompanying certificate; receiving a
        // well-formed registration message needs no further state change
        Ok(())
    }
}
