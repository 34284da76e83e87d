// Liveness termination - closing the channel of a chain that stopped certifying
use super::{store, CommandContext, InteropError};
use crate::types::{ChainId, ChainStatus};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminateSidechainForLivenessParams {
    pub chain_id: ChainId,
}

/// Anyone may terminate a sidechain once it has gone a full liveness window
/// without a valid certificate
pub struct TerminateSidechainForLivenessCommand;

impl TerminateSidechainForLivenessCommand {
    pub fn verify(
        &self,
        ctx: &mut CommandContext,
        params: &TerminateSidechainForLivenessParams,
    ) -> Result<(), InteropError> {
        let account = store::get_chain_account(ctx.store, &params.chain_id)?
            .ok_or(InteropError::ChainNotRegistered(params.chain_id))?;
        if account.status != ChainStatus::Active {
            return Err(InteropError::ChainNotActive(params.chain_id));
        }
        if store::is_live(ctx.store, &params.chain_id, ctx.header.timestamp)? {
            return Err(InteropError::ChainStillLive(params.chain_id));
        }
        Ok(())
    }

    pub fn execute(
        &self,
        ctx: &mut CommandContext,
        params: &TerminateSidechainForLivenessParams,
    ) -> Result<(), InteropError> {
        warn!("{} lost liveness, terminating", params.chain_id);
        store::terminate_chain_internal(ctx.store, ctx.events, &params.chain_id)
    }
}
