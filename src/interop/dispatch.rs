// Dispatch - per-message apply/forward/bounce with snapshot isolation
use super::store;
use super::{
    CommandContext, InteropError, CROSS_CHAIN_COMMAND_SIDECHAIN_TERMINATED,
    MODULE_NAME_INTEROPERABILITY,
};
use crate::codec;
use crate::registry::{HookContext, HookError};
use crate::storage::{CcmProcessedCode, CcmProcessedResult, Event, EventQueue};
use crate::types::{CcmStatus, ChainId, ChainStatus, CrossChainMessage, Hash};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Payload of the sidechain-terminated notification sent back to a sender
/// whose target chain stopped being live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidechainTerminatedParams {
    pub chain_id: ChainId,
    pub state_root: Hash,
}

#[derive(Clone, Copy)]
enum HookKind {
    VerifyCcm,
    BeforeExecute,
    AfterExecute,
    BeforeForwarding,
}

fn log_processed(
    events: &mut EventQueue,
    ccm: &CrossChainMessage,
    code: CcmProcessedCode,
    result: CcmProcessedResult,
) {
    events.log(Event::CcmProcessed {
        sending_chain_id: ccm.sending_chain_id,
        receiving_chain_id: ccm.receiving_chain_id,
        code,
        result,
    });
}

/// Run one hook across every registered module, in registration order
fn run_hooks(
    ctx: &mut CommandContext,
    own_chain_id: ChainId,
    ccm: &CrossChainMessage,
    kind: HookKind,
) -> Result<(), HookError> {
    let registry = ctx.registry;
    for (_, method) in registry.methods() {
        let mut hctx = HookContext {
            store: &mut *ctx.store,
            events: &mut *ctx.events,
            header: ctx.header,
            own_chain_id,
        };
        match kind {
            HookKind::VerifyCcm => method.verify_cross_chain_message(&mut hctx, ccm)?,
            HookKind::BeforeExecute => method.before_cross_chain_command_execute(&mut hctx, ccm)?,
            HookKind::AfterExecute => method.after_cross_chain_command_execute(&mut hctx, ccm)?,
            HookKind::BeforeForwarding => {
                method.before_cross_chain_message_forwarding(&mut hctx, ccm)?
            }
        }
    }
    Ok(())
}

/// Restore state store and event queue in lock-step
fn restore(
    ctx: &mut CommandContext,
    state: crate::storage::StateSnapshot,
    events: crate::storage::EventSnapshot,
) -> Result<(), InteropError> {
    ctx.store.restore_snapshot(state)?;
    ctx.events.restore_snapshot(events)?;
    Ok(())
}

/// Local delivery of a message addressed to the own chain.
///
/// Hook and command failures are contained: state and events roll back to the
/// last consistent snapshot, the outcome is logged, and processing of the
/// surrounding update continues. Only plumbing failures (store, codec)
/// propagate.
pub fn apply(ctx: &mut CommandContext, ccm: &CrossChainMessage) -> Result<(), InteropError> {
    let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

    if !store::is_live(ctx.store, &ccm.sending_chain_id, ctx.header.timestamp)? {
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyCcmException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if run_hooks(ctx, own_chain_id, ccm, HookKind::VerifyCcm).is_err() {
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyCcmException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    let registry = ctx.registry;
    if registry.method(&ccm.module).is_none() {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::ModuleNotSupported,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }
    let Some(command) = registry.command(&ccm.module, &ccm.cross_chain_command) else {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::CrossChainCommandNotSupported,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    };

    let state_before = ctx.store.create_snapshot();
    let events_before = ctx.events.create_snapshot();

    let verify_ok = {
        let mut hctx = HookContext {
            store: &mut *ctx.store,
            events: &mut *ctx.events,
            header: ctx.header,
            own_chain_id,
        };
        command.verify(&mut hctx, ccm).is_ok()
    };
    if !verify_ok {
        restore(ctx, state_before, events_before)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if run_hooks(ctx, own_chain_id, ccm, HookKind::BeforeExecute).is_err() {
        restore(ctx, state_before, events_before)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmBeforeCccExecutionException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    // an execute failure rolls back to here, keeping before-hook effects
    let pre_execute_state = ctx.store.create_snapshot();
    let pre_execute_events = ctx.events.create_snapshot();
    let execute_ok = {
        let mut hctx = HookContext {
            store: &mut *ctx.store,
            events: &mut *ctx.events,
            header: ctx.header,
            own_chain_id,
        };
        command.execute(&mut hctx, ccm).is_ok()
    };
    if !execute_ok {
        restore(ctx, pre_execute_state, pre_execute_events)?;
    }

    // the after-hook fires even when execute failed, for module cleanup
    let pre_after_state = ctx.store.create_snapshot();
    let pre_after_events = ctx.events.create_snapshot();
    if run_hooks(ctx, own_chain_id, ccm, HookKind::AfterExecute).is_err() {
        restore(ctx, pre_after_state, pre_after_events)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmAfterCccExecutionException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if !execute_ok {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::FailedCcm,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    log_processed(
        ctx.events,
        ccm,
        CcmProcessedCode::Success,
        CcmProcessedResult::Applied,
    );
    Ok(())
}

/// Forwarding of a message addressed to another chain.
///
/// A missing or not-yet-active receiving channel bounces the message back to
/// the sender; a dead receiving chain is terminated and the sender notified.
/// The sending chain is only terminated for its own violations.
pub fn forward(ctx: &mut CommandContext, ccm: &CrossChainMessage) -> Result<(), InteropError> {
    let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

    if !store::is_live(ctx.store, &ccm.sending_chain_id, ctx.header.timestamp)? {
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyCcmException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if run_hooks(ctx, own_chain_id, ccm, HookKind::VerifyCcm).is_err() {
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyCcmException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    let receiving_account = store::get_chain_account(ctx.store, &ccm.receiving_chain_id)?;
    let receiving_account = match receiving_account {
        None => {
            return bounce(
                ctx,
                ccm,
                CcmStatus::ChannelUnavailable,
                CcmProcessedCode::ChannelUnavailable,
            );
        }
        Some(account) if account.status == ChainStatus::Registered => {
            return bounce(
                ctx,
                ccm,
                CcmStatus::ChannelUnavailable,
                CcmProcessedCode::ChannelUnavailable,
            );
        }
        Some(account) => account,
    };

    if !store::is_live(ctx.store, &ccm.receiving_chain_id, ctx.header.timestamp)? {
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.receiving_chain_id)?;
        let params = codec::encode(&SidechainTerminatedParams {
            chain_id: ccm.receiving_chain_id,
            state_root: receiving_account.last_certificate.state_root,
        })?;
        store::send_internal(
            ctx.store,
            ctx.events,
            &ccm.sending_chain_id,
            MODULE_NAME_INTEROPERABILITY,
            CROSS_CHAIN_COMMAND_SIDECHAIN_TERMINATED,
            params,
            0,
        )?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::ChannelUnavailable,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    let state_before = ctx.store.create_snapshot();
    let events_before = ctx.events.create_snapshot();
    if run_hooks(ctx, own_chain_id, ccm, HookKind::BeforeForwarding).is_err() {
        restore(ctx, state_before, events_before)?;
        store::terminate_chain_internal(ctx.store, ctx.events, &ccm.sending_chain_id)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmBeforeCccForwardingException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    store::add_to_outbox(ctx.store, &ccm.receiving_chain_id, &ccm.to_bytes()?)?;
    log_processed(
        ctx.events,
        ccm,
        CcmProcessedCode::Success,
        CcmProcessedResult::Forwarded,
    );
    Ok(())
}

/// Reply-with-unavailable: signals "try later" without terminating anyone.
///
/// A reply is only queued when the original message was healthy and its fee
/// covers the return trip; otherwise the message is dropped with an event.
pub fn bounce(
    ctx: &mut CommandContext,
    ccm: &CrossChainMessage,
    status: CcmStatus,
    code: CcmProcessedCode,
) -> Result<(), InteropError> {
    let serialized = ccm.to_bytes()?;
    let channel = store::get_channel(ctx.store, &ccm.sending_chain_id)?;
    let min_return_fee = channel
        .map(|c| c.min_return_fee_per_byte.saturating_mul(serialized.len() as u64))
        .unwrap_or(u64::MAX);

    if ccm.status != CcmStatus::Ok || ccm.fee < min_return_fee {
        debug!("dropping {} without bounce reply", ccm.sending_chain_id);
        log_processed(ctx.events, ccm, code, CcmProcessedResult::Discarded);
        return Ok(());
    }

    let bounced = ccm.bounced(status, ccm.fee - min_return_fee);
    store::add_to_outbox(ctx.store, &bounced.receiving_chain_id, &bounced.to_bytes()?)?;
    log_processed(ctx.events, ccm, code, CcmProcessedResult::Bounced);
    Ok(())
}

/// Local delivery of a recovered (already endpoint-swapped) message.
///
/// Mirrors [`apply`] but never terminates a chain: the sending chain of a
/// recovered message is the terminated chain itself, and hook failures simply
/// resolve to a discarded message.
pub fn apply_recovery(
    ctx: &mut CommandContext,
    ccm: &CrossChainMessage,
) -> Result<(), InteropError> {
    let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

    if run_hooks(ctx, own_chain_id, ccm, HookKind::VerifyCcm).is_err() {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyCcmException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    let registry = ctx.registry;
    if registry.method(&ccm.module).is_none() {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::ModuleNotSupported,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }
    let Some(command) = registry.command(&ccm.module, &ccm.cross_chain_command) else {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::CrossChainCommandNotSupported,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    };

    let state_before = ctx.store.create_snapshot();
    let events_before = ctx.events.create_snapshot();

    let verify_ok = {
        let mut hctx = HookContext {
            store: &mut *ctx.store,
            events: &mut *ctx.events,
            header: ctx.header,
            own_chain_id,
        };
        command.verify(&mut hctx, ccm).is_ok()
    };
    if !verify_ok {
        restore(ctx, state_before, events_before)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmVerifyException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if run_hooks(ctx, own_chain_id, ccm, HookKind::BeforeExecute).is_err() {
        restore(ctx, state_before, events_before)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmBeforeCccExecutionException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    let pre_execute_state = ctx.store.create_snapshot();
    let pre_execute_events = ctx.events.create_snapshot();
    let execute_ok = {
        let mut hctx = HookContext {
            store: &mut *ctx.store,
            events: &mut *ctx.events,
            header: ctx.header,
            own_chain_id,
        };
        command.execute(&mut hctx, ccm).is_ok()
    };
    if !execute_ok {
        restore(ctx, pre_execute_state, pre_execute_events)?;
    }

    let pre_after_state = ctx.store.create_snapshot();
    let pre_after_events = ctx.events.create_snapshot();
    if run_hooks(ctx, own_chain_id, ccm, HookKind::AfterExecute).is_err() {
        restore(ctx, pre_after_state, pre_after_events)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmAfterCccExecutionException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if !execute_ok {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::FailedCcm,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    log_processed(
        ctx.events,
        ccm,
        CcmProcessedCode::Success,
        CcmProcessedResult::Applied,
    );
    Ok(())
}

/// Forwarding of a recovered (already endpoint-swapped) message toward its
/// original sender. Hook failures discard; nothing is terminated.
pub fn forward_recovery(
    ctx: &mut CommandContext,
    ccm: &CrossChainMessage,
) -> Result<(), InteropError> {
    let own_chain_id = store::get_own_chain_account(ctx.store)?.chain_id;

    let state_before = ctx.store.create_snapshot();
    let events_before = ctx.events.create_snapshot();
    if run_hooks(ctx, own_chain_id, ccm, HookKind::BeforeForwarding).is_err() {
        restore(ctx, state_before, events_before)?;
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::InvalidCcmBeforeCccForwardingException,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    if store::get_channel(ctx.store, &ccm.receiving_chain_id)?.is_none() {
        log_processed(
            ctx.events,
            ccm,
            CcmProcessedCode::ChannelUnavailable,
            CcmProcessedResult::Discarded,
        );
        return Ok(());
    }

    store::add_to_outbox(ctx.store, &ccm.receiving_chain_id, &ccm.to_bytes()?)?;
    log_processed(
        ctx.events,
        ccm,
        CcmProcessedCode::Success,
        CcmProcessedResult::Forwarded,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CrossChainCommand, CrossChainMethod, ModuleRegistry};
    use crate::storage::StateStore;
    use crate::types::{BlockHeader, ChainAccount, ChannelData, OwnChainAccount};

    const MAINCHAIN: ChainId = ChainId([4, 0, 0, 0]);
    const SIDE_A: ChainId = ChainId([4, 0, 0, 1]);
    const SIDE_B: ChainId = ChainId([4, 0, 0, 2]);

    /// Module whose behavior is chosen at registration time
    #[derive(Default)]
    struct TestMethod {
        fail_verify: bool,
        fail_before_execute: bool,
        fail_after_execute: bool,
        fail_before_forwarding: bool,
    }

    impl CrossChainMethod for TestMethod {
        fn verify_cross_chain_message(
            &self,
            _ctx: &mut HookContext,
            _ccm: &CrossChainMessage,
        ) -> Result<(), HookError> {
            if self.fail_verify {
                return Err(HookError::new("verify rejected"));
            }
            Ok(())
        }

        fn before_cross_chain_command_execute(
            &self,
            ctx: &mut HookContext,
            _ccm: &CrossChainMessage,
        ) -> Result<(), HookError> {
            ctx.store.set(b"hook:before", b"ran");
            if self.fail_before_execute {
                return Err(HookError::new("before rejected"));
            }
            Ok(())
        }

        fn after_cross_chain_command_execute(
            &self,
            ctx: &mut HookContext,
            _ccm: &CrossChainMessage,
        ) -> Result<(), HookError> {
            ctx.store.set(b"hook:after", b"ran");
            if self.fail_after_execute {
                return Err(HookError::new("after rejected"));
            }
            Ok(())
        }

        fn before_cross_chain_message_forwarding(
            &self,
            ctx: &mut HookContext,
            _ccm: &CrossChainMessage,
        ) -> Result<(), HookError> {
            ctx.store.set(b"hook:forwarding", b"ran");
            if self.fail_before_forwarding {
                return Err(HookError::new("forwarding rejected"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestCommand {
        fail_verify: bool,
        fail_execute: bool,
    }

    impl CrossChainCommand for TestCommand {
        fn verify(&self, _ctx: &mut HookContext, _ccm: &CrossChainMessage) -> Result<(), HookError> {
            if self.fail_verify {
                return Err(HookError::new("command verify rejected"));
            }
            Ok(())
        }

        fn execute(&self, ctx: &mut HookContext, _ccm: &CrossChainMessage) -> Result<(), HookError> {
            ctx.store.set(b"command:executed", b"ran");
            if self.fail_execute {
                return Err(HookError::new("command execute rejected"));
            }
            Ok(())
        }
    }

    fn setup(
        method: TestMethod,
        command: TestCommand,
    ) -> (StateStore, EventQueue, ModuleRegistry) {
        let mut store = StateStore::new();
        store::set_own_chain_account(
            &mut store,
            &OwnChainAccount {
                name: "mainchain".to_string(),
                chain_id: MAINCHAIN,
                nonce: 0,
            },
        )
        .unwrap();
        for id in [SIDE_A, SIDE_B] {
            let mut account = ChainAccount::new("side".to_string(), Hash::hash(b"validators"));
            account.status = ChainStatus::Active;
            account.last_certificate.timestamp = 50;
            store::set_chain_account(&mut store, &id, &account).unwrap();
            store::set_channel(
                &mut store,
                &id,
                &ChannelData::new([4, 0, 0, 0, 0, 0, 0, 0], 1),
            )
            .unwrap();
        }
        let mut registry = ModuleRegistry::new();
        registry.register_method("token", Box::new(method));
        registry.register_command("token", "transfer", Box::new(command));
        (store, EventQueue::new(), registry)
    }

    fn ccm(receiving: ChainId) -> CrossChainMessage {
        CrossChainMessage {
            module: "token".to_string(),
            cross_chain_command: "transfer".to_string(),
            nonce: 0,
            fee: 1_000_000,
            sending_chain_id: SIDE_A,
            receiving_chain_id: receiving,
            status: CcmStatus::Ok,
            params: vec![],
        }
    }

    fn last_processed(events: &EventQueue) -> (CcmProcessedCode, CcmProcessedResult) {
        events
            .records()
            .iter()
            .rev()
            .find_map(|r| match r.event {
                Event::CcmProcessed { code, result, .. } => Some((code, result)),
                _ => None,
            })
            .expect("no CcmProcessed event")
    }

    fn terminated(store: &StateStore, chain_id: &ChainId) -> bool {
        store::get_chain_account(store, chain_id)
            .unwrap()
            .map(|a| a.status == ChainStatus::Terminated)
            .unwrap_or(false)
    }

    #[test]
    fn test_apply_success() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        apply(&mut ctx, &ccm(MAINCHAIN)).unwrap();
        assert_eq!(
            last_processed(&events),
            (CcmProcessedCode::Success, CcmProcessedResult::Applied)
        );
        assert_eq!(store.get(b"command:executed"), Some(&b"ran"[..]));
        assert_eq!(store.get(b"hook:after"), Some(&b"ran"[..]));
    }

    #[test]
    fn test_apply_unknown_module_discards_without_termination() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        let mut message = ccm(MAINCHAIN);
        message.module = "nft".to_string();
        apply(&mut ctx, &message).unwrap();
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::ModuleNotSupported,
                CcmProcessedResult::Discarded
            )
        );
        assert!(!terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_apply_unknown_command_discards() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        let mut message = ccm(MAINCHAIN);
        message.cross_chain_command = "burn".to_string();
        apply(&mut ctx, &message).unwrap();
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::CrossChainCommandNotSupported,
                CcmProcessedResult::Discarded
            )
        );
    }

    #[test]
    fn test_apply_verify_hook_failure_terminates_sender() {
        let (mut store, mut events, registry) = setup(
            TestMethod { fail_verify: true, ..Default::default() },
            TestCommand::default(),
        );
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        apply(&mut ctx, &ccm(MAINCHAIN)).unwrap();
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::InvalidCcmVerifyCcmException,
                CcmProcessedResult::Discarded
            )
        );
        assert!(terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_apply_execute_failure_keeps_before_hook_effects() {
        let (mut store, mut events, registry) = setup(
            TestMethod::default(),
            TestCommand { fail_execute: true, ..Default::default() },
        );
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        apply(&mut ctx, &ccm(MAINCHAIN)).unwrap();
        assert_eq!(
            last_processed(&events),
            (CcmProcessedCode::FailedCcm, CcmProcessedResult::Discarded)
        );
        // execute effects rolled back, before-hook effects kept, after-hook ran
        assert_eq!(store.get(b"command:executed"), None);
        assert_eq!(store.get(b"hook:before"), Some(&b"ran"[..]));
        assert_eq!(store.get(b"hook:after"), Some(&b"ran"[..]));
        assert!(!terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_apply_before_hook_failure_rolls_back_exactly() {
        let (mut store, mut events, registry) = setup(
            TestMethod { fail_before_execute: true, ..Default::default() },
            TestCommand::default(),
        );
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        apply(&mut ctx, &ccm(MAINCHAIN)).unwrap();
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::InvalidCcmBeforeCccExecutionException,
                CcmProcessedResult::Discarded
            )
        );
        // the hook's own write was rolled back with the snapshot
        assert_eq!(store.get(b"hook:before"), None);
        assert_eq!(store.get(b"command:executed"), None);
    }

    #[test]
    fn test_apply_after_hook_failure_restores_to_pre_after_snapshot() {
        let (mut store, mut events, registry) = setup(
            TestMethod { fail_after_execute: true, ..Default::default() },
            TestCommand::default(),
        );
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        apply(&mut ctx, &ccm(MAINCHAIN)).unwrap();
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::InvalidCcmAfterCccExecutionException,
                CcmProcessedResult::Discarded
            )
        );
        // execute effects survive, the failing after-hook's write does not
        assert_eq!(store.get(b"command:executed"), Some(&b"ran"[..]));
        assert_eq!(store.get(b"hook:after"), None);
    }

    #[test]
    fn test_forward_success_appends_to_receiving_outbox() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let message = ccm(SIDE_B);
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);
        forward(&mut ctx, &message).unwrap();

        assert_eq!(
            last_processed(&events),
            (CcmProcessedCode::Success, CcmProcessedResult::Forwarded)
        );
        let channel = store::get_channel(&store, &SIDE_B).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 1);
        assert_eq!(
            channel.outbox.root,
            crate::types::merkle::leaf_hash(&message.to_bytes().unwrap())
        );
        assert!(!terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_forward_to_registered_chain_bounces_without_termination() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        // receiving chain back to Registered: channel not open yet
        let mut account = store::get_chain_account(&store, &SIDE_B).unwrap().unwrap();
        account.status = ChainStatus::Registered;
        store::set_chain_account(&mut store, &SIDE_B, &account).unwrap();

        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);
        forward(&mut ctx, &ccm(SIDE_B)).unwrap();

        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::ChannelUnavailable,
                CcmProcessedResult::Bounced
            )
        );
        assert!(!terminated(&store, &SIDE_A));
        assert!(!terminated(&store, &SIDE_B));
        // the reply went into the original sender's outbox
        let channel = store::get_channel(&store, &SIDE_A).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 1);
    }

    #[test]
    fn test_forward_to_dead_chain_terminates_receiver_and_notifies_sender() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        // receiving chain's certificate is far in the past
        let mut account = store::get_chain_account(&store, &SIDE_B).unwrap().unwrap();
        account.last_certificate.timestamp = 0;
        store::set_chain_account(&mut store, &SIDE_B, &account).unwrap();

        let header = BlockHeader {
            height: 1,
            timestamp: crate::types::LIVENESS_LIMIT + 1,
        };
        // keep the sender alive under the same clock
        let mut sender = store::get_chain_account(&store, &SIDE_A).unwrap().unwrap();
        sender.last_certificate.timestamp = header.timestamp;
        store::set_chain_account(&mut store, &SIDE_A, &sender).unwrap();

        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);
        forward(&mut ctx, &ccm(SIDE_B)).unwrap();

        assert!(terminated(&store, &SIDE_B));
        assert!(!terminated(&store, &SIDE_A));
        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::ChannelUnavailable,
                CcmProcessedResult::Discarded
            )
        );
        // the sidechain-terminated notification sits in the sender's outbox
        let channel = store::get_channel(&store, &SIDE_A).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 1);
        assert!(events
            .records()
            .iter()
            .any(|r| matches!(r.event, Event::CcmSentSuccess { .. })));
    }

    #[test]
    fn test_bounce_without_fee_discards_silently() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        let mut message = ccm(SIDE_B);
        message.fee = 0;
        bounce(
            &mut ctx,
            &message,
            CcmStatus::ChannelUnavailable,
            CcmProcessedCode::ChannelUnavailable,
        )
        .unwrap();

        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::ChannelUnavailable,
                CcmProcessedResult::Discarded
            )
        );
        let channel = store::get_channel(&store, &SIDE_A).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 0);
    }

    #[test]
    fn test_bounced_reply_swaps_endpoints_and_deducts_fee() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let message = ccm(SIDE_B);
        let size = message.to_bytes().unwrap().len() as u64;
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);
        bounce(
            &mut ctx,
            &message,
            CcmStatus::ChannelUnavailable,
            CcmProcessedCode::ChannelUnavailable,
        )
        .unwrap();

        let bounced = message.bounced(CcmStatus::ChannelUnavailable, message.fee - size);
        assert_eq!(bounced.sending_chain_id, SIDE_B);
        assert_eq!(bounced.receiving_chain_id, SIDE_A);
        let channel = store::get_channel(&store, &SIDE_A).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 1);
        assert_eq!(
            channel.outbox.root,
            crate::types::merkle::leaf_hash(&bounced.to_bytes().unwrap())
        );
    }

    #[test]
    fn test_snapshot_symmetry_on_hook_failure() {
        let (mut store, mut events, registry) = setup(
            TestMethod { fail_before_forwarding: true, ..Default::default() },
            TestCommand::default(),
        );
        let header = BlockHeader { height: 1, timestamp: 100 };

        // record observable state before dispatch
        let outbox_before = store::get_channel(&store, &SIDE_B).unwrap().unwrap().outbox;
        let events_len_before = events.records().len();

        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);
        forward(&mut ctx, &ccm(SIDE_B)).unwrap();

        // rollback left no trace of the hook's write, only the terminate and
        // discard events follow the pre-hook state
        assert_eq!(store.get(b"hook:forwarding"), None);
        let outbox_after = store::get_channel(&store, &SIDE_B).unwrap().unwrap().outbox;
        assert_eq!(outbox_before, outbox_after);
        assert!(events.records().len() > events_len_before);
        assert!(terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_apply_recovery_never_terminates() {
        let (mut store, mut events, registry) = setup(
            TestMethod { fail_verify: true, ..Default::default() },
            TestCommand::default(),
        );
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        // swapped message: terminated chain is the sender
        let mut message = ccm(MAINCHAIN);
        message.status = CcmStatus::Recovered;
        apply_recovery(&mut ctx, &message).unwrap();

        assert_eq!(
            last_processed(&events),
            (
                CcmProcessedCode::InvalidCcmVerifyCcmException,
                CcmProcessedResult::Discarded
            )
        );
        assert!(!terminated(&store, &SIDE_A));
    }

    #[test]
    fn test_forward_recovery_appends_on_success() {
        let (mut store, mut events, registry) = setup(TestMethod::default(), TestCommand::default());
        let header = BlockHeader { height: 1, timestamp: 100 };
        let mut ctx = CommandContext::new(&mut store, &mut events, &registry, header, 0);

        let mut message = ccm(SIDE_B);
        message.status = CcmStatus::Recovered;
        forward_recovery(&mut ctx, &message).unwrap();

        assert_eq!(
            last_processed(&events),
            (CcmProcessedCode::Success, CcmProcessedResult::Forwarded)
        );
        let channel = store::get_channel(&store, &SIDE_B).unwrap().unwrap();
        assert_eq!(channel.outbox.size, 1);
    }
}
