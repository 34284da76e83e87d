// Chain registry - typed, chain-ID-keyed access to interoperability state
use super::InteropError;
use crate::codec;
use crate::storage::{Event, EventQueue, StateStore};
use crate::types::{
    CcmStatus, ChainAccount, ChainId, ChainStatus, ChainValidators, ChannelData,
    CrossChainMessage, Hash, OwnChainAccount, TerminatedOutboxAccount, TerminatedStateAccount,
    Timestamp, LIVENESS_LIMIT,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

/// Store key prefixes, chain-ID suffixed
const PREFIX_CHAIN_ACCOUNT: &[u8] = b"interop:chain:";
const PREFIX_CHANNEL: &[u8] = b"interop:channel:";
const PREFIX_VALIDATORS: &[u8] = b"interop:validators:";
const PREFIX_TERMINATED_STATE: &[u8] = b"interop:terminated_state:";
const PREFIX_TERMINATED_OUTBOX: &[u8] = b"interop:terminated_outbox:";
const PREFIX_REGISTERED_NAME: &[u8] = b"interop:name:";
const KEY_OWN_CHAIN: &[u8] = b"interop:own_chain";

fn chain_key(prefix: &[u8], chain_id: &ChainId) -> Vec<u8> {
    let mut key = prefix.to_vec();
    key.extend_from_slice(chain_id.as_bytes());
    key
}

/// Key under which one side of a channel stores the other side's channel
/// record; recovery initialization proves this key on the terminated chain
pub fn channel_store_key(chain_id: &ChainId) -> Vec<u8> {
    chain_key(PREFIX_CHANNEL, chain_id)
}

fn get_record<T: DeserializeOwned>(
    store: &StateStore,
    key: &[u8],
) -> Result<Option<T>, InteropError> {
    match store.get(key) {
        Some(bytes) => Ok(Some(codec::decode(bytes)?)),
        None => Ok(None),
    }
}

fn set_record<T: Serialize>(
    store: &mut StateStore,
    key: &[u8],
    value: &T,
) -> Result<(), InteropError> {
    store.set(key, &codec::encode(value)?);
    Ok(())
}

pub fn get_chain_account(
    store: &StateStore,
    chain_id: &ChainId,
) -> Result<Option<ChainAccount>, InteropError> {
    get_record(store, &chain_key(PREFIX_CHAIN_ACCOUNT, chain_id))
}

pub fn set_chain_account(
    store: &mut StateStore,
    chain_id: &ChainId,
    account: &ChainAccount,
) -> Result<(), InteropError> {
    set_record(store, &chain_key(PREFIX_CHAIN_ACCOUNT, chain_id), account)
}

pub fn get_channel(
    store: &StateStore,
    chain_id: &ChainId,
) -> Result<Option<ChannelData>, InteropError> {
    get_record(store, &channel_store_key(chain_id))
}

pub fn set_channel(
    store: &mut StateStore,
    chain_id: &ChainId,
    channel: &ChannelData,
) -> Result<(), InteropError> {
    set_record(store, &channel_store_key(chain_id), channel)
}

pub fn get_chain_validators(
    store: &StateStore,
    chain_id: &ChainId,
) -> Result<Option<ChainValidators>, InteropError> {
    get_record(store, &chain_key(PREFIX_VALIDATORS, chain_id))
}

pub fn set_chain_validators(
    store: &mut StateStore,
    chain_id: &ChainId,
    validators: &ChainValidators,
) -> Result<(), InteropError> {
    set_record(store, &chain_key(PREFIX_VALIDATORS, chain_id), validators)
}

pub fn get_terminated_state(
    store: &StateStore,
    chain_id: &ChainId,
) -> Result<Option<TerminatedStateAccount>, InteropError> {
    get_record(store, &chain_key(PREFIX_TERMINATED_STATE, chain_id))
}

pub fn set_terminated_state(
    store: &mut StateStore,
    chain_id: &ChainId,
    account: &TerminatedStateAccount,
) -> Result<(), InteropError> {
    set_record(store, &chain_key(PREFIX_TERMINATED_STATE, chain_id), account)
}

pub fn has_terminated_state(store: &StateStore, chain_id: &ChainId) -> bool {
    store.has(&chain_key(PREFIX_TERMINATED_STATE, chain_id))
}

pub fn get_terminated_outbox(
    store: &StateStore,
    chain_id: &ChainId,
) -> Result<Option<TerminatedOutboxAccount>, InteropError> {
    get_record(store, &chain_key(PREFIX_TERMINATED_OUTBOX, chain_id))
}

pub fn set_terminated_outbox(
    store: &mut StateStore,
    chain_id: &ChainId,
    account: &TerminatedOutboxAccount,
) -> Result<(), InteropError> {
    set_record(
        store,
        &chain_key(PREFIX_TERMINATED_OUTBOX, chain_id),
        account,
    )
}

pub fn has_terminated_outbox(store: &StateStore, chain_id: &ChainId) -> bool {
    store.has(&chain_key(PREFIX_TERMINATED_OUTBOX, chain_id))
}

pub fn get_own_chain_account(store: &StateStore) -> Result<OwnChainAccount, InteropError> {
    get_record(store, KEY_OWN_CHAIN)?.ok_or(InteropError::OwnChainMissing)
}

pub fn set_own_chain_account(
    store: &mut StateStore,
    account: &OwnChainAccount,
) -> Result<(), InteropError> {
    set_record(store, KEY_OWN_CHAIN, account)
}

pub fn get_registered_name(
    store: &StateStore,
    name: &str,
) -> Result<Option<ChainId>, InteropError> {
    let mut key = PREFIX_REGISTERED_NAME.to_vec();
    key.extend_from_slice(name.as_bytes());
    get_record(store, &key)
}

pub fn set_registered_name(
    store: &mut StateStore,
    name: &str,
    chain_id: &ChainId,
) -> Result<(), InteropError> {
    let mut key = PREFIX_REGISTERED_NAME.to_vec();
    key.extend_from_slice(name.as_bytes());
    set_record(store, &key, chain_id)
}

/// Whether a partner chain may still exchange messages with us.
///
/// The mainchain is always live. A terminated chain never is. A registered
/// chain has no certificate yet and counts as live; an active chain is live
/// while its last certificate is within the liveness limit of `now`.
pub fn is_live(
    store: &StateStore,
    chain_id: &ChainId,
    now: Timestamp,
) -> Result<bool, InteropError> {
    if chain_id.is_mainchain() {
        return Ok(true);
    }
    if has_terminated_state(store, chain_id) {
        return Ok(false);
    }
    match get_chain_account(store, chain_id)? {
        None => Ok(false),
        Some(account) => match account.status {
            ChainStatus::Terminated => Ok(false),
            ChainStatus::Registered => Ok(true),
            ChainStatus::Active => {
                Ok(now.saturating_sub(account.last_certificate.timestamp) <= LIVENESS_LIMIT)
            }
        },
    }
}

/// Idempotent transition to Terminated.
///
/// The first call flips the status, snapshots the last certified state root
/// into a terminated-state account and emits one ChainTerminated event.
/// Subsequent calls are no-ops, so terminating an already-terminated chain
/// can never duplicate events or fail.
pub fn terminate_chain_internal(
    store: &mut StateStore,
    events: &mut EventQueue,
    chain_id: &ChainId,
) -> Result<(), InteropError> {
    let Some(mut account) = get_chain_account(store, chain_id)? else {
        return Ok(());
    };
    if account.status == ChainStatus::Terminated {
        return Ok(());
    }

    debug!("terminating {} (was {:?})", chain_id, account.status);
    account.status = ChainStatus::Terminated;
    set_chain_account(store, chain_id, &account)?;
    set_terminated_state(
        store,
        chain_id,
        &TerminatedStateAccount {
            state_root: account.last_certificate.state_root,
            mainchain_state_root: Hash::ZERO,
            initialized: true,
        },
    )?;
    events.log(Event::ChainTerminated {
        chain_id: *chain_id,
    });
    Ok(())
}

/// Create the recovery snapshot for a terminated chain. Callers must check
/// [`has_terminated_outbox`] first; the account is created exactly once.
pub fn create_terminated_outbox_account(
    store: &mut StateStore,
    chain_id: &ChainId,
    outbox_root: Hash,
    outbox_size: u64,
    partner_chain_inbox_size: u64,
) -> Result<(), InteropError> {
    if has_terminated_outbox(store, chain_id) {
        return Err(InteropError::TerminatedOutboxExists(*chain_id));
    }
    set_terminated_outbox(
        store,
        chain_id,
        &TerminatedOutboxAccount {
            outbox_root,
            outbox_size,
            partner_chain_inbox_size,
        },
    )
}

/// Append a serialized message to the outbox toward `chain_id`
pub fn add_to_outbox(
    store: &mut StateStore,
    chain_id: &ChainId,
    ccm_bytes: &[u8],
) -> Result<(), InteropError> {
    let mut channel =
        get_channel(store, chain_id)?.ok_or(InteropError::ChainNotRegistered(*chain_id))?;
    channel.outbox.append(ccm_bytes);
    set_channel(store, chain_id, &channel)
}

/// Append a serialized message to the inbox of messages received from
/// `chain_id`
pub fn append_to_inbox(
    store: &mut StateStore,
    chain_id: &ChainId,
    ccm_bytes: &[u8],
) -> Result<(), InteropError> {
    let mut channel =
        get_channel(store, chain_id)?.ok_or(InteropError::ChainNotRegistered(*chain_id))?;
    channel.inbox.append(ccm_bytes);
    set_channel(store, chain_id, &channel)
}

/// Construct and send a message from the own chain: consumes one nonce,
/// appends to the receiving chain's outbox and logs the send
pub fn send_internal(
    store: &mut StateStore,
    events: &mut EventQueue,
    receiving_chain_id: &ChainId,
    module: &str,
    cross_chain_command: &str,
    params: Vec<u8>,
    fee: u64,
) -> Result<CrossChainMessage, InteropError> {
    let mut own = get_own_chain_account(store)?;
    let ccm = CrossChainMessage {
        module: module.to_string(),
        cross_chain_command: cross_chain_command.to_string(),
        nonce: own.nonce,
        fee,
        sending_chain_id: own.chain_id,
        receiving_chain_id: *receiving_chain_id,
        status: CcmStatus::Ok,
        params,
    };
    ccm.validate_format()?;
    add_to_outbox(store, receiving_chain_id, &ccm.to_bytes()?)?;
    own.nonce += 1;
    set_own_chain_account(store, &own)?;
    events.log(Event::CcmSentSuccess {
        sending_chain_id: ccm.sending_chain_id,
        receiving_chain_id: ccm.receiving_chain_id,
        nonce: ccm.nonce,
    });
    Ok(ccm)
}
