// Events - audit trail of interoperability outcomes, snapshot-consistent with state
use super::state::StoreError;
use crate::types::{ChainId, Hash};
use serde::{Deserialize, Serialize};

/// Why a cross-chain message ended up applied, forwarded, bounced or discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcmProcessedCode {
    Success,
    ModuleNotSupported,
    CrossChainCommandNotSupported,
    ChannelUnavailable,
    FailedCcm,
    InvalidCcmDecodeException,
    InvalidCcmVerifyCcmException,
    InvalidCcmVerifyException,
    InvalidCcmBeforeCccExecutionException,
    InvalidCcmAfterCccExecutionException,
    InvalidCcmBeforeCccForwardingException,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CcmProcessedResult {
    Applied,
    Forwarded,
    Bounced,
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CcmProcessed {
        sending_chain_id: ChainId,
        receiving_chain_id: ChainId,
        code: CcmProcessedCode,
        result: CcmProcessedResult,
    },
    CcmSentSuccess {
        sending_chain_id: ChainId,
        receiving_chain_id: ChainId,
        nonce: u64,
    },
    ChainAccountUpdated {
        chain_id: ChainId,
        certificate_height: u64,
    },
    ChainTerminated {
        chain_id: ChainId,
    },
    InvalidRmtVerification {
        chain_id: ChainId,
    },
    InvalidSmtVerification {
        chain_id: ChainId,
    },
}

/// An event plus the topic of the message scope it was logged under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub topic: Option<Hash>,
    pub event: Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSnapshot(usize);

/// Append-only event buffer.
///
/// Entering a scope tags subsequent events with a message topic (the CCM id),
/// giving each message an attributable child log. Snapshot/restore follows
/// the same truncation contract as the state store so both roll back in
/// lock-step.
#[derive(Default)]
pub struct EventQueue {
    records: Vec<EventRecord>,
    scopes: Vec<Hash>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event: Event) {
        self.records.push(EventRecord {
            topic: self.scopes.last().copied(),
            event,
        });
    }

    pub fn enter_scope(&mut self, topic: Hash) {
        self.scopes.push(topic);
    }

    pub fn exit_scope(&mut self) {
        self.scopes.pop();
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn create_snapshot(&self) -> EventSnapshot {
        EventSnapshot(self.records.len())
    }

    pub fn restore_snapshot(&mut self, snapshot: EventSnapshot) -> Result<(), StoreError> {
        if snapshot.0 > self.records.len() {
            return Err(StoreError::StaleSnapshot);
        }
        self.records.truncate(snapshot.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(n: u8) -> ChainId {
        ChainId::from_bytes([4, 0, 0, n])
    }

    #[test]
    fn test_scope_tags_events() {
        let mut queue = EventQueue::new();
        queue.log(Event::ChainTerminated { chain_id: chain(1) });

        let topic = Hash::hash(b"ccm");
        queue.enter_scope(topic);
        queue.log(Event::CcmProcessed {
            sending_chain_id: chain(1),
            receiving_chain_id: chain(0),
            code: CcmProcessedCode::Success,
            result: CcmProcessedResult::Applied,
        });
        queue.exit_scope();
        queue.log(Event::ChainTerminated { chain_id: chain(2) });

        let records = queue.records();
        assert_eq!(records[0].topic, None);
        assert_eq!(records[1].topic, Some(topic));
        assert_eq!(records[2].topic, None);
    }

    #[test]
    fn test_snapshot_truncates_exactly() {
        let mut queue = EventQueue::new();
        queue.log(Event::ChainTerminated { chain_id: chain(1) });
        let snapshot = queue.create_snapshot();
        queue.log(Event::ChainTerminated { chain_id: chain(2) });
        queue.log(Event::ChainTerminated { chain_id: chain(3) });

        queue.restore_snapshot(snapshot).unwrap();
        assert_eq!(queue.records().len(), 1);
        assert_eq!(
            queue.records()[0].event,
            Event::ChainTerminated { chain_id: chain(1) }
        );
    }

    #[test]
    fn test_stale_snapshot_rejected() {
        let mut queue = EventQueue::new();
        queue.log(Event::ChainTerminated { chain_id: chain(1) });
        let newer = queue.create_snapshot();
        queue.restore_snapshot(EventSnapshot(0)).unwrap();
        assert_eq!(queue.restore_snapshot(newer), Err(StoreError::StaleSnapshot));
    }
}
