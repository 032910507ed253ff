//! Per-transfer reassembly state machine.
//!
//! [`TransferState`] is pure bookkeeping: it accepts envelopes and fragments,
//! detects duplicates and conflicts, and reports when every piece is present.
//! It never performs I/O and never reads the clock itself; callers pass `now`
//! so sweeps and tests stay deterministic.

use std::collections::BTreeMap;

use shutterlink_protocol::transfer::{Fragment, TransferEnvelope};
use tokio::time::{Duration, Instant};

/// Why a transfer ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// A fragment arrived twice with different payloads for the same index.
    FragmentMismatch,
    /// An envelope conflicted with a prior envelope or buffered fragments.
    EnvelopeMismatch,
    /// The assembled payload failed a completion-edge check.
    Validation(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FragmentMismatch => write!(f, "conflicting fragment payload"),
            Self::EnvelopeMismatch => write!(f, "conflicting envelope"),
            Self::Validation(detail) => write!(f, "validation: {detail}"),
        }
    }
}

/// Lifecycle of one transfer on the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Waiting for the envelope and/or fragments.
    Collecting,
    /// Assembled, validated, and handed to the sink.
    Complete,
    /// Timed out while still collecting.
    Expired,
    /// Terminal failure; late duplicates are discarded.
    Failed(FailureReason),
}

impl TransferStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Collecting)
    }
}

/// Outcome of feeding one message into a [`TransferState`].
#[derive(Debug)]
pub enum Ingestion {
    /// Stored; the transfer is still incomplete.
    Accepted,
    /// An exact duplicate of something already held. Ignored.
    Duplicate,
    /// Every fragment is present. The caller must validate the payload and
    /// then settle the state with [`TransferState::mark_complete`] or
    /// [`TransferState::mark_failed`] before releasing its lock.
    Assembled {
        envelope: TransferEnvelope,
        encoded: String,
    },
    /// The message conflicted with held state; the transfer is now `Failed`.
    Rejected(FailureReason),
    /// The transfer is already terminal; the message was dropped.
    TerminalDiscard,
}

/// Reassembly state for a single transfer id.
#[derive(Debug)]
pub struct TransferState {
    envelope: Option<TransferEnvelope>,
    buffer: BTreeMap<u32, String>,
    /// Hard cap on buffered payload bytes. Caps envelope-less transfers
    /// too: without it, withholding the envelope would let a sender buffer
    /// without bound until the idle sweep.
    max_buffered_bytes: usize,
    first_seen_at: Instant,
    last_activity_at: Instant,
    status: TransferStatus,
    terminal_at: Option<Instant>,
}

impl TransferState {
    /// Fresh state, created on the first message for a transfer id
    /// (fragments may arrive before their envelope).
    pub fn new(now: Instant, max_buffered_bytes: usize) -> Self {
        Self {
            envelope: None,
            buffer: BTreeMap::new(),
            max_buffered_bytes,
            first_seen_at: now,
            last_activity_at: now,
            status: TransferStatus::Collecting,
            terminal_at: None,
        }
    }

    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    pub fn envelope(&self) -> Option<&TransferEnvelope> {
        self.envelope.as_ref()
    }

    /// Bytes currently buffered for this transfer.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.values().map(String::len).sum()
    }

    /// Record the transfer's envelope.
    ///
    /// An envelope identical to one already held is a duplicate; a differing
    /// one, or one contradicted by already-buffered fragment indices, fails
    /// the transfer.
    pub fn apply_envelope(&mut self, envelope: TransferEnvelope, now: Instant) -> Ingestion {
        if self.status.is_terminal() {
            return Ingestion::TerminalDiscard;
        }
        if let Some(existing) = &self.envelope {
            if *existing == envelope {
                self.last_activity_at = now;
                return Ingestion::Duplicate;
            }
            return self.reject(FailureReason::EnvelopeMismatch, now);
        }
        if let Some((&max_index, _)) = self.buffer.last_key_value() {
            if max_index >= envelope.fragment_count {
                return self.reject(FailureReason::EnvelopeMismatch, now);
            }
        }
        self.envelope = Some(envelope);
        self.last_activity_at = now;
        self.try_assemble()
    }

    /// Buffer one fragment. Out-of-order arrival is the normal case.
    pub fn apply_fragment(&mut self, fragment: Fragment, now: Instant) -> Ingestion {
        if self.status.is_terminal() {
            return Ingestion::TerminalDiscard;
        }
        if let Some(envelope) = &self.envelope {
            if fragment.sequence_index >= envelope.fragment_count {
                return self.reject(FailureReason::EnvelopeMismatch, now);
            }
        }
        match self.buffer.get(&fragment.sequence_index) {
            Some(held) if *held == fragment.payload_chunk => {
                self.last_activity_at = now;
                Ingestion::Duplicate
            }
            Some(_) => self.reject(FailureReason::FragmentMismatch, now),
            None => {
                if self.buffered_bytes() + fragment.payload_chunk.len() > self.max_buffered_bytes {
                    return self.reject(
                        FailureReason::Validation(format!(
                            "buffered payload would exceed the {} byte ceiling",
                            self.max_buffered_bytes
                        )),
                        now,
                    );
                }
                self.buffer
                    .insert(fragment.sequence_index, fragment.payload_chunk);
                self.last_activity_at = now;
                self.try_assemble()
            }
        }
    }

    /// Settle an [`Ingestion::Assembled`] transfer that passed validation.
    /// Releases the fragment buffer; the terminal entry lingers only to
    /// absorb late duplicates.
    pub fn mark_complete(&mut self, now: Instant) {
        self.status = TransferStatus::Complete;
        self.terminal_at = Some(now);
        self.buffer = BTreeMap::new();
    }

    /// Settle a transfer as failed.
    pub fn mark_failed(&mut self, reason: FailureReason, now: Instant) {
        self.status = TransferStatus::Failed(reason);
        self.terminal_at = Some(now);
        self.buffer = BTreeMap::new();
    }

    /// Expire a stalled transfer. Returns true when a transition happened.
    pub fn expire_if_due(
        &mut self,
        now: Instant,
        idle_timeout: Duration,
        max_transfer_duration: Duration,
    ) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let idle = now.saturating_duration_since(self.last_activity_at) >= idle_timeout;
        let overdue = now.saturating_duration_since(self.first_seen_at) >= max_transfer_duration;
        if !idle && !overdue {
            return false;
        }
        self.status = TransferStatus::Expired;
        self.terminal_at = Some(now);
        self.buffer = BTreeMap::new();
        true
    }

    /// Whether the terminal grace window has elapsed and the entry can be
    /// dropped from the registry.
    pub fn purge_due(&self, now: Instant, grace_window: Duration) -> bool {
        match self.terminal_at {
            Some(at) => now.saturating_duration_since(at) >= grace_window,
            None => false,
        }
    }

    fn reject(&mut self, reason: FailureReason, now: Instant) -> Ingestion {
        self.status = TransferStatus::Failed(reason.clone());
        self.terminal_at = Some(now);
        self.buffer = BTreeMap::new();
        Ingestion::Rejected(reason)
    }

    /// Check for completeness without transitioning: the caller still has to
    /// validate the assembled payload while holding this state's lock.
    fn try_assemble(&mut self) -> Ingestion {
        let Some(envelope) = &self.envelope else {
            return Ingestion::Accepted;
        };
        if self.buffer.len() as u32 != envelope.fragment_count {
            return Ingestion::Accepted;
        }
        // BTreeMap iteration yields chunks in ascending index order.
        let encoded: String = self.buffer.values().map(String::as_str).collect();
        Ingestion::Assembled {
            envelope: envelope.clone(),
            encoded,
        }
    }
}
