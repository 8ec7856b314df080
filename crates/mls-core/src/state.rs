use std::collections::HashSet;

use tokio::sync::watch;

/// Where an upload is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming,
    /// Every chunk is sent, waiting for acknowledgments
    Draining,
    Completed,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Aborted)
    }
}

/// Ids handed to the stream, in send order
#[derive(Debug, Clone, Default)]
pub struct SentSet {
    ids: Vec<i64>,
}

impl SentSet {
    pub fn push(&mut self, id: i64) {
        debug_assert!(
            self.ids.last().is_none_or(|&last| id > last),
            "chunk ids must be strictly increasing"
        );
        self.ids.push(id);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Number of sent ids missing from `acked`
    pub fn pending(&self, acked: &AckSet) -> usize {
        self.ids.iter().filter(|id| !acked.contains(**id)).count()
    }

    pub fn is_covered_by(&self, acked: &AckSet) -> bool {
        self.ids.iter().all(|id| acked.contains(*id))
    }
}

/// Latest acknowledgment snapshot from the server
#[derive(Debug, Clone, Default)]
pub struct AckSet {
    ids: HashSet<i64>,
}

impl AckSet {
    /// Overwrite with a new snapshot. Snapshots are never merged.
    pub fn replace(&mut self, ids: impl IntoIterator<Item = i64>) {
        self.ids.clear();
        self.ids.extend(ids);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct TransferState {
    pub phase: Phase,

    /// Bytes pulled from the source
    pub bytes_read: u64,
    pub producer_done: bool,

    /// Bytes accepted by the outbound stream
    pub bytes_sent: u64,
    pub sent: SentSet,
    /// The sender consumed the end-of-input marker
    pub sender_drained: bool,
    /// The peer stopped accepting chunks
    pub send_closed: bool,

    pub acked: AckSet,
    /// The peer finished the acknowledgment stream
    pub ack_closed: bool,
}

impl Default for TransferState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            bytes_read: 0,
            producer_done: false,
            bytes_sent: 0,
            sent: SentSet::default(),
            sender_drained: false,
            send_closed: false,
            acked: AckSet::default(),
            ack_closed: false,
        }
    }
}

/// Shared handle the pipeline tasks publish their progress through.
///
/// Wraps a watch channel so the completion monitor wakes on every change.
#[derive(Debug)]
pub struct Tracker {
    tx: watch::Sender<TransferState>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TransferState::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TransferState {
        self.tx.borrow().clone()
    }

    pub fn set_phase(&self, phase: Phase) {
        self.tx.send_modify(|s| {
            if !s.phase.is_terminal() {
                s.phase = phase;
            }
        });
    }

    pub fn record_read(&self, len: usize) {
        self.tx.send_modify(|s| s.bytes_read += len as u64);
    }

    pub fn mark_producer_done(&self) {
        self.tx.send_modify(|s| s.producer_done = true);
    }

    pub fn record_sent(&self, id: i64, len: usize) {
        self.tx.send_modify(|s| {
            s.sent.push(id);
            s.bytes_sent += len as u64;
        });
    }

    pub fn mark_sender_drained(&self) {
        self.tx.send_modify(|s| {
            s.sender_drained = true;
            if s.phase == Phase::Streaming {
                s.phase = Phase::Draining;
            }
        });
    }

    pub fn mark_send_closed(&self) {
        self.tx.send_modify(|s| s.send_closed = true);
    }

    pub fn replace_acks(&self, ids: Vec<i64>) {
        self.tx.send_modify(|s| s.acked.replace(ids));
    }

    pub fn mark_ack_closed(&self) {
        self.tx.send_modify(|s| s.ack_closed = true);
    }
}
