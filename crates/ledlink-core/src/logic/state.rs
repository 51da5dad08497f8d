//! Controller State Management
//!
//! Messages exchanged with the controller task and the per-attempt state it
//! owns.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{OperationFailure, Result};
use crate::gatt::{CharacteristicHandle, GattService};
use crate::transport::{TransportError, TransportEvent};
use crate::types::{PeripheralIdentity, VerificationOutcome};

use super::deadline::DeadlineGuard;

// ----------------------------------------------------------------------------
// Messages
// ----------------------------------------------------------------------------

/// Reply channel for a caller waiting on a command
pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Commands from [`crate::LedController`] handles
pub(crate) enum Command {
    Connect {
        peer: PeripheralIdentity,
        verdict: Option<oneshot::Sender<VerificationOutcome>>,
        reply: Reply<Result<()>>,
    },
    Disconnect {
        reply: Reply<()>,
    },
    ReadState {
        reply: Reply<Result<bool>>,
    },
    WriteState {
        value: bool,
        reply: Reply<Result<bool>>,
    },
    Toggle {
        reply: Reply<Result<bool>>,
    },
    Stats {
        reply: Reply<ControllerStats>,
    },
    Shutdown,
}

/// Completion of an operation the controller started, tagged with the
/// generation of the attempt that started it
pub(crate) enum Completion {
    Link {
        generation: u64,
        result: Result<()>,
    },
    Discovery {
        generation: u64,
        result: std::result::Result<Vec<GattService>, TransportError>,
    },
    Subscribed {
        generation: u64,
        result: std::result::Result<(), OperationFailure>,
    },
    Read {
        generation: u64,
        result: std::result::Result<Vec<u8>, OperationFailure>,
        reply: Option<Reply<Result<bool>>>,
    },
    Write {
        generation: u64,
        value: bool,
        result: std::result::Result<(), OperationFailure>,
        reply: Reply<Result<bool>>,
    },
    DeadlineElapsed {
        generation: u64,
    },
}

/// Everything the controller loop reacts to besides handle commands.
///
/// Completions and transport events share one queue so they are handled in
/// the order they were sent.
pub(crate) enum Inbound {
    Completion(Completion),
    Transport(TransportEvent),
}

pub(crate) type InboundReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Sending half for operation completions
#[derive(Clone)]
pub(crate) struct CompletionSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl CompletionSender {
    pub fn new(tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { tx }
    }

    pub fn send(
        &self,
        completion: Completion,
    ) -> std::result::Result<(), mpsc::error::SendError<Inbound>> {
        self.tx.send(Inbound::Completion(completion))
    }
}

/// A queue with no transport feeding it
#[cfg(test)]
pub(crate) fn inbound_channel() -> (CompletionSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CompletionSender::new(tx), rx)
}

// ----------------------------------------------------------------------------
// Verdict Latch
// ----------------------------------------------------------------------------

/// Exactly-once guard for the compatibility verdict of one attempt
#[derive(Debug, Default)]
pub(crate) struct VerdictLatch {
    delivered: bool,
}

impl VerdictLatch {
    /// Set the latch; returns `true` only for the first caller
    pub fn try_latch(&mut self) -> bool {
        !std::mem::replace(&mut self.delivered, true)
    }

    pub fn is_latched(&self) -> bool {
        self.delivered
    }
}

// ----------------------------------------------------------------------------
// Connection Attempt
// ----------------------------------------------------------------------------

/// Everything scoped to a single `connect()`.
///
/// Dropping the attempt aborts its in-flight operations and disarms the
/// deadline; any completion they already queued is then recognised as stale
/// by its generation.
pub(crate) struct Attempt {
    pub generation: u64,
    pub peer: PeripheralIdentity,
    pub latch: VerdictLatch,
    /// Outcome once delivered, replayed to a late per-attempt handler
    pub outcome: Option<VerificationOutcome>,
    /// Per-attempt verdict handler registered by `connect_and_wait`
    pub verdict_tx: Option<oneshot::Sender<VerificationOutcome>>,
    pub deadline: Option<DeadlineGuard>,
    /// Present only while the state is `Ready`
    pub handle: Option<CharacteristicHandle>,
    in_flight: Vec<JoinHandle<()>>,
}

impl Attempt {
    pub fn new(
        generation: u64,
        peer: PeripheralIdentity,
        verdict_tx: Option<oneshot::Sender<VerificationOutcome>>,
        deadline: DeadlineGuard,
    ) -> Self {
        Self {
            generation,
            peer,
            latch: VerdictLatch::default(),
            outcome: None,
            verdict_tx,
            deadline: Some(deadline),
            handle: None,
            in_flight: Vec::new(),
        }
    }

    /// Keep track of an operation so it can be cancelled with the attempt
    pub fn track(&mut self, task: JoinHandle<()>) {
        self.in_flight.retain(|task| !task.is_finished());
        self.in_flight.push(task);
    }

    /// Abort every operation still running for this attempt
    pub fn cancel_in_flight(&mut self) {
        for task in self.in_flight.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}

// ----------------------------------------------------------------------------
// Statistics
// ----------------------------------------------------------------------------

/// Counters kept by the controller task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Connection attempts started
    pub attempts: u64,
    /// Verdicts published
    pub verdicts_delivered: u64,
    /// Verdict sources that fired after the latch was already set
    pub verdicts_suppressed: u64,
    /// Completions discarded because their attempt was gone
    pub stale_completions: u64,
    /// Indications applied to the LED state
    pub indications_applied: u64,
}
