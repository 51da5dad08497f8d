//! Controller Task Implementation
//!
//! `ControllerTask` owns the connection state machine. It processes handle
//! commands, operation completions and transport events strictly one at a
//! time, taking completions and transport events in arrival order.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::error::{LedError, OperationFailure, Result};
use crate::gatt::{CharacteristicHandle, GattService};
use crate::schema::{CompatibilitySchema, LED_SCHEMA};
use crate::transport::{GattTransport, TransportError, TransportEvent, TransportEventReceiver};
use crate::types::{decode_led, ConnectionState, LifecycleEvent, PeripheralIdentity, VerificationOutcome};

use super::deadline::DeadlineGuard;
use super::handlers::{teardown_finished, Operations, TeardownSignal};
use super::state::{Attempt, Command, Completion, ControllerStats, Inbound, InboundReceiver, Reply};

// ----------------------------------------------------------------------------
// Observable Outputs
// ----------------------------------------------------------------------------

/// Sending halves of everything the controller publishes
pub(crate) struct Outputs {
    pub led: watch::Sender<bool>,
    pub connection: watch::Sender<ConnectionState>,
    pub lifecycle: broadcast::Sender<LifecycleEvent>,
    pub verdicts: broadcast::Sender<VerificationOutcome>,
}

// ----------------------------------------------------------------------------
// Controller Task
// ----------------------------------------------------------------------------

/// The task that owns all connection state
pub(crate) struct ControllerTask {
    state: ConnectionState,
    attempt: Option<Attempt>,
    next_generation: u64,
    schema: CompatibilitySchema,
    ops: Operations,
    stats: ControllerStats,
    commands: mpsc::Receiver<Command>,
    inbound: InboundReceiver,
    /// Most recent link teardown, possibly still running
    teardown: Option<TeardownSignal>,
    outputs: Outputs,
}

impl ControllerTask {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        transport_events: TransportEventReceiver,
        config: ControllerConfig,
        commands: mpsc::Receiver<Command>,
        outputs: Outputs,
    ) -> Self {
        let (completion_tx, inbound) = transport_events.into_queue();
        Self {
            state: ConnectionState::Disconnected,
            attempt: None,
            next_generation: 0,
            schema: LED_SCHEMA,
            ops: Operations::new(transport, completion_tx, config),
            stats: ControllerStats::default(),
            commands,
            inbound,
            teardown: None,
            outputs,
        }
    }

    /// Run until shutdown is requested or every handle is dropped
    pub async fn run(mut self) {
        info!("LED controller task starting");

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => {
                            info!("Shutdown requested, stopping controller");
                            break;
                        }
                        Some(cmd) => self.handle_command(cmd),
                    }
                }

                // Never closes: the task holds a completion sender
                Some(inbound) = self.inbound.recv() => {
                    match inbound {
                        Inbound::Completion(completion) => self.handle_completion(completion),
                        Inbound::Transport(event) => self.handle_transport_event(event),
                    }
                }
            }
        }

        self.disconnect(None);
        if let Some(teardown) = self.teardown.take() {
            teardown_finished(teardown).await;
        }
        info!("LED controller task stopped");
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect {
                peer,
                verdict,
                reply,
            } => {
                let result = self.connect(peer, verdict);
                let _ = reply.send(result);
            }
            Command::Disconnect { reply } => self.disconnect(Some(reply)),
            Command::ReadState { reply } => self.read_state(reply),
            Command::WriteState { value, reply } => self.write_state(value, reply),
            Command::Toggle { reply } => {
                let value = !*self.outputs.led.borrow();
                debug!("Toggling LED to {}", if value { "on" } else { "off" });
                self.write_state(value, reply);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats.clone());
            }
            Command::Shutdown => {}
        }
    }

    fn connect(
        &mut self,
        peer: PeripheralIdentity,
        verdict: Option<oneshot::Sender<VerificationOutcome>>,
    ) -> Result<()> {
        if self.state.holds_link() {
            if let Some(attempt) = self.attempt.as_mut() {
                if attempt.peer != peer {
                    return Err(LedError::AlreadyConnecting {
                        current: attempt.peer.clone(),
                    });
                }

                debug!("Already {} with {}, ignoring connect", self.state, peer);
                if let Some(tx) = verdict {
                    match &attempt.outcome {
                        Some(outcome) => {
                            let _ = tx.send(outcome.clone());
                        }
                        None if attempt.verdict_tx.is_none() => attempt.verdict_tx = Some(tx),
                        None => debug!("Verdict handler already registered for {}", peer),
                    }
                }
                return Ok(());
            }
        }

        self.start_attempt(peer, verdict);
        Ok(())
    }

    fn start_attempt(
        &mut self,
        peer: PeripheralIdentity,
        verdict: Option<oneshot::Sender<VerificationOutcome>>,
    ) {
        // Replacing a finished attempt; its link (if any) is already going away
        self.attempt = None;

        self.next_generation += 1;
        let generation = self.next_generation;
        self.stats.attempts += 1;

        let deadline = DeadlineGuard::arm(
            generation,
            self.ops.config().verification_deadline,
            self.ops.completion_sender(),
        );
        let mut attempt = Attempt::new(generation, peer.clone(), verdict, deadline);

        info!("Connecting to {}", peer);
        let pending = self.teardown.clone();
        attempt.track(self.ops.spawn_link(generation, peer.clone(), pending));
        self.attempt = Some(attempt);
        self.set_state(ConnectionState::Connecting, Some(peer));
    }

    /// Idempotent; `reply` is answered once the link is closed
    fn disconnect(&mut self, reply: Option<Reply<()>>) {
        let Some(attempt) = self.attempt.as_mut() else {
            if self.state != ConnectionState::Disconnected {
                self.set_state(ConnectionState::Disconnected, None);
            }
            self.reply_when_closed(reply);
            return;
        };

        let peer = attempt.peer.clone();
        let had_link = self.state.holds_link();
        info!("Disconnecting from {}", peer);

        attempt.cancel_in_flight();
        attempt.handle = None;

        self.set_state(ConnectionState::Disconnected, Some(peer.clone()));
        if !self.is_latched() {
            self.deliver_verdict(VerificationOutcome::incompatible(
                peer.clone(),
                LedError::OperationCancelled,
            ));
        }
        self.attempt = None;

        if had_link {
            self.spawn_teardown(peer, reply);
        } else {
            self.reply_when_closed(reply);
        }
    }

    /// Answer `reply` once any teardown still running has finished
    fn reply_when_closed(&self, reply: Option<Reply<()>>) {
        let Some(reply) = reply else {
            return;
        };
        match self.teardown.clone() {
            Some(pending) => {
                tokio::spawn(async move {
                    teardown_finished(pending).await;
                    let _ = reply.send(());
                });
            }
            None => {
                let _ = reply.send(());
            }
        }
    }

    /// Close the link in the background, after any teardown still running
    fn spawn_teardown(&mut self, peer: PeripheralIdentity, done: Option<Reply<()>>) {
        let previous = self.teardown.take();
        self.teardown = Some(self.ops.spawn_disconnect(peer, previous, done));
    }

    fn read_state(&mut self, reply: Reply<Result<bool>>) {
        match self.ready_handle(LedError::ReadFailed) {
            Ok((generation, handle)) => {
                let task = self.ops.spawn_read(generation, handle, Some(reply));
                self.track(task);
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn write_state(&mut self, value: bool, reply: Reply<Result<bool>>) {
        match self.ready_handle(LedError::WriteFailed) {
            Ok((generation, handle)) => {
                let task = self.ops.spawn_write(generation, handle, value, reply);
                self.track(task);
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Completions
    // ------------------------------------------------------------------------

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Link { generation, result } => self.on_link_completed(generation, result),
            Completion::Discovery { generation, result } => {
                self.on_discovery_completed(generation, result)
            }
            Completion::Subscribed { generation, result } => self.on_subscribed(generation, result),
            Completion::Read {
                generation,
                result,
                reply,
            } => self.on_read_completed(generation, result, reply),
            Completion::Write {
                generation,
                value,
                result,
                reply,
            } => self.on_write_completed(generation, value, result, reply),
            Completion::DeadlineElapsed { generation } => self.on_deadline_elapsed(generation),
        }
    }

    fn on_link_completed(&mut self, generation: u64, result: Result<()>) {
        let Some(peer) = self.current_peer(generation, ConnectionState::Connecting) else {
            self.discard_stale("link", generation);
            return;
        };

        match result {
            Ok(()) => {
                info!("Link established with {}", peer);
                self.set_state(ConnectionState::Connected, Some(peer.clone()));
                let task = self.ops.spawn_discovery(generation, peer.clone());
                self.track(task);
                self.set_state(ConnectionState::DiscoveringServices, Some(peer));
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", peer, e);
                self.set_state(ConnectionState::ConnectionFailed, Some(peer.clone()));
                self.deliver_verdict(VerificationOutcome::incompatible(peer, e));
            }
        }
    }

    fn on_discovery_completed(
        &mut self,
        generation: u64,
        result: std::result::Result<Vec<GattService>, TransportError>,
    ) {
        let Some(peer) = self.current_peer(generation, ConnectionState::DiscoveringServices)
        else {
            self.discard_stale("discovery", generation);
            return;
        };

        let verification = match result {
            Ok(services) => {
                debug!("Discovered {} service(s) on {}", services.len(), peer);
                self.schema.verify(&peer, &services)
            }
            Err(e) => Err(LedError::DiscoveryFailed(e.to_string())),
        };

        match verification {
            Ok(handle) => self.enter_ready(generation, peer, handle),
            Err(reason) => {
                warn!("{} is not an LED peripheral: {}", peer, reason);
                self.enter_incompatible(peer, reason);
            }
        }
    }

    fn on_subscribed(&mut self, generation: u64, result: std::result::Result<(), OperationFailure>) {
        let Some(peer) = self.current_peer(generation, ConnectionState::Ready) else {
            self.discard_stale("subscribe", generation);
            return;
        };

        match result {
            Ok(()) => info!("Indications enabled on {}", peer),
            Err(e) => warn!("{}", LedError::SubscribeFailed(e.to_string())),
        }
    }

    fn on_read_completed(
        &mut self,
        generation: u64,
        result: std::result::Result<Vec<u8>, OperationFailure>,
        reply: Option<Reply<Result<bool>>>,
    ) {
        if self.current_peer(generation, ConnectionState::Ready).is_none() {
            self.discard_stale("read", generation);
            if let Some(reply) = reply {
                let _ = reply.send(Err(LedError::OperationCancelled));
            }
            return;
        }

        let outcome = match result {
            Ok(payload) => match decode_led(&payload) {
                Some(value) => {
                    self.apply_led(value, "read");
                    Ok(value)
                }
                None => Err(LedError::ReadFailed(OperationFailure::EmptyPayload)),
            },
            Err(e) => Err(LedError::ReadFailed(e)),
        };

        match reply {
            Some(reply) => {
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    warn!("Initial read failed: {}", e);
                }
            }
        }
    }

    fn on_write_completed(
        &mut self,
        generation: u64,
        value: bool,
        result: std::result::Result<(), OperationFailure>,
        reply: Reply<Result<bool>>,
    ) {
        if self.current_peer(generation, ConnectionState::Ready).is_none() {
            self.discard_stale("write", generation);
            let _ = reply.send(Err(LedError::OperationCancelled));
            return;
        }

        let outcome = match result {
            Ok(()) => {
                self.apply_led(value, "write");
                Ok(value)
            }
            Err(e) => {
                error!("Failed to write LED state: {}", e);
                Err(LedError::WriteFailed(e))
            }
        };
        let _ = reply.send(outcome);
    }

    fn on_deadline_elapsed(&mut self, generation: u64) {
        let Some(attempt) = self.attempt.as_ref().filter(|a| a.generation == generation) else {
            self.discard_stale("deadline", generation);
            return;
        };

        if attempt.latch.is_latched() {
            self.stats.verdicts_suppressed += 1;
            debug!("Deadline elapsed after verdict for {}, ignoring", attempt.peer);
            return;
        }

        let peer = attempt.peer.clone();
        warn!(
            "No verdict for {} within {:?}",
            peer,
            self.ops.config().verification_deadline
        );
        self.enter_incompatible(peer, LedError::DeadlineElapsed);
    }

    // ------------------------------------------------------------------------
    // Transport Events
    // ------------------------------------------------------------------------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Indication {
                peer,
                characteristic,
                value,
            } => {
                let subscribed = self.state == ConnectionState::Ready
                    && self
                        .attempt
                        .as_ref()
                        .and_then(|a| a.handle.as_ref())
                        .is_some_and(|h| h.matches(&peer, characteristic));
                if !subscribed {
                    debug!("Ignoring indication from {} on {}", peer, characteristic);
                    return;
                }

                match decode_led(&value) {
                    Some(value) => {
                        self.stats.indications_applied += 1;
                        self.apply_led(value, "indication");
                    }
                    None => debug!("Ignoring empty indication from {}", peer),
                }
            }
            TransportEvent::LinkLost { peer, reason } => self.on_link_lost(peer, reason),
        }
    }

    fn on_link_lost(&mut self, peer: PeripheralIdentity, reason: String) {
        let tracked = self.state.holds_link()
            && self.attempt.as_ref().is_some_and(|a| a.peer == peer);
        if !tracked {
            debug!("Ignoring link loss for {} in state {}", peer, self.state);
            return;
        }
        if self.state == ConnectionState::Connecting {
            // The link task's own result settles the attempt
            debug!("Link to {} dropped while connecting: {}", peer, reason);
            return;
        }

        warn!("Link to {} lost: {}", peer, reason);
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.cancel_in_flight();
            attempt.handle = None;
        }

        self.set_state(ConnectionState::Disconnected, Some(peer.clone()));
        if !self.is_latched() {
            self.deliver_verdict(VerificationOutcome::incompatible(
                peer,
                LedError::LinkLost(reason),
            ));
        }
        self.attempt = None;
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    fn enter_ready(&mut self, generation: u64, peer: PeripheralIdentity, handle: CharacteristicHandle) {
        info!("{} implements the LED service", peer);
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.handle = Some(handle.clone());
        }

        self.set_state(ConnectionState::Ready, Some(peer.clone()));
        self.deliver_verdict(VerificationOutcome::compatible(peer));

        let subscribe = self.ops.spawn_subscribe(generation, handle.clone());
        self.track(subscribe);
        let initial_read = self.ops.spawn_read(generation, handle, None);
        self.track(initial_read);
    }

    fn enter_incompatible(&mut self, peer: PeripheralIdentity, reason: LedError) {
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.cancel_in_flight();
            attempt.handle = None;
        }

        self.set_state(ConnectionState::Incompatible, Some(peer.clone()));
        self.deliver_verdict(VerificationOutcome::incompatible(peer.clone(), reason));

        self.spawn_teardown(peer, None);
    }

    /// Publish the verdict if the latch allows it
    fn deliver_verdict(&mut self, outcome: VerificationOutcome) -> bool {
        let Some(attempt) = self.attempt.as_mut() else {
            return false;
        };

        if !attempt.latch.try_latch() {
            self.stats.verdicts_suppressed += 1;
            debug!("Verdict for {} already delivered, suppressing", outcome.peer);
            return false;
        }

        attempt.deadline = None;
        attempt.outcome = Some(outcome.clone());
        if let Some(tx) = attempt.verdict_tx.take() {
            let _ = tx.send(outcome.clone());
        }

        self.stats.verdicts_delivered += 1;
        info!(
            "Verdict for {}: {}",
            outcome.peer,
            if outcome.is_compatible { "compatible" } else { "incompatible" }
        );
        let _ = self.outputs.verdicts.send(outcome);
        true
    }

    fn set_state(&mut self, state: ConnectionState, peer: Option<PeripheralIdentity>) {
        if self.state == state {
            return;
        }

        debug!("Connection state {} -> {}", self.state, state);
        self.state = state;
        self.outputs.connection.send_replace(state);
        let _ = self.outputs.lifecycle.send(LifecycleEvent { state, peer });
    }

    fn apply_led(&mut self, value: bool, source: &str) {
        debug!("LED is {} ({})", if value { "on" } else { "off" }, source);
        self.outputs.led.send_replace(value);
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    /// Peer of the current attempt if `generation` is current and the state matches
    fn current_peer(&self, generation: u64, expected: ConnectionState) -> Option<PeripheralIdentity> {
        if self.state != expected {
            return None;
        }
        self.attempt
            .as_ref()
            .filter(|a| a.generation == generation)
            .map(|a| a.peer.clone())
    }

    fn ready_handle(
        &self,
        absent: fn(OperationFailure) -> LedError,
    ) -> Result<(u64, CharacteristicHandle)> {
        if self.state != ConnectionState::Ready {
            return Err(LedError::NotReady(self.state));
        }
        self.attempt
            .as_ref()
            .and_then(|a| a.handle.clone().map(|h| (a.generation, h)))
            .ok_or_else(|| absent(OperationFailure::HandleAbsent))
    }

    fn is_latched(&self) -> bool {
        self.attempt.as_ref().is_some_and(|a| a.latch.is_latched())
    }

    fn track(&mut self, task: JoinHandle<()>) {
        match self.attempt.as_mut() {
            Some(attempt) => attempt.track(task),
            None => task.abort(),
        }
    }

    fn discard_stale(&mut self, operation: &str, generation: u64) {
        self.stats.stale_completions += 1;
        debug!(
            "Discarding stale {} completion from attempt {}",
            operation, generation
        );
    }
}
