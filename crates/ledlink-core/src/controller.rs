//! Public handle to the LED controller task

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::ControllerConfig;
use crate::error::{LedError, Result};
use crate::logic::task::Outputs;
use crate::logic::{Command, ControllerStats, ControllerTask};
use crate::transport::{GattTransport, TransportEventReceiver};
use crate::types::{ConnectionState, LifecycleEvent, PeripheralIdentity, VerificationOutcome};

/// Cloneable handle used to drive one LED peripheral.
///
/// All calls are forwarded to a single controller task; the handle itself
/// holds no connection state.
#[derive(Clone)]
pub struct LedController {
    commands: mpsc::Sender<Command>,
    led: watch::Receiver<bool>,
    connection: watch::Receiver<ConnectionState>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    verdicts: broadcast::Sender<VerificationOutcome>,
}

impl LedController {
    /// Spawn the controller task on the current tokio runtime
    pub fn spawn(
        transport: Arc<dyn GattTransport>,
        events: TransportEventReceiver,
        config: ControllerConfig,
    ) -> Result<(Self, JoinHandle<()>)> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.event_capacity);
        let (led_tx, led_rx) = watch::channel(false);
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let (lifecycle_tx, _) = broadcast::channel(config.event_capacity);
        let (verdict_tx, _) = broadcast::channel(config.event_capacity);

        let outputs = Outputs {
            led: led_tx,
            connection: connection_tx,
            lifecycle: lifecycle_tx.clone(),
            verdicts: verdict_tx.clone(),
        };
        let task = ControllerTask::new(transport, events, config, command_rx, outputs);
        let join = tokio::spawn(task.run());

        Ok((
            Self {
                commands: command_tx,
                led: led_rx,
                connection: connection_rx,
                lifecycle: lifecycle_tx,
                verdicts: verdict_tx,
            },
            join,
        ))
    }

    // ------------------------------------------------------------------------
    // Connection
    // ------------------------------------------------------------------------

    /// Start connecting to `peer`.
    ///
    /// Returns once the attempt has started; progress is reported through
    /// [`LedController::connection_state`] and the lifecycle and verdict
    /// channels.
    pub async fn connect(&self, peer: impl Into<PeripheralIdentity>) -> Result<()> {
        let peer = peer.into();
        self.request(
            |reply| Command::Connect {
                peer,
                verdict: None,
                reply,
            },
            LedError::ControllerClosed,
        )
        .await?
    }

    /// Start connecting to `peer` and wait for the compatibility verdict
    pub async fn connect_and_wait(
        &self,
        peer: impl Into<PeripheralIdentity>,
    ) -> Result<VerificationOutcome> {
        let peer = peer.into();
        let (verdict_tx, verdict_rx) = oneshot::channel();
        self.request(
            |reply| Command::Connect {
                peer,
                verdict: Some(verdict_tx),
                reply,
            },
            LedError::ControllerClosed,
        )
        .await??;

        verdict_rx.await.map_err(|_| LedError::OperationCancelled)
    }

    /// Cancel whatever is in flight; resolves once the link is closed
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }, LedError::ControllerClosed)
            .await
    }

    // ------------------------------------------------------------------------
    // LED Operations
    // ------------------------------------------------------------------------

    /// Read the LED state from the peripheral
    pub async fn read_state(&self) -> Result<bool> {
        self.request(|reply| Command::ReadState { reply }, LedError::OperationCancelled)
            .await?
    }

    /// Write the LED state; the local state changes only once the
    /// peripheral acknowledges
    pub async fn write_state(&self, on: bool) -> Result<bool> {
        self.request(
            |reply| Command::WriteState { value: on, reply },
            LedError::OperationCancelled,
        )
        .await?
    }

    /// Write the inverse of the current local LED state
    pub async fn toggle(&self) -> Result<bool> {
        self.request(|reply| Command::Toggle { reply }, LedError::OperationCancelled)
            .await?
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Observable LED state
    pub fn led_state(&self) -> watch::Receiver<bool> {
        self.led.clone()
    }

    pub fn current_led(&self) -> bool {
        *self.led.borrow()
    }

    /// Observable connection state
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Every state transition, in order
    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Every compatibility verdict, one per attempt
    pub fn subscribe_verdicts(&self) -> broadcast::Receiver<VerificationOutcome> {
        self.verdicts.subscribe()
    }

    pub async fn stats(&self) -> Result<ControllerStats> {
        self.request(|reply| Command::Stats { reply }, LedError::ControllerClosed)
            .await
    }

    /// Disconnect and stop the controller task
    pub async fn shutdown(&self) -> Result<()> {
        debug!("Requesting controller shutdown");
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| LedError::ControllerClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
        dropped: LedError,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| LedError::ControllerClosed)?;
        reply_rx.await.map_err(|_| dropped)
    }
}

impl std::fmt::Debug for LedController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedController")
            .field("state", &self.current_state())
            .field("led", &self.current_led())
            .finish()
    }
}
