//! Transport Operations
//!
//! Every transport call the controller makes runs in its own task and
//! reports back as a [`Completion`]. The task handles are tracked by the
//! owning attempt so they can be aborted when the attempt ends.
//!
//! Teardown outlives the attempt. It hands back a [`TeardownSignal`] that the
//! next link task waits on before connecting.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::ControllerConfig;
use crate::error::{LedError, OperationFailure, Result};
use crate::gatt::CharacteristicHandle;
use crate::transport::{GattTransport, TransportError};
use crate::types::{encode_led, PeripheralIdentity};

use super::state::{Completion, CompletionSender, Reply};

/// Closes once the teardown task holding the sending half has finished
pub(crate) type TeardownSignal = watch::Receiver<()>;

/// Wait for the teardown behind `signal`
pub(crate) async fn teardown_finished(mut signal: TeardownSignal) {
    // No value is ever sent; `changed` fails once the sender is dropped
    while signal.changed().await.is_ok() {}
}

/// Spawns transport operations and routes their results to the controller
pub(crate) struct Operations {
    transport: Arc<dyn GattTransport>,
    completions: CompletionSender,
    config: ControllerConfig,
}

impl Operations {
    pub fn new(
        transport: Arc<dyn GattTransport>,
        completions: CompletionSender,
        config: ControllerConfig,
    ) -> Self {
        Self {
            transport,
            completions,
            config,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn completion_sender(&self) -> CompletionSender {
        self.completions.clone()
    }

    /// Establish the link once `pending` teardown is done, retrying per the
    /// configured policy
    pub fn spawn_link(
        &self,
        generation: u64,
        peer: PeripheralIdentity,
        pending: Option<TeardownSignal>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let config = self.config.clone();
        tokio::spawn(async move {
            if let Some(pending) = pending {
                teardown_finished(pending).await;
            }
            let result = establish_link(transport.as_ref(), &peer, &config).await;
            let _ = completions.send(Completion::Link { generation, result });
        })
    }

    /// Discover services. Bounded only by the verdict deadline.
    pub fn spawn_discovery(&self, generation: u64, peer: PeripheralIdentity) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = transport.discover_services(&peer).await;
            let _ = completions.send(Completion::Discovery { generation, result });
        })
    }

    pub fn spawn_subscribe(&self, generation: u64, handle: CharacteristicHandle) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let limit = self.config.operation_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, transport.enable_indications(&handle)).await;
            let _ = completions.send(Completion::Subscribed { generation, result });
        })
    }

    /// Read the LED characteristic; `reply` is `None` for the initial read
    pub fn spawn_read(
        &self,
        generation: u64,
        handle: CharacteristicHandle,
        reply: Option<Reply<Result<bool>>>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let limit = self.config.operation_timeout;
        tokio::spawn(async move {
            let result = bounded(limit, transport.read_characteristic(&handle)).await;
            let _ = completions.send(Completion::Read {
                generation,
                result,
                reply,
            });
        })
    }

    pub fn spawn_write(
        &self,
        generation: u64,
        handle: CharacteristicHandle,
        value: bool,
        reply: Reply<Result<bool>>,
    ) -> JoinHandle<()> {
        let transport = self.transport.clone();
        let completions = self.completions.clone();
        let limit = self.config.operation_timeout;
        tokio::spawn(async move {
            let payload = encode_led(value);
            let result = bounded(limit, transport.write_characteristic(&handle, &payload)).await;
            let _ = completions.send(Completion::Write {
                generation,
                value,
                result,
                reply,
            });
        })
    }

    /// Tear down the link in the background after `previous` teardown.
    ///
    /// `done` is answered once the link is closed.
    pub fn spawn_disconnect(
        &self,
        peer: PeripheralIdentity,
        previous: Option<TeardownSignal>,
        done: Option<Reply<()>>,
    ) -> TeardownSignal {
        let transport = self.transport.clone();
        let limit = self.config.operation_timeout;
        let (finished, signal) = watch::channel(());
        tokio::spawn(async move {
            if let Some(previous) = previous {
                teardown_finished(previous).await;
            }
            disconnect_link(transport.as_ref(), &peer, limit).await;
            drop(finished);
            if let Some(done) = done {
                let _ = done.send(());
            }
        });
        signal
    }
}

/// Connect with a per-attempt timeout and a fixed backoff between attempts.
///
/// A timed-out final attempt yields `LinkTimeout`, any other failure
/// `LinkRejected`.
pub(crate) async fn establish_link(
    transport: &dyn GattTransport,
    peer: &PeripheralIdentity,
    config: &ControllerConfig,
) -> Result<()> {
    let mut last_error = LedError::LinkTimeout;

    for attempt in 1..=config.link_attempts {
        debug!(
            "Link attempt {}/{} to {}",
            attempt, config.link_attempts, peer
        );
        match timeout(config.link_timeout, transport.link_connect(peer)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(TransportError::Timeout)) | Err(_) => {
                warn!("Link attempt {} to {} timed out", attempt, peer);
                last_error = LedError::LinkTimeout;
            }
            Ok(Err(e)) => {
                warn!("Link attempt {} to {} failed: {}", attempt, peer, e);
                last_error = LedError::LinkRejected(e.to_string());
            }
        }

        if attempt < config.link_attempts {
            sleep(config.link_backoff).await;
        }
    }

    Err(last_error)
}

async fn disconnect_link(transport: &dyn GattTransport, peer: &PeripheralIdentity, limit: Duration) {
    match timeout(limit, transport.link_disconnect(peer)).await {
        Ok(Ok(())) => debug!("Link to {} closed", peer),
        Ok(Err(e)) => warn!("Failed to disconnect from {}: {}", peer, e),
        Err(_) => warn!("Disconnect from {} timed out", peer),
    }
}

async fn bounded<T>(
    limit: Duration,
    operation: impl Future<Output = std::result::Result<T, TransportError>>,
) -> std::result::Result<T, OperationFailure> {
    match timeout(limit, operation).await {
        Ok(result) => result.map_err(OperationFailure::Transport),
        Err(_) => Err(OperationFailure::Timeout),
    }
}
