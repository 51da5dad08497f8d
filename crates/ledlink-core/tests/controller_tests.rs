//! End-to-end tests of the LED controller against the simulated peripheral

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ledlink_core::mock::{SimOperation, SimulatedPeripheral, SimulatedPeripheralBuilder};
use ledlink_core::{
    Capability, CharacteristicHandle, CharacteristicProperties, ConnectionState, ControllerConfig,
    GattService, GattTransport, LedController, LedError, LifecycleEvent, OperationFailure,
    PeripheralIdentity, TransportError, LED_CHARACTERISTIC_UUID, LED_SERVICE_UUID,
};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{sleep, timeout, Instant};

const PEER: &str = "AA:BB:CC:DD:EE:01";

fn start(builder: SimulatedPeripheralBuilder) -> (Arc<SimulatedPeripheral>, LedController) {
    start_with(builder, ControllerConfig::default())
}

fn start_with(
    builder: SimulatedPeripheralBuilder,
    config: ControllerConfig,
) -> (Arc<SimulatedPeripheral>, LedController) {
    let (peripheral, events) = builder.build();
    let (controller, _task) = LedController::spawn(peripheral.clone(), events, config).unwrap();
    (peripheral, controller)
}

fn led_peer() -> SimulatedPeripheralBuilder {
    SimulatedPeripheral::builder(PEER)
}

async fn wait_for_state(controller: &LedController, state: ConnectionState) {
    let mut rx = controller.connection_state();
    timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached")
        .expect("controller stopped");
}

async fn wait_for_led(controller: &LedController, on: bool) {
    let mut rx = controller.led_state();
    timeout(Duration::from_secs(60), rx.wait_for(|led| *led == on))
        .await
        .expect("LED state not reached")
        .expect("controller stopped");
}

/// Connect and let the subscribe and initial read settle
async fn connect_ready(controller: &LedController) {
    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(outcome.is_compatible);
    sleep(Duration::from_millis(10)).await;
}

// ----------------------------------------------------------------------------
// Steered Transport
// ----------------------------------------------------------------------------

/// When an indication is pushed relative to the reply of a read
#[derive(Debug, Clone, Copy)]
enum IndicationTiming {
    BeforeReadReply,
    AfterReadReply,
}

#[derive(Debug, Default)]
struct Steering {
    /// Pushed during the next read
    indication_during_read: Option<(Vec<u8>, IndicationTiming)>,
    /// Discoveries that report no services
    empty_discoveries: usize,
    disconnect_delay: Duration,
}

/// Simulated peripheral with timing the plain simulation cannot produce
struct SteeredPeripheral {
    inner: Arc<SimulatedPeripheral>,
    steering: Mutex<Steering>,
}

impl SteeredPeripheral {
    fn steer(&self) -> std::sync::MutexGuard<'_, Steering> {
        self.steering.lock().unwrap()
    }
}

#[async_trait]
impl GattTransport for SteeredPeripheral {
    async fn link_connect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError> {
        self.inner.link_connect(peer).await
    }

    async fn link_disconnect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError> {
        let delay = self.steer().disconnect_delay;
        sleep(delay).await;
        self.inner.link_disconnect(peer).await
    }

    async fn discover_services(
        &self,
        peer: &PeripheralIdentity,
    ) -> Result<Vec<GattService>, TransportError> {
        let services = self.inner.discover_services(peer).await?;
        let mut steering = self.steer();
        if steering.empty_discoveries > 0 {
            steering.empty_discoveries -= 1;
            return Ok(Vec::new());
        }
        Ok(services)
    }

    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError> {
        let pushed = self.steer().indication_during_read.take();
        match pushed {
            Some((value, IndicationTiming::BeforeReadReply)) => {
                self.inner.push_indication(LED_CHARACTERISTIC_UUID, value);
                self.inner.read_characteristic(handle).await
            }
            Some((value, IndicationTiming::AfterReadReply)) => {
                let result = self.inner.read_characteristic(handle).await;
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    sleep(Duration::from_millis(1)).await;
                    inner.push_indication(LED_CHARACTERISTIC_UUID, value);
                });
                result
            }
            None => self.inner.read_characteristic(handle).await,
        }
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.inner.write_characteristic(handle, value).await
    }

    async fn enable_indications(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<(), TransportError> {
        self.inner.enable_indications(handle).await
    }
}

fn start_steered(
    builder: SimulatedPeripheralBuilder,
    steering: Steering,
) -> (Arc<SimulatedPeripheral>, Arc<SteeredPeripheral>, LedController) {
    let (inner, events) = builder.build();
    let steered = Arc::new(SteeredPeripheral {
        inner: inner.clone(),
        steering: Mutex::new(steering),
    });
    let (controller, _task) =
        LedController::spawn(steered.clone(), events, ControllerConfig::default()).unwrap();
    (inner, steered, controller)
}

// ----------------------------------------------------------------------------
// Verification
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_conforming_peer_becomes_ready() {
    let (_peripheral, controller) = start(led_peer());
    let mut lifecycle = controller.subscribe_lifecycle();
    let mut verdicts = controller.subscribe_verdicts();

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(outcome.is_compatible);
    assert_eq!(outcome.reason, None);
    assert_eq!(outcome.peer, PeripheralIdentity::from(PEER));
    assert_eq!(controller.current_state(), ConnectionState::Ready);

    let expected = [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::DiscoveringServices,
        ConnectionState::Ready,
    ];
    for state in expected {
        assert_eq!(
            lifecycle.recv().await.unwrap(),
            LifecycleEvent {
                state,
                peer: Some(PeripheralIdentity::from(PEER)),
            }
        );
    }

    assert!(verdicts.recv().await.unwrap().is_compatible);

    // Well past the deadline: still exactly one verdict
    sleep(Duration::from_secs(30)).await;
    assert!(matches!(verdicts.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(controller.current_state(), ConnectionState::Ready);

    let stats = controller.stats().await.unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.verdicts_delivered, 1);
    assert_eq!(stats.verdicts_suppressed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ready_subscribes_and_reads_initial_state() {
    let (peripheral, controller) = start(led_peer().led(true));

    connect_ready(&controller).await;
    wait_for_led(&controller, true).await;

    let operations = peripheral.operations();
    assert!(operations.contains(&SimOperation::EnableIndications));
    assert!(operations.contains(&SimOperation::Read));
    assert!(peripheral.is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn test_missing_write_is_incompatible() {
    let properties = CharacteristicProperties {
        write: false,
        ..CharacteristicProperties::read_write_indicate()
    };
    let (peripheral, controller) = start(led_peer().led_properties(properties));

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(!outcome.is_compatible);
    assert_eq!(
        outcome.reason,
        Some(LedError::CapabilityMissing {
            characteristic: LED_CHARACTERISTIC_UUID,
            missing: vec![Capability::Write],
        })
    );
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);

    sleep(Duration::from_millis(10)).await;
    let operations = peripheral.operations();
    assert!(!operations.contains(&SimOperation::Read));
    assert!(!operations.iter().any(|op| matches!(op, SimOperation::Write(_))));
    assert!(!operations.contains(&SimOperation::EnableIndications));
    assert!(operations.contains(&SimOperation::LinkDisconnect));
    assert!(!peripheral.is_connected());

    // The state stays put after the link is released
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);
    assert_eq!(
        controller.read_state().await,
        Err(LedError::NotReady(ConnectionState::Incompatible))
    );
}

#[tokio::test(start_paused = true)]
async fn test_missing_service_is_incompatible() {
    let (_peripheral, controller) = start(led_peer().services(Vec::new()));

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(!outcome.is_compatible);
    assert_eq!(outcome.reason, Some(LedError::ServiceMissing(LED_SERVICE_UUID)));
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure_is_incompatible() {
    let (_peripheral, controller) = start(led_peer().fail_discovery("gatt database busy"));

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(matches!(outcome.reason, Some(LedError::DiscoveryFailed(_))));
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_hang_hits_deadline() {
    let (_peripheral, controller) = start(led_peer().hang_discovery());
    let started = Instant::now();

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(!outcome.is_compatible);
    assert_eq!(outcome.reason, Some(LedError::DeadlineElapsed));
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);
    assert!(started.elapsed() >= Duration::from_secs(10));
}

// ----------------------------------------------------------------------------
// Link Establishment
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_link_rejections_are_retried() {
    let (peripheral, controller) = start(led_peer().reject_links(2));

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(outcome.is_compatible);
    assert_eq!(peripheral.link_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_rejection_fails_connection() {
    let (peripheral, controller) = start(led_peer().reject_links(10));

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert!(!outcome.is_compatible);
    assert!(matches!(outcome.reason, Some(LedError::LinkRejected(_))));
    assert_eq!(controller.current_state(), ConnectionState::ConnectionFailed);
    assert_eq!(peripheral.link_attempts(), 3);
    assert!(!peripheral.operations().contains(&SimOperation::DiscoverServices));
}

#[tokio::test(start_paused = true)]
async fn test_link_hang_hits_deadline() {
    let (_peripheral, controller) = start(led_peer().hang_links());

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert_eq!(outcome.reason, Some(LedError::DeadlineElapsed));
    assert_eq!(controller.current_state(), ConnectionState::Incompatible);
}

#[tokio::test(start_paused = true)]
async fn test_link_timeout_with_long_deadline() {
    let config = ControllerConfig::default().with_verification_deadline(Duration::from_secs(60));
    let (peripheral, controller) = start_with(led_peer().hang_links(), config);

    let outcome = controller.connect_and_wait(PEER).await.unwrap();
    assert_eq!(outcome.reason, Some(LedError::LinkTimeout));
    assert_eq!(controller.current_state(), ConnectionState::ConnectionFailed);
    assert_eq!(peripheral.link_attempts(), 3);
}

// ----------------------------------------------------------------------------
// Characteristic I/O
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_operations_require_ready() {
    let (_peripheral, controller) = start(led_peer());

    assert_eq!(
        controller.read_state().await,
        Err(LedError::NotReady(ConnectionState::Disconnected))
    );
    assert_eq!(
        controller.write_state(true).await,
        Err(LedError::NotReady(ConnectionState::Disconnected))
    );
    assert_eq!(
        controller.toggle().await,
        Err(LedError::NotReady(ConnectionState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn test_write_then_read() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    assert_eq!(controller.write_state(true).await, Ok(true));
    assert!(controller.current_led());
    assert!(peripheral.led());
    assert_eq!(controller.read_state().await, Ok(true));

    assert_eq!(controller.write_state(false).await, Ok(false));
    assert!(!controller.current_led());
    assert!(!peripheral.led());
    assert!(peripheral.operations().contains(&SimOperation::Write(vec![0])));
}

#[tokio::test(start_paused = true)]
async fn test_toggle_inverts_local_state() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    assert_eq!(controller.toggle().await, Ok(true));
    assert!(peripheral.led());
    assert_eq!(controller.toggle().await, Ok(false));
    assert!(!peripheral.led());
}

#[tokio::test(start_paused = true)]
async fn test_last_write_wins() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    controller.write_state(true).await.unwrap();
    controller.write_state(false).await.unwrap();
    assert!(!controller.current_led());
    assert!(!peripheral.led());

    controller.write_state(false).await.unwrap();
    controller.write_state(true).await.unwrap();
    assert!(controller.current_led());
    assert!(peripheral.led());
}

#[tokio::test(start_paused = true)]
async fn test_failed_io_leaves_led_untouched() {
    let (peripheral, controller) = start(led_peer().led(true));
    connect_ready(&controller).await;
    wait_for_led(&controller, true).await;

    peripheral.set_fail_reads(true);
    assert!(matches!(
        controller.read_state().await,
        Err(LedError::ReadFailed(OperationFailure::Transport(TransportError::Att(_))))
    ));
    assert!(controller.current_led());

    peripheral.set_fail_writes(true);
    assert!(matches!(
        controller.write_state(false).await,
        Err(LedError::WriteFailed(_))
    ));
    assert!(controller.current_led());
    assert!(peripheral.led());
    assert_eq!(controller.current_state(), ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_slow_read_times_out() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    peripheral.set_read_delay(Some(Duration::from_secs(30)));
    assert_eq!(
        controller.read_state().await,
        Err(LedError::ReadFailed(OperationFailure::Timeout))
    );
    assert_eq!(controller.current_state(), ConnectionState::Ready);
}

// ----------------------------------------------------------------------------
// Indications
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_button_press_updates_led() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    assert!(peripheral.press_button());
    wait_for_led(&controller, true).await;

    assert!(!peripheral.press_button());
    wait_for_led(&controller, false).await;

    assert_eq!(controller.stats().await.unwrap().indications_applied, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_indications_are_ignored() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    let other = uuid::Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);
    peripheral.push_indication(other, vec![1]);
    peripheral.push_indication(LED_CHARACTERISTIC_UUID, Vec::new());
    sleep(Duration::from_millis(10)).await;

    assert!(!controller.current_led());
    assert_eq!(controller.stats().await.unwrap().indications_applied, 0);
}

#[tokio::test(start_paused = true)]
async fn test_indications_before_ready_are_ignored() {
    let (peripheral, controller) = start(led_peer().hang_discovery());
    controller.connect(PEER).await.unwrap();
    wait_for_state(&controller, ConnectionState::DiscoveringServices).await;

    peripheral.push_indication(LED_CHARACTERISTIC_UUID, vec![1]);
    sleep(Duration::from_millis(10)).await;
    assert!(!controller.current_led());
}

#[tokio::test(start_paused = true)]
async fn test_indication_queued_before_read_reply_is_overridden() {
    let (_peripheral, steered, controller) = start_steered(led_peer(), Steering::default());
    connect_ready(&controller).await;
    steered.steer().indication_during_read =
        Some((vec![1], IndicationTiming::BeforeReadReply));

    // The read reply arrives last, so its value stands
    assert_eq!(controller.read_state().await, Ok(false));
    assert!(!controller.current_led());
    sleep(Duration::from_millis(10)).await;
    assert!(!controller.current_led());
    assert_eq!(controller.stats().await.unwrap().indications_applied, 1);
}

#[tokio::test(start_paused = true)]
async fn test_indication_after_read_reply_wins() {
    let (_peripheral, steered, controller) = start_steered(led_peer(), Steering::default());
    connect_ready(&controller).await;
    steered.steer().indication_during_read = Some((vec![1], IndicationTiming::AfterReadReply));

    assert_eq!(controller.read_state().await, Ok(false));
    wait_for_led(&controller, true).await;
    sleep(Duration::from_millis(10)).await;
    assert!(controller.current_led());
    assert_eq!(controller.stats().await.unwrap().indications_applied, 1);
}

// ----------------------------------------------------------------------------
// Disconnection and Cancellation
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;
    let mut lifecycle = controller.subscribe_lifecycle();

    controller.disconnect().await.unwrap();
    controller.disconnect().await.unwrap();

    assert_eq!(
        lifecycle.recv().await.unwrap().state,
        ConnectionState::Disconnected
    );
    assert!(matches!(lifecycle.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(controller.current_state(), ConnectionState::Disconnected);
    assert!(!peripheral.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_discovery_cancels_attempt() {
    let (_peripheral, controller) = start(led_peer().hang_discovery());
    let mut verdicts = controller.subscribe_verdicts();

    controller.connect(PEER).await.unwrap();
    wait_for_state(&controller, ConnectionState::DiscoveringServices).await;
    controller.disconnect().await.unwrap();

    let outcome = verdicts.recv().await.unwrap();
    assert!(!outcome.is_compatible);
    assert_eq!(outcome.reason, Some(LedError::OperationCancelled));
    assert_eq!(controller.current_state(), ConnectionState::Disconnected);

    // The deadline was disarmed along with the attempt
    sleep(Duration::from_secs(30)).await;
    assert!(matches!(verdicts.try_recv(), Err(TryRecvError::Empty)));
    let stats = controller.stats().await.unwrap();
    assert_eq!(stats.verdicts_delivered, 1);
    assert_eq!(stats.verdicts_suppressed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_in_flight_read() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    peripheral.set_read_delay(Some(Duration::from_secs(3)));
    let reader = controller.clone();
    let pending = tokio::spawn(async move { reader.read_state().await });
    sleep(Duration::from_secs(1)).await;

    controller.disconnect().await.unwrap();
    assert_eq!(pending.await.unwrap(), Err(LedError::OperationCancelled));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_does_not_block_other_commands() {
    let steering = Steering {
        disconnect_delay: Duration::from_secs(1),
        ..Steering::default()
    };
    let (peripheral, _steered, controller) = start_steered(led_peer(), steering);
    connect_ready(&controller).await;

    let closer = controller.clone();
    let pending = tokio::spawn(async move { closer.disconnect().await });
    sleep(Duration::from_millis(100)).await;

    // The link is still closing while the controller keeps answering
    assert!(!pending.is_finished());
    assert!(peripheral.is_connected());
    assert_eq!(controller.current_state(), ConnectionState::Disconnected);
    let stats = timeout(Duration::from_millis(10), controller.stats())
        .await
        .expect("stats blocked behind disconnect")
        .unwrap();
    assert_eq!(stats.attempts, 1);

    pending.await.unwrap().unwrap();
    assert!(!peripheral.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_while_ready() {
    let (peripheral, controller) = start(led_peer());
    let mut verdicts = controller.subscribe_verdicts();
    connect_ready(&controller).await;
    assert!(verdicts.recv().await.unwrap().is_compatible);

    peripheral.drop_link("supervision timeout");
    wait_for_state(&controller, ConnectionState::Disconnected).await;

    assert!(matches!(verdicts.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(
        controller.read_state().await,
        Err(LedError::NotReady(ConnectionState::Disconnected))
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_before_verdict() {
    let (peripheral, controller) = start(led_peer().hang_discovery());
    let mut verdicts = controller.subscribe_verdicts();

    controller.connect(PEER).await.unwrap();
    wait_for_state(&controller, ConnectionState::DiscoveringServices).await;
    peripheral.drop_link("connection failed to be established");

    let outcome = verdicts.recv().await.unwrap();
    assert!(matches!(outcome.reason, Some(LedError::LinkLost(_))));
    assert_eq!(controller.current_state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_while_connecting_keeps_retrying() {
    let (peripheral, controller) = start(led_peer().reject_links(1));
    let mut verdicts = controller.subscribe_verdicts();

    controller.connect(PEER).await.unwrap();
    // First attempt rejected; the second waits out the 2s backoff
    sleep(Duration::from_millis(500)).await;
    assert_eq!(peripheral.link_attempts(), 1);

    peripheral.drop_link("connection failed to be established");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(controller.current_state(), ConnectionState::Connecting);

    wait_for_state(&controller, ConnectionState::Ready).await;
    assert_eq!(peripheral.link_attempts(), 2);
    assert!(verdicts.recv().await.unwrap().is_compatible);
}

// ----------------------------------------------------------------------------
// Repeated Connects
// ----------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_connect_to_same_peer_is_noop() {
    let (_peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    controller.connect(PEER).await.unwrap();
    assert_eq!(controller.current_state(), ConnectionState::Ready);

    // A late verdict handler sees the stored outcome
    let replay = controller.connect_and_wait(PEER).await.unwrap();
    assert!(replay.is_compatible);

    let stats = controller.stats().await.unwrap();
    assert_eq!(stats.attempts, 1);
    assert_eq!(stats.verdicts_delivered, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_to_other_peer_while_linked() {
    let (_peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    assert_eq!(
        controller.connect("AA:BB:CC:DD:EE:02").await,
        Err(LedError::AlreadyConnecting {
            current: PeripheralIdentity::from(PEER),
        })
    );
    assert_eq!(controller.current_state(), ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_incompatible() {
    let (_peripheral, controller) = start(led_peer().services(Vec::new()));
    let mut verdicts = controller.subscribe_verdicts();

    assert!(!controller.connect_and_wait(PEER).await.unwrap().is_compatible);
    assert!(!controller.connect_and_wait(PEER).await.unwrap().is_compatible);

    assert!(verdicts.recv().await.is_ok());
    assert!(verdicts.recv().await.is_ok());
    assert_eq!(controller.stats().await.unwrap().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_waits_for_incompatible_teardown() {
    let steering = Steering {
        empty_discoveries: 1,
        disconnect_delay: Duration::from_secs(1),
        ..Steering::default()
    };
    let (peripheral, _steered, controller) = start_steered(led_peer(), steering);

    let first = controller.connect_and_wait(PEER).await.unwrap();
    assert_eq!(first.reason, Some(LedError::ServiceMissing(LED_SERVICE_UUID)));

    // Issued while the rejected link is still being closed
    let second = controller.connect_and_wait(PEER).await.unwrap();
    assert!(second.is_compatible);
    assert_eq!(controller.current_state(), ConnectionState::Ready);
    assert!(peripheral.is_connected());

    let operations = peripheral.operations();
    let closed = operations
        .iter()
        .rposition(|op| *op == SimOperation::LinkDisconnect)
        .expect("link never closed");
    let reopened = operations
        .iter()
        .rposition(|op| *op == SimOperation::LinkConnect)
        .expect("link never opened");
    assert!(closed < reopened, "reconnected before teardown: {:?}", operations);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_link_loss() {
    let (peripheral, controller) = start(led_peer());
    connect_ready(&controller).await;

    peripheral.drop_link("out of range");
    wait_for_state(&controller, ConnectionState::Disconnected).await;

    connect_ready(&controller).await;
    assert_eq!(controller.current_state(), ConnectionState::Ready);
    assert_eq!(controller.write_state(true).await, Ok(true));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_link() {
    let (peripheral, events) = led_peer().build();
    let (controller, task) =
        LedController::spawn(peripheral.clone(), events, ControllerConfig::default()).unwrap();
    connect_ready(&controller).await;

    controller.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(!peripheral.is_connected());
    assert_eq!(
        controller.read_state().await,
        Err(LedError::ControllerClosed)
    );
}
