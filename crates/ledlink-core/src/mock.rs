//! In-memory LED peripheral
//!
//! [`SimulatedPeripheral`] implements [`GattTransport`] the way the LED
//! firmware behaves: a `0xFFF0` service with one read/write/indicate
//! characteristic holding a single byte, plus a button that toggles the LED
//! and indicates the new value. Faults can be injected to exercise the
//! controller's failure paths, and every transport call is recorded.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::gatt::{CharacteristicHandle, CharacteristicProperties, GattCharacteristic, GattService};
use crate::schema::{LED_CHARACTERISTIC_UUID, LED_SERVICE_UUID};
use crate::transport::{
    transport_event_channel, GattTransport, TransportError, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
use crate::types::PeripheralIdentity;

/// Generic Access service present on every real peripheral
const GENERIC_ACCESS_UUID: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805F9B34FB);
const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x00002A00_0000_1000_8000_00805F9B34FB);

/// Service table of a peripheral whose LED characteristic has `properties`
pub fn led_service_table(properties: CharacteristicProperties) -> Vec<GattService> {
    vec![
        GattService {
            uuid: GENERIC_ACCESS_UUID,
            primary: true,
            characteristics: vec![GattCharacteristic {
                uuid: DEVICE_NAME_UUID,
                properties: CharacteristicProperties {
                    read: true,
                    ..Default::default()
                },
            }],
        },
        GattService {
            uuid: LED_SERVICE_UUID,
            primary: true,
            characteristics: vec![GattCharacteristic {
                uuid: LED_CHARACTERISTIC_UUID,
                properties,
            }],
        },
    ]
}

// ----------------------------------------------------------------------------
// Operation Log
// ----------------------------------------------------------------------------

/// Transport call received by the simulated peripheral
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOperation {
    LinkConnect,
    LinkDisconnect,
    DiscoverServices,
    Read,
    Write(Vec<u8>),
    EnableIndications,
}

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for [`SimulatedPeripheral`]
#[derive(Debug, Clone)]
pub struct SimulatedPeripheralBuilder {
    identity: PeripheralIdentity,
    name: String,
    led: bool,
    services: Vec<GattService>,
    reject_links: u32,
    hang_links: bool,
    hang_discovery: bool,
    fail_discovery: Option<String>,
}

impl SimulatedPeripheralBuilder {
    fn new(identity: PeripheralIdentity) -> Self {
        Self {
            identity,
            name: "LED-Sim".to_string(),
            led: false,
            services: led_service_table(CharacteristicProperties::read_write_indicate()),
            reject_links: 0,
            hang_links: false,
            hang_discovery: false,
            fail_discovery: None,
        }
    }

    /// Advertised local name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Initial LED state
    pub fn led(mut self, on: bool) -> Self {
        self.led = on;
        self
    }

    /// Replace the whole service table
    pub fn services(mut self, services: Vec<GattService>) -> Self {
        self.services = services;
        self
    }

    /// Keep the standard table but give the LED characteristic `properties`
    pub fn led_properties(mut self, properties: CharacteristicProperties) -> Self {
        self.services = led_service_table(properties);
        self
    }

    /// Reject the first `count` link attempts
    pub fn reject_links(mut self, count: u32) -> Self {
        self.reject_links = count;
        self
    }

    /// Never complete a link attempt
    pub fn hang_links(mut self) -> Self {
        self.hang_links = true;
        self
    }

    /// Never complete service discovery
    pub fn hang_discovery(mut self) -> Self {
        self.hang_discovery = true;
        self
    }

    /// Fail service discovery with an ATT error
    pub fn fail_discovery(mut self, reason: impl Into<String>) -> Self {
        self.fail_discovery = Some(reason.into());
        self
    }

    /// Build the peripheral and the event channel to hand to the controller
    pub fn build(self) -> (Arc<SimulatedPeripheral>, TransportEventReceiver) {
        let (events, receiver) = transport_event_channel();
        let peripheral = SimulatedPeripheral {
            identity: self.identity,
            name: self.name,
            events,
            state: Mutex::new(SimState {
                led: self.led,
                connected: false,
                subscribed: false,
                services: self.services,
                reject_links: self.reject_links,
                hang_links: self.hang_links,
                hang_discovery: self.hang_discovery,
                fail_discovery: self.fail_discovery,
                fail_reads: false,
                fail_writes: false,
                read_delay: None,
                link_attempts: 0,
                operations: Vec::new(),
            }),
        };
        (Arc::new(peripheral), receiver)
    }
}

// ----------------------------------------------------------------------------
// Simulated Peripheral
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct SimState {
    led: bool,
    connected: bool,
    subscribed: bool,
    services: Vec<GattService>,
    reject_links: u32,
    hang_links: bool,
    hang_discovery: bool,
    fail_discovery: Option<String>,
    fail_reads: bool,
    fail_writes: bool,
    read_delay: Option<Duration>,
    link_attempts: u32,
    operations: Vec<SimOperation>,
}

/// In-memory peripheral running the LED firmware
#[derive(Debug)]
pub struct SimulatedPeripheral {
    identity: PeripheralIdentity,
    name: String,
    events: TransportEventSender,
    state: Mutex<SimState>,
}

impl SimulatedPeripheral {
    /// Start building a peripheral with the given identity
    pub fn builder(identity: impl Into<PeripheralIdentity>) -> SimulatedPeripheralBuilder {
        SimulatedPeripheralBuilder::new(identity.into())
    }

    pub fn identity(&self) -> PeripheralIdentity {
        self.identity.clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// LED state held by the firmware
    pub fn led(&self) -> bool {
        self.lock().led
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().subscribed
    }

    /// Number of `link_connect` calls received
    pub fn link_attempts(&self) -> u32 {
        self.lock().link_attempts
    }

    /// Every transport call received so far
    pub fn operations(&self) -> Vec<SimOperation> {
        self.lock().operations.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Delay every read response
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.lock().read_delay = delay;
    }

    /// Press the on-board button: toggle the LED and indicate the new value
    pub fn press_button(&self) -> bool {
        let (led, indicate) = {
            let mut state = self.lock();
            state.led = !state.led;
            (state.led, state.connected && state.subscribed)
        };
        debug!("{} button pressed, LED {}", self.identity, if led { "on" } else { "off" });
        if indicate {
            self.push_indication(LED_CHARACTERISTIC_UUID, vec![u8::from(led)]);
        }
        led
    }

    /// Drop the link from the peripheral side
    pub fn drop_link(&self, reason: impl Into<String>) {
        {
            let mut state = self.lock();
            state.connected = false;
            state.subscribed = false;
        }
        let _ = self.events.send(TransportEvent::LinkLost {
            peer: self.identity.clone(),
            reason: reason.into(),
        });
    }

    /// Emit a raw indication regardless of subscription state
    pub fn push_indication(&self, characteristic: Uuid, value: Vec<u8>) {
        let _ = self.events.send(TransportEvent::Indication {
            peer: self.identity.clone(),
            characteristic,
            value,
        });
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_peer(&self, peer: &PeripheralIdentity) -> Result<(), TransportError> {
        if *peer != self.identity {
            return Err(TransportError::PeripheralNotFound(peer.clone()));
        }
        Ok(())
    }

    /// Record `operation`, failing if there is no link
    fn record_linked(&self, operation: SimOperation) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.operations.push(operation);
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }
}

#[async_trait]
impl GattTransport for SimulatedPeripheral {
    async fn link_connect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let hang = {
            let mut state = self.lock();
            state.operations.push(SimOperation::LinkConnect);
            state.link_attempts += 1;
            if !state.hang_links && state.reject_links > 0 {
                state.reject_links -= 1;
                return Err(TransportError::Rejected("connection refused by peer".to_string()));
            }
            if !state.hang_links {
                state.connected = true;
            }
            state.hang_links
        };

        if hang {
            return std::future::pending().await;
        }
        Ok(())
    }

    async fn link_disconnect(&self, peer: &PeripheralIdentity) -> Result<(), TransportError> {
        self.check_peer(peer)?;
        let mut state = self.lock();
        state.operations.push(SimOperation::LinkDisconnect);
        state.connected = false;
        state.subscribed = false;
        Ok(())
    }

    async fn discover_services(
        &self,
        peer: &PeripheralIdentity,
    ) -> Result<Vec<GattService>, TransportError> {
        self.check_peer(peer)?;
        self.record_linked(SimOperation::DiscoverServices)?;
        let (hang, result) = {
            let state = self.lock();
            let result = match &state.fail_discovery {
                Some(reason) => Err(TransportError::Att(reason.clone())),
                None => Ok(state.services.clone()),
            };
            (state.hang_discovery, result)
        };

        if hang {
            return std::future::pending().await;
        }
        result
    }

    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> Result<Vec<u8>, TransportError> {
        self.check_peer(handle.peer())?;
        self.record_linked(SimOperation::Read)?;
        let delay = self.lock().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.lock();
        if state.fail_reads {
            return Err(TransportError::Att("read not permitted".to_string()));
        }
        Ok(vec![u8::from(state.led)])
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.check_peer(handle.peer())?;
        self.record_linked(SimOperation::Write(value.to_vec()))?;

        let (led, indicate) = {
            let mut state = self.lock();
            if state.fail_writes {
                return Err(TransportError::Att("write not permitted".to_string()));
            }
            match value {
                [byte] if *byte <= 1 => state.led = *byte == 1,
                _ => {
                    return Err(TransportError::Att(
                        "invalid attribute length".to_string(),
                    ))
                }
            }
            (state.led, state.subscribed)
        };

        // The firmware indicates every accepted write to subscribed clients
        if indicate {
            self.push_indication(LED_CHARACTERISTIC_UUID, vec![u8::from(led)]);
        }
        Ok(())
    }

    async fn enable_indications(&self, handle: &CharacteristicHandle) -> Result<(), TransportError> {
        self.check_peer(handle.peer())?;
        self.record_linked(SimOperation::EnableIndications)?;
        self.lock().subscribed = true;
        Ok(())
    }
}
