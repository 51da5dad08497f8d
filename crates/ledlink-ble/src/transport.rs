//! btleplug implementation of [`GattTransport`]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use ledlink_core::{
    transport_event_channel, CharacteristicHandle, GattService, GattTransport,
    PeripheralIdentity, TransportError, TransportEvent, TransportEventReceiver,
    TransportEventSender,
};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BleAdapterConfig;
use crate::error::{BleError, Result};
use crate::protocol::{att_error, identity_for, link_error, to_services};

/// Poll interval while looking up a peripheral that has not been seen yet
const LOOKUP_POLL: Duration = Duration::from_millis(250);

// ----------------------------------------------------------------------------
// BLE Transport
// ----------------------------------------------------------------------------

/// GATT central on a host adapter
pub struct BleTransport {
    adapter: Adapter,
    config: BleAdapterConfig,
    /// Peripherals seen so far, by identity
    peripherals: RwLock<HashMap<PeripheralIdentity, Peripheral>>,
    /// Indication forwarders, one per subscribed peer
    forwarders: Mutex<HashMap<PeripheralIdentity, JoinHandle<()>>>,
    /// Peers we are disconnecting on purpose
    closing: Mutex<HashSet<PeripheralIdentity>>,
    events: TransportEventSender,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    /// Wrap `adapter` and start watching it for link drops
    pub async fn new(
        adapter: Adapter,
        config: BleAdapterConfig,
    ) -> Result<(Arc<Self>, TransportEventReceiver)> {
        let (events, receiver) = transport_event_channel();
        let transport = Arc::new(Self {
            adapter,
            config,
            peripherals: RwLock::new(HashMap::new()),
            forwarders: Mutex::new(HashMap::new()),
            closing: Mutex::new(HashSet::new()),
            events,
            monitor: Mutex::new(None),
        });
        transport.start_link_monitor().await?;
        Ok((transport, receiver))
    }

    /// Advertised name of a known peripheral
    pub async fn device_name(&self, peer: &PeripheralIdentity) -> Option<String> {
        let peripheral = self.peripherals.read().await.get(peer).cloned()?;
        peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|properties| properties.local_name)
    }

    /// Stop the link monitor and every indication forwarder
    pub async fn close(&self) {
        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.abort();
        }
        for (_, forwarder) in self.forwarders.lock().await.drain() {
            forwarder.abort();
        }
    }

    async fn start_link_monitor(self: &Arc<Self>) -> Result<()> {
        let mut events = self
            .adapter
            .events()
            .await
            .map_err(|e| BleError::EventStreamFailed(e.to_string()))?;

        let transport: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    let Some(transport) = transport.upgrade() else {
                        break;
                    };
                    transport.on_device_disconnected(&id).await;
                }
            }
            debug!("BLE adapter event stream ended");
        });

        *self.monitor.lock().await = Some(handle);
        Ok(())
    }

    async fn on_device_disconnected(&self, id: &PeripheralId) {
        let peer = {
            let peripherals = self.peripherals.read().await;
            peripherals
                .iter()
                .find(|(_, peripheral)| peripheral.id() == *id)
                .map(|(peer, _)| peer.clone())
        };
        let Some(peer) = peer else {
            return;
        };

        self.stop_forwarder(&peer).await;
        if self.closing.lock().await.remove(&peer) {
            debug!("{} disconnected as requested", peer);
            return;
        }

        info!("Link to {} dropped", peer);
        let _ = self.events.send(TransportEvent::LinkLost {
            peer,
            reason: "peripheral disconnected".to_string(),
        });
    }

    /// Find the peripheral for `peer`, scanning for it if it has not been seen
    async fn find_peripheral(
        &self,
        peer: &PeripheralIdentity,
    ) -> std::result::Result<Peripheral, TransportError> {
        if let Some(peripheral) = self.peripherals.read().await.get(peer) {
            return Ok(peripheral.clone());
        }

        if let Some(peripheral) = self.refresh(peer).await? {
            return Ok(peripheral);
        }

        debug!("{} not known yet, scanning for it", peer);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| att_error(e, peer))?;

        let deadline = tokio::time::Instant::now() + self.config.scan_duration;
        let found = loop {
            tokio::time::sleep(LOOKUP_POLL).await;
            if let Some(peripheral) = self.refresh(peer).await? {
                break Some(peripheral);
            }
            if tokio::time::Instant::now() >= deadline {
                break None;
            }
        };

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }
        found.ok_or_else(|| TransportError::PeripheralNotFound(peer.clone()))
    }

    /// Re-read the adapter's peripheral list into the cache
    async fn refresh(
        &self,
        peer: &PeripheralIdentity,
    ) -> std::result::Result<Option<Peripheral>, TransportError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| att_error(e, peer))?;

        let mut cache = self.peripherals.write().await;
        for peripheral in peripherals {
            let identity = identity_for(peripheral.address(), &peripheral.id());
            cache.insert(identity, peripheral);
        }
        Ok(cache.get(peer).cloned())
    }

    async fn known_peripheral(
        &self,
        peer: &PeripheralIdentity,
    ) -> std::result::Result<Peripheral, TransportError> {
        self.peripherals
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| TransportError::PeripheralNotFound(peer.clone()))
    }

    async fn characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> std::result::Result<(Peripheral, Characteristic), TransportError> {
        let peripheral = self.known_peripheral(handle.peer()).await?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == handle.characteristic() && c.service_uuid == handle.service())
            .ok_or_else(|| {
                TransportError::Att(format!(
                    "characteristic {} not discovered",
                    handle.characteristic()
                ))
            })?;
        Ok((peripheral, characteristic))
    }

    async fn stop_forwarder(&self, peer: &PeripheralIdentity) {
        if let Some(forwarder) = self.forwarders.lock().await.remove(peer) {
            forwarder.abort();
        }
    }
}

#[async_trait]
impl GattTransport for BleTransport {
    async fn link_connect(&self, peer: &PeripheralIdentity) -> std::result::Result<(), TransportError> {
        let peripheral = self.find_peripheral(peer).await?;
        self.closing.lock().await.remove(peer);

        if peripheral.is_connected().await.unwrap_or(false) {
            debug!("{} already connected", peer);
            return Ok(());
        }

        peripheral.connect().await.map_err(|e| link_error(e, peer))?;
        info!("Connected to {}", peer);
        Ok(())
    }

    async fn link_disconnect(&self, peer: &PeripheralIdentity) -> std::result::Result<(), TransportError> {
        let peripheral = self.known_peripheral(peer).await?;
        self.stop_forwarder(peer).await;

        if !peripheral.is_connected().await.unwrap_or(false) {
            return Ok(());
        }

        self.closing.lock().await.insert(peer.clone());
        peripheral.disconnect().await.map_err(|e| att_error(e, peer))?;
        info!("Disconnected from {}", peer);
        Ok(())
    }

    async fn discover_services(
        &self,
        peer: &PeripheralIdentity,
    ) -> std::result::Result<Vec<GattService>, TransportError> {
        let peripheral = self.known_peripheral(peer).await?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| att_error(e, peer))?;
        Ok(to_services(&peripheral.services()))
    }

    async fn read_characteristic(
        &self,
        handle: &CharacteristicHandle,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle).await?;
        peripheral
            .read(&characteristic)
            .await
            .map_err(|e| att_error(e, handle.peer()))
    }

    async fn write_characteristic(
        &self,
        handle: &CharacteristicHandle,
        value: &[u8],
    ) -> std::result::Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle).await?;
        peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await
            .map_err(|e| att_error(e, handle.peer()))
    }

    async fn enable_indications(
        &self,
        handle: &CharacteristicHandle,
    ) -> std::result::Result<(), TransportError> {
        let (peripheral, characteristic) = self.characteristic(handle).await?;
        let peer = handle.peer().clone();

        let mut notifications = peripheral.notifications().await.map_err(|e| {
            TransportError::from(BleError::NotificationStreamFailed(e.to_string()))
        })?;
        peripheral
            .subscribe(&characteristic)
            .await
            .map_err(|e| att_error(e, &peer))?;

        let events = self.events.clone();
        let forwarded = peer.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let event = TransportEvent::Indication {
                    peer: forwarded.clone(),
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if events.send(event).is_err() {
                    break;
                }
            }
            debug!("Indication stream for {} ended", forwarded);
        });

        if let Some(previous) = self.forwarders.lock().await.insert(peer, forwarder) {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}
