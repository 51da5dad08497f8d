//! Adapter initialisation and scanning for nearby advertisers

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager};
use ledlink_core::{PeripheralIdentity, LED_SERVICE_UUID};
use tracing::{debug, info, warn};

use crate::config::BleAdapterConfig;
use crate::error::{BleError, Result};
use crate::protocol::{identity_for, name_matches};

/// Open the host adapter selected by `config.adapter_index`
pub async fn initialize_adapter(config: &BleAdapterConfig) -> Result<Adapter> {
    let manager = Manager::new()
        .await
        .map_err(|e| BleError::ManagerFailed(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| BleError::ManagerFailed(format!("Failed to get BLE adapters: {}", e)))?;

    let adapter = adapters
        .into_iter()
        .nth(config.adapter_index)
        .ok_or(BleError::AdapterNotAvailable)?;

    match adapter.adapter_info().await {
        Ok(info) => info!("BLE adapter initialized: {}", info),
        Err(_) => info!("BLE adapter initialized"),
    }
    Ok(adapter)
}

// ----------------------------------------------------------------------------
// Scanning
// ----------------------------------------------------------------------------

/// An advertiser seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedDevice {
    pub identity: PeripheralIdentity,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// The advertisement lists the LED service
    pub advertises_led_service: bool,
}

impl ScannedDevice {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unknown)")
    }
}

/// Timed scan over the host adapter
pub struct BleScanner {
    adapter: Adapter,
    config: BleAdapterConfig,
}

impl BleScanner {
    pub fn new(adapter: Adapter, config: BleAdapterConfig) -> Self {
        Self { adapter, config }
    }

    /// Listen for `scan_duration` and return what was heard, strongest first
    pub async fn scan(&self) -> Result<Vec<ScannedDevice>> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?;
        info!("Scanning for {:?}", self.config.scan_duration);

        tokio::time::sleep(self.config.scan_duration).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", e);
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?;

        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping peripheral without properties: {}", e);
                    continue;
                }
            };
            devices.push(ScannedDevice {
                identity: identity_for(properties.address, &peripheral.id()),
                name: properties.local_name,
                rssi: properties.rssi,
                advertises_led_service: properties.services.contains(&LED_SERVICE_UUID),
            });
        }

        let devices = select_devices(devices, &self.config);
        info!("Scan finished, {} device(s) found", devices.len());
        Ok(devices)
    }
}

/// Apply the name filter and order by signal strength
pub fn select_devices(devices: Vec<ScannedDevice>, config: &BleAdapterConfig) -> Vec<ScannedDevice> {
    let mut selected: Vec<ScannedDevice> = devices
        .into_iter()
        .filter(|device| config.include_unnamed || device.name.is_some())
        .filter(|device| match &config.name_filter {
            Some(filter) => name_matches(device.name.as_deref(), filter),
            None => true,
        })
        .collect();

    // Unknown RSSI sorts last
    selected.sort_by(|a, b| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)));
    selected
}
