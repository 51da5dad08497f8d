//! Command handlers for the ledlink CLI

use tracing::info;

use ledlink_ble::{initialize_adapter, BleScanner};
use ledlink_core::mock::SimulatedPeripheral;
use ledlink_core::PeripheralIdentity;

use crate::app::{on_off, LedApp, DEMO_IDENTITY};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::state::DeviceStore;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

/// Single operation run by the one-shot commands
#[derive(Debug, Clone, Copy)]
enum OneShot {
    Toggle,
    Read,
    Set(bool),
}

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Scan { all } => Self::handle_scan_command(config, all).await,
            Commands::Connect { address } => Self::handle_connect_command(config, address).await,
            Commands::Toggle { address } => {
                Self::handle_one_shot(config, address, OneShot::Toggle).await
            }
            Commands::Read { address } => {
                Self::handle_one_shot(config, address, OneShot::Read).await
            }
            Commands::Set { state, address } => {
                Self::handle_one_shot(config, address, OneShot::Set(state.is_on())).await
            }
            Commands::Forget => Self::handle_forget_command(config),
            Commands::Demo => Self::handle_demo_command(config).await,
        }
    }

    /// List nearby advertisers, strongest first
    async fn handle_scan_command(config: AppConfig, all: bool) -> Result<()> {
        let ble = config.ble.clone().with_include_unnamed(all);
        let adapter = initialize_adapter(&ble).await?;
        let devices = BleScanner::new(adapter, ble).scan().await?;

        if devices.is_empty() {
            println!("No devices found");
            return Ok(());
        }

        println!("{:<4} {:<24} {:<6} {}", "", "Address", "RSSI", "Name");
        for (index, device) in devices.iter().enumerate() {
            let rssi = device
                .rssi
                .map(|rssi| rssi.to_string())
                .unwrap_or_else(|| "?".to_string());
            let marker = if device.advertises_led_service { " [LED]" } else { "" };
            println!(
                "{:<4} {:<24} {:<6} {}{}",
                index + 1,
                device.identity,
                rssi,
                device.display_name(),
                marker
            );
        }
        Ok(())
    }

    /// Connect, then control the LED from the prompt
    async fn handle_connect_command(config: AppConfig, address: Option<String>) -> Result<()> {
        let peer = Self::resolve_peer(&config, address)?;
        let app = LedApp::with_ble(config).await?;

        let result = match app.connect(&peer).await {
            Ok(_) => app.run_interactive(peer).await,
            Err(e) => Err(e),
        };
        app.shutdown().await?;
        result
    }

    /// Connect, run one operation, print the result and disconnect
    async fn handle_one_shot(
        config: AppConfig,
        address: Option<String>,
        operation: OneShot,
    ) -> Result<()> {
        let peer = Self::resolve_peer(&config, address)?;
        let app = LedApp::with_ble(config).await?;

        let result = Self::run_one_shot(&app, &peer, operation).await;
        app.shutdown().await?;

        let on = result?;
        println!("LED {}", on_off(on));
        Ok(())
    }

    async fn run_one_shot(app: &LedApp, peer: &PeripheralIdentity, operation: OneShot) -> Result<bool> {
        app.connect(peer).await?;
        let controller = app.controller();
        let on = match operation {
            OneShot::Toggle => controller.toggle().await?,
            OneShot::Read => controller.read_state().await?,
            OneShot::Set(on) => controller.write_state(on).await?,
        };
        Ok(on)
    }

    fn handle_forget_command(config: AppConfig) -> Result<()> {
        let store = DeviceStore::new(config.data_dir()?);
        if store.forget()? {
            println!("Forgot remembered device");
        } else {
            println!("No device remembered");
        }
        Ok(())
    }

    /// Interactive session against an in-process peripheral
    async fn handle_demo_command(config: AppConfig) -> Result<()> {
        info!("Starting demo with a simulated LED peripheral");
        let (peripheral, events) = SimulatedPeripheral::builder(DEMO_IDENTITY).build();
        let app = LedApp::with_simulated(config, peripheral, events, None)?;
        let peer = PeripheralIdentity::from(DEMO_IDENTITY);

        let result = match app.connect(&peer).await {
            Ok(_) => app.run_interactive(peer).await,
            Err(e) => Err(e),
        };
        app.shutdown().await?;
        result
    }

    /// The given address, or the remembered device
    fn resolve_peer(config: &AppConfig, address: Option<String>) -> Result<PeripheralIdentity> {
        if let Some(address) = address {
            return Ok(PeripheralIdentity::new(address));
        }

        let store = DeviceStore::new(config.data_dir()?);
        let device = store.load()?.ok_or(CliError::NoDevice)?;
        info!("Using remembered device {}", device.display_name());
        Ok(device.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RememberedDevice;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.session.data_dir = Some(dir.path().to_path_buf());
        config
    }

    #[test]
    fn test_explicit_address_wins() {
        let dir = TempDir::new().unwrap();
        let peer =
            CommandDispatcher::resolve_peer(&config_in(&dir), Some("AA:BB:CC:DD:EE:FF".into()))
                .unwrap();
        assert_eq!(peer.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn test_remembered_device_used_without_address() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        assert!(matches!(
            CommandDispatcher::resolve_peer(&config, None),
            Err(CliError::NoDevice)
        ));

        DeviceStore::new(dir.path())
            .save(&RememberedDevice::new("11:22:33:44:55:66".into(), None))
            .unwrap();
        let peer = CommandDispatcher::resolve_peer(&config, None).unwrap();
        assert_eq!(peer.as_str(), "11:22:33:44:55:66");
    }

    #[test]
    fn test_forget_clears_remembered_device() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let store = DeviceStore::new(dir.path());
        store
            .save(&RememberedDevice::new("11:22:33:44:55:66".into(), None))
            .unwrap();

        CommandDispatcher::handle_forget_command(config).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
