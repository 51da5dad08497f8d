//! LED controller session used by the CLI commands

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ledlink_ble::{initialize_adapter, BleTransport};
use ledlink_core::mock::SimulatedPeripheral;
use ledlink_core::{
    ConnectionState, LedController, LedError, PeripheralIdentity, TransportEventReceiver,
    VerificationOutcome,
};

use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::state::{DeviceStore, RememberedDevice};

/// Identity of the peripheral used by `ledlink demo`
pub const DEMO_IDENTITY: &str = "sim-led";

// ----------------------------------------------------------------------------
// Session Input
// ----------------------------------------------------------------------------

/// One line typed at the interactive prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Toggle,
    On,
    Off,
    Read,
    Status,
    /// Press the simulated peripheral's button (demo only)
    Button,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

impl SessionInput {
    pub fn parse(line: &str) -> Self {
        let word = line.trim().to_lowercase();
        match word.as_str() {
            "" => SessionInput::Empty,
            "toggle" | "t" => SessionInput::Toggle,
            "on" => SessionInput::On,
            "off" => SessionInput::Off,
            "read" | "r" => SessionInput::Read,
            "status" | "s" => SessionInput::Status,
            "button" | "b" => SessionInput::Button,
            "help" | "h" | "?" => SessionInput::Help,
            "quit" | "q" | "exit" => SessionInput::Quit,
            _ => SessionInput::Unknown(word),
        }
    }
}

// ----------------------------------------------------------------------------
// Application
// ----------------------------------------------------------------------------

enum Backend {
    Ble(Arc<BleTransport>),
    Simulated(Arc<SimulatedPeripheral>),
}

/// A running controller plus the transport it drives
pub struct LedApp {
    controller: LedController,
    task: JoinHandle<()>,
    backend: Backend,
    config: AppConfig,
    store: Option<DeviceStore>,
}

impl LedApp {
    /// Open the host adapter and start a controller on it
    pub async fn with_ble(config: AppConfig) -> Result<Self> {
        let adapter = initialize_adapter(&config.ble).await?;
        let (transport, events) = BleTransport::new(adapter, config.ble.clone()).await?;
        let (controller, task) =
            LedController::spawn(transport.clone(), events, config.controller.clone())?;

        let store = if config.session.remember_device {
            Some(DeviceStore::new(config.data_dir()?))
        } else {
            None
        };

        Ok(Self {
            controller,
            task,
            backend: Backend::Ble(transport),
            config,
            store,
        })
    }

    /// Start a controller on a simulated peripheral
    pub fn with_simulated(
        config: AppConfig,
        peripheral: Arc<SimulatedPeripheral>,
        events: TransportEventReceiver,
        store: Option<DeviceStore>,
    ) -> Result<Self> {
        let (controller, task) =
            LedController::spawn(peripheral.clone(), events, config.controller.clone())?;
        Ok(Self {
            controller,
            task,
            backend: Backend::Simulated(peripheral),
            config,
            store,
        })
    }

    pub fn controller(&self) -> &LedController {
        &self.controller
    }

    /// Connect and wait for the verdict; an incompatible peer is an error
    pub async fn connect(&self, peer: &PeripheralIdentity) -> Result<VerificationOutcome> {
        println!("Connecting to {}...", peer);
        let outcome = self.controller.connect_and_wait(peer.clone()).await?;
        if !outcome.is_compatible {
            return Err(CliError::Incompatible {
                peer: outcome.peer,
                reason: describe_reason(outcome.reason.as_ref()),
            });
        }

        self.remember(&outcome.peer).await;
        println!("Connected to {}", self.display_name(&outcome.peer).await);
        Ok(outcome)
    }

    /// Interactive control until `quit` or end of input
    pub async fn run_interactive(&self, peer: PeripheralIdentity) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut lifecycle = self.controller.subscribe_lifecycle();
        let mut verdicts = self.controller.subscribe_verdicts();
        let mut led = self.controller.led_state();
        let mut shown_led = *led.borrow_and_update();

        let session = &self.config.session;
        let reconnect = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(reconnect);
        let mut reconnect_pending = false;

        print_help(self.is_simulated());
        println!("LED is {}", on_off(shown_led));
        prompt(&session.prompt)?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    let input = SessionInput::parse(&line);
                    if input == SessionInput::Quit {
                        break;
                    }
                    if let Some(on) = self.handle_input(input).await {
                        shown_led = on;
                    }
                    prompt(&session.prompt)?;
                }
                event = lifecycle.recv() => match event {
                    Ok(event) => {
                        debug!("Session saw {}", event.state);
                        let lost = matches!(
                            event.state,
                            ConnectionState::Disconnected | ConnectionState::ConnectionFailed
                        );
                        if lost && session.auto_reconnect && !reconnect_pending {
                            println!("Link to {} lost, reconnecting in {:?}", peer, session.reconnect_delay);
                            reconnect.as_mut().reset(Instant::now() + session.reconnect_delay);
                            reconnect_pending = true;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} lifecycle events", skipped),
                    Err(RecvError::Closed) => break,
                },
                verdict = verdicts.recv() => match verdict {
                    Ok(outcome) => self.report_verdict(&outcome).await,
                    Err(RecvError::Lagged(skipped)) => warn!("Missed {} verdicts", skipped),
                    Err(RecvError::Closed) => break,
                },
                changed = led.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let on = *led.borrow_and_update();
                    if on != shown_led {
                        shown_led = on;
                        println!("LED is now {}", on_off(on));
                    }
                }
                () = &mut reconnect, if reconnect_pending => {
                    reconnect_pending = false;
                    info!("Reconnecting to {}", peer);
                    if let Err(e) = self.controller.connect(peer.clone()).await {
                        warn!("Reconnect to {} failed: {}", peer, e);
                    }
                }
            }
        }

        Ok(())
    }

    /// Run one prompt command; returns the LED state it produced, if any
    pub async fn handle_input(&self, input: SessionInput) -> Option<bool> {
        match input {
            SessionInput::Toggle => report("Toggle", self.controller.toggle().await),
            SessionInput::On => report("Write", self.controller.write_state(true).await),
            SessionInput::Off => report("Write", self.controller.write_state(false).await),
            SessionInput::Read => report("Read", self.controller.read_state().await),
            SessionInput::Status => {
                self.print_status().await;
                None
            }
            SessionInput::Button => {
                match &self.backend {
                    Backend::Simulated(peripheral) => {
                        let on = peripheral.press_button();
                        println!("Button pressed, peripheral LED {}", on_off(on));
                    }
                    Backend::Ble(_) => println!("button is only available in demo mode"),
                }
                None
            }
            SessionInput::Help => {
                print_help(self.is_simulated());
                None
            }
            SessionInput::Unknown(word) => {
                println!("Unknown command '{}', type help", word);
                None
            }
            SessionInput::Quit | SessionInput::Empty => None,
        }
    }

    /// Stop the controller task and release the transport
    pub async fn shutdown(self) -> Result<()> {
        if let Err(e) = self.controller.shutdown().await {
            debug!("Controller already stopped: {}", e);
        }
        if let Err(e) = self.task.await {
            warn!("Controller task ended abnormally: {}", e);
        }
        if let Backend::Ble(transport) = &self.backend {
            transport.close().await;
        }
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        matches!(self.backend, Backend::Simulated(_))
    }

    async fn device_name(&self, peer: &PeripheralIdentity) -> Option<String> {
        match &self.backend {
            Backend::Ble(transport) => transport.device_name(peer).await,
            Backend::Simulated(peripheral) => Some(peripheral.name().to_string()),
        }
    }

    async fn display_name(&self, peer: &PeripheralIdentity) -> String {
        match self.device_name(peer).await {
            Some(name) => format!("{} ({})", name, peer),
            None => peer.to_string(),
        }
    }

    async fn remember(&self, peer: &PeripheralIdentity) {
        let Some(store) = &self.store else {
            return;
        };
        let device = RememberedDevice::new(peer.clone(), self.device_name(peer).await);
        if let Err(e) = store.save(&device) {
            warn!("Failed to remember {}: {}", peer, e);
        }
    }

    async fn report_verdict(&self, outcome: &VerificationOutcome) {
        if outcome.is_compatible {
            self.remember(&outcome.peer).await;
            println!("Connected to {}", self.display_name(&outcome.peer).await);
        } else {
            println!(
                "{} not usable: {}",
                outcome.peer,
                describe_reason(outcome.reason.as_ref())
            );
        }
    }

    async fn print_status(&self) {
        println!("State: {}", self.controller.current_state());
        println!("LED:   {}", on_off(self.controller.current_led()));
        match self.controller.stats().await {
            Ok(stats) => println!(
                "Attempts: {}  verdicts: {}  indications: {}",
                stats.attempts, stats.verdicts_delivered, stats.indications_applied
            ),
            Err(e) => println!("Stats unavailable: {}", e),
        }
    }
}

fn report(operation: &str, result: ledlink_core::Result<bool>) -> Option<bool> {
    match result {
        Ok(on) => {
            println!("LED {}", on_off(on));
            Some(on)
        }
        Err(e) => {
            println!("{} failed: {}", operation, e);
            None
        }
    }
}

fn describe_reason(reason: Option<&LedError>) -> String {
    reason
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown reason".to_string())
}

pub fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(())
}

fn print_help(simulated: bool) {
    println!("Commands: toggle, on, off, read, status, help, quit");
    if simulated {
        println!("          button (press the simulated peripheral's button)");
    }
}
