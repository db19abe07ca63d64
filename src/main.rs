//! Command-line front end for BLE LED strip controllers

use clap::{Parser, Subcommand, ValueEnum};
use led_controller::domain::known_devices::KnownDeviceStore;
use led_controller::domain::models::{Address, Rgb, ScanMode};
use led_controller::domain::power::{PowerControl, PowerOutcome, SavedColor};
use led_controller::domain::settings::{config_dir, BleSettings, SettingsService};
use led_controller::infrastructure::bluetooth::sim::{SimPeripheral, SimRadio};
use led_controller::infrastructure::bluetooth::BluetoothService;
use led_controller::infrastructure::logging::init_logger;
use led_controller::infrastructure::storage::{JsonFileStore, KeyValueStore, MemoryStore};
use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

const DEMO_ADDRESS: &str = "C0:FF:EE:00:00:01";
const DEMO_NAME: &str = "LEDnet-Demo";

#[derive(Parser)]
#[command(name = "led-controller")]
#[command(about = "Control BLE LED strip controllers")]
struct Cli {
    /// Use an in-process simulated controller instead of the Bluetooth adapter
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for LED controllers until the scan window closes
    Scan {
        /// Auto-connect to the last used controller instead of listing results
        #[arg(short, long)]
        background: bool,
    },
    /// Connect to a controller and remember it
    Connect {
        address: String,
        /// Seconds to wait for the link to become usable
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },
    /// Set a color on the last used controller
    Color { r: u8, g: u8, b: u8 },
    /// Switch the last used controller on (saved color) or off
    Power {
        #[arg(value_enum)]
        action: PowerAction,
    },
    /// Save a color as hue (degrees), saturation and brightness (0-1) and switch on
    Hsv {
        hue: f32,
        saturation: f32,
        brightness: f32,
    },
    /// Manage remembered controllers
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PowerAction {
    On,
    Off,
    Toggle,
}

#[derive(Subcommand)]
enum DeviceAction {
    List,
    Remove { address: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let settings_service = SettingsService::new()?;
    let _log_guard = init_logger(&settings_service.get().log_settings)?;
    info!("Settings loaded from {}", settings_service.path().display());

    let ble = settings_service.get().ble.clone();
    let (store, service) = if cli.simulate {
        simulated_service(ble)
    } else {
        let store: Arc<dyn KeyValueStore> =
            Arc::new(JsonFileStore::open(config_dir()?.join("devices.json")));
        native_service(store, ble)
    };

    let power = PowerControl::new(store);
    let code = run(&service, &power, cli.command).await;
    service.shutdown().await;
    Ok(code)
}

type Backend = (Arc<dyn KeyValueStore>, BluetoothService);

#[cfg(windows)]
fn native_service(store: Arc<dyn KeyValueStore>, ble: BleSettings) -> Backend {
    use led_controller::infrastructure::bluetooth::winrt::WinRtRadio;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let radio = Arc::new(WinRtRadio::new(events_tx));
    let service = BluetoothService::spawn(radio, events_rx, store.clone(), ble);
    (store, service)
}

#[cfg(not(windows))]
fn native_service(_store: Arc<dyn KeyValueStore>, ble: BleSettings) -> Backend {
    tracing::warn!("No native Bluetooth backend on this platform, using the simulated radio");
    simulated_service(ble)
}

/// One demo controller that advertises while a scan runs and is preset as
/// the last used target. Nothing is written to disk.
fn simulated_service(ble: BleSettings) -> Backend {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let radio = Arc::new(SimRadio::new(events_tx));
    let address = Address::new(DEMO_ADDRESS);
    radio.add_peripheral(address.clone(), SimPeripheral::led_controller(DEMO_NAME));

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    KnownDeviceStore::load(store.clone()).set_last_target(address.clone());

    let advertiser = radio.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            advertiser.advertise(&address);
        }
    });

    let service = BluetoothService::spawn(radio, events_rx, store.clone(), ble);
    (store, service)
}

fn report_power(outcome: PowerOutcome) -> ExitCode {
    let state = if outcome.on { "on" } else { "off" };
    if outcome.delivered {
        println!("Power {}", state);
        ExitCode::SUCCESS
    } else {
        eprintln!("Power saved as {}, but no controller accepted it", state);
        ExitCode::FAILURE
    }
}

async fn run(service: &BluetoothService, power: &PowerControl, command: Commands) -> ExitCode {
    match command {
        Commands::Scan { background } => {
            let mode = if background {
                ScanMode::Background
            } else {
                ScanMode::Manual
            };
            scan(service, mode).await;
            ExitCode::SUCCESS
        }
        Commands::Connect { address, timeout } => {
            let address = Address::new(address);
            println!("Connecting to {}...", address);
            service.connect(address.clone()).await;
            if service
                .wait_until_bound(&address, Duration::from_secs(timeout))
                .await
            {
                println!("Connected to {}", address);
                ExitCode::SUCCESS
            } else {
                eprintln!("Could not connect to {}", address);
                service.disconnect(address).await;
                ExitCode::FAILURE
            }
        }
        Commands::Color { r, g, b } => {
            if service.execute_command(Rgb::new(r, g, b)).await {
                println!("Color set to #{:02X}{:02X}{:02X}", r, g, b);
                ExitCode::SUCCESS
            } else {
                eprintln!("No controller accepted the color");
                ExitCode::FAILURE
            }
        }
        Commands::Power { action } => {
            let outcome = match action {
                PowerAction::On => power.set(service, true).await,
                PowerAction::Off => power.set(service, false).await,
                PowerAction::Toggle => power.toggle(service).await,
            };
            report_power(outcome)
        }
        Commands::Hsv {
            hue,
            saturation,
            brightness,
        } => {
            let color = SavedColor {
                hue,
                saturation,
                brightness,
            };
            report_power(power.set_color(service, color).await)
        }
        Commands::Devices { action } => match action {
            DeviceAction::List => {
                let known = service.known_devices().borrow().clone();
                if known.is_empty() {
                    println!("No remembered controllers");
                }
                for device in known {
                    println!("  {} ({})", device.name, device.address);
                }
                ExitCode::SUCCESS
            }
            DeviceAction::Remove { address } => {
                let address = Address::new(address);
                if service.remove_known_device(address.clone()).await {
                    println!("Forgot {}", address);
                    ExitCode::SUCCESS
                } else {
                    eprintln!("{} is not a remembered controller", address);
                    ExitCode::FAILURE
                }
            }
        },
    }
}

/// Print results as they arrive until the scan window closes or Ctrl-C
async fn scan(service: &BluetoothService, mode: ScanMode) {
    let mut scanning = service.is_scanning();
    let mut results = service.scanned_devices();
    let mut devices = service.devices();

    service.start_scan(mode).await;
    if !*scanning.borrow_and_update() {
        eprintln!("Scan could not be started");
        return;
    }
    println!("Scanning ({:?})... press Ctrl-C to stop", mode);

    let mut printed = HashSet::new();
    loop {
        tokio::select! {
            changed = scanning.changed() => {
                if changed.is_err() || !*scanning.borrow_and_update() {
                    break;
                }
            }
            changed = results.changed() => {
                if changed.is_err() {
                    break;
                }
                for device in results.borrow_and_update().iter() {
                    if printed.insert(device.address.clone()) {
                        println!(
                            "  {} ({}) RSSI: {} dBm",
                            device.name.as_deref().unwrap_or("Unknown"),
                            device.address,
                            device.signal_strength
                        );
                    }
                }
            }
            changed = devices.changed() => {
                if changed.is_err() {
                    break;
                }
                for (address, status) in devices.borrow_and_update().iter() {
                    if status.command_bound {
                        println!("  Connected to {}", address);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                service.stop_scan().await;
                break;
            }
        }
    }

    println!("Scan finished, {} controllers found", printed.len());

    // A background scan stops itself once the target is seen, before the link is up
    if mode == ScanMode::Background {
        let bound = tokio::time::timeout(
            Duration::from_secs(5),
            devices.wait_for(|all| all.values().any(|s| s.command_bound)),
        )
        .await;
        match bound {
            Ok(Ok(all)) => {
                for (address, _) in all.iter().filter(|(_, s)| s.command_bound) {
                    println!("  Connected to {}", address);
                }
            }
            _ => println!("  Last used controller not connected"),
        }
    }
}
