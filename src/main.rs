//! # CorePrint CLI
//!
//! Command-line interface for the CorePrint thermal printer.
//!
//! ## Usage
//!
//! ```bash
//! # Look for printers nearby
//! coreprint scan --timeout 8
//!
//! # Probe the remembered printer (or a specific one)
//! coreprint status --mac 66:22:B3:00:00:01
//!
//! # Print an image, feeding 3 lines afterwards
//! coreprint print label.png --feed-after 3
//!
//! # Show or clear the remembered printer
//! coreprint device
//! coreprint forget
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coreprint::{
    Connection, ConnectionConfig, ConnectionController, PrintJobConfig, PrintJobManager, PrinterConfig, PrinterError,
    render::{DitheringAlgorithm, ImageEncoder},
    settings::{JsonFileSettings, MemorySettings, SettingsStore},
    transport::{
        process::Tool,
        scan::{self, Scanner},
    },
};

/// CorePrint - Bluetooth thermal printer utility
#[derive(Parser, Debug)]
#[command(name = "coreprint")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (defaults to $XDG_CONFIG_HOME/coreprint/settings.json)
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan for nearby Bluetooth devices, printers first
    Scan {
        /// Active scan duration in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect and query the printer status
    Status {
        /// Printer MAC address (defaults to the remembered printer)
        #[arg(long)]
        mac: Option<String>,
    },

    /// Print an image file
    Print {
        /// Image to print (PNG, JPEG, GIF, BMP, ...)
        image: PathBuf,

        /// Printer MAC address (defaults to the remembered printer)
        #[arg(long)]
        mac: Option<String>,

        /// Blank lines fed before the image
        #[arg(long, default_value = "0")]
        feed_before: usize,

        /// Blank lines fed after the image
        #[arg(long, default_value = "0")]
        feed_after: usize,

        /// Base settle delay after control commands, in seconds
        #[arg(long, default_value = "0.1", value_parser = parse_delay)]
        delay: Duration,

        /// Raster bytes per write
        #[arg(long, default_value = "1024")]
        chunk_size: usize,

        /// Dithering algorithm: bayer, floyd-steinberg, atkinson, none
        #[arg(long, default_value = "bayer")]
        dither: DitheringAlgorithm,

        /// Swap light and dark
        #[arg(long)]
        invert: bool,

        /// Reconnect and resend once if a write fails
        #[arg(long)]
        auto_reconnect: bool,
    },

    /// Show the remembered printer
    Device,

    /// Forget the remembered printer
    Forget,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "coreprint=info",
        1 => "coreprint=debug",
        _ => "coreprint=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), PrinterError> {
    let settings = open_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Scan { timeout, json } => scan_command(Duration::from_secs(timeout), json),

        Commands::Status { mac } => {
            let controller = controller(settings, ConnectionConfig::default());
            connect(&controller, mac.as_deref())?;

            let connection = controller.connection();
            let status = connection.get_status();
            let channel = connection
                .discovered_channel()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "1 (default)".to_string());

            println!("Printer:  {}", connection.device_name().unwrap_or_else(|| "-".to_string()));
            println!("Address:  {}", connection.mac_address().unwrap_or_default());
            println!("Channel:  {}", channel);
            println!("State:    {}", connection.state());
            match &status {
                Ok(bytes) => println!("Status:   {}", hex(bytes)),
                Err(e) => println!("Status:   unavailable ({})", e),
            }

            controller.disconnect()?;
            status.map(|_| ())
        }

        Commands::Print {
            image,
            mac,
            feed_before,
            feed_after,
            delay,
            chunk_size,
            dither,
            invert,
            auto_reconnect,
        } => {
            let bitmap = {
                let source = image::open(&image)
                    .map_err(|e| PrinterError::Image(format!("{}: {}", image.display(), e)))?;
                ImageEncoder::new(PrinterConfig::CTP500)
                    .with_algorithm(dither)
                    .with_invert(invert)
                    .encode_for_printer(&source)?
            };
            let job_config = PrintJobConfig {
                feed_lines_before: feed_before,
                feed_lines_after: feed_after,
                command_delay: delay,
                chunk_size,
            };

            let config = ConnectionConfig {
                auto_reconnect,
                ..ConnectionConfig::default()
            };
            let controller = controller(settings, config);
            connect(&controller, mac.as_deref())?;

            let jobs = PrintJobManager::new(Arc::clone(controller.connection()));
            jobs.set_progress_callback(|progress| {
                eprintln!("[{:>3}%] {}", progress.percentage, progress.message);
            });
            let outcome = Arc::new(std::sync::Mutex::new(None));
            {
                let outcome = Arc::clone(&outcome);
                jobs.set_completion_callback(move |result| {
                    if let Ok(mut slot) = outcome.lock() {
                        *slot = Some(result.clone());
                    }
                });
            }

            info!(image = %image.display(), width = bitmap.width(), height = bitmap.height(), "printing");
            jobs.print_image(bitmap, job_config, true)?;

            let outcome = outcome.lock().ok().and_then(|mut slot| slot.take());
            if let Err(e) = controller.disconnect() {
                warn!(error = %e, "disconnect after print failed");
            }

            match outcome {
                Some(outcome) if outcome.is_success() => {
                    println!("{}", outcome.message());
                    Ok(())
                }
                Some(outcome) => Err(PrinterError::Print(outcome.message())),
                None => Err(PrinterError::Print("Print job did not report a result".to_string())),
            }
        }

        Commands::Device => {
            let controller = controller(settings, ConnectionConfig::default());
            match controller.remembered_device() {
                Some(device) => {
                    println!("Address:  {}", device.mac_address);
                    println!("Name:     {}", device.device_name.as_deref().unwrap_or("-"));
                }
                None => println!("No printer remembered. Run `coreprint scan`, then `coreprint status --mac <MAC>`."),
            }
            Ok(())
        }

        Commands::Forget => {
            controller(settings, ConnectionConfig::default()).forget_device()?;
            println!("Forgot remembered printer");
            Ok(())
        }
    }
}

fn open_settings(path: Option<&Path>) -> Result<Arc<dyn SettingsStore>, PrinterError> {
    let path = path.map(Path::to_path_buf).or_else(JsonFileSettings::default_path);
    match path {
        Some(path) => Ok(Arc::new(JsonFileSettings::open(path)?)),
        None => {
            warn!("no settings location, the printer will not be remembered");
            Ok(Arc::new(MemorySettings::new()))
        }
    }
}

fn controller(settings: Arc<dyn SettingsStore>, config: ConnectionConfig) -> ConnectionController {
    ConnectionController::new(Arc::new(Connection::new(config)), settings)
}

/// Connect to `mac`, or to the remembered printer when none is given.
fn connect(controller: &ConnectionController, mac: Option<&str>) -> Result<(), PrinterError> {
    if let Some(mac) = mac {
        return controller.connect(mac, None);
    }
    let Some(device) = controller.remembered_device() else {
        return Err(PrinterError::Connection(
            "No printer address given and none remembered (use --mac)".to_string(),
        ));
    };
    controller.connect(&device.mac_address, device.device_name.as_deref())
}

fn scan_command(timeout: Duration, json: bool) -> Result<(), PrinterError> {
    match scan::adapter_powered(&Tool::new("bluetoothctl")) {
        Ok(false) => warn!("Bluetooth adapter is powered off; scan results will be empty"),
        Ok(true) => {}
        Err(e) => warn!(error = %e, "could not read adapter state"),
    }

    let devices = Scanner::new().scan(timeout)?;

    if json {
        let text = serde_json::to_string_pretty(&devices).map_err(|e| PrinterError::Io(e.into()))?;
        println!("{}", text);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No devices found");
        return Ok(());
    }
    for device in &devices {
        let marker = if device.is_target_printer { "*" } else { " " };
        println!("{} {}  {}", marker, device.mac_address, device.display_name);
    }
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}

/// Seconds as a non-negative decimal, e.g. `0.1`.
fn parse_delay(value: &str) -> Result<Duration, String> {
    let secs: f64 = value.parse().map_err(|_| format!("`{}` is not a number of seconds", value))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| format!("`{}` must be a finite, non-negative number of seconds", value))
}
