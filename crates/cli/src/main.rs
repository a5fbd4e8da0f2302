//! splmeter CLI: poll a USB HID sound level meter and print readings.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use spl_meter_core::config::Settings;
use spl_meter_core::device::{self, HidMeter};
use spl_meter_core::monitor::{self, PollOptions, Reading, StopToken};
use spl_meter_core::protocol::Range;
use spl_meter_core::session::Session;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "splmeter",
    version,
    about = "Read sound pressure levels from a USB HID sound level meter"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected meters.
    ListDevices {
        /// TOML config file (repeatable; later files override earlier ones).
        #[arg(short, long = "config", value_name = "FILE")]
        config: Vec<PathBuf>,
    },
    /// Configure the meter and print a single reading.
    Read(MeterArgs),
    /// Configure the meter and print readings until interrupted.
    Monitor(MeterArgs),
}

#[derive(Args)]
struct MeterArgs {
    /// TOML config file (repeatable; later files override earlier ones).
    #[arg(short, long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Serial number of the meter to use.
    #[arg(short, long)]
    serial: Option<String>,

    /// Measurement range: 30-130, 30-80, 50-100, 60-110, 80-130.
    #[arg(short, long)]
    range: Option<Range>,

    /// Fast response mode.
    #[arg(long, conflicts_with = "slow")]
    fast: bool,

    /// Slow response mode.
    #[arg(long)]
    slow: bool,

    /// C-weighted measurement.
    #[arg(long, conflicts_with = "dba")]
    dbc: bool,

    /// A-weighted measurement.
    #[arg(long)]
    dba: bool,

    /// Pause between captures in milliseconds.
    #[arg(short, long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Capture response timeout in milliseconds.
    #[arg(short, long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Print one JSON object per reading.
    #[arg(long)]
    json: bool,
}

impl MeterArgs {
    /// Config files first, then command-line overrides.
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_slice()).context("loading configuration")?;

        // An empty serial clears any filter set by a config file.
        if let Some(serial) = &self.serial {
            settings.serial = (!serial.is_empty()).then(|| serial.clone());
        }
        if let Some(range) = self.range {
            settings.range = range;
        }
        if self.fast || self.slow {
            settings.fast = self.fast;
        }
        if self.dbc || self.dba {
            settings.dbc = self.dbc;
        }
        if let Some(ms) = self.interval_ms {
            settings.set_interval_ms(ms)?;
        }
        if let Some(ms) = self.timeout_ms {
            settings.set_timeout_ms(ms)?;
        }
        Ok(settings)
    }
}

/// Locate and configure the meter. Both steps are fatal on failure.
fn open_session(settings: &Settings) -> Result<Session<HidMeter>> {
    let meter = device::find(
        settings.vendor_id,
        settings.product_id,
        settings.serial.as_deref(),
    )
    .with_context(|| {
        format!(
            "device acquisition failed (VID=0x{:04X} PID=0x{:04X})",
            settings.vendor_id, settings.product_id
        )
    })?;
    info!(path = meter.path(), "Meter opened");

    let mut session = Session::new(meter);
    session
        .configure(&settings.config_request())
        .context("configuration failed")?;
    Ok(session)
}

fn install_stop_handler() -> Result<StopToken> {
    let stop = StopToken::new();
    let handler_token = stop.clone();
    ctrlc::set_handler(move || handler_token.stop()).context("installing ctrl-c handler")?;
    Ok(stop)
}

fn print_reading(reading: &Reading, json: bool) {
    if json {
        match serde_json::to_string(&reading.record()) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("Failed to serialize reading: {e}"),
        }
    } else {
        println!("{reading}");
    }
}

fn poll(args: &MeterArgs, max_readings: Option<u64>) -> Result<()> {
    let settings = args.settings()?;
    let stop = install_stop_handler()?;
    let mut session = open_session(&settings)?;

    let opts = PollOptions {
        max_readings,
        ..settings.poll_options()
    };
    let delivered = monitor::run(&mut session, &opts, &stop, |r| {
        print_reading(r, args.json)
    })
    .context("capture failed")?;

    info!(delivered, "Stopped");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ListDevices { config } => {
            let settings = Settings::load(config.as_slice()).context("loading configuration")?;
            let devices = device::enumerate(settings.vendor_id, settings.product_id)?;
            if devices.is_empty() {
                println!(
                    "No meters found (VID: 0x{:04X}, PID: 0x{:04X}).",
                    settings.vendor_id, settings.product_id
                );
                println!("Ensure the meter is connected and you have access to its hidraw node.");
            } else {
                for dev in &devices {
                    println!(
                        "VID: 0x{:04X}, PID: 0x{:04X}, serial: {}, path: {}",
                        dev.vid,
                        dev.pid,
                        dev.serial.as_deref().unwrap_or("(none)"),
                        dev.path
                    );
                }
            }
        }
        Commands::Read(args) => poll(&args, Some(1))?,
        Commands::Monitor(args) => poll(&args, None)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "splmeter",
            "monitor",
            "--range",
            "80-130",
            "--slow",
            "--dbc",
            "--interval-ms",
            "250",
            "--serial",
            "SN1",
        ])
        .unwrap();
        let Commands::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        let s = args.settings().unwrap();
        assert_eq!(s.range, Range::R80To130);
        assert!(!s.fast);
        assert!(s.dbc);
        assert_eq!(s.interval.as_millis(), 250);
        assert_eq!(s.serial.as_deref(), Some("SN1"));
    }

    #[test]
    fn unset_flags_keep_defaults() {
        let cli = Cli::try_parse_from(["splmeter", "read"]).unwrap();
        let Commands::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.settings().unwrap(), Settings::default());
    }

    #[test]
    fn empty_serial_flag_clears_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meter.toml");
        std::fs::write(&path, "serial = \"BENCH-A\"\n").unwrap();
        let config = path.to_str().unwrap();

        let cli = Cli::try_parse_from(["splmeter", "read", "-c", config]).unwrap();
        let Commands::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.settings().unwrap().serial.as_deref(), Some("BENCH-A"));

        let cli =
            Cli::try_parse_from(["splmeter", "read", "-c", config, "--serial", ""]).unwrap();
        let Commands::Read(args) = cli.command else {
            panic!("expected read");
        };
        assert_eq!(args.settings().unwrap().serial, None);
    }

    #[test]
    fn rejects_unknown_range() {
        assert!(Cli::try_parse_from(["splmeter", "read", "--range", "0-200"]).is_err());
    }

    #[test]
    fn rejects_conflicting_speed() {
        assert!(Cli::try_parse_from(["splmeter", "read", "--fast", "--slow"]).is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let cli = Cli::try_parse_from(["splmeter", "monitor", "--interval-ms", "0"]).unwrap();
        let Commands::Monitor(args) = cli.command else {
            panic!("expected monitor");
        };
        assert!(args.settings().is_err());
    }
}
