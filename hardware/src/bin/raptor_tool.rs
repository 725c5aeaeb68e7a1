//! Command line tool for the Raptor guide camera's serial register protocol.
//!
//! Subcommands:
//! - `raw`: send a hex frame (checksum appended) and print the response
//! - `status`: run the controller status check
//! - `init`: run the full startup sequence
//! - `get`: read a physical quantity
//! - `set`: write a physical quantity
//! - `calibration`: print the factory temperature calibration

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hardware::raptor::checksum::append_checksum;
use hardware::raptor::protocol::{decode_hex, encode_hex};
use hardware::raptor::transport::SerialPortLink;
use hardware::raptor::{CameraSettings, GainMode, RaptorCamera};
use tracing::info;

/// Raptor guide camera register tool
#[derive(Parser, Debug)]
#[command(name = "raptor_tool")]
#[command(about = "Read and write Raptor guide camera registers over serial")]
#[command(version)]
struct Args {
    /// Serial device connected to the camera
    #[arg(long, global = true, default_value = "/dev/ttyS0")]
    serial_device: String,

    /// Baud rate
    #[arg(long, global = true, default_value = "115200")]
    baud: u32,

    /// Per-read timeout in milliseconds
    #[arg(long, global = true, default_value = "500")]
    serial_timeout_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Quantity {
    FrameRate,
    Exposure,
    Tec,
    Temperature,
    DigitalGain,
    GainMode,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a raw frame given as hex bytes, e.g. "53 e0 01 f2 50"
    Raw {
        /// Payload bytes; the XOR checksum is appended
        payload: String,
    },

    /// Check that the controller responds
    Status,

    /// Run the startup sequence with default settings
    Init,

    /// Read a quantity
    Get {
        #[arg(value_enum)]
        quantity: Quantity,
    },

    /// Write a quantity
    Set {
        #[arg(value_enum)]
        quantity: Quantity,

        /// Value in physical units (Hz, ms, degrees C, gain; "low"/"high" for gain-mode)
        value: String,
    },

    /// Print the factory temperature calibration
    Calibration {
        /// Print the calibration block as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let link = SerialPortLink::open(
        &args.serial_device,
        args.baud,
        Duration::from_millis(args.serial_timeout_ms),
    )
    .with_context(|| format!("Failed to open serial port {}", args.serial_device))?;
    let mut camera = RaptorCamera::new(link);

    match args.command {
        Command::Raw { payload } => {
            let frame = append_checksum(&decode_hex(&payload)?);
            info!("Sending {}", encode_hex(&frame));
            let response = camera.protocol_mut().exchange(&frame, None)?;
            println!("{response}");
        }
        Command::Status => {
            camera.check_status()?;
            println!("OK");
        }
        Command::Init => {
            let applied = camera.initialize(&CameraSettings::default())?;
            println!("{applied:#?}");
        }
        Command::Get { quantity } => {
            let text = match quantity {
                Quantity::FrameRate => format!("{:.2} Hz", camera.frame_rate()?),
                Quantity::Exposure => format!("{:.9} ms", camera.exposure_ms()?),
                Quantity::Tec => format!("{:.1} C", camera.tec_setpoint()?),
                Quantity::Temperature => format!("{:.1} C", camera.sensor_temperature()?),
                Quantity::DigitalGain => format!("{:.3}", camera.digital_gain()?),
                Quantity::GainMode => camera.gain_mode()?.to_string(),
            };
            println!("{text}");
        }
        Command::Set { quantity, value } => {
            let number = || {
                value
                    .parse::<f64>()
                    .with_context(|| format!("Not a number: {value}"))
            };
            match quantity {
                Quantity::GainMode => {
                    let mode: GainMode = value
                        .parse()
                        .with_context(|| format!("Unknown gain mode {value}"))?;
                    camera.set_gain_mode(mode)?;
                }
                Quantity::FrameRate => camera.set_frame_rate(number()?)?,
                Quantity::Exposure => camera.set_exposure_ms(number()?)?,
                Quantity::Tec => camera.set_tec_setpoint(number()?)?,
                Quantity::DigitalGain => camera.set_digital_gain(number()?)?,
                Quantity::Temperature => bail!("Sensor temperature is read-only"),
            }
            info!("Set {quantity:?} = {value}");
        }
        Command::Calibration { json } => {
            let data = camera.manufacturing_data()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&data)?);
                return Ok(());
            }
            println!(
                "ADC 0C={} 40C={}  DAC 0C={} 40C={}",
                data.adc.at0, data.adc.at40, data.dac.at0, data.dac.at40
            );
        }
    }

    Ok(())
}
