//! Guide camera server.
//!
//! Initializes the camera, then serves the text command protocol on a TCP
//! port while streaming frames and, when guiding, driving the steering unit.
//! Frame metadata is written to stdout as one JSON object per line.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use guider::config::{GuiderOptions, FRAME_SIZE, GUIDE_SIZE};
use guider::metadata::JsonLinesSink;
use guider::server::LineServer;
use guider::{GuideLoop, GuiderError};
use hardware::frame_grabber::SimulatedGrabber;
use hardware::isu::sim::SimulatedIsu;
use hardware::isu::SteeringUnit;
use hardware::raptor::sim::SimulatedRaptor;
use hardware::raptor::transport::SerialPortLink;
use hardware::raptor::{RaptorCamera, SerialLink};
use shared::config_storage::{load_guider_config_file, ConfigStorage, GuiderConfig};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Guide camera command server and fast guiding loop")]
struct Args {
    /// TCP port for the command protocol
    #[arg(long, default_value = "915")]
    port: u16,

    /// Serial device connected to the camera
    #[arg(long, default_value = "/dev/ttyS0")]
    serial_device: String,

    #[arg(long, default_value = "115200")]
    baud: u32,

    /// Per-read serial timeout in milliseconds
    #[arg(long, default_value = "500")]
    serial_timeout_ms: u64,

    /// Guider configuration file (defaults to ~/.cf_config/guider.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use the simulated camera instead of the serial port
    #[arg(long)]
    simulate: bool,

    /// Inject simulated seeing jitter instead of measuring the star
    #[arg(long)]
    simulate_star: bool,

    /// Slew on the loop thread instead of on per-axis workers
    #[arg(long)]
    direct_corrections: bool,

    /// Run without a steering unit
    #[arg(long)]
    no_isu: bool,

    /// Log a timing and position record for every guiding frame
    #[arg(long)]
    verbose: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<GuiderConfig> {
    let config = match path {
        Some(path) => load_guider_config_file(path)
            .with_context(|| format!("Failed to load guider config {}", path.display()))?,
        None => {
            let storage = ConfigStorage::new().context("Failed to initialize config storage")?;
            match storage.load_guider_config()? {
                Some(config) => {
                    info!(
                        "Loaded guider config from {}",
                        storage.guider_config_path().display()
                    );
                    config
                }
                None => {
                    warn!(
                        "No guider config at {}, using defaults",
                        storage.guider_config_path().display()
                    );
                    GuiderConfig::default()
                }
            }
        }
    };
    config
        .validate(FRAME_SIZE, GUIDE_SIZE)
        .context("Invalid guider config")?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let options = GuiderOptions {
        simulate_star: args.simulate_star,
        direct_corrections: args.direct_corrections,
        verbose: args.verbose,
        ..GuiderOptions::default()
    };

    let link: Box<dyn SerialLink> = if args.simulate {
        info!("Using the simulated camera");
        Box::new(SimulatedRaptor::new())
    } else {
        let link = SerialPortLink::open(
            &args.serial_device,
            args.baud,
            Duration::from_millis(args.serial_timeout_ms),
        )
        .with_context(|| format!("Failed to open serial device {}", args.serial_device))?;
        warn!("No frame grabber or steering unit driver is linked in, using the simulated ones");
        Box::new(link)
    };

    let grabber = SimulatedGrabber::new(FRAME_SIZE).with_frame_interval(Duration::from_millis(20));
    let isu: Option<Arc<dyn SteeringUnit>> = if args.no_isu {
        None
    } else {
        Some(Arc::new(SimulatedIsu::new()))
    };

    let mut server = LineServer::bind(("0.0.0.0", args.port))
        .with_context(|| format!("Failed to bind command port {}", args.port))?;

    let sink = JsonLinesSink::new(std::io::stdout());
    let mut guide_loop = GuideLoop::new(
        options,
        &config,
        RaptorCamera::new(link),
        Box::new(grabber),
        isu,
        Box::new(sink),
    );

    match guide_loop.run(&mut server) {
        Ok(()) => {
            info!("Guide server shut down");
            Ok(())
        }
        Err(GuiderError::Fatal(msg)) => {
            error!("Fatal hardware fault: {msg}");
            std::process::exit(2);
        }
        Err(e) => Err(e).context("Guide loop failed"),
    }
}
