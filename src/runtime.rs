// Wiring: CLI options -> actions.json -> catalog -> transport -> controller -> teleop
//
// On exit the controller flushes a final stop frame before the link is closed,
// so the robot never keeps driving after the bridge quits.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::CommandCatalog;
use crate::config::{
    ACTIONS_FILE, BridgeConfig, DEFAULT_BAUDRATE, DEFAULT_FREQUENCY_HZ, DEFAULT_ZENOH_PREFIX,
};
use crate::frame::{LineEnding, hex};
use crate::settings::LinkSettings;
use crate::streaming::StreamingController;
use crate::teleop;
use crate::transport::{LogTransport, SerialTransport, Transport, ZenohTransport};

/// Keyboard bridge streaming commands to a MakeBlock robot
#[derive(Parser, Debug)]
#[command(name = "makeblock-bridge", version)]
pub struct Args {
    /// Key bindings file
    #[arg(long, default_value = ACTIONS_FILE)]
    pub config: PathBuf,

    /// Serial port of the robot or BLE-serial module, e.g. /dev/ttyUSB0
    #[arg(long, value_name = "PORT", conflicts_with_all = ["zenoh", "dry_run"])]
    pub serial: Option<String>,

    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    pub baud: u32,

    /// Key prefix of a remote BLE gateway reached over zenoh
    #[arg(
        long,
        value_name = "PREFIX",
        num_args = 0..=1,
        default_missing_value = DEFAULT_ZENOH_PREFIX,
        conflicts_with = "dry_run"
    )]
    pub zenoh: Option<String>,

    /// Log frames instead of sending them (default when no link is given)
    #[arg(long)]
    pub dry_run: bool,

    /// Direction resend frequency in Hz, clamped to [1, 50]
    #[arg(long, default_value_t = DEFAULT_FREQUENCY_HZ)]
    pub frequency: f64,

    /// Start with the frame header enabled
    #[arg(long)]
    pub header: bool,

    /// NL, CR, BOTH or NONE
    #[arg(long, default_value_t = LineEnding::Both)]
    pub line_ending: LineEnding,
}

/// Pick the transport and the target it connects to
pub fn select_transport(args: &Args) -> (Arc<dyn Transport>, String) {
    if let Some(port) = &args.serial {
        return (
            Arc::new(SerialTransport::with_baudrate(args.baud)),
            port.clone(),
        );
    }
    if let Some(prefix) = &args.zenoh {
        return (Arc::new(ZenohTransport::new()), prefix.clone());
    }
    (Arc::new(LogTransport::new()), "robot".to_string())
}

pub fn link_settings(args: &Args, config: &BridgeConfig) -> LinkSettings {
    LinkSettings::new(config.header_bytes())
        .with_header_on(args.header)
        .with_line_ending(args.line_ending)
        .with_frequency(args.frequency)
}

pub async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    run_with(Args::parse()).await
}

pub async fn run_with(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = BridgeConfig::load(&args.config)?;
    let catalog = CommandCatalog::from_config(&config)?;
    let settings = link_settings(&args, &config);
    info!("Header: [{}]", hex(settings.header()));

    let (transport, target) = select_transport(&args);
    info!("Connecting via {} to {}...", transport.name(), target);
    transport.connect(&target).await?;

    let (controller, mut events) =
        StreamingController::spawn(catalog.clone(), settings, transport.clone());

    let result = teleop::run_teleop(&controller, &catalog, &mut events).await;

    controller.shutdown().await;
    if let Err(e) = transport.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }
    info!("Bye");

    result
}
