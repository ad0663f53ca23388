//! # GNSS Locator
//!
//! Command-line front end for the acquisition engine: load configuration,
//! open the modem AT interface on a serial port and run one blocking
//! acquisition, printing the resulting location event.
//!
//! ```bash
//! gnss-locator [device] [config.toml]
//! ```

use anyhow::{Context, Result};
use tracing::info;

use gnss_locator::config::LocationConfig;
use gnss_locator::locator::Locator;
use gnss_locator::modem::serial::SerialModem;
use gnss_locator::modem::{FixedModemDetect, ModemModel, NoCloud};
use gnss_locator::point::LocationPoint;
use gnss_locator::report::build_location_event;
use gnss_locator::AcquireOutcome;

/// Default modem AT-interface device path
const DEFAULT_DEVICE_PATH: &str = "/dev/ttyUSB0";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("gnss-locator v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let device = args
        .next()
        .unwrap_or_else(|| DEFAULT_DEVICE_PATH.to_string());
    let config = match args.next() {
        Some(path) => LocationConfig::load(&path).with_context(|| format!("loading {}", path))?,
        None => LocationConfig::default(),
    };

    let modem = SerialModem::open(&device)?;
    info!("modem AT interface opened at {}", modem.device_path());

    let locator = Locator::new(
        config,
        modem,
        FixedModemDetect(ModemModel::Bg95M5),
        None,
        NoCloud,
    )
    .await?;

    let mut point = LocationPoint::new();

    let outcome = tokio::select! {
        outcome = locator.acquire(&mut point, false) => Some(outcome),

        // Handle Ctrl+C for graceful shutdown
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, shutting down...");
            None
        }
    };

    if let Some(outcome) = outcome {
        info!("acquisition finished: {:?}", outcome);
        if outcome == AcquireOutcome::Fixed {
            let payload = build_location_event(&point, 1)?;
            println!("{}", payload);
        }
    }

    Ok(())
}
