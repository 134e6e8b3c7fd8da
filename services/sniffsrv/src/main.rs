//! Modbus RTU Sniffer Service (sniffsrv)
//!
//! Listens on an RS-485 line without transmitting, decodes register reads
//! and writes from the traffic between the master and its slaves, and logs
//! the configured sensors as their values change.

mod bootstrap;
mod logging;
mod sensors;
mod shutdown;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use voltage_sniffer::{open_serial, DataPublisher, FrameDetector, ModbusSniffer};

use crate::bootstrap::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init(
        &args.log_level,
        args.log_dir.as_deref(),
        args.log_json,
        !args.no_color,
    )?;

    let config = bootstrap::load_config(&args)?;
    if args.validate {
        println!("{}", bootstrap::render_config(&config)?);
        info!("Configuration valid");
        return Ok(());
    }

    info!(
        "sniffsrv {}: {} @{}baud, {} sensors",
        env!("CARGO_PKG_VERSION"),
        config.serial.port,
        config.serial.baud_rate,
        config.sensors.len()
    );

    let publisher = Arc::new(DataPublisher::new(
        config.publisher.log_not_configured_data,
    ));
    let subscribed = sensors::subscribe(&publisher, &config.sensors)?;

    let source = open_serial(&config.serial).context("Failed to open serial port")?;
    let detector = match config.timing.inter_byte_gap() {
        Some(gap) => FrameDetector::with_gap(source, gap),
        None => FrameDetector::new(source),
    };
    let mut sniffer = ModbusSniffer::new(detector, publisher, config.timing.timeouts());

    let cancel = CancellationToken::new();
    let signal_watcher = shutdown::cancel_on_shutdown(cancel.clone());
    let loggers = sensors::spawn_loggers(subscribed, cancel.clone());

    let outcome = sniffer.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = signal_watcher.await {
        error!("Signal task: {}", e);
    }
    for logger in loggers {
        if let Err(e) = logger.await {
            error!("Sensor task: {}", e);
        }
    }

    let stats = sniffer.stats();
    let detector_stats = sniffer.detector_stats();
    info!(
        "Frames {} (CRC errors {}, timeouts {}, unsupported {}), pairs {}, observations {}, lost responses {}",
        detector_stats.frames,
        detector_stats.crc_errors,
        detector_stats.timeouts,
        detector_stats.unsupported,
        stats.pairs,
        stats.observations,
        stats.lost_responses
    );

    if let Err(e) = outcome {
        error!("Sniffer stopped: {}", e);
        let reason = if e.is_link_lost() {
            "Bus link lost"
        } else {
            "Sniffer failed"
        };
        return Err(e).context(reason);
    }
    info!("sniffsrv stopped");
    Ok(())
}
