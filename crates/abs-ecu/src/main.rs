//! ABS ECU
//!
//! Runs the wheel-speed supervisor on simulated sensors and serves UDS
//! requests over ISO-TP.
//!
//! # Usage
//!
//! ```bash
//! ./abs-ecu --interface vcan0
//! ./abs-ecu --config config/abs-ecu.toml
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abs_ecu::{AbsController, EcuConfig, FileStore, SimulatedSensors};
use anyhow::Result;
use clap::Parser;
use socketcan::ExtendedId;
use socketcan_isotp::IsoTpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "abs-ecu")]
#[command(about = "ABS wheel-speed supervisor with UDS diagnostics")]
struct Args {
    /// Configuration file path (TOML, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    config: Option<String>,

    /// CAN interface name
    #[arg(short, long)]
    interface: Option<String>,

    /// ECU's receive CAN ID (tester sends to this)
    #[arg(long)]
    rx_id: Option<String>,

    /// ECU's transmit CAN ID (ECU sends from this)
    #[arg(long)]
    tx_id: Option<String>,

    /// Simulated vehicle speed, km/h
    #[arg(long)]
    speed: Option<f32>,

    /// Calibration block directory
    #[arg(long)]
    storage: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        "abs_ecu=debug,abs_core=debug,abs_uds=debug"
    } else {
        "abs_ecu=info,abs_core=info,abs_uds=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if args.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &args.config {
        Some(path) if path.ends_with(".yaml") || path.ends_with(".yml") => {
            info!("Loading config from: {}", path);
            EcuConfig::load_yaml(path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        Some(path) => {
            info!("Loading config from: {}", path);
            EcuConfig::load(path).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?
        }
        None => EcuConfig::default(),
    };
    if let Some(interface) = args.interface {
        config.transport.interface = interface;
    }
    if let Some(rx_id) = args.rx_id {
        config.transport.rx_id = rx_id;
    }
    if let Some(tx_id) = args.tx_id {
        config.transport.tx_id = tx_id;
    }
    if let Some(speed) = args.speed {
        config.simulation.speed_kmh = speed;
    }
    if let Some(storage) = args.storage {
        config.storage.directory = storage.into();
    }

    info!("Starting ABS ECU");
    info!(
        interface = %config.transport.interface,
        rx_id = %config.transport.rx_id,
        tx_id = %config.transport.tx_id,
        storage = %config.storage.directory.display()
    );

    let rx_id = parse_can_id(&config.transport.rx_id)?;
    let tx_id = parse_can_id(&config.transport.tx_id)?;

    let store = FileStore::new(config.storage.directory.clone());
    let sensors = SimulatedSensors::new(config.simulation.clone());
    let controller = Arc::new(AbsController::new(
        &config,
        Box::new(store),
        Box::new(sensors),
    ));

    let server = EcuServer::new(&config, rx_id, tx_id, controller);

    info!("ABS ECU ready - waiting for requests");
    info!("Press Ctrl+C to stop");

    server.run().await?;

    info!("ABS ECU stopped");
    Ok(())
}

fn parse_can_id(s: &str) -> Result<u32> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| anyhow::anyhow!("Invalid CAN ID: {}", e))
}

struct EcuServer {
    interface: String,
    rx_id: u32,
    tx_id: u32,
    detection_cycle: Duration,
    calibration_cycle: Duration,
    status_interval: Option<Duration>,
    controller: Arc<AbsController>,
    running: Arc<AtomicBool>,
}

impl EcuServer {
    fn new(config: &EcuConfig, rx_id: u32, tx_id: u32, controller: Arc<AbsController>) -> Self {
        let status_ms = config.cycles.status_interval_ms;
        Self {
            interface: config.transport.interface.clone(),
            rx_id,
            tx_id,
            detection_cycle: Duration::from_millis(u64::from(config.detection.cycle_ms)),
            calibration_cycle: Duration::from_millis(config.cycles.calibration_cycle_ms),
            status_interval: (status_ms > 0).then(|| Duration::from_millis(status_ms)),
            controller,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    async fn run(&self) -> Result<()> {
        let rx_id = ExtendedId::new(self.rx_id)
            .ok_or_else(|| anyhow::anyhow!("Invalid extended CAN ID: 0x{:X}", self.rx_id))?;
        let tx_id = ExtendedId::new(self.tx_id)
            .ok_or_else(|| anyhow::anyhow!("Invalid extended CAN ID: 0x{:X}", self.tx_id))?;

        let mut socket = IsoTpSocket::open(&self.interface, rx_id, tx_id)
            .map_err(|e| anyhow::anyhow!("Failed to open ISO-TP socket: {}", e))?;
        socket.set_nonblocking(true)?;

        let running = self.running.clone();
        let controller = self.controller.clone();

        // Detection cycle: sensors -> processor -> detector -> DTCs
        let ctrl = controller.clone();
        let run = running.clone();
        let period = self.detection_cycle;
        let detection_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while run.load(Ordering::SeqCst) {
                interval.tick().await;
                ctrl.detection_step(ctrl.now_ms());
            }
        });

        // Calibration cycle: sessions and auto-check
        let ctrl = controller.clone();
        let run = running.clone();
        let period = self.calibration_cycle;
        let calibration_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            while run.load(Ordering::SeqCst) {
                interval.tick().await;
                ctrl.calibration_step(ctrl.now_ms());
            }
        });

        // Periodic status line
        let ctrl = controller.clone();
        let run = running.clone();
        let status_interval = self.status_interval;
        let status_handle = tokio::spawn(async move {
            let Some(period) = status_interval else {
                return;
            };
            let mut interval = tokio::time::interval(period);
            while run.load(Ordering::SeqCst) {
                interval.tick().await;
                match serde_json::to_string(&ctrl.snapshot(ctrl.now_ms())) {
                    Ok(json) => debug!(status = %json, "Status"),
                    Err(e) => warn!(error = %e, "Status snapshot not serializable"),
                }
            }
        });

        // Main request handling loop
        let main_handle: JoinHandle<Result<()>> = tokio::task::spawn_blocking(move || {
            while running.load(Ordering::SeqCst) {
                match socket.read() {
                    Ok(data) if !data.is_empty() => {
                        let request = data.to_vec();
                        debug!(request = %hex::encode(&request), "Received UDS request");

                        let response = controller.handle_request(&request, controller.now_ms());

                        if !response.is_empty() {
                            debug!(response = %hex::encode(&response), "Sending UDS response");
                            if let Err(e) = socket.write(&response) {
                                error!(?e, "Failed to send response");
                            }
                        }
                    }
                    Ok(_) => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        error!(?e, "Socket read error");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }

            Ok(())
        });

        // Wait for Ctrl+C
        tokio::signal::ctrl_c().await?;
        info!("Shutting down...");

        self.running.store(false, Ordering::SeqCst);

        let _ = tokio::time::timeout(Duration::from_secs(2), detection_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), calibration_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), status_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), main_handle).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_can_id() {
        assert_eq!(parse_can_id("0x18DA28F1").unwrap(), 0x18DA28F1);
        assert_eq!(parse_can_id(" 7E0 ").unwrap(), 0x7E0);
        assert!(parse_can_id("0xZZ").is_err());
    }
}
