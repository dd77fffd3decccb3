use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::core::device::DevicePath;
use crate::core::gateway::DeviceGateway;
use crate::error::QueryError;

pub mod simulated;
pub mod smartctl;

pub use simulated::{ScriptedPoll, SimulatedGateway, Simulator};
pub use smartctl::{GatewayConfig, SmartctlGateway, SmartctlVersion};

/// Drives the simulated gateway exposes in `--simulation` mode.
pub const DEMO_DEVICES: &[&str] = &["/dev/sda", "/dev/sdb"];

/// Build the gateway the configuration asks for.
///
/// The real gateway is probed with `smartctl -V` first so an old or missing
/// binary fails here rather than on the first query.
pub async fn get_gateway(config: &AppConfig) -> Result<Arc<dyn DeviceGateway>, QueryError> {
    if config.simulation {
        let (gateway, simulator) = SimulatedGateway::new();
        for raw in DEMO_DEVICES {
            if let Ok(device) = DevicePath::parse(raw) {
                simulator.add_demo_device(&device);
            }
        }
        info!(devices = DEMO_DEVICES.len(), "Using simulated gateway");
        return Ok(Arc::new(gateway));
    }

    let (gateway, version) = SmartctlGateway::connect(GatewayConfig::from(config)).await?;
    info!(version = %version, binary = %config.smartctl_path.display(), "Using smartctl gateway");
    Ok(Arc::new(gateway))
}
