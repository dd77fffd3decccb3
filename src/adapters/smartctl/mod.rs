//! Gateway backed by the `smartctl` binary from smartmontools.

mod response;
mod version;

use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::core::device::DevicePath;
use crate::core::gateway::DeviceGateway;
use crate::core::models::{ScannedDevice, StatusSnapshot, TestKind};
use crate::error::QueryError;

pub use response::{
    AllResponse, AtaSelfTest, CommandResponse, DeviceInfo, ScanResponse, SelfTestEntry,
    SelfTestStatus, SmartAttribute, SmartctlHeader,
};
pub use version::{MIN_SUPPORTED, SmartctlVersion};

/// Exit status bit 0: command line did not parse.
const EXIT_BAD_COMMAND_LINE: i32 = 1 << 0;
/// Exit status bit 1: device open failed.
const EXIT_DEVICE_OPEN_FAILED: i32 = 1 << 1;
/// Exit status bit 2: a SMART or ATA command to the disk failed.
const EXIT_COMMAND_FAILED: i32 = 1 << 2;

/// Owned settings for a `SmartctlGateway`.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub binary: PathBuf,
    pub command_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("smartctl"),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for GatewayConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            binary: config.smartctl_path.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

/// Which exit status bits count as a failed invocation.
#[derive(Debug, Clone, Copy)]
enum Strictness {
    /// Bit 2 is tolerated: `-a` still prints usable data when one of the
    /// many SMART reads fails.
    Report,
    /// Bit 2 fails the call: the one command we issued was rejected.
    Command,
}

pub struct SmartctlGateway {
    config: GatewayConfig,
}

impl SmartctlGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Build a gateway after checking that the binary runs and is new enough
    /// to speak JSON.
    pub async fn connect(config: GatewayConfig) -> Result<(Self, SmartctlVersion), QueryError> {
        let gateway = Self::new(config);
        let version = gateway.version().await?.ensure_supported()?;
        debug!(version = %version, binary = %gateway.config.binary.display(), "smartctl ready");
        Ok((gateway, version))
    }

    /// Run `smartctl -V` and parse the version line.
    pub async fn version(&self) -> Result<SmartctlVersion, QueryError> {
        let output = self.run(&["-V"]).await?;
        if !output.status.success() {
            return Err(QueryError::CommandFailed {
                device: String::new(),
                exit_status: output.status.code().unwrap_or(-1),
                messages: stderr_lines(&output),
            });
        }
        SmartctlVersion::parse(&String::from_utf8_lossy(&output.stdout))
    }

    /// Full typed `-a` report for general health reporting.
    pub async fn report(&self, device: &DevicePath) -> Result<AllResponse, QueryError> {
        self.run_json(
            device.as_str(),
            &["-j", "-a", device.as_str()],
            Strictness::Report,
        )
        .await
    }

    async fn run(&self, args: &[&str]) -> Result<Output, QueryError> {
        debug!(binary = %self.config.binary.display(), args = ?args, "Running smartctl");

        let mut command = Command::new(&self.config.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        timeout(self.config.command_timeout, command.output())
            .await
            .map_err(|_| QueryError::Timeout(self.config.command_timeout))?
            .map_err(|source| QueryError::Spawn {
                binary: self.config.binary.display().to_string(),
                source,
            })
    }

    async fn run_json<T: DeserializeOwned>(
        &self,
        target: &str,
        args: &[&str],
        strictness: Strictness,
    ) -> Result<T, QueryError> {
        let output = self.run(args).await?;

        let value: serde_json::Value = match serde_json::from_slice(&output.stdout) {
            Ok(value) => value,
            Err(e) if output.status.success() => return Err(e.into()),
            Err(_) => {
                return Err(QueryError::CommandFailed {
                    device: target.to_string(),
                    exit_status: output.status.code().unwrap_or(-1),
                    messages: stderr_lines(&output),
                });
            }
        };

        let header: SmartctlHeader = match value.get("smartctl") {
            Some(header) => serde_json::from_value(header.clone())?,
            None => SmartctlHeader {
                exit_status: output.status.code().unwrap_or(-1),
                ..Default::default()
            },
        };

        check_exit_status(target, &header, strictness)?;

        Ok(serde_json::from_value(value)?)
    }
}

fn check_exit_status(
    target: &str,
    header: &SmartctlHeader,
    strictness: Strictness,
) -> Result<(), QueryError> {
    let status = header.exit_status;

    // Killed by a signal or otherwise without an exit code
    if status < 0 {
        return Err(QueryError::CommandFailed {
            device: target.to_string(),
            exit_status: status,
            messages: header.message_strings(),
        });
    }

    if status & (EXIT_BAD_COMMAND_LINE | EXIT_DEVICE_OPEN_FAILED) != 0 {
        return Err(QueryError::Transport {
            device: target.to_string(),
            exit_status: status,
            messages: header.message_strings(),
        });
    }

    if status & EXIT_COMMAND_FAILED != 0 {
        match strictness {
            Strictness::Command => {
                return Err(QueryError::CommandFailed {
                    device: target.to_string(),
                    exit_status: status,
                    messages: header.message_strings(),
                });
            }
            Strictness::Report => {
                warn!(device = %target, exit_status = status, "smartctl reported a failed SMART command");
            }
        }
    }

    Ok(())
}

/// `-t` arguments for a test kind. smartctl has no `captive` test type;
/// captive mode is the `-C` modifier on a short test.
fn self_test_flags(kind: TestKind) -> &'static [&'static str] {
    match kind {
        TestKind::Short => &["-t", "short"],
        TestKind::Long => &["-t", "long"],
        TestKind::Conveyance => &["-t", "conveyance"],
        TestKind::Offline => &["-t", "offline"],
        TestKind::Captive => &["-C", "-t", "short"],
    }
}

fn stderr_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl DeviceGateway for SmartctlGateway {
    async fn query_all(&self, device: &DevicePath) -> Result<StatusSnapshot, QueryError> {
        self.report(device).await?.status_snapshot()
    }

    async fn start_test(&self, device: &DevicePath, kind: TestKind) -> Result<bool, QueryError> {
        let mut args = vec!["-j"];
        args.extend_from_slice(self_test_flags(kind));
        args.push(device.as_str());

        let _: CommandResponse = self
            .run_json(device.as_str(), &args, Strictness::Command)
            .await?;
        Ok(true)
    }

    async fn abort_test(&self, device: &DevicePath) -> Result<bool, QueryError> {
        let _: CommandResponse = self
            .run_json(
                device.as_str(),
                &["-j", "-X", device.as_str()],
                Strictness::Command,
            )
            .await?;
        Ok(true)
    }

    async fn scan(&self) -> Result<Vec<ScannedDevice>, QueryError> {
        let response: ScanResponse = self
            .run_json("scan", &["-j", "--scan-open"], Strictness::Report)
            .await?;

        let mut devices = Vec::with_capacity(response.devices.len());
        for info in response.devices {
            match DevicePath::parse(&info.name) {
                Ok(path) => devices.push(ScannedDevice {
                    path,
                    info_name: info.info_name,
                    device_type: info.device_type,
                    protocol: info.protocol,
                }),
                Err(e) => warn!(name = %info.name, error = %e, "Skipping scanned device"),
            }
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(exit_status: i32) -> SmartctlHeader {
        SmartctlHeader {
            exit_status,
            ..Default::default()
        }
    }

    #[test]
    fn test_health_bits_are_not_failures() {
        // bit 3: disk failing, bit 6: error log has entries, bit 7: self-test log has errors
        for status in [0, 1 << 3, 1 << 6, 1 << 7, (1 << 6) | (1 << 7)] {
            assert!(check_exit_status("/dev/sda", &header(status), Strictness::Command).is_ok());
        }
    }

    #[test]
    fn test_open_failures_are_transport_errors() {
        for status in [1, 2, 3] {
            assert!(matches!(
                check_exit_status("/dev/sda", &header(status), Strictness::Report),
                Err(QueryError::Transport { .. })
            ));
        }
    }

    #[test]
    fn test_command_bit_depends_on_strictness() {
        assert!(check_exit_status("/dev/sda", &header(4), Strictness::Report).is_ok());
        assert!(matches!(
            check_exit_status("/dev/sda", &header(4), Strictness::Command),
            Err(QueryError::CommandFailed { exit_status: 4, .. })
        ));
        assert!(matches!(
            check_exit_status("/dev/sda", &header(-1), Strictness::Report),
            Err(QueryError::CommandFailed { .. })
        ));
    }

    #[test]
    fn test_self_test_flags() {
        assert_eq!(self_test_flags(TestKind::Long), ["-t", "long"]);
        assert_eq!(self_test_flags(TestKind::Captive), ["-C", "-t", "short"]);
    }

    #[test]
    fn test_gateway_config_from_app_config() {
        let app = AppConfig {
            smartctl_path: PathBuf::from("/usr/sbin/smartctl"),
            command_timeout_secs: 7,
            ..AppConfig::default()
        };
        let config = GatewayConfig::from(&app);
        assert_eq!(config.binary, PathBuf::from("/usr/sbin/smartctl"));
        assert_eq!(config.command_timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_fixture_maps_to_snapshot() {
        let response: AllResponse = serde_json::from_str(response::fixtures::ALL_RUNNING).unwrap();
        assert_eq!(response.status_snapshot().unwrap().remaining_percent, Some(90));
    }
}
