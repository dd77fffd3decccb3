use async_trait::async_trait;

use super::device::DevicePath;
use super::models::{ScannedDevice, StatusSnapshot, TestKind};
use crate::error::QueryError;

/// Boundary to whatever actually talks to the drive.
///
/// The self-test machinery only ever goes through this trait, so the
/// process-backed `smartctl` gateway and the simulated one are
/// interchangeable.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Full status query (`smartctl -j -a`), reduced to the self-test status.
    async fn query_all(&self, device: &DevicePath) -> Result<StatusSnapshot, QueryError>;

    /// Ask the drive to start a self-test (`smartctl -j -t <kind>`).
    ///
    /// An error here does not by itself say why the start failed; callers
    /// check `is_testing` to tell "already testing" apart from anything else.
    async fn start_test(&self, device: &DevicePath, kind: TestKind) -> Result<bool, QueryError>;

    /// Whether the drive reports a self-test in progress.
    async fn is_testing(&self, device: &DevicePath) -> Result<bool, QueryError> {
        Ok(self.query_all(device).await?.is_testing())
    }

    /// Abort the running self-test (`smartctl -j -X`).
    async fn abort_test(&self, device: &DevicePath) -> Result<bool, QueryError>;

    /// Enumerate devices that can be opened (`smartctl -j --scan-open`).
    async fn scan(&self) -> Result<Vec<ScannedDevice>, QueryError>;
}
