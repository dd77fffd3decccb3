//! Typed views of `smartctl -j` output.
//!
//! Only the fields this crate reads are modeled; everything else in the JSON
//! is ignored. Most fields are optional because drives and smartctl builds
//! disagree on what they report.

use serde::Deserialize;

use crate::core::models::{StatusSnapshot, TestKind};
use crate::error::QueryError;

/// The `smartctl` block present in every JSON response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SmartctlHeader {
    #[serde(default)]
    pub version: Vec<u32>,
    pub svn_revision: Option<String>,
    pub platform_info: Option<String>,
    #[serde(default)]
    pub argv: Vec<String>,
    #[serde(default)]
    pub messages: Vec<SmartMessage>,
    pub exit_status: i32,
}

impl SmartctlHeader {
    pub fn message_strings(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| m.string.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartMessage {
    pub string: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    #[serde(default)]
    pub info_name: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    #[serde(default)]
    pub protocol: String,
}

/// Response to commands that only report success (`-t`, `-X`).
#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    pub smartctl: SmartctlHeader,
}

/// Response to `smartctl -j --scan-open`.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanResponse {
    pub smartctl: SmartctlHeader,
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

/// Response to `smartctl -j -a`.
#[derive(Debug, Clone, Deserialize)]
pub struct AllResponse {
    pub smartctl: SmartctlHeader,
    pub device: Option<DeviceInfo>,
    pub model_family: Option<String>,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
    pub user_capacity: Option<Capacity>,
    pub rotation_rate: Option<u32>,
    pub smart_status: Option<SmartStatus>,
    pub ata_smart_data: Option<AtaSmartData>,
    pub power_on_time: Option<PowerOnTime>,
    pub power_cycle_count: Option<u64>,
    pub temperature: Option<Temperature>,
    pub ata_smart_attributes: Option<AttributeTable>,
    pub ata_smart_self_test_log: Option<SelfTestLog>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Capacity {
    pub blocks: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartStatus {
    pub passed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtaSmartData {
    pub self_test: Option<AtaSelfTest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AtaSelfTest {
    pub status: SelfTestStatus,
    pub polling_minutes: Option<PollingMinutes>,
}

/// Self-test status as found both in `ata_smart_data` and in log entries.
#[derive(Debug, Clone, Deserialize)]
pub struct SelfTestStatus {
    /// Raw status byte, the "exit code" of the self-test
    pub value: i64,
    #[serde(default)]
    pub string: String,
    /// Only present while a test runs
    pub remaining_percent: Option<u8>,
    /// Only present once a test completed
    pub passed: Option<bool>,
}

impl From<&SelfTestStatus> for StatusSnapshot {
    fn from(status: &SelfTestStatus) -> Self {
        StatusSnapshot {
            status_code: status.value,
            status: status.string.clone(),
            remaining_percent: status.remaining_percent,
            passed: status.passed,
        }
    }
}

/// Expected test durations in minutes.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingMinutes {
    pub short: Option<u32>,
    pub extended: Option<u32>,
    pub conveyance: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PowerOnTime {
    pub hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Temperature {
    pub current: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributeTable {
    #[serde(default)]
    pub table: Vec<SmartAttribute>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartAttribute {
    pub id: u16,
    pub name: String,
    pub value: u32,
    pub worst: u32,
    pub thresh: u32,
    #[serde(default)]
    pub when_failed: String,
    pub raw: RawValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawValue {
    pub value: u64,
    #[serde(default)]
    pub string: String,
}

/// Drives report either a standard or an extended log, rarely both.
#[derive(Debug, Clone, Deserialize)]
pub struct SelfTestLog {
    pub standard: Option<SelfTestLogTable>,
    pub extended: Option<SelfTestLogTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelfTestLogTable {
    #[serde(default)]
    pub table: Vec<SelfTestEntry>,
    pub count: Option<u32>,
    pub error_count_total: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelfTestEntry {
    #[serde(rename = "type")]
    pub test_type: ValueString,
    pub status: SelfTestStatus,
    pub lifetime_hours: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValueString {
    pub value: i64,
    #[serde(default)]
    pub string: String,
}

impl AllResponse {
    /// The current self-test status, reduced to what the poll loop needs.
    pub fn status_snapshot(&self) -> Result<StatusSnapshot, QueryError> {
        self.ata_smart_data
            .as_ref()
            .and_then(|data| data.self_test.as_ref())
            .map(|test| StatusSnapshot::from(&test.status))
            .ok_or_else(|| {
                QueryError::Parse("response has no ata_smart_data.self_test block".to_string())
            })
    }

    /// How long the drive says a test of this kind takes. Captive tests run
    /// the short routine.
    pub fn expected_minutes(&self, kind: TestKind) -> Option<u32> {
        let minutes = self
            .ata_smart_data
            .as_ref()?
            .self_test
            .as_ref()?
            .polling_minutes
            .as_ref()?;
        match kind {
            TestKind::Short | TestKind::Captive => minutes.short,
            TestKind::Long => minutes.extended,
            TestKind::Conveyance => minutes.conveyance,
            TestKind::Offline => None,
        }
    }

    /// Overall SMART health verdict, if the drive reported one.
    pub fn health_passed(&self) -> Option<bool> {
        self.smart_status.as_ref().map(|s| s.passed)
    }

    pub fn power_on_hours(&self) -> Option<u64> {
        self.power_on_time.as_ref().and_then(|p| p.hours)
    }

    pub fn temperature_celsius(&self) -> Option<i64> {
        self.temperature.as_ref().and_then(|t| t.current)
    }

    pub fn attributes(&self) -> &[SmartAttribute] {
        self.ata_smart_attributes
            .as_ref()
            .map(|a| a.table.as_slice())
            .unwrap_or_default()
    }

    /// Entries of whichever self-test log the drive reported, newest first.
    pub fn self_test_log(&self) -> &[SelfTestEntry] {
        let Some(log) = &self.ata_smart_self_test_log else {
            return &[];
        };
        log.extended
            .as_ref()
            .or(log.standard.as_ref())
            .map(|t| t.table.as_slice())
            .unwrap_or_default()
    }
}
