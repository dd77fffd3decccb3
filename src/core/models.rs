use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::device::DevicePath;

/// Self-test status value the drive reports after the host aborted a test.
pub const STATUS_ABORTED_BY_HOST: i64 = 25;

/// Inclusive band of self-test status values meaning "test in progress".
/// The low nibble encodes remaining work in tenths.
pub const STATUS_RUNNING_MIN: i64 = 241;
pub const STATUS_RUNNING_MAX: i64 = 250;

/// True when the raw self-test status code says a test is running.
pub fn is_self_test_running(status_code: i64) -> bool {
    (STATUS_RUNNING_MIN..=STATUS_RUNNING_MAX).contains(&status_code)
}

/// The self-test classes `smartctl -t` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    Short,
    Long,
    Conveyance,
    Offline,
    /// Short test in captive (foreground) mode
    Captive,
}

impl TestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Short => "short",
            Self::Long => "long",
            Self::Conveyance => "conveyance",
            Self::Offline => "offline",
            Self::Captive => "captive",
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "long" | "extended" => Ok(Self::Long),
            "conveyance" => Ok(Self::Conveyance),
            "offline" => Ok(Self::Offline),
            "captive" => Ok(Self::Captive),
            other => Err(format!("unknown test kind: {other}")),
        }
    }
}

/// One poll's worth of self-test status. Consumed once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Raw self-test status value from the drive
    pub status_code: i64,
    /// Human readable status, e.g. "Self-test routine in progress"
    #[serde(default)]
    pub status: String,
    /// Present only while a test is running
    pub remaining_percent: Option<u8>,
    /// Present only once a test has finished
    pub passed: Option<bool>,
}

impl StatusSnapshot {
    pub fn running(remaining_percent: u8) -> Self {
        Self {
            status_code: STATUS_RUNNING_MIN - 1 + i64::from((remaining_percent.min(100) / 10).max(1)),
            status: format!("Self-test routine in progress, {remaining_percent}% remaining"),
            remaining_percent: Some(remaining_percent),
            passed: None,
        }
    }

    pub fn finished(passed: bool) -> Self {
        let (status_code, status) = if passed {
            (0, "Completed without error")
        } else {
            (121, "Completed: read failure")
        };
        Self {
            status_code,
            status: status.to_string(),
            remaining_percent: None,
            passed: Some(passed),
        }
    }

    pub fn aborted() -> Self {
        Self {
            status_code: STATUS_ABORTED_BY_HOST,
            status: "Aborted by host".to_string(),
            remaining_percent: None,
            passed: None,
        }
    }

    /// Status without remaining-percent, pass flag or abort code.
    pub fn unknown(status_code: i64) -> Self {
        Self {
            status_code,
            status: String::new(),
            remaining_percent: None,
            passed: None,
        }
    }

    pub fn is_testing(&self) -> bool {
        is_self_test_running(self.status_code)
    }
}

/// A device reported by `smartctl --scan-open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedDevice {
    pub path: DevicePath,
    pub info_name: String,
    pub device_type: String,
    pub protocol: String,
}

/// Lifecycle of a self-test session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Passed,
    Failed,
    Aborted,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Aborted | Self::Errored
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
            Self::Errored => "errored",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a session, safe to read while the poll task runs.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub device: DevicePath,
    pub kind: TestKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Last emitted progress percentage
    pub progress: Option<u8>,
    pub error: Option<String>,
}

impl SessionInfo {
    pub fn new(device: DevicePath, kind: TestKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            device,
            kind,
            state: SessionState::Pending,
            started_at: Utc::now(),
            ended_at: None,
            progress: None,
            error: None,
        }
    }

    pub fn passed(&self) -> Option<bool> {
        match self.state {
            SessionState::Passed => Some(true),
            SessionState::Failed => Some(false),
            _ => None,
        }
    }
}
