//! Error types surfaced by the gateway and the self-test machinery.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::device::DevicePath;

/// Failure of a single query against the device gateway.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("smartctl did not answer within {0:?}")]
    Timeout(Duration),

    /// Exit status bits 0/1: bad command line or the device could not be opened.
    #[error("smartctl could not reach {device} (exit status {exit_status}){}", format_messages(.messages))]
    Transport {
        device: String,
        exit_status: i32,
        messages: Vec<String>,
    },

    /// Exit status bit 2: a SMART or ATA command to the disk failed.
    #[error("smartctl command failed on {device} (exit status {exit_status}){}", format_messages(.messages))]
    CommandFailed {
        device: String,
        exit_status: i32,
        messages: Vec<String>,
    },

    #[error("unparseable smartctl output: {0}")]
    Parse(String),

    #[error("smartctl {major}.{minor} is not supported, version 7.0 or newer is required")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("device {0} is not available")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Parse(err.to_string())
    }
}

fn format_messages(messages: &[String]) -> String {
    if messages.is_empty() {
        String::new()
    } else {
        format!(": {}", messages.join("; "))
    }
}

/// Errors from starting, polling or aborting a self-test.
///
/// Cloneable so that the terminal signal of a progress feed can be handed to
/// every subscriber.
#[derive(Debug, Clone, Error)]
pub enum TestError {
    /// The device is already running a self-test. Callers may attach to the
    /// existing session instead of retrying.
    #[error("{0} is currently testing, can not start a new test")]
    CurrentlyTesting(DevicePath),

    #[error("unknown test error on {device}: {reason}")]
    UnknownTestError { device: DevicePath, reason: String },

    #[error("test was aborted: {0}")]
    TestAborted(String),

    #[error("test ended without a pass indicator (status {status_code}: {status})")]
    IndeterminateOutcome { status_code: i64, status: String },

    #[error("no self-test is running on {0}")]
    NoActiveTest(DevicePath),

    #[error("device query failed: {0}")]
    QueryFailed(#[source] Arc<QueryError>),
}

impl From<QueryError> for TestError {
    fn from(err: QueryError) -> Self {
        TestError::QueryFailed(Arc::new(err))
    }
}

/// A device path that was rejected during sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("device path is empty")]
    Empty,

    #[error("device path {path:?} contains forbidden character {ch:?}")]
    ForbiddenCharacter { path: String, ch: char },

    #[error("device path {0:?} must not contain '..'")]
    ParentComponent(String),

    #[error("device path {0:?} is outside /dev")]
    OutsideDev(String),
}
