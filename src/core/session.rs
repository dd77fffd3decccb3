//! Self-test session: one test run on one drive, from start to outcome.
//!
//! The poll task owns the session state. Everyone else holds a
//! `SelfTestSession` handle, which only reads.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::device::DevicePath;
use super::gateway::DeviceGateway;
use super::models::{STATUS_ABORTED_BY_HOST, SessionInfo, SessionState, StatusSnapshot, TestKind};
use super::progress::{ProgressPublisher, ProgressStream, SessionRecord};
use crate::error::TestError;
use crate::logging::LogThrottle;

/// What a single status sample means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Running { progress: u8 },
    Passed,
    Failed,
    Aborted,
    Indeterminate,
}

/// Interpret one status sample.
///
/// A sample with `remaining_percent` means the test is still going. Without
/// it the test is over, and the pass flag or the abort code decide how.
pub fn interpret(sample: &StatusSnapshot) -> Verdict {
    if let Some(remaining) = sample.remaining_percent {
        return Verdict::Running {
            progress: 100u8.saturating_sub(remaining),
        };
    }

    match sample.passed {
        Some(true) => Verdict::Passed,
        Some(false) => Verdict::Failed,
        None if sample.status_code == STATUS_ABORTED_BY_HOST => Verdict::Aborted,
        None => Verdict::Indeterminate,
    }
}

/// Handle to a self-test session. Cheap to clone; every clone sees the same
/// live state.
#[derive(Debug, Clone)]
pub struct SelfTestSession {
    rx: watch::Receiver<SessionRecord>,
}

impl SelfTestSession {
    /// Start polling a test the drive has already accepted.
    pub(crate) fn spawn(
        gateway: Arc<dyn DeviceGateway>,
        device: DevicePath,
        kind: TestKind,
        poll_interval: Duration,
    ) -> Self {
        let info = SessionInfo::new(device, kind);
        let span = info_span!("session", id = %info.id, device = %info.device, kind = %kind);
        let (publisher, rx) = ProgressPublisher::new(info);
        publisher.set_running();

        tokio::spawn(monitor(gateway, publisher, poll_interval).instrument(span));

        Self { rx }
    }

    pub fn id(&self) -> Uuid {
        self.rx.borrow().info.id
    }

    pub fn device(&self) -> DevicePath {
        self.rx.borrow().info.device.clone()
    }

    pub fn info(&self) -> SessionInfo {
        self.rx.borrow().info.clone()
    }

    pub fn state(&self) -> SessionState {
        self.rx.borrow().info.state
    }

    pub fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    /// Subscribe to the progress feed. Replays everything published so far.
    pub fn subscribe(&self) -> ProgressStream {
        ProgressStream::new(self.rx.clone())
    }

    /// Wait for the test to finish and return the final session info.
    pub async fn wait(&self) -> Result<SessionInfo, TestError> {
        let mut stream = self.subscribe();
        while let Some(item) = stream.next().await {
            item?;
        }
        Ok(self.info())
    }
}

async fn monitor(
    gateway: Arc<dyn DeviceGateway>,
    publisher: ProgressPublisher,
    poll_interval: Duration,
) {
    let device = publisher.info().device;
    let mut throttle = LogThrottle::new(Duration::from_secs(60));

    info!(interval_secs = poll_interval.as_secs_f64(), "Monitoring self-test");

    loop {
        sleep(poll_interval).await;

        let sample = match gateway.query_all(&device).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(error = %e, "Self-test poll failed");
                publisher.fail(SessionState::Errored, e.into());
                return;
            }
        };

        debug!(
            status_code = sample.status_code,
            remaining = ?sample.remaining_percent,
            passed = ?sample.passed,
            "Self-test status sample"
        );

        match interpret(&sample) {
            Verdict::Running { progress } => {
                if publisher.emit(progress) {
                    info!(progress, "Self-test progress");
                } else if throttle.should_log() {
                    debug!(last = ?publisher.last_emitted(), "Self-test still running");
                }
            }
            Verdict::Passed | Verdict::Failed => {
                let passed = sample.passed == Some(true);
                publisher.complete(passed);
                info!(passed, "Self-test finished");
                return;
            }
            Verdict::Aborted => {
                let reason = if sample.status.is_empty() {
                    "Aborted by host".to_string()
                } else {
                    sample.status
                };
                info!("Self-test aborted");
                publisher.fail(SessionState::Aborted, TestError::TestAborted(reason));
                return;
            }
            Verdict::Indeterminate => {
                warn!(status_code = sample.status_code, "Self-test ended without a pass indicator");
                publisher.fail(
                    SessionState::Errored,
                    TestError::IndeterminateOutcome {
                        status_code: sample.status_code,
                        status: sample.status,
                    },
                );
                return;
            }
        }
    }
}
