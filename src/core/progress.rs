//! Progress feed for a running self-test.
//!
//! Each session owns one publisher. The published record holds the session
//! info, every progress value emitted so far and, once the test is over, the
//! terminal signal. It lives in a `watch` channel so reads never block the
//! poll task and subscribers that join late can replay the whole history.

use tokio::sync::watch;

use super::models::{SessionInfo, SessionState};
use crate::error::TestError;

/// How a progress feed was closed.
#[derive(Debug, Clone)]
pub enum FeedEnd {
    /// The drive reported a pass/fail result; see `SessionInfo::state`.
    Completed,
    Failed(TestError),
}

/// Everything a session has published.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub info: SessionInfo,
    pub emitted: Vec<u8>,
    pub end: Option<FeedEnd>,
}

/// Write side of a session's feed. Only the poll task holds one.
pub struct ProgressPublisher {
    tx: watch::Sender<SessionRecord>,
}

impl ProgressPublisher {
    pub fn new(info: SessionInfo) -> (Self, watch::Receiver<SessionRecord>) {
        let (tx, rx) = watch::channel(SessionRecord {
            info,
            emitted: Vec::new(),
            end: None,
        });
        (Self { tx }, rx)
    }

    pub fn info(&self) -> SessionInfo {
        self.tx.borrow().info.clone()
    }

    pub fn last_emitted(&self) -> Option<u8> {
        self.tx.borrow().emitted.last().copied()
    }

    pub fn set_running(&self) {
        self.tx.send_modify(|record| {
            if record.info.state == SessionState::Pending {
                record.info.state = SessionState::Running;
            }
        });
    }

    /// Publish a progress value. Values that do not move progress forward are
    /// dropped, and a feed starts at an implicit 0 so 0% is never published.
    /// Returns whether the value was published.
    pub fn emit(&self, progress: u8) -> bool {
        self.tx.send_if_modified(|record| {
            if record.end.is_some() {
                return false;
            }
            if progress <= record.emitted.last().copied().unwrap_or(0) {
                return false;
            }
            record.emitted.push(progress);
            record.info.progress = Some(progress);
            true
        })
    }

    /// Close the feed normally with a `Passed` or `Failed` outcome.
    pub fn complete(&self, passed: bool) {
        let state = if passed {
            SessionState::Passed
        } else {
            SessionState::Failed
        };
        self.finish(state, FeedEnd::Completed);
    }

    /// Close the feed with an error.
    pub fn fail(&self, state: SessionState, err: TestError) {
        self.finish(state, FeedEnd::Failed(err));
    }

    fn finish(&self, state: SessionState, end: FeedEnd) {
        debug_assert!(state.is_terminal());
        self.tx.send_if_modified(|record| {
            if record.end.is_some() {
                return false;
            }
            record.info.state = state;
            record.info.ended_at = Some(chrono::Utc::now());
            if let FeedEnd::Failed(err) = &end {
                record.info.error = Some(err.to_string());
            }
            record.end = Some(end);
            true
        });
    }
}

/// Read side of a session's feed.
///
/// Yields each published progress value once, in order, starting from the
/// first value ever published. After the last value it yields `None` for a
/// normal completion, or a single `Err` and then `None` for an error.
pub struct ProgressStream {
    rx: watch::Receiver<SessionRecord>,
    cursor: usize,
    done: bool,
}

impl ProgressStream {
    pub fn new(rx: watch::Receiver<SessionRecord>) -> Self {
        Self {
            rx,
            cursor: 0,
            done: false,
        }
    }

    pub async fn next(&mut self) -> Option<Result<u8, TestError>> {
        loop {
            if self.done {
                return None;
            }

            {
                let record = self.rx.borrow_and_update();
                if let Some(&value) = record.emitted.get(self.cursor) {
                    self.cursor += 1;
                    return Some(Ok(value));
                }
                if let Some(end) = &record.end {
                    self.done = true;
                    return match end {
                        FeedEnd::Completed => None,
                        FeedEnd::Failed(err) => Some(Err(err.clone())),
                    };
                }
            }

            if self.rx.changed().await.is_err() {
                // Publisher went away without closing the feed
                self.done = true;
                let device = self.rx.borrow().info.device.clone();
                return Some(Err(TestError::UnknownTestError {
                    device,
                    reason: "session ended without a result".to_string(),
                }));
            }
        }
    }
}
