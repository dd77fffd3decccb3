use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use super::device::DevicePath;
use super::gateway::DeviceGateway;
use super::models::{SessionInfo, TestKind};
use super::session::SelfTestSession;
use crate::error::TestError;

enum Slot {
    /// A start is in flight; the drive has not answered yet.
    Starting,
    Session(SelfTestSession),
}

type Slots = Arc<Mutex<HashMap<DevicePath, Slot>>>;

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<DevicePath, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts and tracks self-tests, at most one active session per device.
#[derive(Clone)]
pub struct TestOrchestrator {
    gateway: Arc<dyn DeviceGateway>,
    poll_interval: Duration,
    slots: Slots,
}

impl TestOrchestrator {
    pub fn new(gateway: Arc<dyn DeviceGateway>, poll_interval: Duration) -> Self {
        Self {
            gateway,
            poll_interval,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn DeviceGateway> {
        &self.gateway
    }

    /// Start a self-test and begin polling it.
    ///
    /// Fails with `CurrentlyTesting` if this orchestrator already runs a test
    /// on the device, if another start for it is in flight, or if the drive
    /// itself reports a test in progress. The existing session is left as is.
    /// A rejected start command is `UnknownTestError` unless the drive then
    /// reports a test in progress. A failed status query, before or after the
    /// start command, is `QueryFailed`.
    pub async fn start(
        &self,
        device: &DevicePath,
        kind: TestKind,
    ) -> Result<SelfTestSession, TestError> {
        let reservation = Reservation::acquire(&self.slots, device)?;

        self.begin(device, kind).await?;

        let session =
            SelfTestSession::spawn(self.gateway.clone(), device.clone(), kind, self.poll_interval);
        info!(
            session_id = %session.id(),
            device = %device,
            kind = %kind,
            "Self-test started"
        );
        reservation.fulfil(session.clone());

        Ok(session)
    }

    async fn begin(&self, device: &DevicePath, kind: TestKind) -> Result<(), TestError> {
        if self.gateway.is_testing(device).await? {
            return Err(TestError::CurrentlyTesting(device.clone()));
        }

        match self.gateway.start_test(device, kind).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(TestError::UnknownTestError {
                device: device.clone(),
                reason: "drive did not accept the test".to_string(),
            }),
            Err(start_err) => {
                warn!(device = %device, kind = %kind, error = %start_err, "Self-test start failed");

                if self.gateway.is_testing(device).await? {
                    Err(TestError::CurrentlyTesting(device.clone()))
                } else {
                    Err(TestError::UnknownTestError {
                        device: device.clone(),
                        reason: start_err.to_string(),
                    })
                }
            }
        }
    }

    /// Ask the drive to abort its self-test.
    ///
    /// Polling keeps going; the session ends once the drive reports the abort.
    pub async fn abort(&self, device: &DevicePath) -> Result<(), TestError> {
        let tracked = self.session(device).is_some_and(|s| s.is_active());
        if !tracked && !self.gateway.is_testing(device).await? {
            return Err(TestError::NoActiveTest(device.clone()));
        }

        if self.gateway.abort_test(device).await? {
            info!(device = %device, "Self-test abort requested");
            Ok(())
        } else {
            Err(TestError::UnknownTestError {
                device: device.clone(),
                reason: "drive refused the abort request".to_string(),
            })
        }
    }

    /// The current or most recent session for a device.
    pub fn session(&self, device: &DevicePath) -> Option<SelfTestSession> {
        match lock(&self.slots).get(device) {
            Some(Slot::Session(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Info for every tracked session, ordered by device path.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let slots = lock(&self.slots);
        let mut infos: Vec<SessionInfo> = slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Session(session) => Some(session.info()),
                Slot::Starting => None,
            })
            .collect();
        infos.sort_by(|a, b| a.device.cmp(&b.device));
        infos
    }

    pub fn active_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| match slot {
                Slot::Starting => true,
                Slot::Session(session) => session.is_active(),
            })
            .count()
    }
}

/// Claim on a device while its start request is in flight. Released on drop
/// unless a session took its place, so a failed or cancelled start never
/// leaves the device blocked.
struct Reservation {
    slots: Slots,
    device: DevicePath,
    fulfilled: bool,
}

impl Reservation {
    fn acquire(slots: &Slots, device: &DevicePath) -> Result<Self, TestError> {
        let mut map = lock(slots);

        let busy = match map.get(device) {
            Some(Slot::Starting) => true,
            Some(Slot::Session(session)) => session.is_active(),
            None => false,
        };
        if busy {
            return Err(TestError::CurrentlyTesting(device.clone()));
        }

        map.insert(device.clone(), Slot::Starting);

        Ok(Self {
            slots: slots.clone(),
            device: device.clone(),
            fulfilled: false,
        })
    }

    fn fulfil(mut self, session: SelfTestSession) {
        lock(&self.slots).insert(self.device.clone(), Slot::Session(session));
        self.fulfilled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.fulfilled {
            return;
        }
        let mut map = lock(&self.slots);
        if matches!(map.get(&self.device), Some(Slot::Starting)) {
            map.remove(&self.device);
        }
    }
}
