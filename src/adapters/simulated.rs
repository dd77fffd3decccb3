use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::core::device::DevicePath;
use crate::core::gateway::DeviceGateway;
use crate::core::models::{ScannedDevice, StatusSnapshot, TestKind};
use crate::error::QueryError;

/// One scripted answer to a status query.
pub type ScriptedPoll = Result<StatusSnapshot, String>;

#[derive(Default)]
struct SimulatedDevice {
    /// What the drive reports when nothing is scripted
    current: Option<StatusSnapshot>,
    /// Answers queued for the test that `start_test` kicks off
    pending_run: Vec<ScriptedPoll>,
    /// Answers being played back to `query_all`
    playing: VecDeque<ScriptedPoll>,
    start_failure: Option<String>,
    queries: usize,
    starts: usize,
    aborts: usize,
}

impl SimulatedDevice {
    fn current(&self) -> StatusSnapshot {
        self.current
            .clone()
            .unwrap_or_else(|| StatusSnapshot::finished(true))
    }
}

type Devices = Arc<Mutex<BTreeMap<DevicePath, SimulatedDevice>>>;

fn lock(devices: &Devices) -> MutexGuard<'_, BTreeMap<DevicePath, SimulatedDevice>> {
    devices.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Controller for a `SimulatedGateway`: adds drives and scripts what they
/// report.
#[derive(Clone)]
pub struct Simulator {
    devices: Devices,
}

impl Simulator {
    /// Add an idle drive whose last test passed.
    pub fn add_device(&self, device: &DevicePath) {
        lock(&self.devices).entry(device.clone()).or_default();
    }

    pub fn remove_device(&self, device: &DevicePath) {
        lock(&self.devices).remove(device);
    }

    /// Set what the drive reports right now, e.g. a test started elsewhere.
    pub fn set_status(&self, device: &DevicePath, status: StatusSnapshot) {
        let mut devices = lock(&self.devices);
        let entry = devices.entry(device.clone()).or_default();
        entry.current = Some(status);
        entry.playing.clear();
    }

    /// Queue the samples the next started test will report, one per query.
    /// The last sample keeps being reported once the script runs out.
    pub fn script_test(&self, device: &DevicePath, samples: Vec<StatusSnapshot>) {
        let run = samples.into_iter().map(Ok).collect();
        self.script_polls(device, run);
    }

    /// Like `script_test`, but individual queries may fail.
    pub fn script_polls(&self, device: &DevicePath, polls: Vec<ScriptedPoll>) {
        lock(&self.devices).entry(device.clone()).or_default().pending_run = polls;
    }

    /// Answer the next queries with `polls`, without waiting for a test to
    /// start. The last answer sticks as with `script_polls`.
    pub fn queue_queries(&self, device: &DevicePath, polls: Vec<ScriptedPoll>) {
        lock(&self.devices).entry(device.clone()).or_default().playing = polls.into();
    }

    /// Make the next `start_test` fail with the given message.
    pub fn fail_next_start(&self, device: &DevicePath, message: &str) {
        lock(&self.devices)
            .entry(device.clone())
            .or_default()
            .start_failure = Some(message.to_string());
    }

    /// A drive that runs a short, passing test in ten steps.
    pub fn add_demo_device(&self, device: &DevicePath) {
        let mut samples: Vec<StatusSnapshot> = (1..=9)
            .rev()
            .map(|tenths| StatusSnapshot::running(tenths * 10))
            .collect();
        samples.push(StatusSnapshot::finished(true));
        self.add_device(device);
        self.script_test(device, samples);
    }

    pub fn query_count(&self, device: &DevicePath) -> usize {
        lock(&self.devices).get(device).map_or(0, |d| d.queries)
    }

    pub fn start_count(&self, device: &DevicePath) -> usize {
        lock(&self.devices).get(device).map_or(0, |d| d.starts)
    }

    pub fn abort_count(&self, device: &DevicePath) -> usize {
        lock(&self.devices).get(device).map_or(0, |d| d.aborts)
    }
}

/// In-memory gateway that plays back scripted drive behavior.
pub struct SimulatedGateway {
    devices: Devices,
}

impl SimulatedGateway {
    pub fn new() -> (Self, Simulator) {
        let devices: Devices = Arc::new(Mutex::new(BTreeMap::new()));
        (
            Self {
                devices: devices.clone(),
            },
            Simulator { devices },
        )
    }
}

fn unavailable(device: &DevicePath) -> QueryError {
    QueryError::Unavailable(device.to_string())
}

#[async_trait]
impl DeviceGateway for SimulatedGateway {
    async fn query_all(&self, device: &DevicePath) -> Result<StatusSnapshot, QueryError> {
        let mut devices = lock(&self.devices);
        let dev = devices.get_mut(device).ok_or_else(|| unavailable(device))?;
        dev.queries += 1;

        // The final scripted answer sticks
        let answer = if dev.playing.len() > 1 {
            dev.playing.pop_front()
        } else {
            dev.playing.front().cloned()
        };

        match answer {
            Some(Ok(sample)) => {
                debug!(device = %device, status_code = sample.status_code, "(Simulated) status");
                dev.current = Some(sample.clone());
                Ok(sample)
            }
            Some(Err(message)) => {
                dev.playing.clear();
                Err(QueryError::CommandFailed {
                    device: device.to_string(),
                    exit_status: 4,
                    messages: vec![message],
                })
            }
            None => Ok(dev.current()),
        }
    }

    async fn start_test(&self, device: &DevicePath, kind: TestKind) -> Result<bool, QueryError> {
        let mut devices = lock(&self.devices);
        let dev = devices.get_mut(device).ok_or_else(|| unavailable(device))?;
        dev.starts += 1;

        if let Some(message) = dev.start_failure.take() {
            return Err(QueryError::CommandFailed {
                device: device.to_string(),
                exit_status: 4,
                messages: vec![message],
            });
        }

        if dev.current().is_testing() {
            return Err(QueryError::CommandFailed {
                device: device.to_string(),
                exit_status: 4,
                messages: vec!["Can't start self-test without aborting current test".to_string()],
            });
        }

        debug!(device = %device, kind = %kind, "(Simulated) self-test started");
        dev.playing = std::mem::take(&mut dev.pending_run).into();
        dev.current = Some(StatusSnapshot::running(100));
        Ok(true)
    }

    async fn abort_test(&self, device: &DevicePath) -> Result<bool, QueryError> {
        let mut devices = lock(&self.devices);
        let dev = devices.get_mut(device).ok_or_else(|| unavailable(device))?;
        dev.aborts += 1;

        if !dev.current().is_testing() {
            return Ok(false);
        }

        dev.playing = VecDeque::from([Ok(StatusSnapshot::aborted())]);
        dev.current = Some(StatusSnapshot::aborted());
        Ok(true)
    }

    async fn scan(&self) -> Result<Vec<ScannedDevice>, QueryError> {
        Ok(lock(&self.devices)
            .keys()
            .map(|path| ScannedDevice {
                path: path.clone(),
                info_name: format!("{path} [SAT]"),
                device_type: "sat".to_string(),
                protocol: "ATA".to_string(),
            })
            .collect())
    }
}
