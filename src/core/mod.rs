pub mod device;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod session;

pub use device::DevicePath;
pub use gateway::DeviceGateway;
pub use models::{
    ScannedDevice, SessionInfo, SessionState, StatusSnapshot, TestKind, is_self_test_running,
};
pub use orchestrator::TestOrchestrator;
pub use progress::{FeedEnd, ProgressStream};
pub use session::{SelfTestSession, Verdict, interpret};
