use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{DeviceGateway, TestOrchestrator};

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub tests: TestOrchestrator,
}

impl AppContext {
    pub fn new(config: AppConfig, gateway: Arc<dyn DeviceGateway>) -> Self {
        let tests = TestOrchestrator::new(gateway, config.poll_interval());
        Self {
            config: Arc::new(config),
            tests,
        }
    }

    pub fn gateway(&self) -> &Arc<dyn DeviceGateway> {
        self.tests.gateway()
    }
}
