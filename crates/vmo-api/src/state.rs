use vmo_infra::VmOrchestrator;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: VmOrchestrator,
    pub config: AppConfig,
}
