use crate::config::AppConfig;
use crate::options::OptionsService;
use snapshot_sync_engine::Engine;
use std::sync::Arc;

pub struct AppState {
    pub engine: Arc<Engine>,
    pub options: Arc<OptionsService>,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, options: Arc<OptionsService>, config: AppConfig) -> Self {
        Self {
            engine,
            options,
            config,
        }
    }
}
