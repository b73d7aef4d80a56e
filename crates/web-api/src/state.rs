use std::sync::Arc;

use application::ChatServices;
use config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub services: ChatServices,
    pub cors_origins: Arc<[String]>,
}

impl AppState {
    pub fn new(services: ChatServices, server: &ServerConfig) -> Self {
        Self {
            services,
            cors_origins: server.cors_origins.clone().into(),
        }
    }
}
