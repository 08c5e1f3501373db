use std::{fmt, sync::Arc};

use claimbridge_core::ClaimService;

use crate::infra::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ClaimService>,
    pub config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(service: Arc<ClaimService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }

    pub fn service(&self) -> &ClaimService {
        &self.service
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
