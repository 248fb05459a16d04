use std::sync::Arc;

use crate::{adapter::Enhancer, config::ConfigStore, metrics::AppMetrics};

#[derive(Clone)]
pub struct AppState {
    pub enhancer: Arc<Enhancer>,
    pub store: Arc<ConfigStore>,
    pub metrics: Arc<AppMetrics>,
}

impl AppState {
    pub fn new(enhancer: Enhancer, store: ConfigStore) -> Self {
        Self {
            enhancer: Arc::new(enhancer),
            store: Arc::new(store),
            metrics: Arc::new(AppMetrics::new()),
        }
    }
}
