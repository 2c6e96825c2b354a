// Config store: shared, swappable view of the loaded configuration.
use crate::config::{load_config, Config};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<Config>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::from_config(load_config())
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub async fn get(&self) -> Config {
        self.inner.read().await.clone()
    }

    pub async fn update<F>(&self, updater: F) -> Config
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.inner.write().await;
        updater(&mut guard);
        guard.clone()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}
