use super::*;

/// Per-project exclusive lease; at most one run mutates a project at a time.
#[derive(Clone)]
pub(super) struct ProjectLimiter {
    storage: Arc<dyn StorageBackend>,
    lease_ttl_s: f64,
    heartbeat_s: f64,
}

/// A held lease. The heartbeat keeps it alive until [`LeaseGuard::release`].
pub(super) struct LeaseGuard {
    storage: Arc<dyn StorageBackend>,
    project_id: String,
    token: String,
    heartbeat: Option<JoinHandle<()>>,
}

impl ProjectLimiter {
    pub(super) fn new(storage: Arc<dyn StorageBackend>, config: &GenerationConfig) -> Self {
        let lease_ttl_s = config.lease_ttl_s.max(MIN_LEASE_TTL_S);
        // Renew well before expiry even when the heartbeat is misconfigured.
        let heartbeat_s = config
            .lease_heartbeat_s
            .clamp(MIN_LEASE_HEARTBEAT_S, lease_ttl_s / 2.0);
        Self {
            storage,
            lease_ttl_s,
            heartbeat_s,
        }
    }

    /// Returns `None` when another run holds the project.
    pub(super) async fn acquire(&self, project_id: &str) -> Result<Option<LeaseGuard>> {
        let token = Uuid::new_v4().simple().to_string();
        let status = {
            let storage = self.storage.clone();
            let project_id = project_id.to_string();
            let token = token.clone();
            let ttl = self.lease_ttl_s;
            tokio::task::spawn_blocking(move || {
                storage.try_acquire_project_lease(&project_id, &token, ttl)
            })
            .await
            .map_err(|err| anyhow!("project lease join error: {err}"))??
        };
        if status == ProjectLeaseStatus::Busy {
            return Ok(None);
        }
        let heartbeat = self.spawn_heartbeat(project_id.to_string(), token.clone());
        Ok(Some(LeaseGuard {
            storage: self.storage.clone(),
            project_id: project_id.to_string(),
            token,
            heartbeat: Some(heartbeat),
        }))
    }

    fn spawn_heartbeat(&self, project_id: String, token: String) -> JoinHandle<()> {
        let storage = self.storage.clone();
        let ttl = self.lease_ttl_s;
        let interval = Duration::from_secs_f64(self.heartbeat_s);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let storage = storage.clone();
                let project_id = project_id.clone();
                let token = token.clone();
                let touched = tokio::task::spawn_blocking(move || {
                    storage.touch_project_lease(&project_id, &token, ttl)
                })
                .await;
                match touched {
                    Ok(Ok(true)) => {}
                    Ok(Ok(false)) => {
                        warn!("project lease lost before run finished");
                        break;
                    }
                    Ok(Err(err)) => warn!("project lease heartbeat failed: {err}"),
                    Err(err) => warn!("project lease heartbeat join error: {err}"),
                }
            }
        })
    }
}

impl LeaseGuard {
    pub(super) async fn release(mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        let storage = self.storage.clone();
        let project_id = self.project_id.clone();
        let token = self.token.clone();
        let released = tokio::task::spawn_blocking(move || {
            storage.release_project_lease(&project_id, &token)
        })
        .await;
        match released {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(project_id = %self.project_id, "release project lease failed: {err}"),
            Err(err) => warn!(project_id = %self.project_id, "release project lease join error: {err}"),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        // A cancelled run stops renewing; the lease then lapses after its TTL.
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    fn limiter(dir: &tempfile::TempDir) -> ProjectLimiter {
        let storage = SqliteStorage::new(dir.path().join("lease.db").to_string_lossy().to_string());
        ProjectLimiter::new(Arc::new(storage), &GenerationConfig::default())
    }

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let limiter = limiter(&dir);
        let guard = limiter.acquire("p1").await.expect("acquire").expect("held");
        assert!(limiter.acquire("p1").await.expect("acquire again").is_none());
        assert!(limiter.acquire("p2").await.expect("other project").is_some());
        guard.release().await;
        assert!(limiter.acquire("p1").await.expect("after release").is_some());
    }

    #[test]
    fn heartbeat_is_clamped_below_ttl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = SqliteStorage::new(dir.path().join("c.db").to_string_lossy().to_string());
        let config = GenerationConfig {
            lease_ttl_s: 20.0,
            lease_heartbeat_s: 60.0,
            ..GenerationConfig::default()
        };
        let limiter = ProjectLimiter::new(Arc::new(storage), &config);
        assert_eq!(limiter.heartbeat_s, 10.0);
    }
}
