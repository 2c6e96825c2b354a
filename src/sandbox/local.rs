// In-process sandbox: a path -> content map per sandbox id.
use super::{
    sandbox_host, SandboxEntry, SandboxEntryKind, SandboxError, SandboxHandle, SandboxProvider,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Default)]
struct MemoryFiles {
    files: Mutex<BTreeMap<String, String>>,
}

pub struct MemorySandboxProvider {
    domain: String,
    sandboxes: Mutex<HashMap<String, Arc<MemoryFiles>>>,
    offline: AtomicBool,
}

impl MemorySandboxProvider {
    pub fn new(domain: String) -> Self {
        Self {
            domain,
            sandboxes: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates the service being unreachable for create and connect.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Direct view of a sandbox's files, keyed by absolute path.
    pub fn snapshot(&self, sandbox_id: &str) -> Option<BTreeMap<String, String>> {
        let sandboxes = self.sandboxes.lock();
        sandboxes
            .get(sandbox_id)
            .map(|files| files.files.lock().clone())
    }

    pub fn seed_file(&self, sandbox_id: &str, path: &str, content: &str) -> bool {
        let sandboxes = self.sandboxes.lock();
        let Some(files) = sandboxes.get(sandbox_id) else {
            return false;
        };
        files
            .files
            .lock()
            .insert(normalize_path(path), content.to_string());
        true
    }

    fn handle(&self, sandbox_id: &str, files: Arc<MemoryFiles>) -> Arc<dyn SandboxHandle> {
        Arc::new(MemorySandbox {
            id: sandbox_id.to_string(),
            domain: self.domain.clone(),
            files,
        })
    }

    fn ensure_online(&self) -> Result<(), SandboxError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SandboxError::Unavailable(
                "memory sandbox is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxProvider for MemorySandboxProvider {
    async fn create(&self) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        self.ensure_online()?;
        let sandbox_id = format!("mem{}", Uuid::new_v4().simple());
        let files = Arc::new(MemoryFiles::default());
        self.sandboxes
            .lock()
            .insert(sandbox_id.clone(), files.clone());
        Ok(self.handle(&sandbox_id, files))
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError> {
        self.ensure_online()?;
        let files = self
            .sandboxes
            .lock()
            .get(sandbox_id)
            .cloned()
            .ok_or_else(|| SandboxError::NotFound(format!("sandbox {sandbox_id}")))?;
        Ok(self.handle(sandbox_id, files))
    }
}

struct MemorySandbox {
    id: String,
    domain: String,
    files: Arc<MemoryFiles>,
}

fn normalize_path(path: &str) -> String {
    let segments = path
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>();
    format!("/{}", segments.join("/"))
}

#[async_trait]
impl SandboxHandle for MemorySandbox {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let path = normalize_path(path);
        self.files
            .files
            .lock()
            .get(&path)
            .cloned()
            .ok_or(SandboxError::NotFound(path))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let path = normalize_path(path);
        if path == "/" {
            return Err(SandboxError::Request("cannot write to root".to_string()));
        }
        self.files.files.lock().insert(path, content.to_string());
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), SandboxError> {
        let path = normalize_path(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let mut files = self.files.files.lock();
        let before = files.len();
        files.retain(|key, _| key != &path && !key.starts_with(&prefix));
        if files.len() == before {
            return Err(SandboxError::NotFound(path));
        }
        Ok(())
    }

    async fn list(&self, path: &str, depth: u32) -> Result<Vec<SandboxEntry>, SandboxError> {
        let root = normalize_path(path);
        let prefix = if root == "/" {
            "/".to_string()
        } else {
            format!("{root}/")
        };
        let depth = depth.max(1) as usize;
        let files = self.files.files.lock();
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();
        for key in files.keys() {
            let Some(relative) = key.strip_prefix(&prefix) else {
                continue;
            };
            let segments = relative.split('/').collect::<Vec<_>>();
            for level in 1..segments.len() {
                if level > depth {
                    break;
                }
                dirs.insert(format!("{prefix}{}", segments[..level].join("/")));
            }
            if segments.len() <= depth {
                entries.push(SandboxEntry {
                    name: segments.last().copied().unwrap_or_default().to_string(),
                    path: key.clone(),
                    kind: SandboxEntryKind::File,
                });
            }
        }
        entries.extend(dirs.into_iter().map(|dir| SandboxEntry {
            name: dir.rsplit('/').next().unwrap_or_default().to_string(),
            path: dir,
            kind: SandboxEntryKind::Dir,
        }));
        entries.sort_by(|left, right| left.path.cmp(&right.path));
        Ok(entries)
    }

    fn host(&self, port: u16) -> String {
        sandbox_host(&self.id, port, &self.domain)
    }
}
