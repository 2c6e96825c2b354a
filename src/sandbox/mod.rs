//! Sandbox abstraction: a remote isolated machine holding one generated project.
//!
//! [`SandboxProvider`] allocates or reconnects to a sandbox by id and hands out a
//! [`SandboxHandle`] exposing the file primitives the tools need. Two providers exist:
//!
//! - [`remote::RemoteSandboxProvider`] talks to the hosted sandbox service
//! - [`local::MemorySandboxProvider`] keeps files in process for development and tests

pub mod local;
pub mod remote;

use crate::config::SandboxConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// The path or the sandbox itself does not exist.
    NotFound(String),
    /// Transport failure, timeout or a 5xx from the sandbox service.
    Unavailable(String),
    /// The service rejected the request.
    Request(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::NotFound(detail) => write!(f, "sandbox resource not found: {detail}"),
            SandboxError::Unavailable(detail) => write!(f, "sandbox unavailable: {detail}"),
            SandboxError::Request(detail) => write!(f, "sandbox request failed: {detail}"),
        }
    }
}

impl std::error::Error for SandboxError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxEntryKind {
    File,
    Dir,
}

impl SandboxEntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxEntryKind::File => "file",
            SandboxEntryKind::Dir => "dir",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxEntry {
    pub name: String,
    pub path: String,
    pub kind: SandboxEntryKind,
}

#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn id(&self) -> &str;

    /// Read a file and return its content as UTF-8 text.
    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Write (create or overwrite) a file at the exact path.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn remove(&self, path: &str) -> Result<(), SandboxError>;

    /// Recursive listing under `path`, at most `depth` levels deep.
    async fn list(&self, path: &str, depth: u32) -> Result<Vec<SandboxEntry>, SandboxError>;

    /// Public hostname routed to `port` inside the sandbox.
    fn host(&self, port: u16) -> String;
}

#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn SandboxHandle>, SandboxError>;

    /// Reattach to an existing sandbox. Never allocates a new one.
    async fn connect(&self, sandbox_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError>;
}

pub fn sandbox_host(sandbox_id: &str, port: u16, domain: &str) -> String {
    format!("{port}-{}.{}", sandbox_id.trim(), domain.trim().trim_matches('.'))
}

/// Public preview URL for the dev server inside a sandbox. Pure function of its inputs.
pub fn preview_url(sandbox_id: &str, port: u16, domain: &str) -> String {
    format!("https://{}", sandbox_host(sandbox_id, port, domain))
}

/// Drops entries living under an ignored directory segment below `root`.
pub fn filter_project_entries(
    entries: Vec<SandboxEntry>,
    root: &str,
    ignore_dirs: &[String],
) -> Vec<SandboxEntry> {
    let root = root.trim_end_matches('/');
    entries
        .into_iter()
        .filter(|entry| {
            let relative = entry.path.strip_prefix(root).unwrap_or(&entry.path);
            !relative
                .split('/')
                .filter(|segment| !segment.is_empty())
                .any(|segment| ignore_dirs.iter().any(|ignored| ignored == segment))
        })
        .collect()
}

pub fn build_sandbox_provider(config: &SandboxConfig) -> Result<Arc<dyn SandboxProvider>> {
    let mode = config.mode.trim().to_ascii_lowercase();
    match mode.as_str() {
        "" | "remote" | "e2b" => Ok(Arc::new(remote::RemoteSandboxProvider::new(config.clone())?)),
        "memory" | "local" => Ok(Arc::new(local::MemorySandboxProvider::new(
            config.domain.clone(),
        ))),
        other => Err(anyhow!("unknown sandbox mode: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, kind: SandboxEntryKind) -> SandboxEntry {
        SandboxEntry {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            kind,
        }
    }

    #[test]
    fn preview_url_is_deterministic() {
        let first = preview_url("sbx123", 3000, "e2b.app");
        assert_eq!(first, "https://3000-sbx123.e2b.app");
        assert_eq!(first, preview_url("sbx123", 3000, "e2b.app"));
    }

    #[test]
    fn ignored_segments_are_filtered_below_root() {
        let ignore = ["node_modules", ".next", "public"]
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>();
        let entries = vec![
            entry("/home/user/pages", SandboxEntryKind::Dir),
            entry("/home/user/pages/index.tsx", SandboxEntryKind::File),
            entry("/home/user/node_modules/react/index.js", SandboxEntryKind::File),
            entry("/home/user/.next", SandboxEntryKind::Dir),
            entry("/home/user/public/favicon.ico", SandboxEntryKind::File),
            entry("/home/user/styles/public.css", SandboxEntryKind::File),
        ];
        let kept = filter_project_entries(entries, "/home/user/", &ignore)
            .into_iter()
            .map(|item| item.path)
            .collect::<Vec<_>>();
        assert_eq!(
            kept,
            vec![
                "/home/user/pages".to_string(),
                "/home/user/pages/index.tsx".to_string(),
                "/home/user/styles/public.css".to_string(),
            ]
        );
    }
}
