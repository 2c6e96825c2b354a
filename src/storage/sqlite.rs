// SQLite storage: projects, ordered conversation entries and run leases in one file.
use crate::schemas::{EntryKind, FileTool, Originator, ProjectStatus};
use crate::storage::{
    ConversationEntryRecord, NewConversationEntry, ProjectLeaseRecord, ProjectLeaseStatus,
    ProjectRecord, StorageBackend, StorageError,
};
use anyhow::{anyhow, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

const ENTRY_COLUMNS: &str =
    "id, entry_id, project_id, originator, kind, content, tool, created_at";
const PROJECT_COLUMNS: &str =
    "project_id, title, sandbox_id, status, created_at, updated_at, status_updated_at";

pub struct SqliteStorage {
    db_path: PathBuf,
    initialized: AtomicBool,
    init_guard: Mutex<()>,
}

struct RawEntry {
    seq: i64,
    entry_id: String,
    project_id: String,
    originator: String,
    kind: String,
    content: String,
    tool: Option<String>,
    created_at: f64,
}

impl SqliteStorage {
    pub fn new(db_path: String) -> Self {
        let path = if db_path.trim().is_empty() {
            PathBuf::from("./data/sandcastle.db")
        } else {
            PathBuf::from(db_path)
        };
        Self {
            db_path: path,
            initialized: AtomicBool::new(false),
            init_guard: Mutex::new(()),
        }
    }

    fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn open(&self) -> Result<Connection> {
        self.ensure_db_dir()?;
        let conn = Connection::open(&self.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(Duration::from_secs(5)).ok();
        Ok(conn)
    }

    fn now_ts() -> f64 {
        Utc::now().timestamp_millis() as f64 / 1000.0
    }

    fn read_project_row(row: &Row<'_>) -> rusqlite::Result<(ProjectRecord, String)> {
        let status: String = row.get(3)?;
        Ok((
            ProjectRecord {
                project_id: row.get(0)?,
                title: row.get(1)?,
                sandbox_id: row.get(2)?,
                status: ProjectStatus::Pending,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
                status_updated_at: row.get(6)?,
            },
            status,
        ))
    }

    fn finish_project(raw: (ProjectRecord, String)) -> Result<ProjectRecord> {
        let (mut record, status) = raw;
        record.status = ProjectStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown project status in storage: {status}"))?;
        Ok(record)
    }

    fn read_entry_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            seq: row.get(0)?,
            entry_id: row.get(1)?,
            project_id: row.get(2)?,
            originator: row.get(3)?,
            kind: row.get(4)?,
            content: row.get(5)?,
            tool: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn finish_entry(raw: RawEntry) -> Result<ConversationEntryRecord> {
        let originator = Originator::parse(&raw.originator)
            .ok_or_else(|| anyhow!("unknown originator in storage: {}", raw.originator))?;
        let kind = EntryKind::parse(&raw.kind)
            .ok_or_else(|| anyhow!("unknown entry kind in storage: {}", raw.kind))?;
        let tool = match raw.tool.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(value) => Some(
                FileTool::parse(value)
                    .ok_or_else(|| anyhow!("unknown tool in storage: {value}"))?,
            ),
        };
        Ok(ConversationEntryRecord {
            entry_id: raw.entry_id,
            project_id: raw.project_id,
            seq: raw.seq,
            originator,
            kind,
            content: raw.content,
            tool,
            created_at: raw.created_at,
        })
    }

    fn load_status(conn: &Connection, project_id: &str) -> Result<ProjectStatus> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM projects WHERE project_id = ?",
                params![project_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(status) = status else {
            return Err(StorageError::ProjectNotFound(project_id.to_string()).into());
        };
        ProjectStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown project status in storage: {status}"))
    }

    fn set_status(
        conn: &Connection,
        project_id: &str,
        status: ProjectStatus,
        now: f64,
    ) -> Result<()> {
        let current = Self::load_status(conn, project_id)?;
        if !current.can_transition_to(status) {
            return Err(StorageError::StatusRegression {
                project_id: project_id.to_string(),
                from: current,
                to: status,
            }
            .into());
        }
        conn.execute(
            "UPDATE projects SET status = ?, status_updated_at = ?, updated_at = ? WHERE project_id = ?",
            params![status.as_str(), now, now, project_id],
        )?;
        Ok(())
    }

    fn insert_entry(
        conn: &Connection,
        project_id: &str,
        entry: &NewConversationEntry,
        now: f64,
    ) -> Result<String> {
        let entry_id = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO conversation_entries (entry_id, project_id, originator, kind, content, tool, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry_id,
                project_id,
                entry.originator.as_str(),
                entry.kind.as_str(),
                entry.content,
                entry.tool.map(FileTool::as_str),
                now
            ],
        )?;
        Ok(entry_id)
    }

    fn touch_project(conn: &Connection, project_id: &str, now: f64) -> Result<()> {
        let affected = conn.execute(
            "UPDATE projects SET updated_at = ? WHERE project_id = ?",
            params![now, project_id],
        )?;
        if affected == 0 {
            return Err(StorageError::ProjectNotFound(project_id.to_string()).into());
        }
        Ok(())
    }
}

impl StorageBackend for SqliteStorage {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.init_guard.lock();
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS projects (
              project_id TEXT PRIMARY KEY,
              title TEXT NOT NULL,
              sandbox_id TEXT NOT NULL,
              status TEXT NOT NULL,
              created_at REAL NOT NULL,
              updated_at REAL NOT NULL,
              status_updated_at REAL NOT NULL
            );
            CREATE TABLE IF NOT EXISTS conversation_entries (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              entry_id TEXT NOT NULL UNIQUE,
              project_id TEXT NOT NULL,
              originator TEXT NOT NULL,
              kind TEXT NOT NULL,
              content TEXT NOT NULL,
              tool TEXT,
              created_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_conversation_entries_project
              ON conversation_entries (project_id, id);
            CREATE TABLE IF NOT EXISTS project_leases (
              project_id TEXT PRIMARY KEY,
              token TEXT NOT NULL,
              acquired_at REAL NOT NULL,
              heartbeat_at REAL NOT NULL,
              expires_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_project_leases_expires
              ON project_leases (expires_at);
            "#,
        )?;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_project(
        &self,
        project: &ProjectRecord,
        first: &NewConversationEntry,
    ) -> Result<String> {
        self.ensure_initialized()?;
        let now = Self::now_ts();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO projects (project_id, title, sandbox_id, status, created_at, updated_at, status_updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                project.project_id,
                project.title,
                project.sandbox_id,
                project.status.as_str(),
                project.created_at,
                project.updated_at,
                project.status_updated_at
            ],
        )?;
        let entry_id = Self::insert_entry(&tx, &project.project_id, first, now)?;
        tx.commit()?;
        Ok(entry_id)
    }

    fn get_project(&self, project_id: &str) -> Result<Option<ProjectRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE project_id = ?"),
                params![project_id],
                Self::read_project_row,
            )
            .optional()?;
        raw.map(Self::finish_project).transpose()
    }

    fn append_conversation_entry(
        &self,
        project_id: &str,
        entry: &NewConversationEntry,
    ) -> Result<String> {
        self.ensure_initialized()?;
        let now = Self::now_ts();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::touch_project(&tx, project_id, now)?;
        let entry_id = Self::insert_entry(&tx, project_id, entry, now)?;
        tx.commit()?;
        Ok(entry_id)
    }

    fn get_conversation_entry(&self, entry_id: &str) -> Result<Option<ConversationEntryRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM conversation_entries WHERE entry_id = ?"),
                params![entry_id],
                Self::read_entry_row,
            )
            .optional()?;
        raw.map(Self::finish_entry).transpose()
    }

    fn list_conversation_entries(&self, project_id: &str) -> Result<Vec<ConversationEntryRecord>> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM conversation_entries WHERE project_id = ? ORDER BY id ASC"
        ))?;
        let rows = stmt
            .query_map(params![project_id], Self::read_entry_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::finish_entry).collect()
    }

    fn begin_project_update(&self, project_id: &str, prompt: &str) -> Result<String> {
        self.ensure_initialized()?;
        let now = Self::now_ts();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::set_status(&tx, project_id, ProjectStatus::Updating, now)?;
        let entry_id =
            Self::insert_entry(&tx, project_id, &NewConversationEntry::user_text(prompt), now)?;
        tx.commit()?;
        Ok(entry_id)
    }

    fn commit_generation_run(
        &self,
        project_id: &str,
        entries: &[NewConversationEntry],
        status: Option<ProjectStatus>,
    ) -> Result<Vec<String>> {
        self.ensure_initialized()?;
        let now = Self::now_ts();
        let mut conn = self.open()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Self::touch_project(&tx, project_id, now)?;
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(Self::insert_entry(&tx, project_id, entry, now)?);
        }
        if let Some(status) = status {
            Self::set_status(&tx, project_id, status, now)?;
        }
        tx.commit()?;
        Ok(ids)
    }

    fn try_acquire_project_lease(
        &self,
        project_id: &str,
        token: &str,
        ttl_s: f64,
    ) -> Result<ProjectLeaseStatus> {
        self.ensure_initialized()?;
        let cleaned_project = project_id.trim();
        let cleaned_token = token.trim();
        if cleaned_project.is_empty() || cleaned_token.is_empty() {
            return Err(anyhow!("lease requires project id and token"));
        }
        let ttl_s = ttl_s.max(1.0);
        let now = Self::now_ts();
        let expires_at = now + ttl_s;
        let mut conn = self.open()?;
        let tx = match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
            Ok(tx) => tx,
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                return Ok(ProjectLeaseStatus::Busy)
            }
            Err(err) => return Err(err.into()),
        };
        tx.execute(
            "DELETE FROM project_leases WHERE expires_at <= ?",
            params![now],
        )?;
        let existing: Option<String> = tx
            .query_row(
                "SELECT token FROM project_leases WHERE project_id = ?",
                params![cleaned_project],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            tx.commit()?;
            return Ok(ProjectLeaseStatus::Busy);
        }
        let insert = tx.execute(
            "INSERT INTO project_leases (project_id, token, acquired_at, heartbeat_at, expires_at) VALUES (?, ?, ?, ?, ?)",
            params![cleaned_project, cleaned_token, now, now, expires_at],
        );
        match insert {
            Ok(_) => {
                tx.commit()?;
                Ok(ProjectLeaseStatus::Acquired)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(err.code, ErrorCode::ConstraintViolation) =>
            {
                tx.commit()?;
                Ok(ProjectLeaseStatus::Busy)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn touch_project_lease(&self, project_id: &str, token: &str, ttl_s: f64) -> Result<bool> {
        self.ensure_initialized()?;
        let ttl_s = ttl_s.max(1.0);
        let now = Self::now_ts();
        let expires_at = now + ttl_s;
        let conn = self.open()?;
        let affected = conn.execute(
            "UPDATE project_leases SET heartbeat_at = ?, expires_at = ? WHERE project_id = ? AND token = ?",
            params![now, expires_at, project_id.trim(), token.trim()],
        )?;
        Ok(affected > 0)
    }

    fn release_project_lease(&self, project_id: &str, token: &str) -> Result<()> {
        self.ensure_initialized()?;
        let conn = self.open()?;
        conn.execute(
            "DELETE FROM project_leases WHERE project_id = ? AND token = ?",
            params![project_id.trim(), token.trim()],
        )?;
        Ok(())
    }

    fn get_project_lease(&self, project_id: &str) -> Result<Option<ProjectLeaseRecord>> {
        self.ensure_initialized()?;
        let now = Self::now_ts();
        let conn = self.open()?;
        let record = conn
            .query_row(
                "SELECT project_id, token, acquired_at, heartbeat_at, expires_at FROM project_leases \
                 WHERE project_id = ? AND expires_at > ?",
                params![project_id.trim(), now],
                |row| {
                    Ok(ProjectLeaseRecord {
                        project_id: row.get(0)?,
                        token: row.get(1)?,
                        acquired_at: row.get(2)?,
                        heartbeat_at: row.get(3)?,
                        expires_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}
