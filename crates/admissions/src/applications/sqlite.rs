use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::domain::{
    Application, ApplicationId, ApplicationStatus, Document, DocumentId, FormData, HistoryEntry,
    HistoryEntryId, UserId,
};
use super::repository::{
    ApplicationRepository, NewApplication, NewDocument, PendingEntry, RepositoryError,
    StatusChange,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS applications (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  user_id INTEGER NOT NULL,
  status TEXT NOT NULL
    CHECK (status IN ('draft', 'submitted', 'review', 'accepted', 'rejected')),
  form_data TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS application_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  application_id INTEGER NOT NULL REFERENCES applications(id),
  status TEXT
    CHECK (status IS NULL OR status IN ('draft', 'submitted', 'review', 'accepted', 'rejected')),
  notes TEXT,
  created_by INTEGER NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  application_id INTEGER NOT NULL REFERENCES applications(id),
  file_name TEXT NOT NULL,
  content_type TEXT NOT NULL,
  size_bytes INTEGER NOT NULL,
  storage_path TEXT NOT NULL,
  uploaded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_applications_user ON applications(user_id);
CREATE INDEX IF NOT EXISTS idx_history_application
  ON application_history(application_id, created_at, id);
CREATE INDEX IF NOT EXISTS idx_documents_application ON documents(application_id, id);

CREATE TRIGGER IF NOT EXISTS application_history_no_update
BEFORE UPDATE ON application_history
BEGIN
  SELECT RAISE(ABORT, 'application history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS application_history_no_delete
BEFORE DELETE ON application_history
BEGIN
  SELECT RAISE(ABORT, 'application history is append-only');
END;
"#;

const APPLICATION_COLUMNS: &str = "id, user_id, status, form_data, created_at, updated_at";
const HISTORY_COLUMNS: &str = "id, application_id, status, notes, created_by, created_at";
const DOCUMENT_COLUMNS: &str =
    "id, application_id, file_name, content_type, size_bytes, storage_path, uploaded_at";

/// Relational store backed by SQLite. Each status change runs in one transaction that
/// covers both the `applications` update and the `application_history` insert.
#[derive(Debug)]
pub struct SqliteApplicationRepository {
    conn: Mutex<Connection>,
}

impl SqliteApplicationRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| {
                RepositoryError::Unavailable(format!("{}: {err}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened sqlite application store");
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, RepositoryError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection mutex poisoned".into()))
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> Result<(), RepositoryError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

impl ApplicationRepository for SqliteApplicationRepository {
    fn create(
        &self,
        application: NewApplication,
        opening: PendingEntry,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let created_at = encode_time(application.created_at);
        tx.execute(
            "INSERT INTO applications (user_id, status, form_data, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                application.owner.0,
                ApplicationStatus::Draft.label(),
                encode_form(&application.form_data)?,
                created_at,
            ],
        )?;
        let id = ApplicationId(tx.last_insert_rowid());
        let entry = insert_history(&tx, id, &opening)?;
        let stored = fetch_application(&tx, id)?.ok_or(RepositoryError::NotFound)?;

        tx.commit()?;
        Ok((stored, entry))
    }

    fn fetch(&self, id: ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let conn = self.lock()?;
        fetch_application(&conn, id)
    }

    fn list(&self, owner: Option<UserId>) -> Result<Vec<Application>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {APPLICATION_COLUMNS} FROM applications
             WHERE (?1 IS NULL OR user_id = ?1)
             ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![owner.map(|owner| owner.0)], ApplicationRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ApplicationRow::into_domain).collect()
    }

    fn update_form(
        &self,
        id: ApplicationId,
        form_data: FormData,
        updated_at: DateTime<Utc>,
        expected: Option<ApplicationStatus>,
    ) -> Result<Application, RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE applications SET form_data = ?1, updated_at = ?2
             WHERE id = ?3 AND (?4 IS NULL OR status = ?4)",
            params![
                encode_form(&form_data)?,
                encode_time(updated_at),
                id.0,
                expected.map(ApplicationStatus::label),
            ],
        )?;
        if changed == 0 {
            return Err(missing_or_conflict(&tx, id, expected)?);
        }
        let stored = fetch_application(&tx, id)?.ok_or(RepositoryError::NotFound)?;
        tx.commit()?;
        Ok(stored)
    }

    fn transition(
        &self,
        change: StatusChange,
    ) -> Result<(Application, HistoryEntry), RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE applications SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                change.next.label(),
                encode_time(change.recorded_at),
                change.application_id.0,
                change.expected.label(),
            ],
        )?;
        if changed == 0 {
            return Err(missing_or_conflict(
                &tx,
                change.application_id,
                Some(change.expected),
            )?);
        }

        let entry = insert_history(&tx, change.application_id, &change.entry())?;
        let stored =
            fetch_application(&tx, change.application_id)?.ok_or(RepositoryError::NotFound)?;

        tx.commit()?;
        Ok((stored, entry))
    }

    fn append_note(
        &self,
        id: ApplicationId,
        entry: PendingEntry,
    ) -> Result<HistoryEntry, RepositoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if fetch_application(&tx, id)?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        let stored = insert_history(&tx, id, &entry)?;
        tx.commit()?;
        Ok(stored)
    }

    fn history(&self, id: ApplicationId) -> Result<Vec<HistoryEntry>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {HISTORY_COLUMNS} FROM application_history
             WHERE application_id = ?1
             ORDER BY created_at, id"
        ))?;
        let rows = stmt
            .query_map(params![id.0], HistoryRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(HistoryRow::into_domain).collect()
    }

    fn insert_document(&self, document: NewDocument) -> Result<Document, RepositoryError> {
        let size_bytes = i64::try_from(document.size_bytes)
            .map_err(|_| RepositoryError::Backend("document size out of range".into()))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if fetch_application(&tx, document.application_id)?.is_none() {
            return Err(RepositoryError::NotFound);
        }
        tx.execute(
            "INSERT INTO documents
               (application_id, file_name, content_type, size_bytes, storage_path, uploaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.application_id.0,
                document.file_name,
                document.content_type,
                size_bytes,
                document.storage_path,
                encode_time(document.uploaded_at),
            ],
        )?;
        let id = DocumentId(tx.last_insert_rowid());
        tx.commit()?;

        Ok(Document {
            id,
            application_id: document.application_id,
            file_name: document.file_name,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            storage_path: document.storage_path,
            uploaded_at: document.uploaded_at,
        })
    }

    fn documents(&self, id: ApplicationId) -> Result<Vec<Document>, RepositoryError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE application_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![id.0], DocumentRow::read)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(DocumentRow::into_domain).collect()
    }

    fn latest_timestamp(&self) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        let conn = self.lock()?;
        let latest: Option<String> = conn.query_row(
            "SELECT MAX(at) FROM (
               SELECT MAX(updated_at) AS at FROM applications
               UNION ALL SELECT MAX(created_at) FROM application_history
               UNION ALL SELECT MAX(uploaded_at) FROM documents
             )",
            [],
            |row| row.get(0),
        )?;
        latest.as_deref().map(decode_time).transpose()
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(value: rusqlite::Error) -> Self {
        RepositoryError::Backend(value.to_string())
    }
}

fn insert_history(
    tx: &Transaction<'_>,
    id: ApplicationId,
    entry: &PendingEntry,
) -> Result<HistoryEntry, RepositoryError> {
    tx.execute(
        "INSERT INTO application_history (application_id, status, notes, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            id.0,
            entry.status.map(ApplicationStatus::label),
            entry.notes,
            entry.actor.0,
            encode_time(entry.recorded_at),
        ],
    )?;

    Ok(HistoryEntry {
        id: HistoryEntryId(tx.last_insert_rowid()),
        application_id: id,
        status: entry.status,
        notes: entry.notes.clone(),
        actor: entry.actor,
        created_at: entry.recorded_at,
    })
}

fn fetch_application(
    conn: &Connection,
    id: ApplicationId,
) -> Result<Option<Application>, RepositoryError> {
    conn.query_row(
        &format!("SELECT {APPLICATION_COLUMNS} FROM applications WHERE id = ?1"),
        params![id.0],
        ApplicationRow::read,
    )
    .optional()?
    .map(ApplicationRow::into_domain)
    .transpose()
}

/// Explains a guarded update that touched no rows.
fn missing_or_conflict(
    tx: &Transaction<'_>,
    id: ApplicationId,
    expected: Option<ApplicationStatus>,
) -> Result<RepositoryError, RepositoryError> {
    let exists = tx
        .query_row(
            "SELECT 1 FROM applications WHERE id = ?1",
            params![id.0],
            |_| Ok(()),
        )
        .optional()?;
    Ok(match (exists, expected) {
        (Some(()), Some(expected)) => RepositoryError::Conflict { expected },
        _ => RepositoryError::NotFound,
    })
}

fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_time(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Backend(format!("invalid timestamp '{raw}': {err}")))
}

fn decode_status(raw: &str) -> Result<ApplicationStatus, RepositoryError> {
    ApplicationStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Backend(format!("unknown status '{raw}'")))
}

fn encode_form(form_data: &FormData) -> Result<String, RepositoryError> {
    serde_json::to_string(form_data.as_value())
        .map_err(|err| RepositoryError::Backend(format!("form data encode failed: {err}")))
}

fn decode_form(raw: &str) -> Result<FormData, RepositoryError> {
    let value = serde_json::from_str(raw)
        .map_err(|err| RepositoryError::Backend(format!("form data decode failed: {err}")))?;
    FormData::new(value).map_err(|err| RepositoryError::Backend(err.to_string()))
}

struct ApplicationRow {
    id: i64,
    user_id: i64,
    status: String,
    form_data: String,
    created_at: String,
    updated_at: String,
}

impl ApplicationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: row.get(2)?,
            form_data: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_domain(self) -> Result<Application, RepositoryError> {
        Ok(Application {
            id: ApplicationId(self.id),
            owner: UserId(self.user_id),
            status: decode_status(&self.status)?,
            form_data: decode_form(&self.form_data)?,
            created_at: decode_time(&self.created_at)?,
            updated_at: decode_time(&self.updated_at)?,
        })
    }
}

struct HistoryRow {
    id: i64,
    application_id: i64,
    status: Option<String>,
    notes: Option<String>,
    created_by: i64,
    created_at: String,
}

impl HistoryRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            application_id: row.get(1)?,
            status: row.get(2)?,
            notes: row.get(3)?,
            created_by: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_domain(self) -> Result<HistoryEntry, RepositoryError> {
        Ok(HistoryEntry {
            id: HistoryEntryId(self.id),
            application_id: ApplicationId(self.application_id),
            status: self.status.as_deref().map(decode_status).transpose()?,
            notes: self.notes,
            actor: UserId(self.created_by),
            created_at: decode_time(&self.created_at)?,
        })
    }
}

struct DocumentRow {
    id: i64,
    application_id: i64,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    storage_path: String,
    uploaded_at: String,
}

impl DocumentRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            application_id: row.get(1)?,
            file_name: row.get(2)?,
            content_type: row.get(3)?,
            size_bytes: row.get(4)?,
            storage_path: row.get(5)?,
            uploaded_at: row.get(6)?,
        })
    }

    fn into_domain(self) -> Result<Document, RepositoryError> {
        Ok(Document {
            id: DocumentId(self.id),
            application_id: ApplicationId(self.application_id),
            file_name: self.file_name,
            content_type: self.content_type,
            size_bytes: u64::try_from(self.size_bytes)
                .map_err(|_| RepositoryError::Backend("negative document size".into()))?,
            storage_path: self.storage_path,
            uploaded_at: decode_time(&self.uploaded_at)?,
        })
    }
}
