//! Embedded persistence: sessions, responses, and the audit log.
//!
//! Three redb tables mirror the original gateway's three SQLite tables.
//! `responses` rows carry their owning `tenant_id`; `load_response_transcript`
//! enforces tenant isolation by refusing to return a row whose tenant doesn't
//! match the caller's, rather than by scoping the key itself.

use std::path::Path;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use rants_transcript::CanonicalTranscript;

const SESSIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");
const RESPONSES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("responses");
const AUDIT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("audit_log");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    pub session_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depth: u32,
    pub transcript: CanonicalTranscript,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResponse {
    pub response_id: String,
    pub session_id: String,
    #[serde(default)]
    pub parent_response_id: Option<String>,
    pub tenant_id: String,
    pub created_at: f64,
    pub transcript: CanonicalTranscript,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAuditEntry {
    pub audit_id: String,
    pub created_at: f64,
    pub entry: Value,
}

pub struct Store {
    db: Database,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::create(path).with_context(|| format!("opening store at {}", path.display()))?;

        let tx = db.begin_write()?;
        tx.open_table(SESSIONS_TABLE)?;
        tx.open_table(RESPONSES_TABLE)?;
        tx.open_table(AUDIT_TABLE)?;
        tx.commit()?;

        Ok(Self { db })
    }

    pub fn new_response_id() -> String {
        format!("resp_{}", Uuid::new_v4().simple())
    }

    pub fn create_session(&self, session: &StoredSession) -> Result<()> {
        self.put(SESSIONS_TABLE, &session.session_id, session)
    }

    pub fn update_session(&self, session: &StoredSession) -> Result<()> {
        self.put(SESSIONS_TABLE, &session.session_id, session)
    }

    pub fn load_session(&self, session_id: &str) -> Result<Option<StoredSession>> {
        self.get(SESSIONS_TABLE, session_id)
    }

    pub fn store_response(&self, response: &StoredResponse) -> Result<()> {
        self.put(RESPONSES_TABLE, &response.response_id, response)
    }

    /// Returns `None` both when the response doesn't exist and when it
    /// belongs to a different tenant — the two cases are indistinguishable
    /// to the caller, which is the point.
    pub fn load_response_transcript(&self, response_id: &str, tenant_id: &str) -> Result<Option<CanonicalTranscript>> {
        let Some(stored) = self.get::<StoredResponse>(RESPONSES_TABLE, response_id)? else { return Ok(None) };
        if stored.tenant_id != tenant_id {
            return Ok(None);
        }
        Ok(Some(stored.transcript))
    }

    pub fn load_previous_transcript(
        &self,
        previous_response_id: Option<&str>,
        tenant_id: &str,
    ) -> Result<Option<CanonicalTranscript>> {
        match previous_response_id {
            Some(id) => self.load_response_transcript(id, tenant_id),
            None => Ok(None),
        }
    }

    pub fn delete_response(&self, response_id: &str) -> Result<()> {
        let tx = self.db.begin_write()?;
        {
            let mut table = tx.open_table(RESPONSES_TABLE)?;
            table.remove(response_id)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn store_audit_entry(&self, entry: Value) -> Result<()> {
        let audit_id = Uuid::new_v4().simple().to_string();
        let created_at = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let row = StoredAuditEntry { audit_id: audit_id.clone(), created_at, entry };
        self.put(AUDIT_TABLE, &audit_id, &row)
    }

    fn put<T: Serialize>(&self, table: TableDefinition<&str, &[u8]>, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let tx = self.db.begin_write()?;
        {
            let mut tbl = tx.open_table(table)?;
            tbl.insert(key, bytes.as_slice())?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get<T: for<'de> Deserialize<'de>>(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> Result<Option<T>> {
        let tx = self.db.begin_read()?;
        let tbl = tx.open_table(table)?;
        match tbl.get(key)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }
}
