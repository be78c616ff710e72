//! Grant record store: object-store semantics (put/get/delete/list-by-prefix)
//! over a memory or sqlite backend, plus the grant-specific operations the
//! lifecycle engine is written against.
//!
//! Workflow phase is an explicit field on every record; the deadline baked
//! into `requests/` and `removals/` keys is mirrored into a dedicated index
//! so `list_due` never scans a whole namespace.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use warden_contracts::{AccountBinding, ActiveGrant, GrantPhase, GrantRequest, VerificationRecord};
use warden_kernel as kernel;

pub enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl StoreBackend {
    // generic object operations

    pub fn put(&mut self, key: &str, deadline_ms: Option<i64>, value: &str) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store.objects.insert(key.to_string(), value.to_string());
                if let Some(deadline) = deadline_ms {
                    store.due_index.insert((deadline, key.to_string()), ());
                }
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.put(key, deadline_ms, value),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store.objects.get(key).cloned()),
            StoreBackend::Sqlite(store) => store.get(key),
        }
    }

    pub fn delete(&mut self, key: &str) -> Result<(), String> {
        match self {
            StoreBackend::Memory(store) => {
                store.objects.remove(key);
                if let Some(deadline) = kernel::embedded_deadline(key) {
                    store.due_index.remove(&(deadline, key.to_string()));
                }
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.delete(key),
        }
    }

    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .objects
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect()),
            StoreBackend::Sqlite(store) => store.list_prefix(prefix),
        }
    }

    /// Every key in the namespace whose deadline is at or before `now_ms`,
    /// soonest first. Index scan on both backends.
    pub fn list_due(&self, prefix: &str, now_ms: i64) -> Result<Vec<String>, String> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .due_index
                .iter()
                .take_while(|((deadline, _), _)| *deadline <= now_ms)
                .map(|((_, key), _)| key.clone())
                .filter(|key| key.starts_with(prefix))
                .collect()),
            StoreBackend::Sqlite(store) => store.list_due(prefix, now_ms),
        }
    }

    // grant lifecycle operations

    pub fn put_request(&mut self, record: &GrantRequest) -> Result<String, String> {
        let key = kernel::request_key(&record.request_id, record.valid_until_ms);
        let value = serde_json::to_string(record).map_err(|e| e.to_string())?;
        self.put(&key, Some(record.valid_until_ms), &value)?;
        Ok(key)
    }

    /// NotFound covers "never existed" and "validity window elapsed" alike:
    /// the record's own `valid_until_ms` is the source of truth, the key
    /// suffix is only an index.
    pub fn find_request(
        &self,
        request_id: &str,
        now_ms: i64,
    ) -> Result<Option<(String, GrantRequest)>, String> {
        let prefix = format!("{}{}-", kernel::REQUESTS_PREFIX, request_id);
        for key in self.list_prefix(&prefix)? {
            let Some(value) = self.get(&key)? else {
                continue;
            };
            let record: GrantRequest = serde_json::from_str(&value).map_err(|e| e.to_string())?;
            if record.valid_until_ms > now_ms {
                return Ok(Some((key, record)));
            }
        }
        Ok(None)
    }

    pub fn put_removal(&mut self, grant: &ActiveGrant) -> Result<String, String> {
        let key = kernel::removal_key(&grant.request_id, grant.expires_at_ms);
        let value = serde_json::to_string(grant).map_err(|e| e.to_string())?;
        self.put(&key, Some(grant.expires_at_ms), &value)?;
        Ok(key)
    }

    pub fn has_removal(&self, request_id: &str) -> Result<bool, String> {
        let prefix = format!("{}{}-", kernel::REMOVALS_PREFIX, request_id);
        Ok(!self.list_prefix(&prefix)?.is_empty())
    }

    pub fn get_removal(&self, key: &str) -> Result<Option<ActiveGrant>, String> {
        match self.get(key)? {
            Some(value) => {
                let grant: ActiveGrant = serde_json::from_str(&value).map_err(|e| e.to_string())?;
                Ok(Some(grant))
            }
            None => Ok(None),
        }
    }

    /// Archives the fulfilled request under `approvals/` and consumes the
    /// pending key. The caller has already written the `removals/` record
    /// and performed the remote addition.
    pub fn complete_activation(
        &mut self,
        request_key: &str,
        grant: &ActiveGrant,
    ) -> Result<(), String> {
        let approval_key = kernel::approval_key_for(request_key)
            .ok_or_else(|| format!("not a request key: {request_key}"))?;
        let value = serde_json::to_string(grant).map_err(|e| e.to_string())?;
        self.put(&approval_key, None, &value)?;
        self.delete(request_key)
    }

    /// Moves a timed-out request to `expired_requests/`, marking the phase
    /// on the archived copy. No deadline on the archive: it is never swept.
    pub fn archive_expired_request(&mut self, request_key: &str) -> Result<(), String> {
        let expired_key = kernel::expired_key_for(request_key)
            .ok_or_else(|| format!("not a request key: {request_key}"))?;
        let Some(value) = self.get(request_key)? else {
            // another sweep already archived it
            return Ok(());
        };
        let mut record: GrantRequest = serde_json::from_str(&value).map_err(|e| e.to_string())?;
        record.phase = GrantPhase::TimedOut;
        let archived = serde_json::to_string(&record).map_err(|e| e.to_string())?;
        self.put(&expired_key, None, &archived)?;
        self.delete(request_key)
    }

    // verification and binding operations

    pub fn put_verification(&mut self, record: &VerificationRecord) -> Result<String, String> {
        let key = kernel::verification_key(
            &record.account_id,
            &record.directory_user_id,
            &record.principal_name,
            &record.chat_id,
        );
        let value = serde_json::to_string(record).map_err(|e| e.to_string())?;
        self.put(&key, None, &value)?;
        Ok(key)
    }

    pub fn find_verification(
        &self,
        chat_id: &str,
    ) -> Result<Option<(String, VerificationRecord)>, String> {
        for key in self.list_prefix(kernel::VERIFICATIONS_PREFIX)? {
            if kernel::verification_chat_id(&key) != Some(chat_id) {
                continue;
            }
            let Some(value) = self.get(&key)? else {
                continue;
            };
            let record: VerificationRecord =
                serde_json::from_str(&value).map_err(|e| e.to_string())?;
            return Ok(Some((key, record)));
        }
        Ok(None)
    }

    pub fn put_binding(&mut self, binding: &AccountBinding) -> Result<(), String> {
        let key = kernel::binding_key(&binding.chat_id, &binding.account_id);
        let value = serde_json::to_string(binding).map_err(|e| e.to_string())?;
        self.put(&key, None, &value)
    }

    pub fn get_binding(
        &self,
        chat_id: &str,
        account_id: &str,
    ) -> Result<Option<AccountBinding>, String> {
        match self.get(&kernel::binding_key(chat_id, account_id))? {
            Some(value) => {
                let binding: AccountBinding =
                    serde_json::from_str(&value).map_err(|e| e.to_string())?;
                Ok(Some(binding))
            }
            None => Ok(None),
        }
    }

    pub fn list_bindings(&self, chat_id: &str) -> Result<Vec<AccountBinding>, String> {
        let mut bindings = Vec::new();
        for key in self.list_prefix(&kernel::binding_prefix(chat_id))? {
            let Some(value) = self.get(&key)? else {
                continue;
            };
            let binding: AccountBinding = serde_json::from_str(&value).map_err(|e| e.to_string())?;
            bindings.push(binding);
        }
        Ok(bindings)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: BTreeMap<String, String>,
    due_index: BTreeMap<(i64, String), ()>,
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(path: &str) -> Result<Self, String> {
        let conn = Connection::open(path).map_err(|e| e.to_string())?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS objects (
                object_key TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                deadline_ms INTEGER,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_objects_due
                ON objects(namespace, deadline_ms);
            ",
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { conn })
    }

    fn put(&mut self, key: &str, deadline_ms: Option<i64>, value: &str) -> Result<(), String> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO objects(object_key, namespace, deadline_ms, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key, kernel::namespace_of(key), deadline_ms, value],
            )
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, String> {
        self.conn
            .query_row(
                "SELECT value FROM objects WHERE object_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| e.to_string())
    }

    fn delete(&mut self, key: &str) -> Result<(), String> {
        self.conn
            .execute("DELETE FROM objects WHERE object_key = ?1", params![key])
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn list_prefix(&self, prefix: &str) -> Result<Vec<String>, String> {
        let pattern = format!("{}%", escape_like(prefix));
        let mut stmt = self
            .conn
            .prepare(
                "SELECT object_key FROM objects
                 WHERE object_key LIKE ?1 ESCAPE '!'
                 ORDER BY object_key",
            )
            .map_err(|e| e.to_string())?;
        let keys = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(keys)
    }

    fn list_due(&self, prefix: &str, now_ms: i64) -> Result<Vec<String>, String> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT object_key FROM objects
                 WHERE namespace = ?1 AND deadline_ms IS NOT NULL AND deadline_ms <= ?2
                 ORDER BY deadline_ms",
            )
            .map_err(|e| e.to_string())?;
        let keys = stmt
            .query_map(params![prefix, now_ms], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        Ok(keys)
    }
}

fn escape_like(input: &str) -> String {
    input
        .replace('!', "!!")
        .replace('%', "!%")
        .replace('_', "!_")
}
