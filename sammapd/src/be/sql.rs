//! A persistent directory engine over SQLite. One row per entry, AVAs
//! serialized as JSON. Filter evaluation happens in-process against the
//! deserialized entry, which keeps this engine byte-compatible with the
//! in-memory one; both exist to stand in for the production store.

use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::be::{apply_rename, ensure_rdn_value, in_scope, DirectoryBackend, Scope};
use crate::prelude::*;

/// The on-disk entry format, versioned so the layout can evolve without
/// a flag-day rebuild of existing stores.
#[derive(Serialize, Deserialize)]
#[serde(tag = "ver")]
enum DbEntry {
    V1 { avas: BTreeMap<AttrString, Vec<String>> },
}

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
fn sqlite_error(e: rusqlite::Error) -> LdbError {
    error!(?e, "SQLite Error");
    LdbError::OperationsError("sqlite failure".to_string())
}

#[allow(clippy::needless_pass_by_value)] // needs to accept value from `map_err`
fn serde_json_error(e: serde_json::Error) -> LdbError {
    error!(?e, "Serde JSON Error");
    LdbError::OperationsError("entry serialisation failure".to_string())
}

pub struct SqlBackend {
    conn: Connection,
}

impl SqlBackend {
    pub fn open(path: &str) -> Result<Self, LdbError> {
        let conn = Connection::open(path).map_err(sqlite_error)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite_error)?;
        Self::setup(conn)
    }

    pub fn open_in_memory() -> Result<Self, LdbError> {
        let conn = Connection::open_in_memory().map_err(sqlite_error)?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self, LdbError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS dn2entry (
                dn_norm TEXT PRIMARY KEY,
                dn TEXT NOT NULL,
                avas TEXT NOT NULL
            )",
            [],
        )
        .map_err(sqlite_error)?;
        Ok(SqlBackend { conn })
    }

    fn row_to_entry(dn: &str, data: &str) -> Result<Entry, LdbError> {
        let dn = Dn::parse(dn)?;
        let DbEntry::V1 { avas } = serde_json::from_str(data).map_err(serde_json_error)?;
        Ok(Entry::from_avas(dn, avas))
    }

    fn entry_to_data(entry: &Entry) -> Result<String, LdbError> {
        serde_json::to_string(&DbEntry::V1 {
            avas: entry.avas().clone(),
        })
        .map_err(serde_json_error)
    }

    fn get(&self, dn: &Dn) -> Result<Option<Entry>, LdbError> {
        self.conn
            .query_row(
                "SELECT dn, avas FROM dn2entry WHERE dn_norm = ?1",
                params![dn.norm()],
                |row| {
                    let dn: String = row.get(0)?;
                    let avas: String = row.get(1)?;
                    Ok((dn, avas))
                },
            )
            .optional()
            .map_err(sqlite_error)?
            .map(|(dn, avas)| Self::row_to_entry(&dn, &avas))
            .transpose()
    }

    fn all(&self) -> Result<Vec<Entry>, LdbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT dn, avas FROM dn2entry ORDER BY dn_norm")
            .map_err(sqlite_error)?;
        let rows = stmt
            .query_map([], |row| {
                let dn: String = row.get(0)?;
                let avas: String = row.get(1)?;
                Ok((dn, avas))
            })
            .map_err(sqlite_error)?;
        let mut out = Vec::new();
        for row in rows {
            let (dn, avas) = row.map_err(sqlite_error)?;
            out.push(Self::row_to_entry(&dn, &avas)?);
        }
        Ok(out)
    }

    fn put(&self, entry: &Entry) -> Result<(), LdbError> {
        let data = Self::entry_to_data(entry)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO dn2entry (dn_norm, dn, avas) VALUES (?1, ?2, ?3)",
                params![entry.dn().norm(), entry.dn().to_string(), data],
            )
            .map_err(sqlite_error)?;
        Ok(())
    }

    fn remove_row(&self, dn: &Dn) -> Result<usize, LdbError> {
        self.conn
            .execute(
                "DELETE FROM dn2entry WHERE dn_norm = ?1",
                params![dn.norm()],
            )
            .map_err(sqlite_error)
    }
}

impl DirectoryBackend for SqlBackend {
    fn search(
        &self,
        base: &Dn,
        scope: Scope,
        filter: Option<&Filter>,
        attrs: &[String],
    ) -> Result<Vec<Entry>, LdbError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|e| in_scope(base, scope, e.dn()))
            .filter(|e| filter.map(|f| e.matches(f)).unwrap_or(true))
            .map(|e| e.project(attrs))
            .collect())
    }

    fn add(&mut self, entry: Entry) -> Result<(), LdbError> {
        if self.get(entry.dn())?.is_some() {
            return Err(LdbError::EntryAlreadyExists);
        }
        let mut entry = entry;
        ensure_rdn_value(&mut entry);
        self.put(&entry)
    }

    fn modify(&mut self, dn: &Dn, mods: &ModifyList) -> Result<(), LdbError> {
        let mut entry = self.get(dn)?.ok_or(LdbError::NoSuchObject)?;
        mods.apply_to(&mut entry)?;
        self.put(&entry)
    }

    fn rename(&mut self, old_dn: &Dn, new_dn: &Dn) -> Result<(), LdbError> {
        if new_dn.is_under(old_dn) && new_dn != old_dn {
            return Err(LdbError::UnwillingToPerform);
        }
        if self.get(new_dn)?.is_some() {
            return Err(LdbError::EntryAlreadyExists);
        }
        let mut entry = self.get(old_dn)?.ok_or(LdbError::NoSuchObject)?;
        apply_rename(&mut entry, old_dn, new_dn);

        let data = Self::entry_to_data(&entry)?;
        let tx = self.conn.transaction().map_err(sqlite_error)?;
        tx.execute(
            "DELETE FROM dn2entry WHERE dn_norm = ?1",
            params![old_dn.norm()],
        )
        .map_err(sqlite_error)?;
        tx.execute(
            "INSERT INTO dn2entry (dn_norm, dn, avas) VALUES (?1, ?2, ?3)",
            params![entry.dn().norm(), entry.dn().to_string(), data],
        )
        .map_err(sqlite_error)?;
        tx.commit().map_err(sqlite_error)
    }

    fn delete(&mut self, dn: &Dn) -> Result<(), LdbError> {
        let entry = self.get(dn)?.ok_or(LdbError::NoSuchObject)?;
        let non_leaf = self
            .all()?
            .iter()
            .any(|e| e.dn() != entry.dn() && e.dn().is_under(entry.dn()));
        if non_leaf {
            return Err(LdbError::NotAllowedOnNonLeaf);
        }
        self.remove_row(dn)?;
        Ok(())
    }
}
