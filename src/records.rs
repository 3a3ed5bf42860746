//! User / enemy record store.
//!
//! Two logical tables, Users and Enemies, with rows `{Name, Sex, RegisterTime, Type}`.
//! Rows are appended when an enrollment completes and moved from Users to Enemies on
//! reclassification.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::recognize::FaceKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceRecord {
    pub name: String,
    pub sex: String,
    /// Seconds since the Unix epoch.
    pub register_time: u64,
    pub kind: FaceKind,
}

pub trait RecordStore {
    /// Rows of one table, oldest registration first.
    fn list(&self, kind: FaceKind) -> Result<Vec<FaceRecord>>;

    /// Append a Users row. Returns false if the name is already registered in either table.
    fn register_user(&mut self, name: &str, sex: &str, register_time: u64) -> Result<bool>;

    /// Move a user to Enemies. With no name, the most recently registered user moves.
    /// Returns the moved row, or `None` if there was nothing to move.
    fn reclassify_to_enemy(&mut self, name: Option<&str>) -> Result<Option<FaceRecord>>;

    fn enemy_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .list(FaceKind::Enemy)?
            .into_iter()
            .map(|r| r.name)
            .collect())
    }
}

pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

fn table_for(kind: FaceKind) -> &'static str {
    match kind {
        FaceKind::User => "users",
        FaceKind::Enemy => "enemies",
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow!("failed to open record store {}: {}", db_path, e))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
              name TEXT PRIMARY KEY,
              sex TEXT NOT NULL,
              register_time INTEGER NOT NULL,
              type TEXT NOT NULL DEFAULT 'User'
            );

            CREATE TABLE IF NOT EXISTS enemies (
              name TEXT PRIMARY KEY,
              sex TEXT NOT NULL,
              register_time INTEGER NOT NULL,
              type TEXT NOT NULL DEFAULT 'Enemy'
            );
            "#,
        )?;
        Ok(())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM users WHERE name = ?1 UNION SELECT 1 FROM enemies WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl RecordStore for SqliteRecordStore {
    fn list(&self, kind: FaceKind) -> Result<Vec<FaceRecord>> {
        let sql = format!(
            "SELECT name, sex, register_time FROM {} ORDER BY register_time ASC, rowid ASC",
            table_for(kind)
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let register_time: i64 = row.get(2)?;
            Ok(FaceRecord {
                name: row.get(0)?,
                sex: row.get(1)?,
                register_time: register_time.max(0) as u64,
                kind,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn register_user(&mut self, name: &str, sex: &str, register_time: u64) -> Result<bool> {
        if self.exists(name)? {
            return Ok(false);
        }
        let register_time = i64::try_from(register_time)
            .map_err(|_| anyhow!("register time exceeds i64 range"))?;
        self.conn.execute(
            "INSERT INTO users (name, sex, register_time, type) VALUES (?1, ?2, ?3, 'User')",
            params![name, sex, register_time],
        )?;
        Ok(true)
    }

    fn reclassify_to_enemy(&mut self, name: Option<&str>) -> Result<Option<FaceRecord>> {
        let tx = self.conn.transaction()?;
        let row: Option<(String, String, i64)> = match name {
            Some(name) => tx
                .query_row(
                    "SELECT name, sex, register_time FROM users WHERE name = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?,
            None => tx
                .query_row(
                    "SELECT name, sex, register_time FROM users \
                     ORDER BY register_time DESC, rowid DESC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?,
        };
        let Some((name, sex, register_time)) = row else {
            return Ok(None);
        };
        tx.execute("DELETE FROM users WHERE name = ?1", params![name])?;
        tx.execute(
            "INSERT OR REPLACE INTO enemies (name, sex, register_time, type) \
             VALUES (?1, ?2, ?3, 'Enemy')",
            params![name, sex, register_time],
        )?;
        tx.commit()?;
        Ok(Some(FaceRecord {
            name,
            sex,
            register_time: register_time.max(0) as u64,
            kind: FaceKind::Enemy,
        }))
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRecordStore {
    users: Vec<FaceRecord>,
    enemies: Vec<FaceRecord>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn list(&self, kind: FaceKind) -> Result<Vec<FaceRecord>> {
        Ok(match kind {
            FaceKind::User => self.users.clone(),
            FaceKind::Enemy => self.enemies.clone(),
        })
    }

    fn register_user(&mut self, name: &str, sex: &str, register_time: u64) -> Result<bool> {
        if self
            .users
            .iter()
            .chain(self.enemies.iter())
            .any(|r| r.name == name)
        {
            return Ok(false);
        }
        self.users.push(FaceRecord {
            name: name.to_string(),
            sex: sex.to_string(),
            register_time,
            kind: FaceKind::User,
        });
        Ok(true)
    }

    fn reclassify_to_enemy(&mut self, name: Option<&str>) -> Result<Option<FaceRecord>> {
        let idx = match name {
            Some(name) => self.users.iter().position(|r| r.name == name),
            None => self.users.len().checked_sub(1),
        };
        let Some(idx) = idx else {
            return Ok(None);
        };
        let mut record = self.users.remove(idx);
        record.kind = FaceKind::Enemy;
        self.enemies.push(record.clone());
        Ok(Some(record))
    }
}
