//! Setting repository: last-write-wins key/value point store.

use crate::model::setting::Setting;
use crate::repo::ensure_columns;
use crate::repo::note_repo::RepoResult;
use rusqlite::{params, Connection, OptionalExtension};

pub trait SettingRepository {
    fn get_setting(&self, key: &str) -> RepoResult<Option<Setting>>;
    /// Inserts the key or overwrites its value.
    fn set_setting(&self, key: &str, value: Option<&str>) -> RepoResult<()>;
    fn list_settings(&self) -> RepoResult<Vec<Setting>>;
}

pub struct SqliteSettingRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteSettingRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_columns(conn, "setting", &["key", "value"])?;
        Ok(Self { conn })
    }
}

impl SettingRepository for SqliteSettingRepository<'_> {
    fn get_setting(&self, key: &str) -> RepoResult<Option<Setting>> {
        let setting = self
            .conn
            .query_row(
                "SELECT key, value FROM setting WHERE key = ?1;",
                [key],
                |row| {
                    Ok(Setting {
                        key: row.get(0)?,
                        value: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(setting)
    }

    fn set_setting(&self, key: &str, value: Option<&str>) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO setting (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
            params![key, value],
        )?;
        Ok(())
    }

    fn list_settings(&self) -> RepoResult<Vec<Setting>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM setting ORDER BY key ASC;")?;
        let settings = stmt
            .query_map([], |row| {
                Ok(Setting {
                    key: row.get(0)?,
                    value: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(settings)
    }
}
