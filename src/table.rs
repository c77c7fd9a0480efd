//! Destination table access.
//!
//! The load coordinator only sees the two traits here: [`DuplicateOracle`]
//! for existence checks and [`TableWriter`] for the batch insert. There is no
//! transaction spanning a check and the later insert, so two overlapping runs
//! can both see a key as absent and both insert it. Enabling
//! [`TableSettings::unique_key`] turns the second insert into a per-row error.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use camino::Utf8Path;
use chrono::NaiveDate;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;

use crate::domain::{KeyValue, NaturalKey, NormalizedRow};
use crate::error::PipelineError;

pub const DEFAULT_TABLE_NAME: &str = "tbl_production";

/// Answers whether a natural key is already present in the destination table.
pub trait DuplicateOracle: Send + Sync {
    fn exists(&self, key: &KeyValue) -> Result<bool, PipelineError>;

    /// Checks several keys at once; results line up with `keys`.
    ///
    /// Implementations may replace this with a single set-membership query.
    fn exists_many(&self, keys: &[KeyValue]) -> Vec<Result<bool, PipelineError>> {
        keys.iter().map(|key| self.exists(key)).collect()
    }
}

impl<T: DuplicateOracle + ?Sized> DuplicateOracle for &T {
    fn exists(&self, key: &KeyValue) -> Result<bool, PipelineError> {
        (**self).exists(key)
    }

    fn exists_many(&self, keys: &[KeyValue]) -> Vec<Result<bool, PipelineError>> {
        (**self).exists_many(keys)
    }
}

/// A row the destination refused during a batch insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// Position of the row in the submitted batch.
    pub index: usize,
    pub message: String,
}

/// Bulk insert into the destination table.
///
/// An `Ok` with an empty list means every row was written. `Err` means the
/// insert as a whole failed and nothing can be assumed written.
pub trait TableWriter: Send + Sync {
    fn insert_rows(&self, rows: &[NormalizedRow]) -> Result<Vec<RowError>, PipelineError>;
}

impl<T: TableWriter + ?Sized> TableWriter for &T {
    fn insert_rows(&self, rows: &[NormalizedRow]) -> Result<Vec<RowError>, PipelineError> {
        (**self).insert_rows(rows)
    }
}

#[derive(Debug, Clone)]
pub struct TableSettings {
    pub name: String,
    pub natural_key: NaturalKey,
    pub unique_key: bool,
    pub busy_timeout: Duration,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_TABLE_NAME.to_string(),
            natural_key: NaturalKey::default(),
            unique_key: false,
            busy_timeout: Duration::from_secs(30),
        }
    }
}

/// SQLite-backed production table.
#[derive(Debug)]
pub struct SqliteTable {
    conn: Mutex<Connection>,
    name: String,
}

impl SqliteTable {
    pub fn open(path: &Utf8Path, settings: &TableSettings) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        let conn = Connection::open(path.as_std_path())?;
        Self::init(conn, settings)
    }

    pub fn in_memory(settings: &TableSettings) -> Result<Self, PipelineError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, settings)
    }

    fn init(conn: Connection, settings: &TableSettings) -> Result<Self, PipelineError> {
        validate_identifier(&settings.name)?;
        conn.busy_timeout(settings.busy_timeout)?;
        conn.execute_batch(&create_table_sql(settings))?;
        Ok(Self {
            conn: Mutex::new(conn),
            name: settings.name.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, PipelineError> {
        self.conn
            .lock()
            .map_err(|_| PipelineError::Table("connection lock poisoned".to_string()))
    }

    pub fn row_count(&self) -> Result<u64, PipelineError> {
        let conn = self.lock_conn()?;
        let count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.name), [], |row| {
                row.get(0)
            })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Rows for one country and category, oldest month first.
    pub fn rows_for(
        &self,
        country: &str,
        category: &str,
    ) -> Result<Vec<NormalizedRow>, PipelineError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT country, year_month, tonnes, category FROM {} \
             WHERE country = ?1 AND category = ?2 ORDER BY year_month ASC",
            self.name
        ))?;
        let raw = stmt
            .query_map(params![country, category], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(country, year_month, tonnes, category)| {
                let year_month = NaiveDate::parse_from_str(&year_month, "%Y-%m-%d").map_err(
                    |err| PipelineError::Table(format!("bad year_month `{year_month}`: {err}")),
                )?;
                Ok(NormalizedRow {
                    country,
                    year_month,
                    tonnes,
                    category,
                })
            })
            .collect()
    }
}

impl DuplicateOracle for SqliteTable {
    fn exists(&self, key: &KeyValue) -> Result<bool, PipelineError> {
        let predicate = key
            .parts()
            .iter()
            .enumerate()
            .map(|(idx, (column, _))| format!("{} = ?{}", column.column_name(), idx + 1))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {predicate}", self.name);
        let values = key.parts().iter().map(|(_, value)| value.as_str());

        let conn = self
            .lock_conn()
            .map_err(|err| PipelineError::DuplicateCheckFailed(err.to_string()))?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(values), |row| row.get(0))
            .map_err(|err| PipelineError::DuplicateCheckFailed(err.to_string()))?;
        Ok(count > 0)
    }
}

impl TableWriter for SqliteTable {
    fn insert_rows(&self, rows: &[NormalizedRow]) -> Result<Vec<RowError>, PipelineError> {
        let loaded_at = chrono::Utc::now().to_rfc3339();
        let mut conn = self.lock_conn()?;
        let tx = conn.transaction()?;
        let mut errors = Vec::new();
        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO {} (country, year_month, tonnes, category, loaded_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                self.name
            ))?;
            for (index, row) in rows.iter().enumerate() {
                let result = stmt.execute(params![
                    row.country,
                    row.year_month_iso(),
                    row.tonnes,
                    row.category,
                    loaded_at,
                ]);
                if let Err(err) = result {
                    errors.push(RowError {
                        index,
                        message: err.to_string(),
                    });
                }
            }
        }
        tx.commit()?;
        Ok(errors)
    }
}

/// Accepts plain SQL identifiers only; table names end up in statement text.
pub fn validate_identifier(name: &str) -> Result<(), PipelineError> {
    let mut chars = name.chars();
    let is_valid = chars
        .next()
        .map(|first| first.is_ascii_alphabetic() || first == '_')
        .unwrap_or(false)
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
    if !is_valid {
        return Err(PipelineError::InvalidConfig(format!(
            "table name must be an SQL identifier: {name}"
        )));
    }
    Ok(())
}

fn create_table_sql(settings: &TableSettings) -> String {
    let name = &settings.name;
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            country TEXT NOT NULL,
            year_month TEXT NOT NULL,
            tonnes REAL NOT NULL CHECK (tonnes >= 0),
            category TEXT NOT NULL,
            loaded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{name}_country_month ON {name} (country, year_month);"
    );
    if settings.unique_key {
        let columns = settings
            .natural_key
            .columns()
            .iter()
            .map(|column| column.column_name())
            .collect::<Vec<_>>();
        sql.push_str(&format!(
            "\nCREATE UNIQUE INDEX IF NOT EXISTS uq_{name}_{} ON {name} ({});",
            columns.join("_"),
            columns.join(", ")
        ));
    }
    sql
}
