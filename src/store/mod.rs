//! Durable embedded artifact store: log entries, metrics, attributes, process
//! stats and child records, backed by an embedded SQLite file so state
//! survives process restart. One store per tracking directory.

mod models;
mod schema;

pub use models::{Attribute, ChildEntry, LogEntry, Metric, ProcStat};

use std::path::{Path, PathBuf};

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::StoreError;
use crate::types::{JobResult, LogSeverity, MetricScope};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;

/// Ordering and bound applied to a range query against the store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query {
    pub limit: Option<i64>,
    pub min_severity: Option<LogSeverity>,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    /// Opens (creating if absent) the SQLite file at `path` and runs pending
    /// embedded migrations.
    pub fn open(path: &Path) -> anyhow::Result<Store> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| StoreError::Open {
                path: path.display().to_string(),
                source: e.into(),
            })?;
        {
            let mut conn = pool.get()?;
            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| StoreError::Open {
                    path: path.display().to_string(),
                    source: anyhow::anyhow!("{e}"),
                })?;
        }
        Ok(Store {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn push_log(
        &self,
        severity: LogSeverity,
        message: impl Into<String>,
        timestamp: i64,
    ) -> anyhow::Result<i64> {
        use schema::log_entries::dsl;
        let mut conn = self.pool.get()?;
        let row = models::NewLogEntry {
            severity: severity as i32,
            message: message.into(),
            timestamp,
        };
        diesel::insert_into(dsl::log_entries)
            .values(&row)
            .execute(&mut conn)
            .map_err(StoreError::Operation)?;
        Ok(
            diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                "last_insert_rowid()",
            ))
            .get_result(&mut conn)
            .map_err(StoreError::Operation)?,
        )
    }

    pub fn logs(&self, query: Query) -> anyhow::Result<Vec<LogEntry>> {
        use schema::log_entries::dsl;
        let mut conn = self.pool.get()?;
        let mut q = dsl::log_entries
            .select(LogEntry::as_select())
            .order(dsl::uid.asc())
            .into_boxed();
        if let Some(min) = query.min_severity {
            q = q.filter(dsl::severity.ge(min as i32));
        }
        if let Some(limit) = query.limit {
            q = q.limit(limit);
        }
        Ok(q.load(&mut conn).map_err(StoreError::Operation)?)
    }

    pub fn count_logs_at_least(&self, severity: LogSeverity) -> anyhow::Result<i64> {
        use schema::log_entries::dsl;
        let mut conn = self.pool.get()?;
        Ok(dsl::log_entries
            .filter(dsl::severity.ge(severity as i32))
            .count()
            .get_result(&mut conn)
            .map_err(StoreError::Operation)?)
    }

    pub fn push_attribute(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> anyhow::Result<i64> {
        use schema::attributes::dsl;
        let mut conn = self.pool.get()?;
        let row = models::NewAttribute {
            name: name.into(),
            value: value.into(),
        };
        diesel::insert_into(dsl::attributes)
            .values(&row)
            .execute(&mut conn)
            .map_err(StoreError::Operation)?;
        Ok(
            diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                "last_insert_rowid()",
            ))
            .get_result(&mut conn)
            .map_err(StoreError::Operation)?,
        )
    }

    pub fn attributes(&self) -> anyhow::Result<Vec<Attribute>> {
        use schema::attributes::dsl;
        let mut conn = self.pool.get()?;
        Ok(dsl::attributes
            .select(Attribute::as_select())
            .order(dsl::uid.asc())
            .load(&mut conn)
            .map_err(StoreError::Operation)?)
    }

    pub fn push_proc_stat(&self, stat: ProcStatInput) -> anyhow::Result<i64> {
        use schema::proc_stats::dsl;
        let mut conn = self.pool.get()?;
        let row = models::NewProcStat {
            nproc: stat.nproc,
            cpu: stat.cpu,
            mem: stat.mem,
            vmem: stat.vmem,
            timestamp: stat.timestamp,
        };
        diesel::insert_into(dsl::proc_stats)
            .values(&row)
            .execute(&mut conn)
            .map_err(StoreError::Operation)?;
        Ok(
            diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                "last_insert_rowid()",
            ))
            .get_result(&mut conn)
            .map_err(StoreError::Operation)?,
        )
    }

    pub fn proc_stats(&self) -> anyhow::Result<Vec<ProcStat>> {
        use schema::proc_stats::dsl;
        let mut conn = self.pool.get()?;
        Ok(dsl::proc_stats
            .select(ProcStat::as_select())
            .order(dsl::uid.asc())
            .load(&mut conn)
            .map_err(StoreError::Operation)?)
    }

    /// Upserts a metric by `(scope, name)`, matching the uniqueness invariant
    /// in the data model.
    pub fn set_metric(&self, scope: MetricScope, name: &str, value: i64) -> anyhow::Result<()> {
        use schema::metrics::dsl;
        let mut conn = self.pool.get()?;
        let scope_str = scope.to_string();
        let existing: Option<i64> = dsl::metrics
            .filter(dsl::scope.eq(&scope_str))
            .filter(dsl::name.eq(name))
            .select(dsl::uid)
            .first(&mut conn)
            .optional()
            .map_err(StoreError::Operation)?;
        match existing {
            Some(uid) => {
                diesel::update(dsl::metrics.filter(dsl::uid.eq(uid)))
                    .set(dsl::value.eq(value))
                    .execute(&mut conn)
                    .map_err(StoreError::Operation)?;
            }
            None => {
                let row = models::NewMetric {
                    scope: scope_str,
                    name: name.to_string(),
                    value,
                };
                diesel::insert_into(dsl::metrics)
                    .values(&row)
                    .execute(&mut conn)
                    .map_err(StoreError::Operation)?;
            }
        }
        Ok(())
    }

    pub fn metrics(&self) -> anyhow::Result<Vec<Metric>> {
        use schema::metrics::dsl;
        let mut conn = self.pool.get()?;
        Ok(dsl::metrics
            .select(Metric::as_select())
            .load(&mut conn)
            .map_err(StoreError::Operation)?)
    }

    pub fn push_child(&self, entry: NewChild) -> anyhow::Result<i64> {
        use schema::child_entries::dsl;
        let mut conn = self.pool.get()?;
        let row = models::NewChildEntry {
            ident: entry.ident,
            server_url: entry.server_url.unwrap_or_default(),
            db_file: entry.db_file.unwrap_or_default(),
            started: entry.started,
            updated: entry.updated,
            stopped: entry.stopped,
            result: entry.result as i32,
            expected_children: entry.expected_children,
        };
        diesel::insert_into(dsl::child_entries)
            .values(&row)
            .execute(&mut conn)
            .map_err(StoreError::Operation)?;
        Ok(
            diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
                "last_insert_rowid()",
            ))
            .get_result(&mut conn)
            .map_err(StoreError::Operation)?,
        )
    }

    pub fn update_child_result(
        &self,
        uid: i64,
        result: JobResult,
        stopped: i64,
    ) -> anyhow::Result<()> {
        use schema::child_entries::dsl;
        let mut conn = self.pool.get()?;
        diesel::update(dsl::child_entries.filter(dsl::uid.eq(uid)))
            .set((
                dsl::result.eq(result as i32),
                dsl::stopped.eq(Some(stopped)),
            ))
            .execute(&mut conn)
            .map_err(StoreError::Operation)?;
        Ok(())
    }

    pub fn children(&self) -> anyhow::Result<Vec<ChildEntry>> {
        use schema::child_entries::dsl;
        let mut conn = self.pool.get()?;
        Ok(dsl::child_entries
            .select(ChildEntry::as_select())
            .order(dsl::uid.asc())
            .load(&mut conn)
            .map_err(StoreError::Operation)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcStatInput {
    pub nproc: i32,
    pub cpu: f64,
    pub mem: i64,
    pub vmem: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewChild {
    pub ident: String,
    pub server_url: Option<String>,
    pub db_file: Option<String>,
    pub started: Option<i64>,
    pub updated: Option<i64>,
    pub stopped: Option<i64>,
    pub result: JobResult,
    pub expected_children: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let store = Store::open(&path).unwrap();
        (dir, store)
    }

    #[test]
    fn push_and_read_logs_preserve_order() {
        let (_dir, store) = temp_store();
        store.push_log(LogSeverity::Info, "first", 1).unwrap();
        store.push_log(LogSeverity::Warning, "second", 2).unwrap();
        let logs = store.logs(Query::default()).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].severity(), LogSeverity::Warning);
    }

    #[test]
    fn metrics_upsert_by_scope_and_name() {
        let (_dir, store) = temp_store();
        store.set_metric(MetricScope::Own, "messages", 1).unwrap();
        store.set_metric(MetricScope::Own, "messages", 2).unwrap();
        let metrics = store.metrics().unwrap();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].value, 2);
    }

    #[test]
    fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let store = Store::open(&path).unwrap();
            store.push_attribute("cmd", "true").unwrap();
        }
        let store = Store::open(&path).unwrap();
        let attrs = store.attributes().unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "cmd");
    }
}
