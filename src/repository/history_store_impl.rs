// ==========================================
// 禁令/召回记录导入管道 - 导入历史 Store（SQLite 实现）
// ==========================================
// 表: import_job / import_job_transition / import_job_error
// 红线: 状态迁移与迁移日志在同一事务中写入
// ==========================================

use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::import_job::{
    ImportJob, ImportJobError, ImportJobFilter, JobCounters, SourceDescriptor, StatusTransition,
};
use crate::domain::types::{ImportErrorKind, ImportStatus, SourceFormat};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::history_store::{check_transition, ImportHistoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex, MutexGuard};

const JOB_COLUMNS: &str = "import_id, source_json, detected_format, status, total_items, \
     items_processed, success_count, failure_count, error_overflow, created_at, started_at, \
     completed_at";

// ==========================================
// SqliteHistoryStore
// ==========================================
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// 打开数据库并建表
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 共享已有连接（与 SqliteRecordRepository / ConfigManager 共用）
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let store = Self { conn };
        {
            let conn = store.get_conn()?;
            configure_sqlite_connection(&conn)?;
        }
        store.ensure_tables()?;
        Ok(store)
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    fn ensure_tables(&self) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS import_job (
              import_id TEXT PRIMARY KEY,
              filename TEXT,
              source_json TEXT NOT NULL,
              detected_format TEXT,
              status TEXT NOT NULL DEFAULT 'PENDING',
              total_items INTEGER,
              items_processed INTEGER NOT NULL DEFAULT 0,
              success_count INTEGER NOT NULL DEFAULT 0,
              failure_count INTEGER NOT NULL DEFAULT 0,
              error_overflow INTEGER NOT NULL DEFAULT 0,
              created_at TEXT NOT NULL,
              started_at TEXT,
              completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_import_job_status
              ON import_job(status, created_at);

            CREATE TABLE IF NOT EXISTS import_job_transition (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              import_id TEXT NOT NULL REFERENCES import_job(import_id),
              from_status TEXT NOT NULL,
              to_status TEXT NOT NULL,
              at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_import_job_transition_job
              ON import_job_transition(import_id, id);

            CREATE TABLE IF NOT EXISTS import_job_error (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              import_id TEXT NOT NULL REFERENCES import_job(import_id),
              record_position INTEGER,
              source_excerpt TEXT,
              kind TEXT NOT NULL,
              message TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_import_job_error_job
              ON import_job_error(import_id, id);
            "#,
        )?;
        Ok(())
    }

    /// 读取当前状态（不存在时 NotFound）
    fn current_status(conn: &Connection, import_id: &str) -> RepositoryResult<ImportStatus> {
        let raw: Option<String> = conn
            .query_row(
                "SELECT status FROM import_job WHERE import_id = ?1",
                params![import_id],
                |row| row.get(0),
            )
            .optional()?;
        let raw = raw.ok_or_else(|| RepositoryError::job_not_found(import_id))?;
        parse_status(&raw)
    }

    fn ensure_writable(conn: &Connection, import_id: &str) -> RepositoryResult<()> {
        let status = Self::current_status(conn, import_id)?;
        if status.is_terminal() {
            return Err(RepositoryError::InvalidStateTransition {
                from: status.to_string(),
                to: status.to_string(),
            });
        }
        Ok(())
    }

    fn load_job(conn: &Connection, import_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let sql = format!("SELECT {} FROM import_job WHERE import_id = ?1", JOB_COLUMNS);
        let job = conn
            .query_row(&sql, params![import_id], map_job_row)
            .optional()?;
        match job {
            Some(row) => {
                let mut job = row.into_job()?;
                job.errors = Self::load_errors(conn, import_id)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn load_errors(conn: &Connection, import_id: &str) -> RepositoryResult<Vec<ImportJobError>> {
        let mut stmt = conn.prepare(
            "SELECT record_position, source_excerpt, kind, message
             FROM import_job_error WHERE import_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![import_id], |row| {
            Ok((
                row.get::<_, Option<i64>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut errors = Vec::new();
        for row in rows {
            let (position, excerpt, kind, message) = row?;
            let kind = ImportErrorKind::from_db_str(&kind).ok_or_else(|| {
                RepositoryError::FieldValueError {
                    field: "kind".to_string(),
                    message: format!("未知错误分类: {}", kind),
                }
            })?;
            errors.push(ImportJobError {
                record_position: position.map(|p| p as usize),
                source_excerpt: excerpt,
                kind,
                message,
            });
        }
        Ok(errors)
    }
}

fn parse_status(raw: &str) -> RepositoryResult<ImportStatus> {
    ImportStatus::from_db_str(raw).ok_or_else(|| RepositoryError::FieldValueError {
        field: "status".to_string(),
        message: format!("未知状态: {}", raw),
    })
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// import_job 行（未解析的原始列）
struct JobRow {
    import_id: String,
    source_json: String,
    detected_format: Option<String>,
    status: String,
    total_items: Option<i64>,
    items_processed: i64,
    success_count: i64,
    failure_count: i64,
    error_overflow: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    /// 行 → ImportJob（errors 由调用方补齐）
    fn into_job(self) -> RepositoryResult<ImportJob> {
        let source: SourceDescriptor = serde_json::from_str(&self.source_json)?;
        Ok(ImportJob {
            import_id: self.import_id,
            source,
            detected_format: self
                .detected_format
                .as_deref()
                .and_then(SourceFormat::from_db_str),
            status: parse_status(&self.status)?,
            counters: JobCounters {
                total_items: self.total_items.map(|t| t.max(0) as u64),
                items_processed: self.items_processed.max(0) as u64,
                success_count: self.success_count.max(0) as u64,
                failure_count: self.failure_count.max(0) as u64,
            },
            errors: Vec::new(),
            error_overflow: self.error_overflow.max(0) as u64,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        import_id: row.get(0)?,
        source_json: row.get(1)?,
        detected_format: row.get(2)?,
        status: row.get(3)?,
        total_items: row.get(4)?,
        items_processed: row.get(5)?,
        success_count: row.get(6)?,
        failure_count: row.get(7)?,
        error_overflow: row.get(8)?,
        created_at: row.get(9)?,
        started_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

#[async_trait]
impl ImportHistoryStore for SqliteHistoryStore {
    async fn create_job(&self, job: &ImportJob) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let source_json = serde_json::to_string(&job.source)?;
        conn.execute(
            r#"
            INSERT INTO import_job (
              import_id, filename, source_json, detected_format, status, total_items,
              items_processed, success_count, failure_count, error_overflow,
              created_at, started_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                job.import_id,
                job.source.filename,
                source_json,
                job.detected_format.map(|f| f.as_str()),
                job.status.as_str(),
                job.counters.total_items.map(to_i64),
                to_i64(job.counters.items_processed),
                to_i64(job.counters.success_count),
                to_i64(job.counters.failure_count),
                to_i64(job.error_overflow),
                job.created_at,
                job.started_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    }

    async fn transition(
        &self,
        import_id: &str,
        to: ImportStatus,
        counters: JobCounters,
    ) -> RepositoryResult<ImportJob> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let from = Self::current_status(&tx, import_id)?;
        check_transition(from, to)?;

        let now = Utc::now();
        tx.execute(
            r#"
            UPDATE import_job SET
              status = ?2,
              total_items = ?3,
              items_processed = ?4,
              success_count = ?5,
              failure_count = ?6,
              started_at = CASE WHEN ?2 = 'PROCESSING' THEN ?7 ELSE started_at END,
              completed_at = CASE WHEN ?8 THEN ?7 ELSE completed_at END
            WHERE import_id = ?1
            "#,
            params![
                import_id,
                to.as_str(),
                counters.total_items.map(to_i64),
                to_i64(counters.items_processed),
                to_i64(counters.success_count),
                to_i64(counters.failure_count),
                now,
                to.is_terminal(),
            ],
        )?;
        tx.execute(
            "INSERT INTO import_job_transition (import_id, from_status, to_status, at)
             VALUES (?1, ?2, ?3, ?4)",
            params![import_id, from.as_str(), to.as_str(), now],
        )?;
        tx.commit()?;

        Self::load_job(&conn, import_id)?.ok_or_else(|| RepositoryError::job_not_found(import_id))
    }

    async fn set_detected_format(
        &self,
        import_id: &str,
        format: SourceFormat,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::ensure_writable(&conn, import_id)?;
        conn.execute(
            "UPDATE import_job SET detected_format = ?2 WHERE import_id = ?1",
            params![import_id, format.as_str()],
        )?;
        Ok(())
    }

    async fn update_counters(
        &self,
        import_id: &str,
        counters: JobCounters,
    ) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::ensure_writable(&conn, import_id)?;
        conn.execute(
            r#"
            UPDATE import_job SET
              total_items = ?2, items_processed = ?3, success_count = ?4, failure_count = ?5
            WHERE import_id = ?1
            "#,
            params![
                import_id,
                counters.total_items.map(to_i64),
                to_i64(counters.items_processed),
                to_i64(counters.success_count),
                to_i64(counters.failure_count),
            ],
        )?;
        Ok(())
    }

    async fn append_error(
        &self,
        import_id: &str,
        error: ImportJobError,
        cap: usize,
    ) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        Self::ensure_writable(&tx, import_id)?;

        let stored: i64 = tx.query_row(
            "SELECT COUNT(*) FROM import_job_error WHERE import_id = ?1",
            params![import_id],
            |row| row.get(0),
        )?;

        let kept = error.is_batch_level() || (stored.max(0) as usize) < cap;
        if kept {
            tx.execute(
                "INSERT INTO import_job_error (import_id, record_position, source_excerpt, kind, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    import_id,
                    error.record_position.map(|p| p as i64),
                    error.source_excerpt,
                    error.kind.as_str(),
                    error.message,
                ],
            )?;
        } else {
            tx.execute(
                "UPDATE import_job SET error_overflow = error_overflow + 1 WHERE import_id = ?1",
                params![import_id],
            )?;
        }
        tx.commit()?;
        Ok(kept)
    }

    async fn get_job(&self, import_id: &str) -> RepositoryResult<Option<ImportJob>> {
        let conn = self.get_conn()?;
        Self::load_job(&conn, import_id)
    }

    async fn list_jobs(&self, filter: &ImportJobFilter) -> RepositoryResult<Vec<ImportJob>> {
        let conn = self.get_conn()?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<SqlValue> = Vec::new();
        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(SqlValue::Text(status.as_str().to_string()));
        }
        if let Some(format) = filter.format {
            clauses.push("detected_format = ?");
            values.push(SqlValue::Text(format.as_str().to_string()));
        }
        if let Some(needle) = &filter.filename_contains {
            clauses.push("instr(filename, ?) > 0");
            values.push(SqlValue::Text(needle.clone()));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(SqlValue::Integer(filter.limit as i64));
        values.push(SqlValue::Integer(filter.offset as i64));

        let sql = format!(
            "SELECT {} FROM import_job {} ORDER BY created_at DESC, import_id DESC LIMIT ? OFFSET ?",
            JOB_COLUMNS, where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), map_job_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            let mut job = row?.into_job()?;
            job.errors = Self::load_errors(&conn, &job.import_id)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    async fn list_transitions(&self, import_id: &str) -> RepositoryResult<Vec<StatusTransition>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT from_status, to_status, at FROM import_job_transition
             WHERE import_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![import_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, DateTime<Utc>>(2)?,
            ))
        })?;

        let mut transitions = Vec::new();
        for row in rows {
            let (from, to, at) = row?;
            transitions.push(StatusTransition {
                import_id: import_id.to_string(),
                from: parse_status(&from)?,
                to: parse_status(&to)?,
                at,
            });
        }
        Ok(transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn store() -> (NamedTempFile, SqliteHistoryStore) {
        let file = NamedTempFile::new().unwrap();
        let store = SqliteHistoryStore::new(file.path().to_str().unwrap()).unwrap();
        (file, store)
    }

    fn pending(id: &str, filename: &str) -> ImportJob {
        let source = SourceDescriptor {
            filename: Some(filename.to_string()),
            ..Default::default()
        };
        ImportJob::new_pending(id.to_string(), source)
    }

    #[tokio::test]
    async fn test_roundtrip_and_transitions() {
        let (_file, store) = store();
        store.create_job(&pending("J1", "rapex.json")).await.unwrap();
        store
            .set_detected_format("J1", SourceFormat::Hierarchical)
            .await
            .unwrap();
        store
            .transition("J1", ImportStatus::Processing, JobCounters::default())
            .await
            .unwrap();

        let counters = JobCounters {
            total_items: Some(3),
            items_processed: 3,
            success_count: 2,
            failure_count: 1,
        };
        store
            .append_error(
                "J1",
                ImportJobError {
                    record_position: Some(1),
                    source_excerpt: Some("id=7".to_string()),
                    kind: ImportErrorKind::ValidationError,
                    message: "缺少必填字段: title".to_string(),
                },
                200,
            )
            .await
            .unwrap();
        let job = store
            .transition("J1", ImportStatus::Partial, counters)
            .await
            .unwrap();

        assert_eq!(job.status, ImportStatus::Partial);
        assert_eq!(job.detected_format, Some(SourceFormat::Hierarchical));
        assert_eq!(job.counters, counters);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].record_position, Some(1));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert_eq!(job.source.filename.as_deref(), Some("rapex.json"));

        let transitions = store.list_transitions("J1").await.unwrap();
        let path: Vec<_> = transitions.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (ImportStatus::Pending, ImportStatus::Processing),
                (ImportStatus::Processing, ImportStatus::Partial),
            ]
        );
    }

    #[tokio::test]
    async fn test_regression_rejected() {
        let (_file, store) = store();
        store.create_job(&pending("J1", "a.csv")).await.unwrap();
        store
            .transition("J1", ImportStatus::Completed, JobCounters::default())
            .await
            .unwrap();
        let err = store
            .transition("J1", ImportStatus::Processing, JobCounters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidStateTransition { .. }));
        assert!(store
            .append_error(
                "J1",
                ImportJobError::batch_level(ImportErrorKind::CancellationError, "x"),
                10
            )
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_error_overflow_counted() {
        let (_file, store) = store();
        store.create_job(&pending("J1", "a.csv")).await.unwrap();
        for i in 0..5 {
            let error = ImportJobError {
                record_position: Some(i),
                source_excerpt: None,
                kind: ImportErrorKind::ParseError,
                message: "bad line".to_string(),
            };
            store.append_error("J1", error, 3).await.unwrap();
        }
        let job = store.get_job("J1").await.unwrap().unwrap();
        assert_eq!(job.errors.len(), 3);
        assert_eq!(job.error_overflow, 2);
        let positions: Vec<_> = job.errors.iter().map(|e| e.record_position).collect();
        assert_eq!(positions, vec![Some(0), Some(1), Some(2)]);

        // 列表已满: 整批错误仍写入
        let kept = store
            .append_error(
                "J1",
                ImportJobError::batch_level(ImportErrorKind::CancellationError, "导入已取消"),
                3,
            )
            .await
            .unwrap();
        assert!(kept);
        let job = store.get_job("J1").await.unwrap().unwrap();
        assert_eq!(job.errors.len(), 4);
        assert_eq!(job.error_overflow, 2);
        assert_eq!(job.errors[3].kind, ImportErrorKind::CancellationError);
        assert_eq!(job.errors[3].record_position, None);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let (_file, store) = store();
        store.create_job(&pending("J1", "rapex_week1.csv")).await.unwrap();
        store.create_job(&pending("J2", "cpsc.json")).await.unwrap();
        store
            .transition("J2", ImportStatus::Failed, JobCounters::default())
            .await
            .unwrap();

        let by_name = store
            .list_jobs(&ImportJobFilter {
                filename_contains: Some("rapex".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].import_id, "J1");

        let failed = store
            .list_jobs(&ImportJobFilter {
                status: Some(ImportStatus::Failed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].import_id, "J2");

        let limited = store
            .list_jobs(&ImportJobFilter {
                limit: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        assert!(store.get_job("missing").await.unwrap().is_none());
    }
}
