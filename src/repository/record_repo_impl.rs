// ==========================================
// 禁令/召回记录导入管道 - 标准记录 Repository（SQLite 实现）
// ==========================================
// 表: canonical_record（identifier 唯一,重复导入即更新）
// 红线: Repository 不含业务规则,只做数据 CRUD
// ==========================================

use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::record::CanonicalRecord;
use crate::domain::types::RiskLevel;
use crate::importer::collaborators::CanonicalRecordRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

// ==========================================
// SqliteRecordRepository
// ==========================================
pub struct SqliteRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordRepository {
    /// 打开数据库并建表
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        let repo = Self { conn };
        {
            let conn = repo.get_conn()?;
            configure_sqlite_connection(&conn)?;
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS canonical_record (
                  record_id TEXT PRIMARY KEY,
                  identifier TEXT NOT NULL UNIQUE,
                  title TEXT NOT NULL,
                  source_reference TEXT NOT NULL,
                  issuing_authority TEXT NOT NULL,
                  description TEXT,
                  brand TEXT,
                  category TEXT,
                  hazard TEXT,
                  remedy TEXT,
                  country TEXT,
                  published_on TEXT,
                  units_affected INTEGER,
                  risk_level TEXT,
                  extended_fields TEXT NOT NULL DEFAULT '{}',
                  import_id TEXT NOT NULL,
                  source_position INTEGER NOT NULL,
                  created_at TEXT NOT NULL,
                  updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_canonical_record_import
                  ON canonical_record(import_id, source_position);
                "#,
            )?;
        }
        Ok(repo)
    }

    fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 按标识查询
    pub fn find_by_identifier(&self, identifier: &str) -> RepositoryResult<Option<CanonicalRecord>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                r#"
                SELECT identifier, title, source_reference, issuing_authority, description,
                       brand, category, hazard, remedy, country, published_on, units_affected,
                       risk_level, extended_fields, import_id, source_position
                FROM canonical_record WHERE identifier = ?1
                "#,
                params![identifier],
                |row| {
                    Ok((
                        CanonicalRecord {
                            identifier: row.get(0)?,
                            title: row.get(1)?,
                            source_reference: row.get(2)?,
                            issuing_authority: row.get(3)?,
                            description: row.get(4)?,
                            brand: row.get(5)?,
                            category: row.get(6)?,
                            hazard: row.get(7)?,
                            remedy: row.get(8)?,
                            country: row.get(9)?,
                            published_on: row.get::<_, Option<NaiveDate>>(10)?,
                            units_affected: row.get(11)?,
                            risk_level: None,
                            extended_fields: BTreeMap::new(),
                            import_id: row.get(14)?,
                            source_position: row.get::<_, i64>(15)?.max(0) as usize,
                        },
                        row.get::<_, Option<String>>(12)?,
                        row.get::<_, String>(13)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((mut record, risk_level, extended_json)) => {
                record.risk_level = risk_level.as_deref().and_then(RiskLevel::parse);
                record.extended_fields = serde_json::from_str(&extended_json)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// 某次导入写入/更新的记录数
    pub fn count_by_import(&self, import_id: &str) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM canonical_record WHERE import_id = ?1",
            params![import_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl CanonicalRecordRepository for SqliteRecordRepository {
    async fn create_or_update(&self, record: &CanonicalRecord) -> RepositoryResult<String> {
        if record.identifier.trim().is_empty() {
            return Err(RepositoryError::FieldValueError {
                field: "identifier".to_string(),
                message: "标识为空，无法定位记录".to_string(),
            });
        }

        let extended_json = serde_json::to_string(&record.extended_fields)?;
        let now = Utc::now();
        let conn = self.get_conn()?;
        let record_id: String = conn.query_row(
            r#"
            INSERT INTO canonical_record (
              record_id, identifier, title, source_reference, issuing_authority, description,
              brand, category, hazard, remedy, country, published_on, units_affected,
              risk_level, extended_fields, import_id, source_position, created_at, updated_at
            ) VALUES (
              ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?18
            )
            ON CONFLICT(identifier) DO UPDATE SET
              title = excluded.title,
              source_reference = excluded.source_reference,
              issuing_authority = excluded.issuing_authority,
              description = excluded.description,
              brand = excluded.brand,
              category = excluded.category,
              hazard = excluded.hazard,
              remedy = excluded.remedy,
              country = excluded.country,
              published_on = excluded.published_on,
              units_affected = excluded.units_affected,
              risk_level = excluded.risk_level,
              extended_fields = excluded.extended_fields,
              import_id = excluded.import_id,
              source_position = excluded.source_position,
              updated_at = excluded.updated_at
            RETURNING record_id
            "#,
            params![
                uuid::Uuid::new_v4().to_string(),
                record.identifier,
                record.title,
                record.source_reference,
                record.issuing_authority,
                record.description,
                record.brand,
                record.category,
                record.hazard,
                record.remedy,
                record.country,
                record.published_on,
                record.units_affected,
                record.risk_level.map(|r| r.as_str()),
                extended_json,
                record.import_id,
                record.source_position as i64,
                now,
            ],
            |row| row.get(0),
        )?;
        Ok(record_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;
    use serde_json::json;

    fn repo() -> SqliteRecordRepository {
        let conn = open_in_memory_connection().unwrap();
        SqliteRecordRepository::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn record(identifier: &str, title: &str) -> CanonicalRecord {
        let mut extended = BTreeMap::new();
        extended.insert("Lot Code".to_string(), json!({"lots": ["A1"]}));
        CanonicalRecord {
            identifier: identifier.to_string(),
            title: title.to_string(),
            source_reference: "https://example.org".to_string(),
            issuing_authority: "Safety Gate".to_string(),
            description: None,
            brand: Some("Acme".to_string()),
            category: None,
            hazard: None,
            remedy: None,
            country: None,
            published_on: NaiveDate::from_ymd_opt(2024, 5, 1),
            units_affected: Some(120),
            risk_level: Some(RiskLevel::High),
            extended_fields: extended,
            import_id: "IMP-1".to_string(),
            source_position: 0,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_record_id() {
        let repo = repo();
        let first = repo.create_or_update(&record("R-1", "Toy")).await.unwrap();
        let second = repo
            .create_or_update(&record("R-1", "Toy (updated)"))
            .await
            .unwrap();
        assert_eq!(first, second);

        let stored = repo.find_by_identifier("R-1").unwrap().unwrap();
        assert_eq!(stored.title, "Toy (updated)");
        assert_eq!(stored.risk_level, Some(RiskLevel::High));
        assert_eq!(stored.extended_fields["Lot Code"], json!({"lots": ["A1"]}));
        assert_eq!(stored.published_on, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(repo.count_by_import("IMP-1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_identifier_rejected() {
        let repo = repo();
        let err = repo.create_or_update(&record("  ", "Toy")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::FieldValueError { .. }));
    }
}
