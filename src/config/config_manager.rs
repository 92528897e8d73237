// ==========================================
// 禁令/召回记录导入管道 - 配置管理器
// ==========================================
// 职责: 从 config_kv 表读取导入配置覆写,合并到默认值
// 存储: config_kv 表 (scope_id + key → value)
// 约定: 非法值不报错,告警后回退默认值
// ==========================================

use crate::config::import_config::ImportConfig;
use crate::db::{configure_sqlite_connection, open_sqlite_connection};
use crate::domain::canonical::CanonicalField;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例（表不存在时自动创建）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Self::from_connection(Arc::new(Mutex::new(conn)))
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
            ensure_config_kv_table(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入 global scope 的配置值（UPSERT）
    pub fn set_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES (?1, ?2, ?3, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?3, updated_at = datetime('now')",
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 读取全部 import/ 前缀的覆写
    fn load_import_overrides(&self) -> RepositoryResult<HashMap<String, String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = ?1 AND key LIKE 'import/%'",
        )?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut overrides = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            overrides.insert(key, value);
        }
        Ok(overrides)
    }

    /// 加载导入配置（默认值 + config_kv 覆写）
    pub fn load_import_config(&self) -> RepositoryResult<ImportConfig> {
        let overrides = self.load_import_overrides()?;
        let mut config = ImportConfig::default();

        apply_parsed(&overrides, config_keys::ERROR_CAP, &mut config.error_cap);
        apply_parsed(
            &overrides,
            config_keys::SIMILARITY_THRESHOLD,
            &mut config.similarity_threshold,
        );
        apply_parsed(
            &overrides,
            config_keys::LEARNED_TIER_ENABLED,
            &mut config.learned_tier_enabled,
        );
        apply_parsed(
            &overrides,
            config_keys::LEARNED_MIN_CONFIDENCE,
            &mut config.learned_min_confidence,
        );
        apply_parsed(
            &overrides,
            config_keys::LEARNED_SAMPLE_SIZE,
            &mut config.learned_sample_size,
        );
        apply_parsed(
            &overrides,
            config_keys::TABULAR_DELIMITER,
            &mut config.tabular_delimiter,
        );
        apply_parsed(
            &overrides,
            config_keys::TABULAR_HAS_HEADER,
            &mut config.tabular_has_header,
        );
        apply_parsed(
            &overrides,
            config_keys::SNIFF_PREFIX_BYTES,
            &mut config.sniff_prefix_bytes,
        );
        apply_parsed(&overrides, config_keys::WORKER_COUNT, &mut config.worker_count);
        config.worker_count = config.worker_count.max(1);

        if !(0.0..=1.0).contains(&config.similarity_threshold) {
            tracing::warn!(
                config_key = config_keys::SIMILARITY_THRESHOLD,
                value = config.similarity_threshold,
                "相似度阈值越界，使用默认值"
            );
            config.similarity_threshold = ImportConfig::default().similarity_threshold;
        }

        if let Some(raw) = overrides.get(config_keys::WRAPPER_KEYS) {
            match serde_json::from_str::<Vec<String>>(raw) {
                Ok(keys) if !keys.is_empty() => config.wrapper_keys = keys,
                _ => tracing::warn!(
                    config_key = config_keys::WRAPPER_KEYS,
                    raw_value = %raw,
                    "包装键配置格式错误，使用默认值"
                ),
            }
        }

        if let Some(raw) = overrides.get(config_keys::REQUIRED_FIELDS) {
            match parse_required_fields(raw) {
                Some(fields) => config.required_fields = fields,
                None => tracing::warn!(
                    config_key = config_keys::REQUIRED_FIELDS,
                    raw_value = %raw,
                    "必填字段配置格式错误，使用默认值"
                ),
            }
        }

        Ok(config)
    }
}

/// 创建 config_kv 表（幂等）
pub fn ensure_config_kv_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS config_kv (
            scope_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (scope_id, key)
        );
        "#,
    )
}

fn apply_parsed<T: FromStr>(overrides: &HashMap<String, String>, key: &str, target: &mut T) {
    let Some(raw) = overrides.get(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(config_key = key, raw_value = %raw, "配置值无法解析，使用默认值"),
    }
}

/// 必填字段: JSON 字符串数组,元素为标准字段名
fn parse_required_fields(raw: &str) -> Option<Vec<CanonicalField>> {
    let names: Vec<String> = serde_json::from_str(raw).ok()?;
    names
        .iter()
        .map(|name| CanonicalField::from_name(name))
        .collect()
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 错误列表
    pub const ERROR_CAP: &str = "import/error_cap";

    // 字段映射
    pub const SIMILARITY_THRESHOLD: &str = "import/similarity_threshold";
    pub const LEARNED_TIER_ENABLED: &str = "import/learned_tier_enabled";
    pub const LEARNED_MIN_CONFIDENCE: &str = "import/learned_min_confidence";
    pub const LEARNED_SAMPLE_SIZE: &str = "import/learned_sample_size";

    // 结构解析
    pub const WRAPPER_KEYS: &str = "import/wrapper_keys"; // JSON 数组
    pub const TABULAR_DELIMITER: &str = "import/tabular_delimiter";
    pub const TABULAR_HAS_HEADER: &str = "import/tabular_has_header";
    pub const SNIFF_PREFIX_BYTES: &str = "import/sniff_prefix_bytes";

    // 执行
    pub const WORKER_COUNT: &str = "import/worker_count";

    // 校验
    pub const REQUIRED_FIELDS: &str = "import/required_fields"; // JSON 数组
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_connection;

    fn manager() -> ConfigManager {
        let conn = open_in_memory_connection().unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = manager().load_import_config().unwrap();
        assert_eq!(config, ImportConfig::default());
    }

    #[test]
    fn test_overrides_applied() {
        let mgr = manager();
        mgr.set_config_value(config_keys::ERROR_CAP, "10").unwrap();
        mgr.set_config_value(config_keys::TABULAR_DELIMITER, ";").unwrap();
        mgr.set_config_value(config_keys::LEARNED_TIER_ENABLED, "true").unwrap();
        mgr.set_config_value(config_keys::WRAPPER_KEYS, r#"["rows"]"#).unwrap();
        mgr.set_config_value(config_keys::REQUIRED_FIELDS, r#"["identifier"]"#)
            .unwrap();

        let config = mgr.load_import_config().unwrap();
        assert_eq!(config.error_cap, 10);
        assert_eq!(config.tabular_delimiter, ';');
        assert!(config.learned_tier_enabled);
        assert_eq!(config.wrapper_keys, vec!["rows"]);
        assert_eq!(config.required_fields, vec![CanonicalField::Identifier]);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let mgr = manager();
        mgr.set_config_value(config_keys::ERROR_CAP, "lots").unwrap();
        mgr.set_config_value(config_keys::SIMILARITY_THRESHOLD, "3.5").unwrap();
        mgr.set_config_value(config_keys::REQUIRED_FIELDS, r#"["colour"]"#)
            .unwrap();
        mgr.set_config_value(config_keys::WORKER_COUNT, "0").unwrap();

        let config = mgr.load_import_config().unwrap();
        let defaults = ImportConfig::default();
        assert_eq!(config.error_cap, defaults.error_cap);
        assert_eq!(config.similarity_threshold, defaults.similarity_threshold);
        assert_eq!(config.required_fields, defaults.required_fields);
        assert_eq!(config.worker_count, 1);
    }

    #[test]
    fn test_set_value_upsert() {
        let mgr = manager();
        mgr.set_config_value("import/error_cap", "5").unwrap();
        mgr.set_config_value("import/error_cap", "6").unwrap();
        assert_eq!(
            mgr.get_config_value("import/error_cap").unwrap(),
            Some("6".to_string())
        );
        assert_eq!(mgr.get_config_value("import/missing").unwrap(), None);
    }
}
