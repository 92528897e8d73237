// ==========================================
// 禁令/召回记录导入管道 - 仓储层错误类型
// ==========================================
// 覆盖: 导入历史存储、规范记录存储、配置表
// 工具: thiserror 派生宏
// ==========================================

use thiserror::Error;

/// 导入任务实体名（NotFound 中使用）
pub const IMPORT_JOB_ENTITY: &str = "ImportJob";

/// 仓储层错误类型
#[derive(Error, Debug)]
pub enum RepositoryError {
    // ===== 存储访问 =====
    #[error("{entity}不存在: id={id}")]
    NotFound { entity: String, id: String },

    #[error("存储连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("存储锁获取失败: {0}")]
    LockError(String),

    #[error("存储读写失败: {0}")]
    DatabaseQueryError(String),

    #[error("主键重复: {0}")]
    UniqueConstraintViolation(String),

    // ===== 导入状态机 =====
    #[error("导入状态不可从 {from} 变更为 {to}")]
    InvalidStateTransition { from: String, to: String },

    // ===== 记录内容 =====
    #[error("JSON 列编解码失败: {0}")]
    SerializationError(String),

    #[error("字段 {field} 不可写入: {message}")]
    FieldValueError { field: String, message: String },

    #[error("仓储内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    /// 导入任务不存在
    pub fn job_not_found(import_id: &str) -> Self {
        RepositoryError::NotFound {
            entity: IMPORT_JOB_ENTITY.to_string(),
            id: import_id.to_string(),
        }
    }

    /// 是否为底层存储的暂时性故障（锁或连接）
    ///
    /// 导入工作线程不重试任何持久化错误,此判定只用于日志分级
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RepositoryError::LockError(_) | RepositoryError::DatabaseConnectionError(_)
        )
    }
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, msg) => {
                let detail = msg.unwrap_or_else(|| code.to_string());
                match code.code {
                    rusqlite::ErrorCode::ConstraintViolation if detail.contains("UNIQUE") => {
                        RepositoryError::UniqueConstraintViolation(detail)
                    }
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                        RepositoryError::LockError(detail)
                    }
                    rusqlite::ErrorCode::CannotOpen => {
                        RepositoryError::DatabaseConnectionError(detail)
                    }
                    _ => RepositoryError::DatabaseQueryError(detail),
                }
            }
            other => RepositoryError::DatabaseQueryError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::SerializationError(err.to_string())
    }
}

/// Result 类型别名
pub type RepositoryResult<T> = Result<T, RepositoryError>;
