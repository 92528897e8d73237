// ==========================================
// 禁令/召回记录导入管道 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 分类: 整批错误（格式/结构/取消） vs 单条错误（解析/校验/持久化）
// ==========================================

use crate::domain::types::ImportErrorKind;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入模块错误类型
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 整批错误 =====
    #[error("格式不支持: {0}（仅支持 tabular / hierarchical）")]
    UnsupportedFormat(String),

    #[error("输入形态无法识别: {0}")]
    Format(String),

    #[error("记录边界无法确定: {0}")]
    Structure(String),

    #[error("源数据不含任何记录")]
    EmptySource,

    #[error("导入已取消")]
    Cancelled,

    // ===== 单条错误 =====
    #[error("记录解析失败 (位置 {position}): {message}")]
    Parse { position: usize, message: String },

    #[error("记录校验失败: {0}")]
    Validation(String),

    #[error("记录持久化失败: {0}")]
    Persistence(String),

    // ===== 调用方错误 =====
    #[error("提交参数错误: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ImportError {
    /// 对应的错误列表分类
    pub fn kind(&self) -> ImportErrorKind {
        match self {
            ImportError::UnsupportedFormat(_)
            | ImportError::Format(_)
            | ImportError::EmptySource => ImportErrorKind::FormatError,
            ImportError::Structure(_) | ImportError::Parse { .. } => ImportErrorKind::ParseError,
            ImportError::Cancelled => ImportErrorKind::CancellationError,
            ImportError::Validation(_) | ImportError::InvalidInput(_) => {
                ImportErrorKind::ValidationError
            }
            ImportError::Persistence(_)
            | ImportError::Repository(_)
            | ImportError::InternalError(_) => ImportErrorKind::PersistenceError,
        }
    }

    /// 是否为整批错误（直接进入 FAILED）
    pub fn is_batch_level(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::Format(_)
                | ImportError::Structure(_)
                | ImportError::EmptySource
                | ImportError::Cancelled
        )
    }
}

/// Result 类型别名
pub type ImportResult<T> = Result<T, ImportError>;
