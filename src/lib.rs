// ==========================================
// 禁令/召回记录导入管道 - 核心库
// ==========================================
// 技术栈: Rust + tokio + SQLite
// 系统定位: 异构批量数据 → 标准禁令/召回记录
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 导入历史 / 标准记录
pub mod repository;

// 引擎层 - 批次编排
pub mod engine;

// 导入层 - 格式识别 / 解析 / 映射 / 校验
pub mod importer;

// 配置层 - 导入配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 提交与查询接口
pub mod api;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ImportErrorKind, ImportStatus, MappingTier, RiskLevel, SourceFormat};

// 领域实体
pub use domain::{
    CanonicalField, CanonicalRecord, ImportJob, ImportJobError, ImportJobFilter, JobCounters,
    SourceDescriptor, SourceRecord,
};

// 引擎
pub use engine::{BatchOrchestrator, ImportHandle};

// API
pub use api::{ApiError, ApiResult, ImportApi, ImportRequest, ImportStatusResponse};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "禁令/召回记录导入管道";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
