// ==========================================
// 禁令/召回记录导入管道 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、标准 schema
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod canonical;
pub mod import_job;
pub mod record;
pub mod types;

// 重导出核心类型
pub use canonical::{lookup_alias, normalize_field_name, CanonicalField, FieldKind};
pub use import_job::{
    ImportJob, ImportJobError, ImportJobFilter, JobCounters, SourceDescriptor, StatusTransition,
};
pub use record::{
    CanonicalRecord, FieldAnnotation, MappingAmbiguity, MappingResult, SourceRecord,
};
pub use types::{ImportErrorKind, ImportStatus, MappingTier, RiskLevel, SourceFormat};
