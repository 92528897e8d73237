// ==========================================
// 禁令/召回记录导入管道 - 导入层
// ==========================================
// 职责: 格式识别 → 结构解析 → 字段映射 → 记录校验
// 支持: CSV/TSV 表格, JSON 文档 / JSON Lines
// 红线: 导入层不直接写库,持久化经由 CanonicalRecordRepository
// ==========================================

// 模块声明
pub mod collaborators;
pub mod error;
pub mod field_mapper;
pub mod format_detector;
pub mod mapping_cache;
pub mod record_validator;
pub mod similarity;
pub mod structure_parser;

// 重导出核心类型
pub use collaborators::{
    CanonicalRecordRepository, ClassificationHook, ClassificationRequest, ClassifierSuggestion,
    DownstreamWorkflow, FieldClassifier,
};
pub use error::{ImportError, ImportResult};
pub use field_mapper::FieldMapper;
pub use format_detector::{Detection, DetectionBasis, FormatDetector};
pub use mapping_cache::{LearnedDecision, MappingCache};
pub use record_validator::RecordValidator;
pub use structure_parser::{ParseOptions, RecordStream, StructureParser};
