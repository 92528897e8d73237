// ==========================================
// 禁令/召回记录导入管道 - 外部协作方接口
// ==========================================
// 职责: 持久化 / 单条分类钩子 / 下游流程 / 学习型字段分类
// 红线: 管道只依赖这些 trait,不依赖具体实现
// ==========================================

use crate::domain::canonical::CanonicalField;
use crate::domain::record::CanonicalRecord;
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==========================================
// CanonicalRecordRepository - 持久化协作方
// ==========================================
// 实现者: SqliteRecordRepository（rusqlite）
#[async_trait]
pub trait CanonicalRecordRepository: Send + Sync {
    /// 按标识创建或更新记录
    ///
    /// # 返回
    /// - Ok(String): 持久化后的记录 ID
    /// - Err: 存储拒绝（单条 PersistenceError,不重试）
    async fn create_or_update(&self, record: &CanonicalRecord) -> RepositoryResult<String>;
}

// ==========================================
// ClassificationHook - 单条分类钩子
// ==========================================
// 失败只记录日志,不影响记录结果
#[async_trait]
pub trait ClassificationHook: Send + Sync {
    async fn classify(&self, record_id: &str) -> anyhow::Result<()>;
}

// ==========================================
// DownstreamWorkflow - 导入完成后的下游流程
// ==========================================
#[async_trait]
pub trait DownstreamWorkflow: Send + Sync {
    async fn trigger(&self, import_id: &str) -> anyhow::Result<()>;
}

// ==========================================
// FieldClassifier - 学习型字段分类
// ==========================================

/// 分类请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequest {
    pub field_name: String,
    pub sample_values: Vec<Value>,
    /// (标准字段名, 说明)
    pub canonical_fields: Vec<(String, String)>,
}

impl ClassificationRequest {
    pub fn new(field_name: &str, sample_values: Vec<Value>) -> Self {
        Self {
            field_name: field_name.to_string(),
            sample_values,
            canonical_fields: CanonicalField::ALL
                .iter()
                .map(|f| (f.name().to_string(), f.description().to_string()))
                .collect(),
        }
    }
}

/// 分类建议
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSuggestion {
    /// 建议的标准字段名（可能不在标准 schema 内）
    pub canonical: String,
    pub confidence: f64,
}

/// 非确定性分类器,结果由批次级 MappingCache 记忆
#[async_trait]
pub trait FieldClassifier: Send + Sync {
    async fn suggest(
        &self,
        request: &ClassificationRequest,
    ) -> anyhow::Result<Option<ClassifierSuggestion>>;
}
