// ==========================================
// 禁令/召回记录导入管道 - 导入API
// ==========================================
// 职责: 提交导入 / 查询状态 / 过滤列表 / 取消导入
// 红线: 提交只做参数校验,不做任何解析; 查询只读历史存储
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::ConfigManager;
use crate::db::open_sqlite_connection;
use crate::domain::canonical::CanonicalField;
use crate::domain::import_job::{ImportJob, ImportJobFilter, SourceDescriptor};
use crate::domain::types::{ImportErrorKind, ImportStatus, SourceFormat};
use crate::engine::BatchOrchestrator;
use crate::repository::{SqliteHistoryStore, SqliteRecordRepository};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// 导入提交请求
#[derive(Debug, Clone, Default)]
pub struct ImportRequest {
    /// 原始内容
    pub content: Vec<u8>,
    pub filename: Option<String>,
    /// 格式提示（csv / tsv / json / jsonl ...）
    pub format_hint: Option<String>,
    /// 声明的内容类型（MIME）
    pub content_type: Option<String>,
    /// 显式映射: 源字段名 → 标准字段名
    pub field_mapping: BTreeMap<String, String>,
    /// 默认上下文: 标准字段名 → 值
    pub default_context: BTreeMap<String, String>,
    pub delimiter: Option<char>,
    pub has_header: Option<bool>,
    pub auto_classify: bool,
    pub auto_trigger_workflow: bool,
}

/// 提交响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportSubmitResponse {
    pub import_id: String,
    pub status: ImportStatus,
}

/// 错误列表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportErrorEntry {
    pub record_position: Option<usize>,
    pub kind: ImportErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_excerpt: Option<String>,
}

/// 状态查询响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportStatusResponse {
    pub import_id: String,
    pub filename: Option<String>,
    pub status: ImportStatus,
    pub detected_format: Option<SourceFormat>,
    pub total_items: Option<u64>,
    pub items_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// total_items 未知时为 null
    pub progress: Option<f64>,
    pub errors: Vec<ImportErrorEntry>,
    /// 超出上限被截断的错误数
    pub error_overflow: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ImportJob> for ImportStatusResponse {
    fn from(job: &ImportJob) -> Self {
        Self {
            import_id: job.import_id.clone(),
            filename: job.source.filename.clone(),
            status: job.status,
            detected_format: job.detected_format,
            total_items: job.counters.total_items,
            items_processed: job.counters.items_processed,
            success_count: job.counters.success_count,
            failure_count: job.counters.failure_count,
            progress: job.progress(),
            errors: job
                .errors
                .iter()
                .map(|e| ImportErrorEntry {
                    record_position: e.record_position,
                    kind: e.kind,
                    message: e.message.clone(),
                    source_excerpt: e.source_excerpt.clone(),
                })
                .collect(),
            error_overflow: job.error_overflow,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// 导入API
pub struct ImportApi {
    orchestrator: Arc<BatchOrchestrator>,
}

impl ImportApi {
    pub fn new(orchestrator: Arc<BatchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// 基于单个 SQLite 数据库组装（配置 + 历史 + 标准记录共用一个连接）
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn open(db_path: &str) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| ApiError::DatabaseConnectionError(e.to_string()))?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(conn.clone())?.load_import_config()?;
        let history = Arc::new(SqliteHistoryStore::from_connection(conn.clone())?);
        let records = Arc::new(SqliteRecordRepository::from_connection(conn)?);
        info!(db_path = %db_path, workers = config.worker_count, "导入API已就绪");

        Ok(Self::new(Arc::new(BatchOrchestrator::new(
            config, history, records,
        ))))
    }

    /// 提交导入（立即返回导入 ID,状态 PENDING）
    ///
    /// # 返回
    /// - Ok(ImportSubmitResponse): 导入 ID
    /// - Err(InvalidInput): 映射目标 / 默认上下文字段 / 分隔符不合法
    pub async fn submit_import(&self, request: ImportRequest) -> ApiResult<ImportSubmitResponse> {
        let ImportRequest {
            content,
            filename,
            format_hint,
            content_type,
            field_mapping,
            default_context,
            delimiter,
            has_header,
            auto_classify,
            auto_trigger_workflow,
        } = request;

        let source = SourceDescriptor {
            filename,
            format_hint,
            content_type,
            field_mapping: resolve_field_mapping(field_mapping)?,
            default_context: resolve_default_context(default_context)?,
            delimiter: delimiter.map(validate_delimiter).transpose()?,
            has_header,
            auto_classify,
            auto_trigger_workflow,
        };

        let handle = self.orchestrator.submit(content, source).await?;
        Ok(ImportSubmitResponse {
            import_id: handle.import_id,
            status: ImportStatus::Pending,
        })
    }

    /// 查询导入状态
    pub async fn get_import_status(&self, import_id: &str) -> ApiResult<ImportStatusResponse> {
        let job = self
            .orchestrator
            .history()
            .get_job(import_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("导入(id={})不存在", import_id)))?;
        Ok(ImportStatusResponse::from(&job))
    }

    /// 过滤列表（新任务在前）
    pub async fn list_imports(
        &self,
        filter: &ImportJobFilter,
    ) -> ApiResult<Vec<ImportStatusResponse>> {
        let jobs = self.orchestrator.history().list_jobs(filter).await?;
        Ok(jobs.iter().map(ImportStatusResponse::from).collect())
    }

    /// 取消导入（终态或未知 ID 返回错误）
    pub async fn cancel_import(&self, import_id: &str) -> ApiResult<()> {
        self.orchestrator.cancel(import_id).await?;
        Ok(())
    }

    /// 轮询直到终态
    pub async fn wait_for_terminal(
        &self,
        import_id: &str,
        poll_interval: Duration,
    ) -> ApiResult<ImportStatusResponse> {
        loop {
            let status = self.get_import_status(import_id).await?;
            if status.status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

// ==========================================
// 提交参数校验
// ==========================================

fn resolve_field_mapping(
    raw: BTreeMap<String, String>,
) -> ApiResult<BTreeMap<String, CanonicalField>> {
    raw.into_iter()
        .map(|(source, target)| {
            CanonicalField::from_name(&target)
                .map(|field| (source.clone(), field))
                .ok_or_else(|| {
                    ApiError::InvalidInput(format!(
                        "显式映射 {} → {} 的目标不是标准字段",
                        source, target
                    ))
                })
        })
        .collect()
}

fn resolve_default_context(
    raw: BTreeMap<String, String>,
) -> ApiResult<BTreeMap<CanonicalField, String>> {
    raw.into_iter()
        .map(|(name, value)| {
            CanonicalField::from_name(&name)
                .map(|field| (field, value))
                .ok_or_else(|| ApiError::InvalidInput(format!("默认上下文字段未知: {}", name)))
        })
        .collect()
}

fn validate_delimiter(delimiter: char) -> ApiResult<char> {
    if delimiter.is_ascii() && !matches!(delimiter, '"' | '\n' | '\r') {
        Ok(delimiter)
    } else {
        Err(ApiError::InvalidInput(format!(
            "分隔符必须是单个 ASCII 字符（不含引号与换行）: {:?}",
            delimiter
        )))
    }
}
