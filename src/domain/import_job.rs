// ==========================================
// 禁令/召回记录导入管道 - 导入任务实体
// ==========================================
// 职责: SourceDescriptor / ImportJob / 错误列表 / 状态迁移记录
// 红线: ImportJob 只由 BatchOrchestrator 修改,终态后只追加不删除
// ==========================================

use crate::domain::canonical::CanonicalField;
use crate::domain::types::{ImportErrorKind, ImportStatus, SourceFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ==========================================
// SourceDescriptor - 源描述（提交时创建,不可变）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub filename: Option<String>,                            // 文件名
    pub format_hint: Option<String>,                         // 调用方显式格式提示（原值）
    pub content_type: Option<String>,                        // 声明的内容描述（MIME）
    pub field_mapping: BTreeMap<String, CanonicalField>,     // 显式映射: 源字段名 → 标准字段
    pub default_context: BTreeMap<CanonicalField, String>,   // 默认上下文（如发布机构）
    pub delimiter: Option<char>,                             // 表格分隔符覆盖
    pub has_header: Option<bool>,                            // 表头开关覆盖
    pub auto_classify: bool,                                 // 单条分类钩子开关
    pub auto_trigger_workflow: bool,                         // 导入后下游流程开关
}

// ==========================================
// ImportJobError - 错误列表条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJobError {
    pub record_position: Option<usize>, // 记录位置（整批错误为 None）
    pub source_excerpt: Option<String>, // 源记录摘录 / 标识
    pub kind: ImportErrorKind,          // 错误分类
    pub message: String,                // 错误说明
}

impl ImportJobError {
    pub fn batch_level(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self {
            record_position: None,
            source_excerpt: None,
            kind,
            message: message.into(),
        }
    }

    /// 整批错误（无记录位置）
    pub fn is_batch_level(&self) -> bool {
        self.record_position.is_none()
    }
}

// ==========================================
// JobCounters - 计数快照
// ==========================================
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total_items: Option<u64>,
    pub items_processed: u64,
    pub success_count: u64,
    pub failure_count: u64,
}

// ==========================================
// ImportJob - 导入任务
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub import_id: String,                     // 导入 ID（UUID）
    pub source: SourceDescriptor,              // 源描述
    pub detected_format: Option<SourceFormat>, // 识别出的格式
    pub status: ImportStatus,                  // 当前状态
    pub counters: JobCounters,                 // 计数
    pub errors: Vec<ImportJobError>,           // 错误列表（有上限,按输入顺序）
    pub error_overflow: u64,                   // 超出上限被截断的错误数
    pub created_at: DateTime<Utc>,             // 提交时间
    pub started_at: Option<DateTime<Utc>>,     // 进入 PROCESSING 时间
    pub completed_at: Option<DateTime<Utc>>,   // 进入终态时间
}

impl ImportJob {
    /// 提交时创建（状态 PENDING）
    pub fn new_pending(import_id: String, source: SourceDescriptor) -> Self {
        Self {
            import_id,
            source,
            detected_format: None,
            status: ImportStatus::Pending,
            counters: JobCounters::default(),
            errors: Vec::new(),
            error_overflow: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 进度 = items_processed / total_items
    ///
    /// total_items 未知或为 0 时返回 None
    pub fn progress(&self) -> Option<f64> {
        match self.counters.total_items {
            Some(total) if total > 0 => {
                Some((self.counters.items_processed as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }

    /// 追加错误（超过上限只计数; 整批错误不受上限约束）
    ///
    /// # 返回
    /// - true: 已写入列表
    /// - false: 已截断,仅计入 overflow
    pub fn push_error(&mut self, error: ImportJobError, cap: usize) -> bool {
        if error.is_batch_level() || self.errors.len() < cap {
            self.errors.push(error);
            true
        } else {
            self.error_overflow += 1;
            false
        }
    }
}

// ==========================================
// StatusTransition - 状态迁移日志（只追加）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub import_id: String,
    pub from: ImportStatus,
    pub to: ImportStatus,
    pub at: DateTime<Utc>,
}

// ==========================================
// ImportJobFilter - 列表过滤条件
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJobFilter {
    pub status: Option<ImportStatus>,
    pub filename_contains: Option<String>,
    pub format: Option<SourceFormat>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ImportJobFilter {
    fn default() -> Self {
        Self {
            status: None,
            filename_contains: None,
            format: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl ImportJobFilter {
    pub fn matches(&self, job: &ImportJob) -> bool {
        if let Some(status) = self.status {
            if job.status != status {
                return false;
            }
        }
        if let Some(format) = self.format {
            if job.detected_format != Some(format) {
                return false;
            }
        }
        if let Some(needle) = &self.filename_contains {
            match &job.source.filename {
                Some(name) if name.contains(needle.as_str()) => {}
                _ => return false,
            }
        }
        true
    }
}
