// ==========================================
// 禁令/召回记录导入管道 - 导入配置
// ==========================================
// 职责: 导入管道全部可调参数及默认值
// 来源: 默认值 + config_kv 表覆写（见 ConfigManager）
// ==========================================

use crate::domain::canonical::CanonicalField;
use serde::{Deserialize, Serialize};

/// 导入配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// 错误列表上限（超出只计数）
    pub error_cap: usize,
    /// 相似度层接受阈值（严格大于）
    pub similarity_threshold: f64,
    /// 是否启用学习型分类层
    pub learned_tier_enabled: bool,
    /// 学习型分类层最低置信度
    pub learned_min_confidence: f64,
    /// 提供给学习型分类层的样本值个数上限
    pub learned_sample_size: usize,
    /// 层级文档包装键（按顺序识别）
    pub wrapper_keys: Vec<String>,
    /// 表格默认分隔符
    pub tabular_delimiter: char,
    /// 表格默认是否带表头
    pub tabular_has_header: bool,
    /// 格式嗅探前缀字节数
    pub sniff_prefix_bytes: usize,
    /// 并发导入数（工作池大小）
    pub worker_count: usize,
    /// 必填标准字段
    pub required_fields: Vec<CanonicalField>,
    /// 错误摘录最大字符数
    pub excerpt_max_chars: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            error_cap: 200,
            similarity_threshold: 0.75,
            learned_tier_enabled: false,
            learned_min_confidence: 0.5,
            learned_sample_size: 5,
            wrapper_keys: vec![
                "data".to_string(),
                "items".to_string(),
                "results".to_string(),
                "records".to_string(),
            ],
            tabular_delimiter: ',',
            tabular_has_header: true,
            sniff_prefix_bytes: 64 * 1024,
            worker_count: 4,
            required_fields: CanonicalField::DEFAULT_REQUIRED.to_vec(),
            excerpt_max_chars: 120,
        }
    }
}

impl ImportConfig {
    /// 启用学习型分类层（链式构造,便于测试/调用方覆写）
    pub fn with_learned_tier(mut self, enabled: bool) -> Self {
        self.learned_tier_enabled = enabled;
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_error_cap(mut self, error_cap: usize) -> Self {
        self.error_cap = error_cap;
        self
    }

    pub fn with_required_fields(mut self, fields: Vec<CanonicalField>) -> Self {
        self.required_fields = fields;
        self
    }
}
