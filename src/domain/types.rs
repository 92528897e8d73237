// ==========================================
// 禁令/召回记录导入管道 - 领域类型定义
// ==========================================
// 职责: 格式、状态、映射层级、错误分类等枚举
// 序列化格式: SCREAMING_SNAKE_CASE (与状态查询接口一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 源数据格式 (Source Format)
// ==========================================
// 封闭枚举: 只有表格与层级两种,各自携带解析函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    Tabular,      // 平面表格 (CSV/TSV)
    Hierarchical, // 层级文档 (JSON / JSON Lines)
}

impl SourceFormat {
    /// 解析调用方提示值（大小写不敏感）
    ///
    /// # 返回
    /// - Some(SourceFormat): 受支持的提示值
    /// - None: 不受支持
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "tabular" => Some(SourceFormat::Tabular),
            "json" | "jsonl" | "ndjson" | "hierarchical" => Some(SourceFormat::Hierarchical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Tabular => "TABULAR",
            SourceFormat::Hierarchical => "HIERARCHICAL",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "TABULAR" => Some(SourceFormat::Tabular),
            "HIERARCHICAL" => Some(SourceFormat::Hierarchical),
            _ => None,
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 导入任务状态 (Import Status)
// ==========================================
// 状态机: PENDING → PROCESSING → {COMPLETED | PARTIAL | FAILED}
// 红线: 终态不可回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportStatus {
    Pending,    // 已提交,等待工作线程
    Processing, // 工作线程消费中
    Completed,  // 全部成功
    Partial,    // 部分成功
    Failed,     // 无成功记录 / 整批失败 / 已取消
}

impl ImportStatus {
    /// 状态序号（用于单调性校验）
    ///
    /// PENDING=0 < PROCESSING=1 < 终态=2
    pub fn rank(&self) -> u8 {
        match self {
            ImportStatus::Pending => 0,
            ImportStatus::Processing => 1,
            ImportStatus::Completed | ImportStatus::Partial | ImportStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }

    /// 判断是否允许从 self 迁移到 next
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// 流结束时的终态判定
    ///
    /// # 规则
    /// - success > 0 且 failure == 0 → COMPLETED
    /// - success > 0 且 failure > 0 → PARTIAL
    /// - success == 0 → FAILED（含零记录）
    pub fn resolve_terminal(success_count: u64, failure_count: u64) -> ImportStatus {
        match (success_count, failure_count) {
            (0, _) => ImportStatus::Failed,
            (_, 0) => ImportStatus::Completed,
            _ => ImportStatus::Partial,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "PENDING",
            ImportStatus::Processing => "PROCESSING",
            ImportStatus::Completed => "COMPLETED",
            ImportStatus::Partial => "PARTIAL",
            ImportStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ImportStatus::Pending),
            "PROCESSING" => Some(ImportStatus::Processing),
            "COMPLETED" => Some(ImportStatus::Completed),
            "PARTIAL" => Some(ImportStatus::Partial),
            "FAILED" => Some(ImportStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 映射层级 (Mapping Tier)
// ==========================================
// 顺序即优先级: Explicit > Alias > Similarity > Learned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingTier {
    Explicit,   // 调用方显式映射
    Alias,      // 静态同义词表
    Similarity, // 相似度打分
    Learned,    // 可选学习型分类
}

impl fmt::Display for MappingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingTier::Explicit => write!(f, "EXPLICIT"),
            MappingTier::Alias => write!(f, "ALIAS"),
            MappingTier::Similarity => write!(f, "SIMILARITY"),
            MappingTier::Learned => write!(f, "LEARNED"),
        }
    }
}

// ==========================================
// 导入错误分类 (Import Error Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImportErrorKind {
    FormatError,       // 输入形态无法识别（整批）
    ParseError,        // 单条语法错误 / 记录边界不可判定
    MappingAmbiguity,  // 仅提示,不致命
    ValidationError,   // 单条必填缺失 / 类型不可转换
    PersistenceError,  // 下游存储拒绝
    CancellationError, // 整批取消
}

impl ImportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportErrorKind::FormatError => "FORMAT_ERROR",
            ImportErrorKind::ParseError => "PARSE_ERROR",
            ImportErrorKind::MappingAmbiguity => "MAPPING_AMBIGUITY",
            ImportErrorKind::ValidationError => "VALIDATION_ERROR",
            ImportErrorKind::PersistenceError => "PERSISTENCE_ERROR",
            ImportErrorKind::CancellationError => "CANCELLATION_ERROR",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "FORMAT_ERROR" => Some(ImportErrorKind::FormatError),
            "PARSE_ERROR" => Some(ImportErrorKind::ParseError),
            "MAPPING_AMBIGUITY" => Some(ImportErrorKind::MappingAmbiguity),
            "VALIDATION_ERROR" => Some(ImportErrorKind::ValidationError),
            "PERSISTENCE_ERROR" => Some(ImportErrorKind::PersistenceError),
            "CANCELLATION_ERROR" => Some(ImportErrorKind::CancellationError),
            _ => None,
        }
    }
}

impl fmt::Display for ImportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 风险等级 (Risk Level)
// ==========================================
// 顺序: Low < Medium < High < Serious
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Serious,
}

impl RiskLevel {
    /// 枚举成员校验（大小写不敏感,含少量同义词）
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw
            .trim()
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        match normalized.as_str() {
            "low" | "low risk" | "minor" => Some(RiskLevel::Low),
            "medium" | "medium risk" | "moderate" => Some(RiskLevel::Medium),
            "high" | "high risk" => Some(RiskLevel::High),
            "serious" | "serious risk" | "severe" => Some(RiskLevel::Serious),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Serious => "SERIOUS",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_resolution() {
        assert_eq!(ImportStatus::resolve_terminal(7, 0), ImportStatus::Completed);
        assert_eq!(ImportStatus::resolve_terminal(7, 3), ImportStatus::Partial);
        assert_eq!(ImportStatus::resolve_terminal(0, 3), ImportStatus::Failed);
        assert_eq!(ImportStatus::resolve_terminal(0, 0), ImportStatus::Failed);
    }

    #[test]
    fn test_status_never_regresses() {
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Processing));
        assert!(ImportStatus::Pending.can_transition_to(ImportStatus::Failed));
        assert!(ImportStatus::Processing.can_transition_to(ImportStatus::Partial));
        assert!(!ImportStatus::Processing.can_transition_to(ImportStatus::Pending));
        assert!(!ImportStatus::Partial.can_transition_to(ImportStatus::Completed));
        assert!(!ImportStatus::Completed.can_transition_to(ImportStatus::Processing));
    }

    #[test]
    fn test_format_hint() {
        assert_eq!(SourceFormat::from_hint("CSV"), Some(SourceFormat::Tabular));
        assert_eq!(SourceFormat::from_hint(" ndjson "), Some(SourceFormat::Hierarchical));
        assert_eq!(SourceFormat::from_hint("xlsx"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ImportStatus::Partial).unwrap();
        assert_eq!(json, "\"PARTIAL\"");
    }

    #[test]
    fn test_risk_level_membership() {
        assert_eq!(RiskLevel::parse("Serious risk"), Some(RiskLevel::Serious));
        assert_eq!(RiskLevel::parse("moderate"), Some(RiskLevel::Medium));
        assert_eq!(RiskLevel::parse("catastrophic"), None);
    }
}
