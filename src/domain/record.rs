// ==========================================
// 禁令/召回记录导入管道 - 记录实体
// ==========================================
// 职责: 源记录（瞬态）、映射结果（瞬态）、标准记录（落库对象）
// ==========================================

use crate::domain::canonical::CanonicalField;
use crate::domain::types::{MappingTier, RiskLevel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// ==========================================
// SourceRecord - 源记录（瞬态）
// ==========================================
// 用途: 解析器输出,保持源字段顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub position: usize,              // 批次内 0 基位置（决定错误顺序）
    pub fields: Vec<(String, Value)>, // 原始字段名 → 原始值（有序）
    pub warnings: Vec<String>,        // 解析告警（如列宽不一致）
}

impl SourceRecord {
    pub fn new(position: usize, fields: Vec<(String, Value)>) -> Self {
        Self {
            position,
            fields,
            warnings: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// 生成错误摘录（截断,用于错误列表定位）
    pub fn excerpt(&self, max_len: usize) -> String {
        let rendered = self
            .fields
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(", ");
        truncate_chars(&rendered, max_len)
    }
}

/// 按字符截断（不拆分 UTF-8）
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_len).collect();
        out.push('…');
        out
    }
}

// ==========================================
// FieldAnnotation - 字段映射注解（诊断用）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAnnotation {
    pub source_field: String, // 源字段名
    pub tier: MappingTier,    // 命中层级
    pub confidence: f64,      // 置信度 [0,1]
}

// ==========================================
// MappingAmbiguity - 映射歧义（提示,非致命）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingAmbiguity {
    pub source_field: String,
    pub candidates: Vec<CanonicalField>,
    pub reason: String,
}

// ==========================================
// MappingResult - 单条记录映射结果（瞬态）
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingResult {
    pub canonical_fields: BTreeMap<CanonicalField, Value>,
    pub extended_fields: BTreeMap<String, Value>,
    pub annotations: BTreeMap<CanonicalField, FieldAnnotation>,
    pub ambiguities: Vec<MappingAmbiguity>,
}

impl MappingResult {
    pub fn tier_of(&self, field: CanonicalField) -> Option<MappingTier> {
        self.annotations.get(&field).map(|a| a.tier)
    }
}

// ==========================================
// CanonicalRecord - 标准记录
// ==========================================
// 所有权: 交给存储协作方之前归管道所有
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    // 必填
    pub identifier: String,
    pub title: String,
    pub source_reference: String,
    pub issuing_authority: String,

    // 可选文本
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub hazard: Option<String>,
    pub remedy: Option<String>,
    pub country: Option<String>,

    // 类型化字段
    pub published_on: Option<NaiveDate>,
    pub units_affected: Option<i64>,
    pub risk_level: Option<RiskLevel>,

    // 未映射字段（原名原值）
    pub extended_fields: BTreeMap<String, Value>,

    // 元信息
    pub import_id: String,
    pub source_position: usize,
}
