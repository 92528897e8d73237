// ==========================================
// 禁令/召回记录导入管道 - 批次级映射缓存
// ==========================================
// 职责: 记忆学习型层决策 + 相似度打分,保证同批次决策一致
// 键: (规范化字段名, 样本值形态签名)
// 生命周期: 单个导入批次,由工作线程独占
// ==========================================

use crate::domain::canonical::CanonicalField;
use crate::importer::record_validator::{parse_date, parse_locale_integer};
use crate::importer::similarity::score_all;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// 超过该字符数视为长文本
const LONG_TEXT_CHARS: usize = 64;

/// 学习型层决策（已过滤置信度 / 未知字段）
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearnedDecision {
    Resolved {
        field: CanonicalField,
        confidence: f64,
    },
    Unresolved,
}

/// 缓存键
pub type SignatureKey = (String, String);

#[derive(Debug, Default)]
pub struct MappingCache {
    learned: HashMap<SignatureKey, LearnedDecision>,
    similarity: HashMap<String, Vec<(CanonicalField, f64)>>,
    samples: HashMap<String, Vec<Value>>,
    classifier_invocations: u64,
}

impl MappingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn learned(&self, key: &SignatureKey) -> Option<LearnedDecision> {
        self.learned.get(key).copied()
    }

    pub fn remember_learned(&mut self, key: SignatureKey, decision: LearnedDecision) {
        self.learned.insert(key, decision);
    }

    pub fn record_invocation(&mut self) {
        self.classifier_invocations += 1;
    }

    /// 本批次学习型分类器实际调用次数
    pub fn classifier_invocations(&self) -> u64 {
        self.classifier_invocations
    }

    /// 已缓存的学习型决策数
    pub fn learned_entries(&self) -> usize {
        self.learned.len()
    }

    /// 规范化名称对全部标准字段的打分（首次计算后复用）
    pub fn similarity_scores(&mut self, normalized: &str) -> &[(CanonicalField, f64)] {
        self.similarity
            .entry(normalized.to_string())
            .or_insert_with(|| score_all(normalized))
    }

    /// 记录样本值并返回该字段当前样本（去重,最多 max 个）
    pub fn observe_sample(&mut self, normalized: &str, value: &Value, max: usize) -> Vec<Value> {
        let samples = self.samples.entry(normalized.to_string()).or_default();
        if samples.len() < max && !samples.contains(value) {
            samples.push(value.clone());
        }
        samples.clone()
    }
}

/// 单个值的粗粒度形态
pub fn value_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "empty",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "decimal",
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                "empty"
            } else if matches!(
                s.to_ascii_lowercase().as_str(),
                "true" | "false" | "yes" | "no"
            ) {
                "bool"
            } else if parse_locale_integer(s).is_some() {
                "integer"
            } else if s.parse::<f64>().is_ok() {
                "decimal"
            } else if parse_date(s).is_some() {
                "date"
            } else if s.starts_with("http://") || s.starts_with("https://") {
                "url"
            } else if s.chars().count() > LONG_TEXT_CHARS {
                "long_text"
            } else {
                "text"
            }
        }
    }
}

/// 形态签名: 去重排序后以 | 连接
pub fn shape_signature<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .map(value_shape)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join("|")
}
