// ==========================================
// 禁令/召回记录导入管道 - 记录校验器
// ==========================================
// 职责: 默认上下文补齐 → 类型转换 → 必填校验 → CanonicalRecord
// 红线: 一条记录的全部违规合并为一条 ValidationError,不中断批次
// ==========================================

use crate::domain::canonical::{CanonicalField, FieldKind};
use crate::domain::record::{CanonicalRecord, MappingResult};
use crate::domain::types::RiskLevel;
use crate::importer::error::{ImportError, ImportResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;
use std::collections::BTreeMap;

/// 接受的日期格式（按顺序尝试）
const DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y", "%Y/%m/%d", "%Y%m%d", "%d %B %Y", "%B %d, %Y"];

/// 千分位分隔符（区域格式）
const GROUP_SEPARATORS: &[char] = &[',', '.', ' ', '\'', '\u{a0}', '\u{202f}'];

// ==========================================
// 类型转换工具
// ==========================================

/// 解析日期
///
/// 顺序: YYYY-MM-DD → RFC 3339 → YYYY-MM-DDTHH:MM:SS → DATE_FORMATS
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.date_naive());
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Some(ts.date());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// 区域格式感知的整数解析
///
/// 接受 `1234` / `1,234` / `1.234.567` / `1 234` / `1'234` / `+12`;
/// 拒绝小数尾（`12.5`）与混用分隔符
pub fn parse_locale_integer(raw: &str) -> Option<i64> {
    let value = raw.trim();
    let (negative, digits) = match value.as_bytes().first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    if digits.is_empty() {
        return None;
    }

    let separators: Vec<char> = digits.chars().filter(|c| !c.is_ascii_digit()).collect();
    let plain: String = if separators.is_empty() {
        digits.to_string()
    } else {
        let sep = separators[0];
        if !GROUP_SEPARATORS.contains(&sep) || separators.iter().any(|c| *c != sep) {
            return None;
        }
        let groups: Vec<&str> = digits.split(sep).collect();
        let first_ok = (1..=3).contains(&groups[0].len());
        let rest_ok = groups[1..].iter().all(|g| g.len() == 3);
        if !first_ok || !rest_ok {
            return None;
        }
        groups.concat()
    };

    let magnitude = plain.parse::<i64>().ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// 空值判定: null / 空白字符串
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// ==========================================
// RecordValidator - 记录校验器
// ==========================================
pub struct RecordValidator {
    required_fields: Vec<CanonicalField>,
    default_context: BTreeMap<CanonicalField, String>,
}

#[derive(Default)]
struct CoercedFields {
    text: BTreeMap<CanonicalField, String>,
    published_on: Option<NaiveDate>,
    units_affected: Option<i64>,
    risk_level: Option<RiskLevel>,
}

impl RecordValidator {
    pub fn new(
        required_fields: Vec<CanonicalField>,
        default_context: BTreeMap<CanonicalField, String>,
    ) -> Self {
        Self {
            required_fields,
            default_context,
        }
    }

    /// 校验并构建 CanonicalRecord
    ///
    /// # 参数
    /// - mapping: 字段映射结果
    /// - import_id: 所属导入
    /// - position: 源记录位置
    ///
    /// # 返回
    /// - Ok(CanonicalRecord): 可持久化记录
    /// - Err(ImportError::Validation): 全部违规合并后的说明
    pub fn validate(
        &self,
        mapping: MappingResult,
        import_id: &str,
        position: usize,
    ) -> ImportResult<CanonicalRecord> {
        let MappingResult {
            mut canonical_fields,
            extended_fields,
            ..
        } = mapping;

        // 默认上下文: 缺失或空白时补齐
        for (field, default) in &self.default_context {
            let missing = canonical_fields.get(field).map(is_blank).unwrap_or(true);
            if missing && !default.trim().is_empty() {
                canonical_fields.insert(*field, Value::String(default.clone()));
            }
        }

        let mut violations = Vec::new();
        let mut coerced = CoercedFields::default();

        for (field, value) in &canonical_fields {
            if is_blank(value) {
                continue;
            }
            if let Err(message) = coerce_into(&mut coerced, *field, value) {
                violations.push(message);
            }
        }

        for field in &self.required_fields {
            if !is_present(&coerced, *field) && !has_violation_for(&violations, *field) {
                violations.push(format!("缺少必填字段: {}", field));
            }
        }

        if !violations.is_empty() {
            return Err(ImportError::Validation(violations.join("; ")));
        }

        let mut text = coerced.text;
        Ok(CanonicalRecord {
            identifier: text.remove(&CanonicalField::Identifier).unwrap_or_default(),
            title: text.remove(&CanonicalField::Title).unwrap_or_default(),
            source_reference: text
                .remove(&CanonicalField::SourceReference)
                .unwrap_or_default(),
            issuing_authority: text
                .remove(&CanonicalField::IssuingAuthority)
                .unwrap_or_default(),
            description: text.remove(&CanonicalField::Description),
            brand: text.remove(&CanonicalField::Brand),
            category: text.remove(&CanonicalField::Category),
            hazard: text.remove(&CanonicalField::Hazard),
            remedy: text.remove(&CanonicalField::Remedy),
            country: text.remove(&CanonicalField::Country),
            published_on: coerced.published_on,
            units_affected: coerced.units_affected,
            risk_level: coerced.risk_level,
            extended_fields,
            import_id: import_id.to_string(),
            source_position: position,
        })
    }
}

fn coerce_into(out: &mut CoercedFields, field: CanonicalField, value: &Value) -> Result<(), String> {
    match field.kind() {
        FieldKind::Text => {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Object(_) | Value::Array(_) => {
                    return Err(format!("字段 {} 必须是文本，实际为嵌套结构", field));
                }
                Value::Null => return Ok(()),
            };
            out.text.insert(field, text);
        }
        FieldKind::Date => {
            let raw = scalar_text(value)
                .ok_or_else(|| format!("字段 {} 无法解析为日期: {}", field, value))?;
            let date = parse_date(&raw)
                .ok_or_else(|| format!("字段 {} 无法解析为日期: {}", field, raw))?;
            out.published_on = Some(date);
        }
        FieldKind::Integer => {
            let parsed = match value {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => parse_locale_integer(s),
                _ => None,
            };
            let units = parsed.ok_or_else(|| format!("字段 {} 无法解析为整数: {}", field, value))?;
            out.units_affected = Some(units);
        }
        FieldKind::RiskLevel => {
            let raw = scalar_text(value).unwrap_or_default();
            let level = RiskLevel::parse(&raw).ok_or_else(|| {
                format!(
                    "字段 {} 取值非法: {}（允许 low/medium/high/serious）",
                    field, value
                )
            })?;
            out.risk_level = Some(level);
        }
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_present(coerced: &CoercedFields, field: CanonicalField) -> bool {
    match field.kind() {
        FieldKind::Text => coerced
            .text
            .get(&field)
            .map(|s| !s.is_empty())
            .unwrap_or(false),
        FieldKind::Date => coerced.published_on.is_some(),
        FieldKind::Integer => coerced.units_affected.is_some(),
        FieldKind::RiskLevel => coerced.risk_level.is_some(),
    }
}

fn has_violation_for(violations: &[String], field: CanonicalField) -> bool {
    let tag = format!("字段 {} ", field);
    violations.iter().any(|v| v.starts_with(&tag))
}
