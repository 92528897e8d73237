// ==========================================
// 禁令/召回记录导入管道 - 标准字段定义
// ==========================================
// 职责: 固定目标 schema（标准字段、值类型、标签集、同义词表）
// 红线: 同义词表只读,跨导入共享
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 标准字段值类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    Text,      // 文本
    Date,      // 日期
    Integer,   // 整数（区域格式感知）
    RiskLevel, // 枚举: low/medium/high/serious
}

// ==========================================
// CanonicalField - 标准字段
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Identifier,
    Title,
    SourceReference,
    IssuingAuthority,
    Description,
    Brand,
    Category,
    Hazard,
    Remedy,
    Country,
    PublishedOn,
    UnitsAffected,
    RiskLevel,
}

impl CanonicalField {
    /// 全部标准字段（声明顺序,决定打分平局时的遍历顺序）
    pub const ALL: [CanonicalField; 13] = [
        CanonicalField::Identifier,
        CanonicalField::Title,
        CanonicalField::SourceReference,
        CanonicalField::IssuingAuthority,
        CanonicalField::Description,
        CanonicalField::Brand,
        CanonicalField::Category,
        CanonicalField::Hazard,
        CanonicalField::Remedy,
        CanonicalField::Country,
        CanonicalField::PublishedOn,
        CanonicalField::UnitsAffected,
        CanonicalField::RiskLevel,
    ];

    /// 默认必填字段
    pub const DEFAULT_REQUIRED: [CanonicalField; 4] = [
        CanonicalField::Identifier,
        CanonicalField::Title,
        CanonicalField::SourceReference,
        CanonicalField::IssuingAuthority,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CanonicalField::Identifier => "identifier",
            CanonicalField::Title => "title",
            CanonicalField::SourceReference => "source_reference",
            CanonicalField::IssuingAuthority => "issuing_authority",
            CanonicalField::Description => "description",
            CanonicalField::Brand => "brand",
            CanonicalField::Category => "category",
            CanonicalField::Hazard => "hazard",
            CanonicalField::Remedy => "remedy",
            CanonicalField::Country => "country",
            CanonicalField::PublishedOn => "published_on",
            CanonicalField::UnitsAffected => "units_affected",
            CanonicalField::RiskLevel => "risk_level",
        }
    }

    /// 按标准字段名查找（接受规范化前的写法）
    pub fn from_name(raw: &str) -> Option<Self> {
        let normalized = normalize_field_name(raw);
        Self::ALL.into_iter().find(|f| f.name() == normalized)
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            CanonicalField::PublishedOn => FieldKind::Date,
            CanonicalField::UnitsAffected => FieldKind::Integer,
            CanonicalField::RiskLevel => FieldKind::RiskLevel,
            _ => FieldKind::Text,
        }
    }

    /// 同义词表（已规范化: 小写 + 下划线分隔）
    ///
    /// 别名层只做精确查表,不做模糊匹配
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            CanonicalField::Identifier => &[
                "identifier",
                "id",
                "number",
                "ban_number",
                "recall_number",
                "recall_id",
                "ban_id",
                "reference_number",
                "notice_number",
                "case_number",
            ],
            CanonicalField::Title => &[
                "title",
                "name",
                "product_name",
                "product",
                "product_title",
                "subject",
                "headline",
            ],
            CanonicalField::SourceReference => &[
                "source_reference",
                "source",
                "source_url",
                "url",
                "link",
                "reference",
                "notice_url",
            ],
            CanonicalField::IssuingAuthority => &[
                "issuing_authority",
                "authority",
                "agency",
                "regulator",
                "issuer",
                "issued_by",
                "organisation",
                "organization",
            ],
            CanonicalField::Description => &["description", "details", "summary", "body", "text"],
            CanonicalField::Brand => &["brand", "manufacturer", "maker", "trademark"],
            CanonicalField::Category => &["category", "product_category", "product_type", "type"],
            CanonicalField::Hazard => &["hazard", "hazards", "risk", "danger", "risk_description"],
            CanonicalField::Remedy => &[
                "remedy",
                "measure",
                "measures",
                "action",
                "corrective_action",
                "remedy_action",
            ],
            CanonicalField::Country => &[
                "country",
                "country_of_origin",
                "origin",
                "notifying_country",
                "market",
            ],
            CanonicalField::PublishedOn => &[
                "date",
                "published",
                "published_on",
                "publication_date",
                "recall_date",
                "ban_date",
                "notice_date",
                "issued_on",
            ],
            CanonicalField::UnitsAffected => &[
                "units",
                "units_affected",
                "quantity",
                "affected_units",
                "number_of_units",
            ],
            CanonicalField::RiskLevel => &["risk_level", "risk_type", "severity", "hazard_level"],
        }
    }

    /// 相似度层使用的标签集（标准名 + 同义词）
    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = vec![self.name()];
        labels.extend(self.aliases().iter().copied().filter(|a| *a != self.name()));
        labels
    }

    /// 字段说明（提供给学习型分类层）
    pub fn description(&self) -> &'static str {
        match self {
            CanonicalField::Identifier => "Unique ban or recall number assigned by the issuer",
            CanonicalField::Title => "Name or title of the banned or recalled product",
            CanonicalField::SourceReference => "URL or citation of the official notice",
            CanonicalField::IssuingAuthority => "Regulator or agency that issued the notice",
            CanonicalField::Description => "Free-text description of the product and issue",
            CanonicalField::Brand => "Brand or manufacturer of the product",
            CanonicalField::Category => "Product category or type",
            CanonicalField::Hazard => "Hazard or risk posed by the product",
            CanonicalField::Remedy => "Corrective measure or remedy ordered",
            CanonicalField::Country => "Country of origin or notifying country",
            CanonicalField::PublishedOn => "Publication date of the notice",
            CanonicalField::UnitsAffected => "Number of affected units",
            CanonicalField::RiskLevel => "Risk severity: low, medium, high or serious",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 字段名规范化
///
/// # 规则
/// - 转小写
/// - 连续的非字母数字字符（空白、下划线、横线、点、斜杠等）折叠为单个 `_`
/// - 去除首尾 `_`
///
/// # 示例
/// - "Recall Number" → "recall_number"
/// - "  BAN-No. " → "ban_no"
pub fn normalize_field_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.trim().chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// 在同义词表中精确查找
pub fn lookup_alias(normalized: &str) -> Option<CanonicalField> {
    CanonicalField::ALL
        .into_iter()
        .find(|field| field.aliases().contains(&normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_field_name() {
        assert_eq!(normalize_field_name("Recall Number"), "recall_number");
        assert_eq!(normalize_field_name("  BAN-No. "), "ban_no");
        assert_eq!(normalize_field_name("product__NAME"), "product_name");
        assert_eq!(normalize_field_name("___"), "");
    }

    #[test]
    fn test_alias_lookup() {
        assert_eq!(lookup_alias("recall_number"), Some(CanonicalField::Identifier));
        assert_eq!(lookup_alias("ban_number"), Some(CanonicalField::Identifier));
        assert_eq!(lookup_alias("id"), Some(CanonicalField::Identifier));
        assert_eq!(lookup_alias("name"), Some(CanonicalField::Title));
        assert_eq!(lookup_alias("colour"), None);
    }

    #[test]
    fn test_aliases_are_unique_across_fields() {
        let mut seen = std::collections::HashSet::new();
        for field in CanonicalField::ALL {
            for alias in field.aliases() {
                assert!(seen.insert(*alias), "别名重复: {}", alias);
                assert_eq!(normalize_field_name(alias), *alias);
            }
        }
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            CanonicalField::from_name("Issuing Authority"),
            Some(CanonicalField::IssuingAuthority)
        );
        assert_eq!(CanonicalField::from_name("nope"), None);
    }
}
