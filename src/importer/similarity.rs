// ==========================================
// 禁令/召回记录导入管道 - 字段名相似度
// ==========================================
// 打分: 0.5 · 词元重叠 + 0.5 · Jaro-Winkler（均基于规范化名称）
// 词元重叠: 双向最佳匹配均值,单词元 Jaro-Winkler < 0.85 视为不匹配
// 工具: rapidfuzz
// ==========================================

use crate::domain::canonical::CanonicalField;
use rapidfuzz::distance::jaro_winkler;

/// 两个分数差值在此范围内视为并列
pub const TIE_EPSILON: f64 = 1e-6;

const TOKEN_MATCH_FLOOR: f64 = 0.85;

/// 相似度层判定结果
#[derive(Debug, Clone, PartialEq)]
pub enum SimilarityPick {
    /// 唯一最高分且超过阈值
    Accepted { field: CanonicalField, score: f64 },
    /// 最高分并列（保持未解析）
    Tie {
        candidates: Vec<CanonicalField>,
        score: f64,
    },
    /// 最高分未超过阈值
    BelowThreshold,
}

fn tokens(normalized: &str) -> Vec<&str> {
    normalized.split('_').filter(|t| !t.is_empty()).collect()
}

fn token_overlap(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let best = |token: &str, others: &[&str]| -> f64 {
        others
            .iter()
            .map(|other| jaro_winkler::similarity(token.chars(), other.chars()))
            .filter(|score| *score >= TOKEN_MATCH_FLOOR)
            .fold(0.0_f64, f64::max)
    };

    let forward: f64 = a.iter().map(|t| best(t, b)).sum();
    let backward: f64 = b.iter().map(|t| best(t, a)).sum();
    (forward + backward) / (a.len() + b.len()) as f64
}

/// 两个规范化名称的相似度 [0,1]
pub fn name_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let overlap = token_overlap(&tokens(a), &tokens(b));
    let edit = jaro_winkler::similarity(a.chars(), b.chars());
    (0.5 * overlap + 0.5 * edit).clamp(0.0, 1.0)
}

/// 规范化名称对某个标准字段的得分（取标签集最大值）
pub fn field_score(normalized: &str, field: CanonicalField) -> f64 {
    field
        .labels()
        .into_iter()
        .map(|label| name_similarity(normalized, label))
        .fold(0.0_f64, f64::max)
}

/// 对全部标准字段打分（按 CanonicalField::ALL 顺序）
pub fn score_all(normalized: &str) -> Vec<(CanonicalField, f64)> {
    CanonicalField::ALL
        .into_iter()
        .map(|field| (field, field_score(normalized, field)))
        .collect()
}

/// 在未占用字段中选取唯一最高分
///
/// # 参数
/// - scores: score_all 的结果
/// - is_claimed: 字段是否已被本条记录占用
/// - threshold: 接受阈值（严格大于）
pub fn pick_unique_best<F>(
    scores: &[(CanonicalField, f64)],
    is_claimed: F,
    threshold: f64,
) -> SimilarityPick
where
    F: Fn(CanonicalField) -> bool,
{
    let open: Vec<(CanonicalField, f64)> = scores
        .iter()
        .copied()
        .filter(|(field, _)| !is_claimed(*field))
        .collect();

    let top = open.iter().map(|(_, s)| *s).fold(f64::NEG_INFINITY, f64::max);
    if open.is_empty() || top <= threshold {
        return SimilarityPick::BelowThreshold;
    }

    let leaders: Vec<CanonicalField> = open
        .iter()
        .filter(|(_, s)| (top - *s).abs() <= TIE_EPSILON)
        .map(|(field, _)| *field)
        .collect();

    match leaders.as_slice() {
        [field] => SimilarityPick::Accepted {
            field: *field,
            score: top,
        },
        _ => SimilarityPick::Tie {
            candidates: leaders,
            score: top,
        },
    }
}

/// 未占用字段中的最高分（用于排序处理顺序）
pub fn best_open_score<F>(scores: &[(CanonicalField, f64)], is_claimed: F) -> f64
where
    F: Fn(CanonicalField) -> bool,
{
    scores
        .iter()
        .filter(|(field, _)| !is_claimed(*field))
        .map(|(_, s)| *s)
        .fold(0.0_f64, f64::max)
}
