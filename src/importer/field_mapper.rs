// ==========================================
// 禁令/召回记录导入管道 - 分层字段映射
// ==========================================
// 层级: 显式映射 → 同义词表 → 相似度 → 学习型分类（可选）
// 冲突: 先按层级、再按源字段顺序,落败字段进入扩展字段并记录歧义
// 红线: 未解析字段不丢弃,按原名原值保留在扩展字段
// ==========================================

use crate::domain::canonical::{lookup_alias, normalize_field_name, CanonicalField};
use crate::domain::record::{FieldAnnotation, MappingAmbiguity, MappingResult, SourceRecord};
use crate::domain::types::MappingTier;
use crate::importer::collaborators::{ClassificationRequest, FieldClassifier};
use crate::importer::mapping_cache::{shape_signature, LearnedDecision, MappingCache};
use crate::importer::similarity::{best_open_score, pick_unique_best, SimilarityPick};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 学习型层参数
struct LearnedTier {
    classifier: Arc<dyn FieldClassifier>,
    min_confidence: f64,
    sample_size: usize,
}

pub struct FieldMapper {
    explicit: BTreeMap<String, CanonicalField>,
    similarity_threshold: f64,
    learned: Option<LearnedTier>,
}

/// 单条记录映射过程中的可变状态
struct RecordMapping<'r> {
    record: &'r SourceRecord,
    result: MappingResult,
    pending: Vec<usize>,
}

impl<'r> RecordMapping<'r> {
    fn new(record: &'r SourceRecord) -> Self {
        Self {
            record,
            result: MappingResult::default(),
            pending: Vec::new(),
        }
    }

    fn is_claimed(&self, field: CanonicalField) -> bool {
        self.result.canonical_fields.contains_key(&field)
    }

    /// 占用标准字段; 已被占用时落败进入扩展字段
    fn claim(&mut self, idx: usize, field: CanonicalField, tier: MappingTier, confidence: f64) {
        let record = self.record;
        let (name, value) = &record.fields[idx];
        if let Some(winner) = self.result.annotations.get(&field) {
            self.result.ambiguities.push(MappingAmbiguity {
                source_field: name.clone(),
                candidates: vec![field],
                reason: format!(
                    "标准字段 {} 已由 {} ({}) 占用",
                    field, winner.source_field, winner.tier
                ),
            });
            self.result
                .extended_fields
                .insert(name.clone(), value.clone());
            return;
        }

        self.result.canonical_fields.insert(field, value.clone());
        self.result.annotations.insert(
            field,
            FieldAnnotation {
                source_field: name.clone(),
                tier,
                confidence,
            },
        );
    }

    fn finish(mut self) -> MappingResult {
        let record = self.record;
        for idx in self.pending {
            let (name, value) = &record.fields[idx];
            self.result
                .extended_fields
                .insert(name.clone(), value.clone());
        }
        self.result
    }
}

impl FieldMapper {
    /// 创建映射器（不含学习型层）
    ///
    /// # 参数
    /// - explicit: 调用方显式映射（源字段原名 → 标准字段）
    /// - similarity_threshold: 相似度接受阈值（严格大于）
    pub fn new(explicit: BTreeMap<String, CanonicalField>, similarity_threshold: f64) -> Self {
        Self {
            explicit,
            similarity_threshold,
            learned: None,
        }
    }

    /// 启用学习型层
    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn FieldClassifier>,
        min_confidence: f64,
        sample_size: usize,
    ) -> Self {
        self.learned = Some(LearnedTier {
            classifier,
            min_confidence,
            sample_size: sample_size.max(1),
        });
        self
    }

    pub fn learned_tier_enabled(&self) -> bool {
        self.learned.is_some()
    }

    /// 映射一条源记录
    ///
    /// # 参数
    /// - record: 源记录
    /// - cache: 批次级映射缓存（学习型层记忆 + 相似度打分）
    pub async fn map_record(&self, record: &SourceRecord, cache: &mut MappingCache) -> MappingResult {
        let mut mapping = RecordMapping::new(record);

        // 1. 显式映射
        for (idx, (name, _)) in record.fields.iter().enumerate() {
            match self.explicit.get(name) {
                Some(field) => mapping.claim(idx, *field, MappingTier::Explicit, 1.0),
                None => mapping.pending.push(idx),
            }
        }

        // 2. 同义词表
        let normalized: Vec<String> = record
            .fields
            .iter()
            .map(|(name, _)| normalize_field_name(name))
            .collect();
        let candidates = std::mem::take(&mut mapping.pending);
        for idx in candidates {
            match lookup_alias(&normalized[idx]) {
                Some(field) => mapping.claim(idx, field, MappingTier::Alias, 1.0),
                None => mapping.pending.push(idx),
            }
        }

        // 3. 相似度
        self.apply_similarity(&mut mapping, &normalized, cache);

        // 4. 学习型分类
        if let Some(learned) = &self.learned {
            self.apply_learned(learned, &mut mapping, &normalized, cache)
                .await;
        }

        mapping.finish()
    }

    fn apply_similarity(
        &self,
        mapping: &mut RecordMapping<'_>,
        normalized: &[String],
        cache: &mut MappingCache,
    ) {
        let candidates = std::mem::take(&mut mapping.pending);
        let mut scored: Vec<(usize, Vec<(CanonicalField, f64)>)> = Vec::new();
        for idx in candidates {
            if normalized[idx].is_empty() {
                mapping.pending.push(idx);
                continue;
            }
            let scores = cache.similarity_scores(&normalized[idx]).to_vec();
            scored.push((idx, scores));
        }

        // 高分字段优先占用; 同分按源顺序
        scored.sort_by(|(ia, sa), (ib, sb)| {
            let a = best_open_score(sa, |f| mapping.is_claimed(f));
            let b = best_open_score(sb, |f| mapping.is_claimed(f));
            b.total_cmp(&a).then(ia.cmp(ib))
        });

        for (idx, scores) in scored {
            match pick_unique_best(&scores, |f| mapping.is_claimed(f), self.similarity_threshold) {
                SimilarityPick::Accepted { field, score } => {
                    mapping.claim(idx, field, MappingTier::Similarity, score)
                }
                SimilarityPick::Tie { candidates, score } => {
                    mapping.result.ambiguities.push(MappingAmbiguity {
                        source_field: mapping.record.fields[idx].0.clone(),
                        candidates,
                        reason: format!("相似度并列最高 ({:.3})，保持未解析", score),
                    });
                    mapping.pending.push(idx);
                }
                SimilarityPick::BelowThreshold => mapping.pending.push(idx),
            }
        }
        mapping.pending.sort_unstable();
    }

    async fn apply_learned(
        &self,
        learned: &LearnedTier,
        mapping: &mut RecordMapping<'_>,
        normalized: &[String],
        cache: &mut MappingCache,
    ) {
        let record = mapping.record;
        let candidates = std::mem::take(&mut mapping.pending);
        for idx in candidates {
            let (name, value) = &record.fields[idx];
            if normalized[idx].is_empty() {
                mapping.pending.push(idx);
                continue;
            }

            let key = (normalized[idx].clone(), shape_signature([value]));
            let samples = cache.observe_sample(&normalized[idx], value, learned.sample_size);
            let decision = match cache.learned(&key) {
                Some(decision) => decision,
                None => {
                    cache.record_invocation();
                    let decision = self.consult(learned, name, samples).await;
                    tracing::debug!(
                        field = %name,
                        signature = %key.1,
                        decision = ?decision,
                        "学习型分类结果已缓存"
                    );
                    cache.remember_learned(key, decision);
                    decision
                }
            };

            match decision {
                LearnedDecision::Resolved { field, confidence } if !mapping.is_claimed(field) => {
                    mapping.claim(idx, field, MappingTier::Learned, confidence)
                }
                _ => mapping.pending.push(idx),
            }
        }
    }

    async fn consult(&self, learned: &LearnedTier, name: &str, samples: Vec<Value>) -> LearnedDecision {
        let request = ClassificationRequest::new(name, samples);
        match learned.classifier.suggest(&request).await {
            Ok(Some(suggestion)) => match CanonicalField::from_name(&suggestion.canonical) {
                Some(field) if suggestion.confidence >= learned.min_confidence => {
                    LearnedDecision::Resolved {
                        field,
                        confidence: suggestion.confidence.clamp(0.0, 1.0),
                    }
                }
                _ => LearnedDecision::Unresolved,
            },
            Ok(None) => LearnedDecision::Unresolved,
            Err(e) => {
                tracing::warn!(field = %name, error = %e, "学习型分类失败，按未解析处理");
                LearnedDecision::Unresolved
            }
        }
    }
}
