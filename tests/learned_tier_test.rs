// ==========================================
// 学习型分类层测试
// ==========================================
// 测试目标: 批次级记忆,同一 (字段名, 形态签名) 只调用一次分类器
// ==========================================


use async_trait::async_trait;
use recall_import::config::ImportConfig;
use recall_import::domain::ImportStatus;
use recall_import::importer::{ClassificationRequest, ClassifierSuggestion, FieldClassifier};
use recall_import::logging;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use test_helpers::{in_memory_orchestrator, run_to_terminal, source_with_defaults, MemoryRecordRepository};

/// 按字段名记录调用次数; lot_code → brand, 其余无建议
#[derive(Default)]
struct RecordingClassifier {
    calls: Mutex<HashMap<String, usize>>,
}

impl RecordingClassifier {
    fn calls_for(&self, field: &str) -> usize {
        self.calls.lock().unwrap().get(field).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FieldClassifier for RecordingClassifier {
    async fn suggest(
        &self,
        request: &ClassificationRequest,
    ) -> anyhow::Result<Option<ClassifierSuggestion>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.field_name.clone())
            .or_default() += 1;

        assert!(!request.sample_values.is_empty());
        assert_eq!(request.canonical_fields.len(), 13);

        if request.field_name == "lot_code" {
            Ok(Some(ClassifierSuggestion {
                canonical: "brand".to_string(),
                confidence: 0.9,
            }))
        } else {
            Ok(None)
        }
    }
}

fn batch() -> Vec<Value> {
    (0..1000)
        .map(|i| {
            if i < 900 {
                json!({
                    "recall_number": format!("R-{}", i),
                    "title": "Toy",
                    "lot_code": format!("Acme lot {}", i % 7),
                })
            } else {
                json!({
                    "recall_number": format!("R-{}", i),
                    "title": "Toy",
                    "shelf": i,
                })
            }
        })
        .collect()
}

#[tokio::test]
async fn test_classifier_invoked_once_per_signature() {
    logging::init_test();

    let classifier = Arc::new(RecordingClassifier::default());
    let repo = Arc::new(MemoryRecordRepository::default());
    let config = ImportConfig::default().with_learned_tier(true);
    let (_history, orchestrator) = in_memory_orchestrator(config, repo.clone());
    let orchestrator = orchestrator.with_classifier(classifier.clone());

    let content = serde_json::to_vec(&batch()).unwrap();
    let job = run_to_terminal(&orchestrator, content, source_with_defaults(None)).await;

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(job.counters.success_count, 1000);
    assert!(classifier.calls_for("lot_code") <= 1);
    assert!(classifier.calls_for("shelf") <= 1);
    assert_eq!(classifier.total_calls(), 2);

    // 同签名决策一致: 900 条全部映射到 brand
    let stored = repo.stored();
    let with_lot: Vec<_> = stored.iter().filter(|r| r.source_position < 900).collect();
    assert_eq!(with_lot.len(), 900);
    assert!(with_lot
        .iter()
        .all(|r| r.brand.as_deref().map_or(false, |b| b.starts_with("Acme lot"))
            && !r.extended_fields.contains_key("lot_code")));

    // 无建议的字段保留在扩展字段
    assert!(stored
        .iter()
        .filter(|r| r.source_position >= 900)
        .all(|r| r.brand.is_none() && r.extended_fields.contains_key("shelf")));
}

#[tokio::test]
async fn test_learned_tier_disabled_by_config() {
    logging::init_test();

    let classifier = Arc::new(RecordingClassifier::default());
    let repo = Arc::new(MemoryRecordRepository::default());
    let (_history, orchestrator) = in_memory_orchestrator(ImportConfig::default(), repo.clone());
    let orchestrator = orchestrator.with_classifier(classifier.clone());

    let content = serde_json::to_vec(&batch()[..10]).unwrap();
    let job = run_to_terminal(&orchestrator, content, source_with_defaults(None)).await;

    assert_eq!(job.status, ImportStatus::Completed);
    assert_eq!(classifier.total_calls(), 0);
    assert!(repo
        .stored()
        .iter()
        .all(|r| r.extended_fields.contains_key("lot_code")));
}
