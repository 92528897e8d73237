// ==========================================
// 批次生命周期测试
// ==========================================
// 测试目标: 并发轮询不回退、取消、工作池排队、持久化失败、错误上限
// ==========================================


use async_trait::async_trait;
use futures::future::join_all;
use recall_import::config::ImportConfig;
use recall_import::domain::{
    CanonicalRecord, ImportErrorKind, ImportJob, ImportJobError, ImportJobFilter, ImportStatus,
    JobCounters, SourceFormat, StatusTransition,
};
use recall_import::engine::BatchOrchestrator;
use recall_import::importer::CanonicalRecordRepository;
use recall_import::logging;
use recall_import::repository::{
    ImportHistoryStore, InMemoryHistoryStore, RepositoryError, RepositoryResult,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use test_helpers::{
    in_memory_orchestrator, recall_json, run_to_terminal, source_with_defaults,
    MemoryRecordRepository,
};

/// 第一条记录阻塞,直到测试放行
#[derive(Default)]
struct GatedRepository {
    entered: Notify,
    release: Notify,
    gated: AtomicBool,
    stored: AtomicUsize,
}

#[async_trait]
impl CanonicalRecordRepository for GatedRepository {
    async fn create_or_update(&self, record: &CanonicalRecord) -> RepositoryResult<String> {
        if !self.gated.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.stored.fetch_add(1, Ordering::SeqCst);
        Ok(record.identifier.clone())
    }
}

fn json_batch(count: usize) -> Vec<u8> {
    let records: Vec<Value> = (0..count).map(|i| recall_json(i, Some("Toy"))).collect();
    serde_json::to_vec(&records).unwrap()
}

#[tokio::test]
async fn test_concurrent_pollers_never_observe_regression() {
    logging::init_test();

    let repo = Arc::new(MemoryRecordRepository::default());
    let (history, orchestrator) = in_memory_orchestrator(ImportConfig::default(), repo);
    let handle = orchestrator
        .submit(json_batch(300), source_with_defaults(None))
        .await
        .unwrap();
    let import_id = handle.import_id.clone();

    let pollers = (0..4).map(|_| {
        let history = history.clone();
        let import_id = import_id.clone();
        tokio::spawn(async move {
            let mut last_rank = 0;
            let mut last_processed = 0;
            loop {
                let job = history.get_job(&import_id).await.unwrap().unwrap();
                assert!(job.status.rank() >= last_rank, "状态回退: {}", job.status);
                assert!(job.counters.items_processed >= last_processed);
                last_rank = job.status.rank();
                last_processed = job.counters.items_processed;
                if job.status.is_terminal() {
                    return job.status;
                }
                tokio::task::yield_now().await;
            }
        })
    });

    let finals = join_all(pollers).await;
    handle.wait().await.unwrap();
    for status in finals {
        assert_eq!(status.unwrap(), ImportStatus::Completed);
    }

    let transitions = history.list_transitions(&import_id).await.unwrap();
    let path: Vec<(ImportStatus, ImportStatus)> =
        transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (ImportStatus::Pending, ImportStatus::Processing),
            (ImportStatus::Processing, ImportStatus::Completed),
        ]
    );
}

#[tokio::test]
async fn test_cancel_between_records() {
    logging::init_test();

    let repo = Arc::new(GatedRepository::default());
    let (history, orchestrator) = in_memory_orchestrator(ImportConfig::default(), repo.clone());
    let handle = orchestrator
        .submit(json_batch(50), source_with_defaults(None))
        .await
        .unwrap();
    let import_id = handle.import_id.clone();

    repo.entered.notified().await;
    orchestrator.cancel(&import_id).await.unwrap();
    repo.release.notify_one();
    handle.wait().await.unwrap();

    let job = history.get_job(&import_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert_eq!(job.counters.items_processed, 1);
    assert_eq!(job.counters.success_count, 1);
    assert_eq!(job.counters.total_items, Some(50));
    // 已持久化的记录不回滚
    assert_eq!(repo.stored.load(Ordering::SeqCst), 1);

    let last = job.errors.last().unwrap();
    assert_eq!(last.kind, ImportErrorKind::CancellationError);
    assert_eq!(last.record_position, None);
}

#[tokio::test]
async fn test_queued_import_cancelled_while_pending() {
    logging::init_test();

    let repo = Arc::new(GatedRepository::default());
    let config = ImportConfig::default().with_worker_count(1);
    let (history, orchestrator) = in_memory_orchestrator(config, repo.clone());

    let first = orchestrator
        .submit(json_batch(3), source_with_defaults(None))
        .await
        .unwrap();
    repo.entered.notified().await;

    let second = orchestrator
        .submit(json_batch(3), source_with_defaults(None))
        .await
        .unwrap();
    let second_id = second.import_id.clone();
    tokio::task::yield_now().await;

    // 工作池已满: 第二个导入保持 PENDING
    let queued = history.get_job(&second_id).await.unwrap().unwrap();
    assert_eq!(queued.status, ImportStatus::Pending);

    orchestrator.cancel(&second_id).await.unwrap();
    repo.release.notify_one();
    first.wait().await.unwrap();
    second.wait().await.unwrap();

    let job = history.get_job(&second_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert_eq!(job.counters.items_processed, 0);
    assert!(job.started_at.is_none());
    assert_eq!(job.errors[0].kind, ImportErrorKind::CancellationError);

    let transitions = history.list_transitions(&second_id).await.unwrap();
    assert_eq!(transitions.len(), 1);
    assert_eq!(transitions[0].from, ImportStatus::Pending);
    assert_eq!(repo.stored.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_persistence_failure_is_per_record() {
    logging::init_test();

    let repo = Arc::new(MemoryRecordRepository::rejecting(&["R-0001"]));
    let (_history, orchestrator) = in_memory_orchestrator(ImportConfig::default(), repo.clone());

    let job = run_to_terminal(&orchestrator, json_batch(3), source_with_defaults(None)).await;

    assert_eq!(job.status, ImportStatus::Partial);
    assert_eq!(job.counters.success_count, 2);
    assert_eq!(job.counters.failure_count, 1);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].kind, ImportErrorKind::PersistenceError);
    assert_eq!(job.errors[0].record_position, Some(1));
    assert!(job.errors[0]
        .source_excerpt
        .as_deref()
        .unwrap_or_default()
        .contains("R-0001"));
    assert_eq!(repo.stored().len(), 2);
}

#[tokio::test]
async fn test_error_list_capped_with_overflow() {
    logging::init_test();

    let repo = Arc::new(MemoryRecordRepository::default());
    let config = ImportConfig::default().with_error_cap(3);
    let (_history, orchestrator) = in_memory_orchestrator(config, repo);
    let records: Vec<Value> = (0..10).map(|i| recall_json(i, None)).collect();

    let job = run_to_terminal(
        &orchestrator,
        serde_json::to_vec(&records).unwrap(),
        source_with_defaults(None),
    )
    .await;

    assert_eq!(job.status, ImportStatus::Failed);
    assert_eq!(job.counters.failure_count, 10);
    assert_eq!(job.errors.len(), 3);
    assert_eq!(job.error_overflow, 7);
    let positions: Vec<Option<usize>> = job.errors.iter().map(|e| e.record_position).collect();
    assert_eq!(positions, vec![Some(0), Some(1), Some(2)]);
}

/// 第 N 次计数发布时返回存储错误,其余委托内存实现
struct FlakyHistoryStore {
    inner: InMemoryHistoryStore,
    fail_on_update: usize,
    updates: AtomicUsize,
}

impl FlakyHistoryStore {
    fn failing_on(fail_on_update: usize) -> Self {
        Self {
            inner: InMemoryHistoryStore::new(),
            fail_on_update,
            updates: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ImportHistoryStore for FlakyHistoryStore {
    async fn create_job(&self, job: &ImportJob) -> RepositoryResult<()> {
        self.inner.create_job(job).await
    }

    async fn transition(
        &self,
        import_id: &str,
        to: ImportStatus,
        counters: JobCounters,
    ) -> RepositoryResult<ImportJob> {
        self.inner.transition(import_id, to, counters).await
    }

    async fn set_detected_format(
        &self,
        import_id: &str,
        format: SourceFormat,
    ) -> RepositoryResult<()> {
        self.inner.set_detected_format(import_id, format).await
    }

    async fn update_counters(
        &self,
        import_id: &str,
        counters: JobCounters,
    ) -> RepositoryResult<()> {
        let call = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on_update {
            return Err(RepositoryError::LockError("history store unavailable".to_string()));
        }
        self.inner.update_counters(import_id, counters).await
    }

    async fn append_error(
        &self,
        import_id: &str,
        error: ImportJobError,
        cap: usize,
    ) -> RepositoryResult<bool> {
        self.inner.append_error(import_id, error, cap).await
    }

    async fn get_job(&self, import_id: &str) -> RepositoryResult<Option<ImportJob>> {
        self.inner.get_job(import_id).await
    }

    async fn list_jobs(&self, filter: &ImportJobFilter) -> RepositoryResult<Vec<ImportJob>> {
        self.inner.list_jobs(filter).await
    }

    async fn list_transitions(&self, import_id: &str) -> RepositoryResult<Vec<StatusTransition>> {
        self.inner.list_transitions(import_id).await
    }
}

#[tokio::test]
async fn test_history_write_failure_resolves_to_failed() {
    logging::init_test();

    let history = Arc::new(FlakyHistoryStore::failing_on(3));
    let repo = Arc::new(MemoryRecordRepository::default());
    let orchestrator = BatchOrchestrator::new(ImportConfig::default(), history.clone(), repo.clone());
    let content = b"recall_number,title\nR-1,Toy\nR-2,Lamp\nR-3,Crib\nR-4,Kettle\n".to_vec();

    let handle = orchestrator
        .submit(content, source_with_defaults(Some("alerts.csv")))
        .await
        .unwrap();
    let import_id = handle.import_id.clone();
    handle.wait().await.unwrap();

    let job = history.get_job(&import_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.counters.items_processed, 2);
    assert_eq!(repo.stored().len(), 2);

    let last = job.errors.last().unwrap();
    assert_eq!(last.record_position, None);
    assert_eq!(last.kind, ImportErrorKind::PersistenceError);
    assert!(last.message.contains("history store unavailable"));
}

#[tokio::test]
async fn test_cancellation_entry_kept_when_error_list_full() {
    logging::init_test();

    let repo = Arc::new(GatedRepository::default());
    let config = ImportConfig::default().with_error_cap(1);
    let (history, orchestrator) = in_memory_orchestrator(config, repo.clone());
    let mut records: Vec<Value> = vec![recall_json(0, None)];
    records.extend((1..6).map(|i| recall_json(i, Some("Toy"))));

    let handle = orchestrator
        .submit(serde_json::to_vec(&records).unwrap(), source_with_defaults(None))
        .await
        .unwrap();
    let import_id = handle.import_id.clone();

    // 第 0 条校验失败占满错误列表,第 1 条持久化时取消
    repo.entered.notified().await;
    orchestrator.cancel(&import_id).await.unwrap();
    repo.release.notify_one();
    handle.wait().await.unwrap();

    let job = history.get_job(&import_id).await.unwrap().unwrap();
    assert_eq!(job.status, ImportStatus::Failed);
    assert_eq!(job.error_overflow, 0);
    let kinds: Vec<ImportErrorKind> = job.errors.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ImportErrorKind::ValidationError, ImportErrorKind::CancellationError]
    );
    assert_eq!(job.errors[1].record_position, None);
}
