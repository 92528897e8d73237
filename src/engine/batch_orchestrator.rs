// ==========================================
// 禁令/召回记录导入管道 - 批次编排器
// ==========================================
// 职责: 提交即返回导入 ID,后台工作线程顺序消费记录流
// 流程: 识别格式 → 解析 → 映射 → 校验 → 持久化 → 分类钩子
// 状态机: PENDING → PROCESSING → {COMPLETED | PARTIAL | FAILED}
// 红线: 单条失败不中断批次; 整批错误直接 FAILED; 终态不回退
// ==========================================

use crate::config::ImportConfig;
use crate::domain::import_job::{ImportJob, ImportJobError, JobCounters, SourceDescriptor};
use crate::domain::record::SourceRecord;
use crate::domain::types::{ImportErrorKind, ImportStatus};
use crate::importer::collaborators::{
    CanonicalRecordRepository, ClassificationHook, DownstreamWorkflow, FieldClassifier,
};
use crate::importer::error::{ImportError, ImportResult};
use crate::importer::field_mapper::FieldMapper;
use crate::importer::format_detector::FormatDetector;
use crate::importer::mapping_cache::MappingCache;
use crate::importer::record_validator::RecordValidator;
use crate::importer::structure_parser::{ParseOptions, StructureParser};
use crate::repository::error::RepositoryError;
use crate::repository::history_store::ImportHistoryStore;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

type CancelFlags = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

// ==========================================
// ImportHandle - 提交句柄
// ==========================================
pub struct ImportHandle {
    pub import_id: String,
    cancel: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl ImportHandle {
    /// 请求取消（记录边界生效）
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// 等待工作线程结束
    pub async fn wait(self) -> ImportResult<()> {
        self.join
            .await
            .map_err(|e| ImportError::InternalError(format!("导入工作线程异常退出: {}", e)))
    }
}

// ==========================================
// BatchOrchestrator - 批次编排器
// ==========================================
pub struct BatchOrchestrator {
    config: Arc<ImportConfig>,
    history: Arc<dyn ImportHistoryStore>,
    records: Arc<dyn CanonicalRecordRepository>,
    classification_hook: Option<Arc<dyn ClassificationHook>>,
    workflow: Option<Arc<dyn DownstreamWorkflow>>,
    classifier: Option<Arc<dyn FieldClassifier>>,
    permits: Arc<Semaphore>,
    cancel_flags: CancelFlags,
}

impl BatchOrchestrator {
    /// 创建编排器
    ///
    /// # 参数
    /// - config: 导入配置（worker_count 决定并发导入数）
    /// - history: 导入历史存储
    /// - records: 标准记录持久化协作方
    pub fn new(
        config: ImportConfig,
        history: Arc<dyn ImportHistoryStore>,
        records: Arc<dyn CanonicalRecordRepository>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.worker_count.max(1)));
        Self {
            config: Arc::new(config),
            history,
            records,
            classification_hook: None,
            workflow: None,
            classifier: None,
            permits,
            cancel_flags: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_classification_hook(mut self, hook: Arc<dyn ClassificationHook>) -> Self {
        self.classification_hook = Some(hook);
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn DownstreamWorkflow>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    /// 注入学习型字段分类器（仅在配置启用时生效）
    pub fn with_classifier(mut self, classifier: Arc<dyn FieldClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn history(&self) -> Arc<dyn ImportHistoryStore> {
        Arc::clone(&self.history)
    }

    /// 提交导入
    ///
    /// 同步写入 PENDING 后立即返回,不做任何解析
    ///
    /// # 参数
    /// - content: 原始字节（所有权移入工作线程）
    /// - source: 源描述
    ///
    /// # 返回
    /// - Ok(ImportHandle): 导入 ID + 取消标志 + 任务句柄
    /// - Err: 历史存储写入失败
    pub async fn submit(
        &self,
        content: Vec<u8>,
        source: SourceDescriptor,
    ) -> ImportResult<ImportHandle> {
        let import_id = Uuid::new_v4().to_string();
        let job = ImportJob::new_pending(import_id.clone(), source.clone());
        self.history.create_job(&job).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_flags
            .lock()
            .map_err(|e| ImportError::InternalError(format!("取消标志锁获取失败: {}", e)))?
            .insert(import_id.clone(), Arc::clone(&cancel));

        info!(
            import_id = %import_id,
            filename = ?source.filename,
            bytes = content.len(),
            "导入已提交"
        );

        let worker = ImportWorker {
            import_id: import_id.clone(),
            source,
            config: Arc::clone(&self.config),
            history: Arc::clone(&self.history),
            records: Arc::clone(&self.records),
            classification_hook: self.classification_hook.clone(),
            workflow: self.workflow.clone(),
            classifier: self.classifier.clone(),
            cancel: Arc::clone(&cancel),
        };
        let permits = Arc::clone(&self.permits);
        let cancel_flags = Arc::clone(&self.cancel_flags);

        let join = tokio::spawn(async move {
            let worker_id = worker.import_id.clone();
            match permits.acquire_owned().await {
                Ok(_permit) => worker.run(content).await,
                Err(e) => error!(import_id = %worker_id, error = %e, "工作池已关闭"),
            }
            if let Ok(mut flags) = cancel_flags.lock() {
                flags.remove(&worker_id);
            }
        });

        Ok(ImportHandle {
            import_id,
            cancel,
            join,
        })
    }

    /// 取消导入
    ///
    /// # 返回
    /// - Ok(()): 已置取消标志且任务尚未终态（PENDING 任务在启动时直接 FAILED）
    /// - Err(InvalidStateTransition): 任务已处于终态
    /// - Err(NotFound): 导入 ID 不存在
    pub async fn cancel(&self, import_id: &str) -> ImportResult<()> {
        let flag = self
            .cancel_flags
            .lock()
            .map_err(|e| ImportError::InternalError(format!("取消标志锁获取失败: {}", e)))?
            .get(import_id)
            .cloned();

        // 先置标志再读状态: 终态已提交而标志尚未移除时仍报错
        if let Some(flag) = &flag {
            flag.store(true, Ordering::SeqCst);
        }

        match self.history.get_job(import_id).await? {
            Some(job) if flag.is_some() && !job.status.is_terminal() => {
                info!(import_id = %import_id, status = %job.status, "已请求取消导入");
                Ok(())
            }
            Some(job) => Err(ImportError::Repository(
                RepositoryError::InvalidStateTransition {
                    from: job.status.to_string(),
                    to: ImportStatus::Failed.to_string(),
                },
            )),
            None => Err(ImportError::Repository(RepositoryError::job_not_found(
                import_id,
            ))),
        }
    }
}

// ==========================================
// ImportWorker - 单次导入的工作线程
// ==========================================
struct ImportWorker {
    import_id: String,
    source: SourceDescriptor,
    config: Arc<ImportConfig>,
    history: Arc<dyn ImportHistoryStore>,
    records: Arc<dyn CanonicalRecordRepository>,
    classification_hook: Option<Arc<dyn ClassificationHook>>,
    workflow: Option<Arc<dyn DownstreamWorkflow>>,
    classifier: Option<Arc<dyn FieldClassifier>>,
    cancel: Arc<AtomicBool>,
}

/// 单条记录结果
enum RecordOutcome {
    Persisted,
    Failed(ImportJobError),
}

impl ImportWorker {
    async fn run(self, content: Vec<u8>) {
        let mut counters = JobCounters::default();
        if let Err(e) = self.execute(content, &mut counters).await {
            error!(import_id = %self.import_id, error = %e, "导入工作线程中止");
            self.abort(e, counters).await;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, content, counters), fields(import_id = %self.import_id))]
    async fn execute(&self, content: Vec<u8>, counters: &mut JobCounters) -> ImportResult<()> {
        // 1. 排队期间已取消: 不触碰任何记录
        if self.is_cancelled() {
            return self.fail_batch(ImportError::Cancelled, *counters).await;
        }

        self.history
            .transition(&self.import_id, ImportStatus::Processing, *counters)
            .await?;
        info!("导入开始处理");

        // 2. 识别格式
        let detector = FormatDetector::new(self.config.sniff_prefix_bytes);
        let detection = match detector.detect(&content, &self.source) {
            Ok(detection) => detection,
            Err(e) => return self.fail_batch(e, *counters).await,
        };
        self.history
            .set_detected_format(&self.import_id, detection.format)
            .await?;
        debug!(format = %detection.format, basis = ?detection.basis, "格式识别完成");

        // 3. 打开记录流
        let options = ParseOptions::resolve(&self.config, &self.source, &detection);
        let stream = match StructureParser::new(options).parse(detection.format, content) {
            Ok(stream) => stream,
            Err(e) => return self.fail_batch(e, *counters).await,
        };
        counters.total_items = stream.total_items();
        self.history
            .update_counters(&self.import_id, *counters)
            .await?;

        // 4. 顺序消费
        let mapper = self.build_mapper();
        let validator = RecordValidator::new(
            self.config.required_fields.clone(),
            self.source.default_context.clone(),
        );
        let mut cache = MappingCache::new();
        let mut reported_ambiguities = HashSet::new();
        let mut cancelled = false;

        for item in stream {
            if self.is_cancelled() {
                cancelled = true;
                break;
            }

            counters.items_processed += 1;
            let outcome = self
                .process_record(item, &mapper, &validator, &mut cache, &mut reported_ambiguities)
                .await?;
            match outcome {
                RecordOutcome::Persisted => counters.success_count += 1,
                RecordOutcome::Failed(entry) => {
                    counters.failure_count += 1;
                    self.history
                        .append_error(&self.import_id, entry, self.config.error_cap)
                        .await?;
                }
            }
            self.history
                .update_counters(&self.import_id, *counters)
                .await?;
        }

        if mapper.learned_tier_enabled() {
            debug!(
                invocations = cache.classifier_invocations(),
                signatures = cache.learned_entries(),
                "学习型分类层统计"
            );
        }

        // 5. 终态判定
        if cancelled {
            return self.fail_batch(ImportError::Cancelled, *counters).await;
        }
        if counters.total_items.is_none() {
            counters.total_items = Some(counters.items_processed);
        }
        if counters.items_processed == 0 {
            return self.fail_batch(ImportError::EmptySource, *counters).await;
        }

        let terminal =
            ImportStatus::resolve_terminal(counters.success_count, counters.failure_count);
        self.history
            .transition(&self.import_id, terminal, *counters)
            .await?;
        info!(
            status = %terminal,
            success = counters.success_count,
            failure = counters.failure_count,
            "导入完成"
        );

        if terminal != ImportStatus::Failed && self.source.auto_trigger_workflow {
            self.trigger_workflow().await;
        }
        Ok(())
    }

    fn build_mapper(&self) -> FieldMapper {
        let mapper = FieldMapper::new(
            self.source.field_mapping.clone(),
            self.config.similarity_threshold,
        );
        match (&self.classifier, self.config.learned_tier_enabled) {
            (Some(classifier), true) => mapper.with_classifier(
                Arc::clone(classifier),
                self.config.learned_min_confidence,
                self.config.learned_sample_size,
            ),
            _ => mapper,
        }
    }

    /// 处理单条记录
    ///
    /// # 返回
    /// - Ok(Persisted / Failed): 单条结果
    /// - Err: 历史存储写入失败（中止批次）
    async fn process_record(
        &self,
        item: ImportResult<SourceRecord>,
        mapper: &FieldMapper,
        validator: &RecordValidator,
        cache: &mut MappingCache,
        reported_ambiguities: &mut HashSet<String>,
    ) -> ImportResult<RecordOutcome> {
        let record = match item {
            Ok(record) => record,
            Err(e) => {
                let position = match &e {
                    ImportError::Parse { position, .. } => Some(*position),
                    _ => None,
                };
                warn!(position = ?position, error = %e, "记录解析失败");
                return Ok(RecordOutcome::Failed(ImportJobError {
                    record_position: position,
                    source_excerpt: None,
                    kind: e.kind(),
                    message: e.to_string(),
                }));
            }
        };

        for warning in &record.warnings {
            debug!(position = record.position, warning = %warning, "解析告警");
        }

        // 映射
        let mapping = mapper.map_record(&record, cache).await;
        for ambiguity in &mapping.ambiguities {
            // 同一源字段每批次只报告一次
            if !reported_ambiguities.insert(ambiguity.source_field.clone()) {
                continue;
            }
            debug!(
                position = record.position,
                field = %ambiguity.source_field,
                reason = %ambiguity.reason,
                "字段映射歧义"
            );
            let entry = ImportJobError {
                record_position: Some(record.position),
                source_excerpt: Some(ambiguity.source_field.clone()),
                kind: ImportErrorKind::MappingAmbiguity,
                message: ambiguity.reason.clone(),
            };
            self.history
                .append_error(&self.import_id, entry, self.config.error_cap)
                .await?;
        }

        // 校验
        let canonical = match validator.validate(mapping, &self.import_id, record.position) {
            Ok(canonical) => canonical,
            Err(e) => {
                debug!(position = record.position, error = %e, "记录校验失败");
                return Ok(RecordOutcome::Failed(self.record_error(&record, e)));
            }
        };

        // 持久化（不重试）
        let record_id = match self.records.create_or_update(&canonical).await {
            Ok(record_id) => record_id,
            Err(e) => {
                warn!(
                    position = record.position,
                    identifier = %canonical.identifier,
                    transient = e.is_transient(),
                    error = %e,
                    "记录持久化失败"
                );
                let e = ImportError::Persistence(e.to_string());
                return Ok(RecordOutcome::Failed(self.record_error(&record, e)));
            }
        };

        // 分类钩子: 失败只记日志
        if self.source.auto_classify {
            if let Some(hook) = &self.classification_hook {
                if let Err(e) = hook.classify(&record_id).await {
                    warn!(record_id = %record_id, error = %e, "分类钩子执行失败");
                }
            }
        }

        Ok(RecordOutcome::Persisted)
    }

    fn record_error(&self, record: &SourceRecord, e: ImportError) -> ImportJobError {
        ImportJobError {
            record_position: Some(record.position),
            source_excerpt: Some(record.excerpt(self.config.excerpt_max_chars)),
            kind: e.kind(),
            message: e.to_string(),
        }
    }

    /// 整批失败: 追加无位置错误后进入 FAILED
    async fn fail_batch(&self, e: ImportError, counters: JobCounters) -> ImportResult<()> {
        warn!(error = %e, kind = %e.kind(), "导入整批失败");
        self.history
            .append_error(
                &self.import_id,
                ImportJobError::batch_level(e.kind(), e.to_string()),
                self.config.error_cap,
            )
            .await?;
        self.history
            .transition(&self.import_id, ImportStatus::Failed, counters)
            .await?;
        Ok(())
    }

    /// 历史写入失败后的收尾: 尽力写入整批错误并进入 FAILED
    async fn abort(&self, e: ImportError, counters: JobCounters) {
        let entry = ImportJobError::batch_level(e.kind(), format!("导入中止: {}", e));
        if let Err(append_err) = self
            .history
            .append_error(&self.import_id, entry, self.config.error_cap)
            .await
        {
            warn!(import_id = %self.import_id, error = %append_err, "中止错误写入失败");
        }
        match self
            .history
            .transition(&self.import_id, ImportStatus::Failed, counters)
            .await
        {
            Ok(_) => warn!(import_id = %self.import_id, "导入已中止并置为 FAILED"),
            Err(transition_err) => error!(
                import_id = %self.import_id,
                error = %transition_err,
                "中止后终态写入失败"
            ),
        }
    }

    async fn trigger_workflow(&self) {
        if let Some(workflow) = &self.workflow {
            match workflow.trigger(&self.import_id).await {
                Ok(()) => info!("下游流程已触发"),
                Err(e) => warn!(error = %e, "下游流程触发失败"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::canonical::CanonicalField;
    use crate::domain::record::CanonicalRecord;
    use crate::repository::error::RepositoryResult;
    use crate::repository::history_store::InMemoryHistoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CollectingRepository {
        stored: Mutex<Vec<CanonicalRecord>>,
    }

    #[async_trait]
    impl CanonicalRecordRepository for CollectingRepository {
        async fn create_or_update(&self, record: &CanonicalRecord) -> RepositoryResult<String> {
            let mut stored = self.stored.lock().unwrap();
            stored.push(record.clone());
            Ok(format!("rec-{}", stored.len()))
        }
    }

    #[derive(Default)]
    struct CountingWorkflow {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DownstreamWorkflow for CountingWorkflow {
        async fn trigger(&self, _import_id: &str) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHook;

    #[async_trait]
    impl ClassificationHook for FailingHook {
        async fn classify(&self, _record_id: &str) -> anyhow::Result<()> {
            anyhow::bail!("classifier offline")
        }
    }

    fn orchestrator(
        repo: Arc<CollectingRepository>,
    ) -> (Arc<InMemoryHistoryStore>, BatchOrchestrator) {
        let history = Arc::new(InMemoryHistoryStore::new());
        let orchestrator = BatchOrchestrator::new(ImportConfig::default(), history.clone(), repo);
        (history, orchestrator)
    }

    fn csv_source() -> SourceDescriptor {
        let mut defaults = std::collections::BTreeMap::new();
        defaults.insert(CanonicalField::SourceReference, "https://ec.europa.eu".to_string());
        defaults.insert(CanonicalField::IssuingAuthority, "Safety Gate".to_string());
        SourceDescriptor {
            filename: Some("alerts.csv".to_string()),
            default_context: defaults,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_completed_batch_triggers_workflow() {
        let repo = Arc::new(CollectingRepository::default());
        let (history, orchestrator) = orchestrator(repo.clone());
        let workflow = Arc::new(CountingWorkflow::default());
        let orchestrator = orchestrator
            .with_workflow(workflow.clone())
            .with_classification_hook(Arc::new(FailingHook));

        let mut source = csv_source();
        source.auto_trigger_workflow = true;
        source.auto_classify = true;
        let content = b"recall_number,title\nR-1,Toy car\nR-2,Kettle\n".to_vec();

        let handle = orchestrator.submit(content, source).await.unwrap();
        let import_id = handle.import_id.clone();
        handle.wait().await.unwrap();

        let job = history.get_job(&import_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportStatus::Completed);
        assert_eq!(job.counters.success_count, 2);
        assert_eq!(job.counters.total_items, Some(2));
        assert_eq!(job.progress(), Some(1.0));
        assert_eq!(repo.stored.lock().unwrap().len(), 2);
        assert_eq!(workflow.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_hint_fails_batch() {
        let repo = Arc::new(CollectingRepository::default());
        let (history, orchestrator) = orchestrator(repo);
        let source = SourceDescriptor {
            format_hint: Some("xlsx".to_string()),
            ..Default::default()
        };

        let handle = orchestrator.submit(b"a,b\n1,2\n".to_vec(), source).await.unwrap();
        let import_id = handle.import_id.clone();
        handle.wait().await.unwrap();

        let job = history.get_job(&import_id).await.unwrap().unwrap();
        assert_eq!(job.status, ImportStatus::Failed);
        assert_eq!(job.errors.len(), 1);
        assert_eq!(job.errors[0].kind, ImportErrorKind::FormatError);
        assert_eq!(job.errors[0].record_position, None);
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_terminal() {
        let repo = Arc::new(CollectingRepository::default());
        let (_history, orchestrator) = orchestrator(repo);
        assert!(matches!(
            orchestrator.cancel("missing").await,
            Err(ImportError::Repository(RepositoryError::NotFound { .. }))
        ));

        let handle = orchestrator
            .submit(b"recall_number,title\nR-1,Toy\n".to_vec(), csv_source())
            .await
            .unwrap();
        let import_id = handle.import_id.clone();
        handle.wait().await.unwrap();
        assert!(matches!(
            orchestrator.cancel(&import_id).await,
            Err(ImportError::Repository(
                RepositoryError::InvalidStateTransition { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn test_cancel_rejected_once_terminal_committed() {
        let repo = Arc::new(CollectingRepository::default());
        let (history, orchestrator) = orchestrator(repo);

        // 终态已提交,工作线程尚未移除取消标志
        let job = ImportJob::new_pending("J-late".to_string(), csv_source());
        history.create_job(&job).await.unwrap();
        let counters = JobCounters {
            items_processed: 1,
            success_count: 1,
            ..Default::default()
        };
        history
            .transition("J-late", ImportStatus::Processing, counters)
            .await
            .unwrap();
        history
            .transition("J-late", ImportStatus::Completed, counters)
            .await
            .unwrap();
        let flag = Arc::new(AtomicBool::new(false));
        orchestrator
            .cancel_flags
            .lock()
            .unwrap()
            .insert("J-late".to_string(), flag);

        let result = orchestrator.cancel("J-late").await;
        assert!(matches!(
            result,
            Err(ImportError::Repository(
                RepositoryError::InvalidStateTransition { .. }
            ))
        ));
        let job = history.get_job("J-late").await.unwrap().unwrap();
        assert_eq!(job.status, ImportStatus::Completed);
    }
}
