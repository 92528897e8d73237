// ==========================================
// 禁令/召回记录导入管道 - 导入历史 Store
// ==========================================
// 职责: 导入任务状态/计数/错误列表的只追加记录,按 ID 查询与过滤列表
// 红线: 状态单调（PENDING < PROCESSING < 终态）,终态不回退、不再写入计数
// 实现者: InMemoryHistoryStore（watch 快照） / SqliteHistoryStore（rusqlite）
// ==========================================

use crate::domain::import_job::{
    ImportJob, ImportJobError, ImportJobFilter, JobCounters, StatusTransition,
};
use crate::domain::types::{ImportStatus, SourceFormat};
use crate::repository::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;

// ==========================================
// ImportHistoryStore Trait
// ==========================================
#[async_trait]
pub trait ImportHistoryStore: Send + Sync {
    /// 写入新任务（PENDING）
    async fn create_job(&self, job: &ImportJob) -> RepositoryResult<()>;

    /// 状态迁移（与计数原子写入）
    ///
    /// # 返回
    /// - Ok(ImportJob): 迁移后的快照
    /// - Err(InvalidStateTransition): 回退或离开终态
    async fn transition(
        &self,
        import_id: &str,
        to: ImportStatus,
        counters: JobCounters,
    ) -> RepositoryResult<ImportJob>;

    /// 记录识别出的格式
    async fn set_detected_format(&self, import_id: &str, format: SourceFormat)
        -> RepositoryResult<()>;

    /// 发布计数快照（终态后拒绝）
    async fn update_counters(&self, import_id: &str, counters: JobCounters)
        -> RepositoryResult<()>;

    /// 追加错误; 超过上限只计入 overflow（整批错误始终写入）
    ///
    /// # 返回
    /// - Ok(true): 已写入列表
    /// - Ok(false): 已截断
    async fn append_error(
        &self,
        import_id: &str,
        error: ImportJobError,
        cap: usize,
    ) -> RepositoryResult<bool>;

    /// 按 ID 查询
    async fn get_job(&self, import_id: &str) -> RepositoryResult<Option<ImportJob>>;

    /// 过滤列表（新任务在前）
    async fn list_jobs(&self, filter: &ImportJobFilter) -> RepositoryResult<Vec<ImportJob>>;

    /// 状态迁移日志（按时间顺序）
    async fn list_transitions(&self, import_id: &str) -> RepositoryResult<Vec<StatusTransition>>;
}

/// 校验状态迁移
pub fn check_transition(from: ImportStatus, to: ImportStatus) -> RepositoryResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(RepositoryError::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

fn terminal_write(job: &ImportJob) -> RepositoryError {
    RepositoryError::InvalidStateTransition {
        from: job.status.to_string(),
        to: job.status.to_string(),
    }
}

// ==========================================
// InMemoryHistoryStore - 进程内实现
// ==========================================
// 每个任务一个 watch 通道: 工作线程写入,轮询方读取最新快照,互不等待
struct JobSlot {
    tx: watch::Sender<ImportJob>,
    transitions: Mutex<Vec<StatusTransition>>,
}

#[derive(Default)]
pub struct InMemoryHistoryStore {
    jobs: RwLock<HashMap<String, Arc<JobSlot>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, import_id: &str) -> RepositoryResult<Arc<JobSlot>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        jobs.get(import_id).cloned().ok_or_else(|| RepositoryError::job_not_found(import_id))
    }

    /// 订阅任务快照变化
    pub fn subscribe(&self, import_id: &str) -> RepositoryResult<watch::Receiver<ImportJob>> {
        Ok(self.slot(import_id)?.tx.subscribe())
    }

    /// 在 watch 锁内修改快照; 闭包返回 Err 时不通知订阅方
    fn modify<T, F>(&self, import_id: &str, f: F) -> RepositoryResult<T>
    where
        F: FnOnce(&mut ImportJob) -> RepositoryResult<T>,
    {
        let slot = self.slot(import_id)?;
        let mut outcome = None;
        slot.tx.send_if_modified(|job| {
            let result = f(job);
            let modified = result.is_ok();
            outcome = Some(result);
            modified
        });
        outcome.unwrap_or_else(|| Err(RepositoryError::InternalError("快照未修改".to_string())))
    }
}

#[async_trait]
impl ImportHistoryStore for InMemoryHistoryStore {
    async fn create_job(&self, job: &ImportJob) -> RepositoryResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        if jobs.contains_key(&job.import_id) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "import_id={}",
                job.import_id
            )));
        }
        let (tx, _rx) = watch::channel(job.clone());
        jobs.insert(
            job.import_id.clone(),
            Arc::new(JobSlot {
                tx,
                transitions: Mutex::new(Vec::new()),
            }),
        );
        Ok(())
    }

    async fn transition(
        &self,
        import_id: &str,
        to: ImportStatus,
        counters: JobCounters,
    ) -> RepositoryResult<ImportJob> {
        let slot = self.slot(import_id)?;
        self.modify(import_id, |job| {
            check_transition(job.status, to)?;
            let now = Utc::now();
            let mut log = slot
                .transitions
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            log.push(StatusTransition {
                import_id: import_id.to_string(),
                from: job.status,
                to,
                at: now,
            });

            job.status = to;
            job.counters = counters;
            if to == ImportStatus::Processing {
                job.started_at = Some(now);
            }
            if to.is_terminal() {
                job.completed_at = Some(now);
            }
            Ok(job.clone())
        })
    }

    async fn set_detected_format(
        &self,
        import_id: &str,
        format: SourceFormat,
    ) -> RepositoryResult<()> {
        self.modify(import_id, |job| {
            if job.status.is_terminal() {
                return Err(terminal_write(job));
            }
            job.detected_format = Some(format);
            Ok(())
        })
    }

    async fn update_counters(
        &self,
        import_id: &str,
        counters: JobCounters,
    ) -> RepositoryResult<()> {
        self.modify(import_id, |job| {
            if job.status.is_terminal() {
                return Err(terminal_write(job));
            }
            job.counters = counters;
            Ok(())
        })
    }

    async fn append_error(
        &self,
        import_id: &str,
        error: ImportJobError,
        cap: usize,
    ) -> RepositoryResult<bool> {
        self.modify(import_id, |job| {
            if job.status.is_terminal() {
                return Err(terminal_write(job));
            }
            Ok(job.push_error(error, cap))
        })
    }

    async fn get_job(&self, import_id: &str) -> RepositoryResult<Option<ImportJob>> {
        match self.slot(import_id) {
            Ok(slot) => Ok(Some(slot.tx.borrow().clone())),
            Err(RepositoryError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_jobs(&self, filter: &ImportJobFilter) -> RepositoryResult<Vec<ImportJob>> {
        let snapshots: Vec<ImportJob> = {
            let jobs = self
                .jobs
                .read()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            jobs.values().map(|slot| slot.tx.borrow().clone()).collect()
        };

        let mut matched: Vec<ImportJob> = snapshots
            .into_iter()
            .filter(|job| filter.matches(job))
            .collect();
        matched.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.import_id.cmp(&a.import_id))
        });
        Ok(matched
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }

    async fn list_transitions(&self, import_id: &str) -> RepositoryResult<Vec<StatusTransition>> {
        let slot = self.slot(import_id)?;
        let log = slot
            .transitions
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        Ok(log.clone())
    }
}
