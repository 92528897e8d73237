// ==========================================
// 禁令/召回记录导入管道 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 导入历史 + 标准记录的存取,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod error;
pub mod history_store;
pub mod history_store_impl;
pub mod record_repo_impl;

// 重导出核心仓储
pub use error::{RepositoryError, RepositoryResult};
pub use history_store::{ImportHistoryStore, InMemoryHistoryStore};
pub use history_store_impl::SqliteHistoryStore;
pub use record_repo_impl::SqliteRecordRepository;
