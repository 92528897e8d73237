// ==========================================
// 禁令/召回记录导入管道 - 引擎层
// ==========================================
// 职责: 导入批次编排（后台工作线程 + 工作池 + 取消）
// 红线: Engine 不拼 SQL,只经由 trait 访问存储
// ==========================================

pub mod batch_orchestrator;

// 重导出核心引擎
pub use batch_orchestrator::{BatchOrchestrator, ImportHandle};
