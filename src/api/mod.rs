// ==========================================
// 禁令/召回记录导入管道 - API 层
// ==========================================
// 职责: 提供导入提交与状态查询接口,供命令行或上层服务调用
// ==========================================

pub mod error;
pub mod import_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use import_api::{
    ImportApi, ImportErrorEntry, ImportRequest, ImportStatusResponse, ImportSubmitResponse,
};
