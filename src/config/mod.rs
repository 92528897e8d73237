// ==========================================
// 禁令/召回记录导入管道 - 配置层
// ==========================================
// 职责: 导入配置默认值 + config_kv 覆写
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod import_config;

pub use config_manager::{config_keys, ConfigManager};
pub use import_config::ImportConfig;
