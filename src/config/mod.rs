// ==========================================
// 供应链数据导入引擎 - 配置层
// ==========================================
// 职责: 导入参数（版本保留、锁超时、分块、大小上限）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod ingest_config_trait;

pub use config_manager::{config_keys, ConfigManager};
pub use ingest_config_trait::{IngestConfigReader, IngestSettings};
