// ==========================================
// 供应链数据导入引擎 - API 层
// ==========================================
// 职责: 提供导入/查询/恢复接口,供 CLI 及外部服务层调用
// ==========================================

pub mod error;
pub mod ingest_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use ingest_api::IngestApi;
