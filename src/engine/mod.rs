// ==========================================
// 供应链数据导入引擎 - 引擎层
// ==========================================
// 职责: 编排导入流水线、维护版本状态机与任务进度
// 红线: Engine 不拼 SQL; 元数据读写经由 repository
// ==========================================

pub mod category_lock;
pub mod ingest_pipeline;
pub mod refresh_job;
pub mod version_store;

pub use category_lock::{CategoryGuard, CategoryLocks};
pub use ingest_pipeline::{IngestPipeline, IngestRequest, PREVIEW_ROWS};
pub use refresh_job::RefreshJobTracker;
pub use version_store::{CommitOutcome, RecoveryReport, RestoreOutcome, RetentionPolicy, VersionStore};
