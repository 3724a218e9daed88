// ==========================================
// 供应链数据导入引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// 职责: 上传元数据（SQLite）与数据集快照（文件系统）的存取
// 约束: 所有查询使用参数化,防止 SQL 注入
// ==========================================

pub mod dataset_store;
pub mod error;
pub mod upload_repo;

pub use dataset_store::{DatasetStore, FsDatasetStore, StorageArea, TEMP_SUFFIX};
pub use error::{RepositoryError, RepositoryResult};
pub use upload_repo::{ActivationPlan, FileUploadRepository, Promotion, SupersedePlan};
