// ==========================================
// 供应链数据导入引擎 - API层错误类型
// ==========================================
// 职责: 定义API层错误类型,将下层错误转换为结构化错误报告
// 红线: 任何错误都能转成 ErrorReport (kind, message, affected_rows)
// ==========================================

use crate::domain::job::{ErrorKind, ErrorReport};
use crate::importer::error::IngestError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    // ==========================================
    // 导入流水线错误（保留原始分类）
    // ==========================================
    #[error(transparent)]
    Ingest(#[from] IngestError),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("版本冲突: {0}")]
    VersionConflict(String),

    // ==========================================
    // 基础设施错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("配置加载失败: {0}")]
    ConfigError(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // 未知类别等请求级约束
            ApiError::InvalidInput(_) => ErrorKind::MergeConstraint,
            ApiError::NotFound(_) => ErrorKind::NotFound,
            ApiError::Ingest(e) => e.kind(),
            ApiError::VersionConflict(_) | ApiError::DatabaseError(_) | ApiError::ConfigError(_) => {
                ErrorKind::Storage
            }
            ApiError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// 结构化错误报告
    pub fn to_report(&self) -> ErrorReport {
        match self {
            ApiError::Ingest(e) => e.report(),
            other => ErrorReport {
                kind: other.kind(),
                message: other.to_string(),
                affected_rows: Vec::new(),
            },
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::VersionConflict { message } => ApiError::VersionConflict(message),
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseError(format!("数据库锁获取失败: {}", msg))
            }
            other => ApiError::Ingest(IngestError::Storage(other.to_string())),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::DatabaseError(err.to_string())
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
