// ==========================================
// 供应链数据导入引擎 - 导入流水线错误类型
// ==========================================
// 分类: Schema / Quality / MergeConstraint / ConcurrencyTimeout /
//       Storage / NotFound / Cancelled / Internal
// 红线: 任何致命错误都可转换为结构化 ErrorReport,不得无标签逃逸
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::job::{ErrorKind, ErrorReport, JobStateError};
use crate::domain::types::Category;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 导入流水线错误类型
#[derive(Error, Debug)]
pub enum IngestError {
    // ===== 输入错误 (致命,不提交) =====
    #[error("模式校验失败: {message}")]
    Schema {
        message: String,
        affected_rows: Vec<usize>,
    },

    #[error("数据质量不可恢复: {message}")]
    Quality {
        message: String,
        affected_rows: Vec<usize>,
    },

    #[error("合并约束违反: {0}")]
    MergeConstraint(String),

    // ===== 并发错误 (可重试) =====
    #[error("类别锁等待超时 (category={category}, waited_ms={waited_ms})")]
    ConcurrencyTimeout { category: Category, waited_ms: u64 },

    // ===== 存储错误 =====
    #[error("存储失败: {0}")]
    Storage(String),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ===== 任务控制 =====
    #[error("任务已取消: {0}")]
    Cancelled(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl IngestError {
    pub fn schema(message: impl Into<String>) -> Self {
        IngestError::Schema {
            message: message.into(),
            affected_rows: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Schema { .. } => ErrorKind::Schema,
            IngestError::Quality { .. } => ErrorKind::Quality,
            IngestError::MergeConstraint(_) => ErrorKind::MergeConstraint,
            IngestError::ConcurrencyTimeout { .. } => ErrorKind::ConcurrencyTimeout,
            IngestError::Storage(_) => ErrorKind::Storage,
            IngestError::NotFound { .. } => ErrorKind::NotFound,
            IngestError::Cancelled(_) => ErrorKind::Cancelled,
            IngestError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn affected_rows(&self) -> &[usize] {
        match self {
            IngestError::Schema { affected_rows, .. } | IngestError::Quality { affected_rows, .. } => {
                affected_rows
            }
            _ => &[],
        }
    }

    /// 输入被拒收（需记录 rejected 上传）
    pub fn is_rejection(&self) -> bool {
        matches!(self, IngestError::Schema { .. } | IngestError::Quality { .. })
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            affected_rows: self.affected_rows().to_vec(),
        }
    }
}

// 实现 From<RepositoryError>
impl From<RepositoryError> for IngestError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => IngestError::NotFound { entity, id },
            other => IngestError::Storage(other.to_string()),
        }
    }
}

// 实现 From<JobStateError>
impl From<JobStateError> for IngestError {
    fn from(err: JobStateError) -> Self {
        IngestError::Internal(err.to_string())
    }
}

// 实现 From<csv::Error>
impl From<csv::Error> for IngestError {
    fn from(err: csv::Error) -> Self {
        IngestError::schema(format!("CSV 解析失败: {}", err))
    }
}

// 实现 From<calamine::XlsxError>
impl From<calamine::XlsxError> for IngestError {
    fn from(err: calamine::XlsxError) -> Self {
        IngestError::schema(format!("Excel 解析失败: {}", err))
    }
}

/// Result 类型别名
pub type IngestResult<T> = Result<T, IngestError>;
