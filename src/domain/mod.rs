// ==========================================
// 供应链数据导入引擎 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、值对象
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod job;
pub mod table;
pub mod types;
pub mod upload;

// 重导出核心类型
pub use job::{ErrorKind, ErrorReport, JobStateError, JobStep, RefreshJob};
pub use table::{CellKey, CellValue, ParsedTable};
pub use types::{
    Category, ColumnType, IssueKind, JobStatus, JobStepKind, OverlapStrategy, Severity,
    StepStatus, UploadMode, UploadStatus,
};
pub use upload::{
    ActiveDatasetInfo, CategoryStatus, ChangeSummary, DatasetPresence, FileUpload, FileVersion,
    FileVersionSummary, PreviewReport, QualityIssue, TypeMismatch, ValidationResult,
};
