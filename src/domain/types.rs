// ==========================================
// 供应链数据导入引擎 - 领域类型定义
// ==========================================
// 职责: 数据类别、列类型、上传状态、上传模式、质量问题分级、任务状态
// 红线: 纯类型定义,不含数据访问逻辑
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 数据类别 (Category)
// ==========================================
// 封闭集合: 决定 schema 查找,上传一经选定不可变
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Sales,         // 销售
    Inventory,     // 库存
    Supplier,      // 供应商
    PurchaseOrder, // 采购订单
}

impl Category {
    /// 全部类别（固定顺序）
    pub const ALL: [Category; 4] = [
        Category::Sales,
        Category::Inventory,
        Category::Supplier,
        Category::PurchaseOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sales => "sales",
            Category::Inventory => "inventory",
            Category::Supplier => "supplier",
            Category::PurchaseOrder => "purchase_order",
        }
    }

    /// 从字符串解析（大小写与首尾空白不敏感）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sales" => Some(Category::Sales),
            "inventory" => Some(Category::Inventory),
            "supplier" => Some(Category::Supplier),
            "purchase_order" => Some(Category::PurchaseOrder),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 列类型 (Column Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    String,
    Integer,
    Float,
    Date,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 上传状态 (Upload Status)
// ==========================================
// 序列化格式: snake_case (与数据库一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Active,   // 当前生效
    Archived, // 已归档
    Rejected, // 已拒收
}

impl UploadStatus {
    pub fn to_db_str(&self) -> &'static str {
        match self {
            UploadStatus::Active => "active",
            UploadStatus::Archived => "archived",
            UploadStatus::Rejected => "rejected",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(UploadStatus::Active),
            "archived" => Some(UploadStatus::Archived),
            "rejected" => Some(UploadStatus::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_str())
    }
}

// ==========================================
// 日期区间重叠处理策略 (Overlap Strategy)
// ==========================================
// 仅作用于新旧数据日期区间的交集部分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapStrategy {
    KeepExisting,   // 交集内保留旧数据,丢弃新数据
    ReplaceWithNew, // 交集内以新数据替换旧数据
    AverageValues,  // 交集内同 (日期, 品项) 的度量列取均值
}

impl OverlapStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverlapStrategy::KeepExisting => "keep_existing",
            OverlapStrategy::ReplaceWithNew => "replace_with_new",
            OverlapStrategy::AverageValues => "average_values",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_existing" => Some(OverlapStrategy::KeepExisting),
            "replace_with_new" => Some(OverlapStrategy::ReplaceWithNew),
            "average_values" => Some(OverlapStrategy::AverageValues),
            _ => None,
        }
    }
}

// ==========================================
// 上传模式 (Upload Mode)
// ==========================================
// 穷尽匹配: 新增模式时编译器强制覆盖所有分支
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum UploadMode {
    Replace,
    Append,
    Merge { key: String },
    SmartMerge { strategy: OverlapStrategy },
}

impl UploadMode {
    pub fn name(&self) -> &'static str {
        match self {
            UploadMode::Replace => "replace",
            UploadMode::Append => "append",
            UploadMode::Merge { .. } => "merge",
            UploadMode::SmartMerge { .. } => "smart_merge",
        }
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Merge { key } => write!(f, "merge(key={})", key),
            UploadMode::SmartMerge { strategy } => write!(f, "smart_merge({})", strategy.as_str()),
            other => write!(f, "{}", other.name()),
        }
    }
}

// ==========================================
// 质量问题类型 (Issue Kind)
// ==========================================
// 顺序即规则执行顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    DuplicateRows,
    NullRequired,
    NegativeValue,
    FutureDate,
    InvalidFormat,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::DuplicateRows => "duplicate_rows",
            IssueKind::NullRequired => "null_required",
            IssueKind::NegativeValue => "negative_value",
            IssueKind::FutureDate => "future_date",
            IssueKind::InvalidFormat => "invalid_format",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "duplicate_rows" => Some(IssueKind::DuplicateRows),
            "null_required" => Some(IssueKind::NullRequired),
            "negative_value" => Some(IssueKind::NegativeValue),
            "future_date" => Some(IssueKind::FutureDate),
            "invalid_format" => Some(IssueKind::InvalidFormat),
            _ => None,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 严重程度 (Severity)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

// ==========================================
// 刷新任务状态 (Job Status)
// ==========================================
// 状态机: initializing -> in_progress -> {completed | failed}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Initializing,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// 终态不可再迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Initializing => "initializing",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 步骤状态 (Step Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

// ==========================================
// 任务步骤 (Job Step Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStepKind {
    ValidateSchema,
    QualityCheck,
    ApplyMerge,
    Commit,
    ArchiveSuperseded,
}

impl JobStepKind {
    /// 固定执行顺序
    pub const ORDERED: [JobStepKind; 5] = [
        JobStepKind::ValidateSchema,
        JobStepKind::QualityCheck,
        JobStepKind::ApplyMerge,
        JobStepKind::Commit,
        JobStepKind::ArchiveSuperseded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStepKind::ValidateSchema => "validate_schema",
            JobStepKind::QualityCheck => "quality_check",
            JobStepKind::ApplyMerge => "apply_merge",
            JobStepKind::Commit => "commit",
            JobStepKind::ArchiveSuperseded => "archive_superseded",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            JobStepKind::ValidateSchema => 0,
            JobStepKind::QualityCheck => 1,
            JobStepKind::ApplyMerge => 2,
            JobStepKind::Commit => 3,
            JobStepKind::ArchiveSuperseded => 4,
        }
    }
}
