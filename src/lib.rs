// ==========================================
// 供应链数据导入引擎 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + 本地快照文件
// 定位: 分类业务文件的校验、质量评分、合并与版本管理
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 模式层 - 类别模式注册表
pub mod schema;

// 导入层 - 解析/校验/清洗/合并
pub mod importer;

// 数据仓储层 - 元数据与快照
pub mod repository;

// 引擎层 - 版本存储与导入流水线
pub mod engine;

// 配置层 - 导入参数
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外接口
pub mod api;

// 应用层 - 数据目录与状态装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

pub use domain::types::{Category, ColumnType, JobStatus, OverlapStrategy, UploadMode, UploadStatus};
pub use domain::{
    ChangeSummary, FileUpload, FileVersion, ParsedTable, QualityIssue, RefreshJob, ValidationResult,
};
pub use engine::{IngestPipeline, IngestRequest, RefreshJobTracker, VersionStore};
pub use importer::{MergeResolver, QualityEngine, Validator};
pub use schema::{SchemaRegistry, SchemaRule};
pub use api::{ApiError, IngestApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "供应链数据导入引擎";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
