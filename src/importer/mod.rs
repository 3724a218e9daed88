// ==========================================
// 供应链数据导入引擎 - 导入层
// ==========================================
// 职责: 原始字节 -> 解析 -> 模式校验 -> 质量清洗 -> 合并
// 支持: Excel (.xlsx), CSV
// 红线: 本层为纯变换,不访问数据库与快照存储
// ==========================================

// 模块声明
pub mod data_cleaner;
pub mod error;
pub mod file_parser;
pub mod ingest_trait;
pub mod merge_resolver;
pub mod quality;
pub mod validator;

// 重导出核心类型
pub use data_cleaner::DataCleaner as DataCleanerImpl;
pub use error::{IngestError, IngestResult};
pub use file_parser::{CsvParser, ExcelParser, UniversalFileParser};
pub use merge_resolver::{MergeOutcome, MergeResolver};
pub use quality::{QualityEngine, QualityOutcome};
pub use validator::Validator;

// 重导出 Trait 接口
pub use ingest_trait::{DataCleaner, FileParser};
