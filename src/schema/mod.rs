// ==========================================
// 供应链数据导入引擎 - 模式层
// ==========================================

pub mod registry;

pub use registry::{ColumnConstraint, FormatRule, SchemaRegistry, SchemaRule};
