// ==========================================
// 供应链数据导入引擎 - 应用层
// ==========================================
// 职责: 数据目录定位与 API 实例装配
// ==========================================

pub mod state;

pub use state::{get_default_data_dir, AppState};
