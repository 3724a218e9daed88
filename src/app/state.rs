// ==========================================
// 供应链数据导入引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use crate::api::{ApiResult, IngestApi};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// 数据库文件名
pub const DB_FILE_NAME: &str = "supply_chain_ingest.db";

/// 快照根目录名
pub const STORAGE_DIR_NAME: &str = "datasets";

/// 应用状态
pub struct AppState {
    pub data_dir: PathBuf,
    pub db_path: String,
    pub ingest_api: Arc<IngestApi>,
}

impl AppState {
    /// 在指定数据目录下初始化（目录不存在则创建）
    pub async fn open(data_dir: &Path) -> ApiResult<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            crate::api::ApiError::InternalError(format!(
                "数据目录创建失败 {}: {}",
                data_dir.display(),
                e
            ))
        })?;
        let db_path = data_dir.join(DB_FILE_NAME).to_string_lossy().to_string();
        let api = IngestApi::open(&db_path, data_dir.join(STORAGE_DIR_NAME)).await?;

        tracing::info!(db_path = %db_path, "应用状态初始化完成");
        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            db_path,
            ingest_api: Arc::new(api),
        })
    }
}

/// 默认数据目录
///
/// 优先级: 环境变量 SUPPLY_CHAIN_INGEST_DATA_DIR > 用户数据目录 > ./data
pub fn get_default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SUPPLY_CHAIN_INGEST_DATA_DIR") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    match dirs::data_dir() {
        #[cfg(debug_assertions)]
        Some(dir) => dir.join("supply-chain-ingest-dev"),
        #[cfg(not(debug_assertions))]
        Some(dir) => dir.join("supply-chain-ingest"),
        None => PathBuf::from("./data"),
    }
}
