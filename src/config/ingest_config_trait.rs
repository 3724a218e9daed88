// ==========================================
// 供应链数据导入引擎 - 导入配置读取 Trait
// ==========================================
// 职责: 定义导入流水线所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;

// ==========================================
// IngestSettings - 运行参数快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSettings {
    pub max_versions: usize,      // 每类别保留的归档版本数
    pub retention_days: i64,      // 超过此天数的归档版本被清理
    pub lock_timeout_ms: u64,     // 类别锁等待上限
    pub chunk_size: usize,        // 质量检查/合并的分块行数
    pub max_file_size_mb: u64,    // 上传字节上限
    pub job_retention_secs: u64,  // 终态任务保留时长
    pub history_limit: usize,     // get_history 默认条数
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_versions: 10,
            retention_days: 90,
            lock_timeout_ms: 30_000,
            chunk_size: 10_000,
            max_file_size_mb: 200,
            job_retention_secs: 3_600,
            history_limit: 10,
        }
    }
}

impl IngestSettings {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

// ==========================================
// IngestConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
#[async_trait]
pub trait IngestConfigReader: Send + Sync {
    // ===== 版本保留 =====

    /// 每类别保留的归档版本上限
    ///
    /// # 默认值
    /// - 10
    async fn get_max_versions(&self) -> Result<usize, Box<dyn Error>>;

    /// 归档版本保留天数
    ///
    /// # 默认值
    /// - 90
    async fn get_retention_days(&self) -> Result<i64, Box<dyn Error>>;

    // ===== 并发与资源 =====

    /// 类别锁等待上限（毫秒）
    ///
    /// # 默认值
    /// - 30000
    async fn get_lock_timeout_ms(&self) -> Result<u64, Box<dyn Error>>;

    async fn get_chunk_size(&self) -> Result<usize, Box<dyn Error>>;

    async fn get_max_file_size_mb(&self) -> Result<u64, Box<dyn Error>>;

    async fn get_job_retention_secs(&self) -> Result<u64, Box<dyn Error>>;

    async fn get_history_limit(&self) -> Result<usize, Box<dyn Error>>;

    /// 一次性读取全部导入参数
    async fn load_settings(&self) -> Result<IngestSettings, Box<dyn Error>> {
        let max_versions = self.get_max_versions().await?;
        let retention_days = self.get_retention_days().await?;
        let lock_timeout_ms = self.get_lock_timeout_ms().await?;
        let chunk_size = self.get_chunk_size().await?;
        let max_file_size_mb = self.get_max_file_size_mb().await?;
        let job_retention_secs = self.get_job_retention_secs().await?;
        let history_limit = self.get_history_limit().await?;
        Ok(IngestSettings {
            max_versions,
            retention_days,
            lock_timeout_ms,
            chunk_size,
            max_file_size_mb,
            job_retention_secs,
            history_limit,
        })
    }
}
