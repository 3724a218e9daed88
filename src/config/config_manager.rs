// ==========================================
// 供应链数据导入引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::ingest_config_trait::{IngestConfigReader, IngestSettings};
use crate::db::open_sqlite_connection;
use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;
        crate::db::ensure_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取并解析配置; 缺失或格式错误时返回默认值
    fn get_parsed_or_default<T>(&self, key: &str, default: T) -> Result<T, Box<dyn Error>>
    where
        T: FromStr + Copy,
    {
        let Some(raw) = self.get_config_value(key)? else {
            return Ok(default);
        };
        match raw.trim().parse::<T>() {
            Ok(v) => Ok(v),
            Err(_) => {
                tracing::warn!(config_key = key, raw_value = %raw, "配置格式错误，使用默认值");
                Ok(default)
            }
        }
    }

    /// 写入 global 配置（存在则覆盖）
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取全部 global 配置
    pub fn get_all_config(&self) -> Result<BTreeMap<String, String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut out = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            out.insert(key, value);
        }
        Ok(out)
    }
}

// ==========================================
// IngestConfigReader Trait 实现
// ==========================================
#[async_trait]
impl IngestConfigReader for ConfigManager {
    async fn get_max_versions(&self) -> Result<usize, Box<dyn Error>> {
        let d = IngestSettings::default().max_versions;
        self.get_parsed_or_default(config_keys::MAX_VERSIONS, d)
    }

    async fn get_retention_days(&self) -> Result<i64, Box<dyn Error>> {
        let d = IngestSettings::default().retention_days;
        Ok(self.get_parsed_or_default(config_keys::RETENTION_DAYS, d)?.max(0))
    }

    async fn get_lock_timeout_ms(&self) -> Result<u64, Box<dyn Error>> {
        let d = IngestSettings::default().lock_timeout_ms;
        self.get_parsed_or_default(config_keys::LOCK_TIMEOUT_MS, d)
    }

    async fn get_chunk_size(&self) -> Result<usize, Box<dyn Error>> {
        let d = IngestSettings::default().chunk_size;
        // 0 行分块无意义
        Ok(self.get_parsed_or_default(config_keys::CHUNK_SIZE, d)?.max(1))
    }

    async fn get_max_file_size_mb(&self) -> Result<u64, Box<dyn Error>> {
        let d = IngestSettings::default().max_file_size_mb;
        self.get_parsed_or_default(config_keys::MAX_FILE_SIZE_MB, d)
    }

    async fn get_job_retention_secs(&self) -> Result<u64, Box<dyn Error>> {
        let d = IngestSettings::default().job_retention_secs;
        self.get_parsed_or_default(config_keys::JOB_RETENTION_SECS, d)
    }

    async fn get_history_limit(&self) -> Result<usize, Box<dyn Error>> {
        let d = IngestSettings::default().history_limit;
        self.get_parsed_or_default(config_keys::HISTORY_LIMIT, d)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 版本保留
    pub const MAX_VERSIONS: &str = "max_versions";
    pub const RETENTION_DAYS: &str = "retention_days";

    // 并发与资源
    pub const LOCK_TIMEOUT_MS: &str = "lock_timeout_ms";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const MAX_FILE_SIZE_MB: &str = "max_file_size_mb";

    // 任务与查询
    pub const JOB_RETENTION_SECS: &str = "job_retention_secs";
    pub const HISTORY_LIMIT: &str = "history_limit";
}
