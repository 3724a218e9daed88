// ==========================================
// 供应链数据导入引擎 - SQLite 连接初始化
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 建表（幂等）并记录 schema_version
// ==========================================

use chrono::{NaiveDateTime, SubsecRound, Utc};
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 时间戳存储格式（定宽,字典序即时间序）
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// 当前 UTC 时间,截断到微秒（与存储精度一致）
pub fn current_timestamp() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(6)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS file_uploads (
    id TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    filename TEXT NOT NULL,
    upload_timestamp TEXT NOT NULL,
    uploaded_by TEXT NOT NULL,
    row_count INTEGER NOT NULL DEFAULT 0,
    file_size_bytes INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL CHECK (status IN ('active', 'archived', 'rejected')),
    quality_score REAL NOT NULL DEFAULT 0,
    validation_errors TEXT NOT NULL DEFAULT '[]',
    storage_path TEXT,
    activated_at TEXT,
    change_summary TEXT
);

CREATE INDEX IF NOT EXISTS idx_file_uploads_category_status
    ON file_uploads (category, status);

CREATE TABLE IF NOT EXISTS file_versions (
    id TEXT PRIMARY KEY,
    file_upload_id TEXT NOT NULL REFERENCES file_uploads(id) ON DELETE CASCADE,
    category TEXT NOT NULL,
    version_number INTEGER NOT NULL,
    replaced_at TEXT NOT NULL,
    replaced_by TEXT,
    storage_path TEXT NOT NULL,
    UNIQUE (category, version_number)
);

CREATE INDEX IF NOT EXISTS idx_file_versions_category
    ON file_versions (category, replaced_at);

CREATE TABLE IF NOT EXISTS version_sequence (
    category TEXT PRIMARY KEY,
    last_number INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS data_quality_issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_upload_id TEXT NOT NULL REFERENCES file_uploads(id) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    issue_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    column_name TEXT,
    affected_rows TEXT NOT NULL,
    affected_count INTEGER NOT NULL,
    auto_resolved INTEGER NOT NULL,
    resolution TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_quality_issues_upload
    ON data_quality_issues (file_upload_id, seq);
"#;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要"每个连接"单独开启
/// - busy_timeout 需要"每个连接"单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 建表（幂等）并写入当前 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}
