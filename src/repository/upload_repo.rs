// ==========================================
// 供应链数据导入引擎 - 上传元数据仓储
// ==========================================
// 表: file_uploads / file_versions / version_sequence / data_quality_issues
// 红线: Repository 不含业务逻辑; 激活/归档必须在单事务内完成
// 并发: 以条件 UPDATE 的影响行数做比较交换 (CAS),不符即 VersionConflict
// ==========================================

use crate::db::DATETIME_FORMAT;
use crate::domain::types::{Category, IssueKind, Severity, UploadStatus};
use crate::domain::upload::{ChangeSummary, FileUpload, FileVersion, FileVersionSummary, QualityIssue};
use crate::repository::error::{RepositoryError, RepositoryResult};
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::sync::{Arc, Mutex};
use tracing::debug;

const UPLOAD_COLUMNS: &str = "id, category, filename, upload_timestamp, uploaded_by, row_count, \
     file_size_bytes, status, quality_score, validation_errors, storage_path, activated_at, \
     change_summary";

const VERSION_COLUMNS: &str =
    "id, file_upload_id, category, version_number, replaced_at, replaced_by, storage_path";

pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(DATETIME_FORMAT).to_string()
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        Box::new(RepositoryError::FieldValueError {
            field: idx.to_string(),
            message,
        }),
    )
}

fn parse_category(idx: usize, s: &str) -> rusqlite::Result<Category> {
    Category::parse(s).ok_or_else(|| conversion_err(idx, format!("未知类别: {}", s)))
}

// ==========================================
// 激活计划 (一次事务内完成)
// ==========================================

/// 旧 active 记录的归档动作
#[derive(Debug, Clone)]
pub struct SupersedePlan {
    pub upload_id: String,
    pub version_id: String,
    pub archive_path: String, // 已写好的归档快照
    pub replaced_at: NaiveDateTime,
    pub replaced_by: Option<String>,
}

/// 新 active 记录的来源
#[derive(Debug, Clone)]
pub enum Promotion {
    /// 新上传: 插入记录及其质量问题
    Insert {
        upload: FileUpload,
        issues: Vec<QualityIssue>,
    },
    /// 恢复历史版本: 已归档记录重新激活
    Reactivate {
        upload_id: String,
        storage_path: String,
        activated_at: NaiveDateTime,
    },
    /// 仅归档,不激活
    None,
}

#[derive(Debug, Clone)]
pub struct ActivationPlan {
    pub category: Category,
    pub superseded: Option<SupersedePlan>,
    pub promotion: Promotion,
}

// ==========================================
// FileUploadRepository
// ==========================================
pub struct FileUploadRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FileUploadRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ===== 查询 =====

    pub fn find_by_id(&self, id: &str) -> RepositoryResult<Option<FileUpload>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM file_uploads WHERE id = ?1", UPLOAD_COLUMNS);
        Ok(conn.query_row(&sql, params![id], map_upload).optional()?)
    }

    /// 当前生效记录（若异常出现多条,取最近激活的一条）
    pub fn find_active(&self, category: Category) -> RepositoryResult<Option<FileUpload>> {
        Ok(self.find_all_active(category)?.into_iter().next())
    }

    /// 全部 active 记录,按最近提交优先排序
    pub fn find_all_active(&self, category: Category) -> RepositoryResult<Vec<FileUpload>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM file_uploads WHERE category = ?1 AND status = 'active' \
             ORDER BY COALESCE(activated_at, upload_timestamp) DESC, upload_timestamp DESC",
            UPLOAD_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![category.as_str()], map_upload)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_by_status(&self, category: Category, status: UploadStatus) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM file_uploads WHERE category = ?1 AND status = ?2",
            params![category.as_str(), status.to_db_str()],
            |row| row.get(0),
        )?)
    }

    pub fn find_version(&self, version_id: &str) -> RepositoryResult<Option<FileVersion>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM file_versions WHERE id = ?1", VERSION_COLUMNS);
        Ok(conn.query_row(&sql, params![version_id], map_version).optional()?)
    }

    /// 历史版本摘要,新版本在前
    pub fn list_versions(
        &self,
        category: Category,
        limit: usize,
    ) -> RepositoryResult<Vec<FileVersionSummary>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT v.id, v.version_number, v.file_upload_id, u.filename, u.uploaded_by,
                      u.upload_timestamp, u.row_count, u.quality_score, v.replaced_at,
                      v.replaced_by, u.status
               FROM file_versions v
               JOIN file_uploads u ON u.id = v.file_upload_id
               WHERE v.category = ?1
               ORDER BY v.version_number DESC
               LIMIT ?2"#,
        )?;
        let rows = stmt.query_map(params![category.as_str(), limit as i64], |row| {
            let status: String = row.get(10)?;
            Ok(FileVersionSummary {
                version_id: row.get(0)?,
                version_number: row.get(1)?,
                file_upload_id: row.get(2)?,
                filename: row.get(3)?,
                uploaded_by: row.get(4)?,
                upload_timestamp: parse_ts(5, &row.get::<_, String>(5)?)?,
                row_count: row.get(6)?,
                quality_score: row.get(7)?,
                replaced_at: parse_ts(8, &row.get::<_, String>(8)?)?,
                replaced_by: row.get(9)?,
                upload_status: UploadStatus::from_db_str(&status)
                    .ok_or_else(|| conversion_err(10, format!("未知状态: {}", status)))?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 全部归档版本,最旧在前（保留策略使用）
    pub fn list_versions_oldest_first(&self, category: Category) -> RepositoryResult<Vec<FileVersion>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM file_versions WHERE category = ?1 \
             ORDER BY replaced_at ASC, version_number ASC",
            VERSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![category.as_str()], map_version)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// 全部仍被引用的快照路径（恢复时识别孤儿文件）
    pub fn referenced_paths(&self, category: Category) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT storage_path FROM file_uploads WHERE category = ?1 AND storage_path IS NOT NULL
               UNION
               SELECT storage_path FROM file_versions WHERE category = ?1"#,
        )?;
        let rows = stmt.query_map(params![category.as_str()], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn list_quality_issues(&self, upload_id: &str) -> RepositoryResult<Vec<QualityIssue>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT issue_type, severity, column_name, affected_rows, auto_resolved, resolution
               FROM data_quality_issues
               WHERE file_upload_id = ?1
               ORDER BY seq ASC"#,
        )?;
        let rows = stmt.query_map(params![upload_id], |row| {
            let kind: String = row.get(0)?;
            let severity: String = row.get(1)?;
            let affected: String = row.get(3)?;
            Ok(QualityIssue {
                kind: IssueKind::from_db_str(&kind)
                    .ok_or_else(|| conversion_err(0, format!("未知问题类型: {}", kind)))?,
                severity: Severity::from_db_str(&severity)
                    .ok_or_else(|| conversion_err(1, format!("未知严重程度: {}", severity)))?,
                column: row.get(2)?,
                affected_row_indices: serde_json::from_str(&affected)
                    .map_err(|e| conversion_err(3, e.to_string()))?,
                auto_resolved: row.get::<_, i64>(4)? != 0,
                resolution_description: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ===== 写入 =====

    /// 记录被拒收的上传（不影响 active 指针）
    pub fn insert_rejected(&self, upload: &FileUpload) -> RepositoryResult<()> {
        if upload.status != UploadStatus::Rejected {
            return Err(RepositoryError::InvalidStateTransition {
                from: upload.status.to_string(),
                to: UploadStatus::Rejected.to_string(),
            });
        }
        let conn = self.get_conn()?;
        insert_upload(&conn, upload)?;
        Ok(())
    }

    /// 原子执行: 归档旧 active -> 分配版本号 -> 激活新记录
    ///
    /// # 红线
    /// - 单事务; 任一步失败整体回滚,active 指针保持不变
    /// - superseded 为 None 时要求当前无 active 记录
    ///
    /// # 返回
    /// - Some(FileVersion): 本次归档生成的版本记录
    pub fn apply_activation(&self, plan: &ActivationPlan) -> RepositoryResult<Option<FileVersion>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let category = plan.category;

        let version = match &plan.superseded {
            Some(s) => Some(archive_in_tx(&tx, category, s)?),
            None => {
                if matches!(plan.promotion, Promotion::None) {
                    None
                } else {
                    let active: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM file_uploads WHERE category = ?1 AND status = 'active'",
                        params![category.as_str()],
                        |row| row.get(0),
                    )?;
                    if active != 0 {
                        return Err(RepositoryError::VersionConflict {
                            message: format!("类别 {} 已存在 active 记录", category),
                        });
                    }
                    None
                }
            }
        };

        match &plan.promotion {
            Promotion::Insert { upload, issues } => {
                if upload.status != UploadStatus::Active || upload.category != category {
                    return Err(RepositoryError::InvalidStateTransition {
                        from: upload.status.to_string(),
                        to: UploadStatus::Active.to_string(),
                    });
                }
                insert_upload(&tx, upload)?;
                insert_issues(&tx, &upload.id, issues)?;
            }
            Promotion::Reactivate {
                upload_id,
                storage_path,
                activated_at,
            } => {
                let changed = tx.execute(
                    "UPDATE file_uploads SET status = 'active', storage_path = ?1, activated_at = ?2 \
                     WHERE id = ?3 AND category = ?4 AND status = 'archived'",
                    params![storage_path, fmt_ts(activated_at), upload_id, category.as_str()],
                )?;
                if changed != 1 {
                    return Err(RepositoryError::VersionConflict {
                        message: format!("上传记录 {} 不是可恢复的归档状态", upload_id),
                    });
                }
            }
            Promotion::None => {}
        }

        tx.commit()?;
        debug!(category = %category, version = ?version.as_ref().map(|v| v.version_number), "激活事务已提交");
        Ok(version)
    }

    /// 删除归档版本; 若其上传记录已无其他版本且处于归档态,一并删除
    ///
    /// # 返回
    /// - true: 上传记录也被删除
    pub fn delete_version(&self, version_id: &str) -> RepositoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let upload_id: String = tx
            .query_row(
                "SELECT file_upload_id FROM file_versions WHERE id = ?1",
                params![version_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "FileVersion".to_string(),
                id: version_id.to_string(),
            })?;

        tx.execute("DELETE FROM file_versions WHERE id = ?1", params![version_id])?;

        let remaining: i64 = tx.query_row(
            "SELECT COUNT(*) FROM file_versions WHERE file_upload_id = ?1",
            params![&upload_id],
            |row| row.get(0),
        )?;
        let upload_deleted = if remaining == 0 {
            tx.execute(
                "DELETE FROM file_uploads WHERE id = ?1 AND status = 'archived'",
                params![&upload_id],
            )? == 1
        } else {
            false
        };

        tx.commit()?;
        Ok(upload_deleted)
    }
}

// ==========================================
// 事务内辅助
// ==========================================

fn archive_in_tx(
    tx: &Transaction<'_>,
    category: Category,
    s: &SupersedePlan,
) -> RepositoryResult<FileVersion> {
    // CAS: 仅当该记录仍是 active 时归档
    let changed = tx.execute(
        "UPDATE file_uploads SET status = 'archived', storage_path = ?1 \
         WHERE id = ?2 AND category = ?3 AND status = 'active'",
        params![&s.archive_path, &s.upload_id, category.as_str()],
    )?;
    if changed != 1 {
        return Err(RepositoryError::VersionConflict {
            message: format!("上传记录 {} 已不是 {} 的 active 记录", s.upload_id, category),
        });
    }

    // 按类别持久化的单调计数器
    tx.execute(
        "INSERT INTO version_sequence (category, last_number) VALUES (?1, 1) \
         ON CONFLICT(category) DO UPDATE SET last_number = last_number + 1",
        params![category.as_str()],
    )?;
    let version_number: i64 = tx.query_row(
        "SELECT last_number FROM version_sequence WHERE category = ?1",
        params![category.as_str()],
        |row| row.get(0),
    )?;

    let version = FileVersion {
        id: s.version_id.clone(),
        file_upload_id: s.upload_id.clone(),
        category,
        version_number,
        replaced_at: s.replaced_at,
        replaced_by: s.replaced_by.clone(),
        storage_path: s.archive_path.clone(),
    };
    tx.execute(
        "INSERT INTO file_versions (id, file_upload_id, category, version_number, replaced_at, \
         replaced_by, storage_path) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            &version.id,
            &version.file_upload_id,
            category.as_str(),
            version.version_number,
            fmt_ts(&version.replaced_at),
            &version.replaced_by,
            &version.storage_path,
        ],
    )?;
    Ok(version)
}

fn insert_upload(conn: &Connection, u: &FileUpload) -> RepositoryResult<()> {
    let summary = match &u.change_summary {
        Some(s) => Some(serde_json::to_string(s)?),
        None => None,
    };
    conn.execute(
        &format!(
            "INSERT INTO file_uploads ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            UPLOAD_COLUMNS
        ),
        params![
            &u.id,
            u.category.as_str(),
            &u.filename,
            fmt_ts(&u.upload_timestamp),
            &u.uploaded_by,
            u.row_count,
            u.file_size_bytes,
            u.status.to_db_str(),
            u.quality_score,
            serde_json::to_string(&u.validation_errors)?,
            &u.storage_path,
            u.activated_at.as_ref().map(fmt_ts),
            summary,
        ],
    )?;
    Ok(())
}

fn insert_issues(conn: &Connection, upload_id: &str, issues: &[QualityIssue]) -> RepositoryResult<()> {
    let mut stmt = conn.prepare(
        r#"INSERT INTO data_quality_issues (
               file_upload_id, seq, issue_type, severity, column_name,
               affected_rows, affected_count, auto_resolved, resolution
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#,
    )?;
    for (seq, issue) in issues.iter().enumerate() {
        stmt.execute(params![
            upload_id,
            seq as i64,
            issue.kind.as_str(),
            issue.severity.as_str(),
            &issue.column,
            serde_json::to_string(&issue.affected_row_indices)?,
            issue.affected_count() as i64,
            issue.auto_resolved as i64,
            &issue.resolution_description,
        ])?;
    }
    Ok(())
}

fn map_upload(row: &rusqlite::Row) -> rusqlite::Result<FileUpload> {
    let category: String = row.get(1)?;
    let status: String = row.get(7)?;
    let errors: String = row.get(9)?;
    let summary: Option<String> = row.get(12)?;
    Ok(FileUpload {
        id: row.get(0)?,
        category: parse_category(1, &category)?,
        filename: row.get(2)?,
        upload_timestamp: parse_ts(3, &row.get::<_, String>(3)?)?,
        uploaded_by: row.get(4)?,
        row_count: row.get(5)?,
        file_size_bytes: row.get(6)?,
        status: UploadStatus::from_db_str(&status)
            .ok_or_else(|| conversion_err(7, format!("未知状态: {}", status)))?,
        quality_score: row.get(8)?,
        validation_errors: serde_json::from_str(&errors).map_err(|e| conversion_err(9, e.to_string()))?,
        storage_path: row.get(10)?,
        activated_at: match row.get::<_, Option<String>>(11)? {
            Some(s) => Some(parse_ts(11, &s)?),
            None => None,
        },
        change_summary: match summary {
            Some(s) => Some(
                serde_json::from_str::<ChangeSummary>(&s).map_err(|e| conversion_err(12, e.to_string()))?,
            ),
            None => None,
        },
    })
}

fn map_version(row: &rusqlite::Row) -> rusqlite::Result<FileVersion> {
    let category: String = row.get(2)?;
    Ok(FileVersion {
        id: row.get(0)?,
        file_upload_id: row.get(1)?,
        category: parse_category(2, &category)?,
        version_number: row.get(3)?,
        replaced_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        replaced_by: row.get(5)?,
        storage_path: row.get(6)?,
    })
}
