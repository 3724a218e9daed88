// ==========================================
// 供应链数据导入引擎 - 版本存储
// ==========================================
// 职责: 维护每类别的 active / archived 快照,执行归档、恢复、保留清理
// 不变量: 每类别至多一条 active 记录
// 提交顺序: 写新快照 -> 复制旧快照到归档区 -> 单事务切换元数据
//           -> 删除旧 active 文件（事务提交之后）
// 任一步失败: 清理本次新写的文件,元数据保持原状
// ==========================================

use crate::domain::table::ParsedTable;
use crate::domain::types::{Category, UploadStatus};
use crate::domain::upload::{FileUpload, FileVersion, FileVersionSummary, QualityIssue};
use crate::repository::dataset_store::{DatasetStore, StorageArea, TEMP_SUFFIX};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::upload_repo::{
    ActivationPlan, FileUploadRepository, Promotion, SupersedePlan,
};
use crate::db::current_timestamp;
use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 版本保留策略（两条限制取并集）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_versions: usize,
    pub retention_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_versions: 10,
            retention_days: 90,
        }
    }
}

/// commit_active 的结果
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub upload: FileUpload,
    pub superseded: Option<FileVersion>,
    /// 被取代记录原先的 active 文件,待 finalize_superseded 删除
    pub stale_active_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    pub upload: FileUpload,
    pub archived: Option<FileVersion>,
    pub already_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub archived_duplicates: usize,
    pub removed_files: usize,
}

fn now() -> NaiveDateTime {
    current_timestamp()
}

fn snapshot_name(id: &str) -> String {
    format!("{}.json", id)
}

pub struct VersionStore {
    repo: FileUploadRepository,
    store: Arc<dyn DatasetStore>,
    policy: RetentionPolicy,
}

impl VersionStore {
    pub fn new(repo: FileUploadRepository, store: Arc<dyn DatasetStore>, policy: RetentionPolicy) -> Self {
        Self { repo, store, policy }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn active(&self, category: Category) -> RepositoryResult<Option<FileUpload>> {
        self.repo.find_active(category)
    }

    /// 当前生效记录及其数据
    pub fn active_table(&self, category: Category) -> RepositoryResult<Option<(FileUpload, ParsedTable)>> {
        let Some(upload) = self.repo.find_active(category)? else {
            return Ok(None);
        };
        let path = stored_path(&upload)?;
        let table = self.store.read_table(path)?;
        Ok(Some((upload, table)))
    }

    pub fn history(&self, category: Category, limit: usize) -> RepositoryResult<Vec<FileVersionSummary>> {
        self.repo.list_versions(category, limit)
    }

    pub fn find_upload(&self, upload_id: &str) -> RepositoryResult<Option<FileUpload>> {
        self.repo.find_by_id(upload_id)
    }

    pub fn quality_issues(&self, upload_id: &str) -> RepositoryResult<Vec<QualityIssue>> {
        self.repo.list_quality_issues(upload_id)
    }

    pub fn count_active(&self, category: Category) -> RepositoryResult<i64> {
        self.repo.count_by_status(category, UploadStatus::Active)
    }

    // ==========================================
    // 提交
    // ==========================================

    /// 以新上传取代当前生效数据集
    ///
    /// # 参数
    /// - upload: 新上传记录（状态将被置为 active）
    /// - table: 合并后的结果表
    /// - issues: 本次质量检查的问题（随记录持久化）
    #[instrument(skip_all, fields(category = %upload.category, upload_id = %upload.id))]
    pub fn commit_active(
        &self,
        mut upload: FileUpload,
        table: &ParsedTable,
        issues: Vec<QualityIssue>,
    ) -> RepositoryResult<CommitOutcome> {
        let category = upload.category;
        let current = self.repo.find_active(category)?;

        let active_path =
            self.store
                .write_table(StorageArea::Active, category, &snapshot_name(&upload.id), table)?;

        let superseded = match &current {
            Some(cur) => match self.prepare_supersede(cur, Some(upload.id.clone())) {
                Ok(plan) => Some(plan),
                Err(e) => {
                    self.discard(&[active_path.as_str()]);
                    return Err(e);
                }
            },
            None => None,
        };

        upload.status = UploadStatus::Active;
        upload.storage_path = Some(active_path.clone());
        upload.activated_at = Some(now());
        upload.row_count = table.row_count() as i64;

        let plan = ActivationPlan {
            category,
            superseded: superseded.clone(),
            promotion: Promotion::Insert {
                upload: upload.clone(),
                issues,
            },
        };

        let version = match self.repo.apply_activation(&plan) {
            Ok(v) => v,
            Err(e) => {
                let mut created = vec![active_path.as_str()];
                if let Some(s) = &superseded {
                    created.push(s.archive_path.as_str());
                }
                self.discard(&created);
                return Err(e);
            }
        };

        info!(
            version_number = ?version.as_ref().map(|v| v.version_number),
            rows = table.row_count(),
            "新数据集已生效"
        );

        Ok(CommitOutcome {
            upload,
            superseded: version,
            stale_active_path: current.and_then(|c| c.storage_path),
        })
    }

    /// 提交后收尾: 删除旧 active 文件并执行保留清理
    ///
    /// # 返回
    /// - 被清理的版本数
    pub fn finalize_superseded(&self, outcome: &CommitOutcome) -> RepositoryResult<usize> {
        if let Some(path) = &outcome.stale_active_path {
            self.store.remove(path)?;
        }
        if outcome.superseded.is_some() {
            Ok(self.cleanup_retention(outcome.upload.category)?.len())
        } else {
            Ok(0)
        }
    }

    /// 归档当前生效记录（之后该类别无 active）
    #[instrument(skip(self))]
    pub fn archive_current(&self, category: Category) -> RepositoryResult<Option<FileVersion>> {
        let Some(current) = self.repo.find_active(category)? else {
            return Ok(None);
        };
        let plan = self.prepare_supersede(&current, None)?;
        let archive_path = plan.archive_path.clone();

        let version = match self.repo.apply_activation(&ActivationPlan {
            category,
            superseded: Some(plan),
            promotion: Promotion::None,
        }) {
            Ok(v) => v,
            Err(e) => {
                self.discard(&[archive_path.as_str()]);
                return Err(e);
            }
        };

        // 以下为提交后的收尾,失败不影响归档结果
        if let Some(path) = &current.storage_path {
            if let Err(e) = self.store.remove(path) {
                warn!(path = %path, error = %e, "旧 active 文件删除失败,将在恢复流程中清理");
            }
        }
        self.cleanup_after_commit(category);
        Ok(version)
    }

    // ==========================================
    // 恢复
    // ==========================================

    /// 将指定历史版本恢复为生效数据集
    ///
    /// # 红线
    /// - 版本不存在或不属于该类别: NotFound,且不做任何变更
    /// - 当前 active 先归档,再激活目标（同一事务）
    #[instrument(skip(self))]
    pub fn restore(&self, version_id: &str, category: Category) -> RepositoryResult<RestoreOutcome> {
        let not_found = || RepositoryError::NotFound {
            entity: "FileVersion".to_string(),
            id: version_id.to_string(),
        };
        let version = self
            .repo
            .find_version(version_id)?
            .filter(|v| v.category == category)
            .ok_or_else(not_found)?;
        let target = self
            .repo
            .find_by_id(&version.file_upload_id)?
            .ok_or_else(not_found)?;

        if target.is_active() {
            info!(upload_id = %target.id, "目标版本已生效,无需恢复");
            return Ok(RestoreOutcome {
                upload: target,
                archived: None,
                already_active: true,
            });
        }

        let current = self.repo.find_active(category)?;
        let active_path = self.store.copy_to(
            &version.storage_path,
            StorageArea::Active,
            category,
            &snapshot_name(&target.id),
        )?;

        let superseded = match &current {
            Some(cur) => match self.prepare_supersede(cur, Some(target.id.clone())) {
                Ok(plan) => Some(plan),
                Err(e) => {
                    self.discard(&[active_path.as_str()]);
                    return Err(e);
                }
            },
            None => None,
        };

        let plan = ActivationPlan {
            category,
            superseded: superseded.clone(),
            promotion: Promotion::Reactivate {
                upload_id: target.id.clone(),
                storage_path: active_path.clone(),
                activated_at: now(),
            },
        };
        let archived = match self.repo.apply_activation(&plan) {
            Ok(v) => v,
            Err(e) => {
                let mut created = vec![active_path.as_str()];
                if let Some(s) = &superseded {
                    created.push(s.archive_path.as_str());
                }
                self.discard(&created);
                return Err(e);
            }
        };

        if let Some(path) = current.and_then(|c| c.storage_path) {
            if let Err(e) = self.store.remove(&path) {
                warn!(path = %path, error = %e, "旧 active 文件删除失败,将在恢复流程中清理");
            }
        }
        if archived.is_some() {
            self.cleanup_after_commit(category);
        }

        let upload = self.repo.find_by_id(&target.id)?.ok_or_else(not_found)?;
        info!(upload_id = %upload.id, version_number = version.version_number, "历史版本已恢复");
        Ok(RestoreOutcome {
            upload,
            archived,
            already_active: false,
        })
    }

    // ==========================================
    // 保留清理
    // ==========================================

    /// 删除超出数量上限或超过保留天数的归档版本（两者并集）
    ///
    /// # 返回
    /// - 被删除的版本 id（最旧在前）
    pub fn cleanup_retention(&self, category: Category) -> RepositoryResult<Vec<String>> {
        let versions = self.repo.list_versions_oldest_first(category)?;
        let excess = versions.len().saturating_sub(self.policy.max_versions);
        // 天数溢出时不按时间清理
        let cutoff = chrono::Duration::try_days(self.policy.retention_days)
            .and_then(|d| now().checked_sub_signed(d));

        let doomed: Vec<&FileVersion> = versions
            .iter()
            .enumerate()
            .filter(|(i, v)| *i < excess || cutoff.map_or(false, |c| v.replaced_at < c))
            .map(|(_, v)| v)
            .collect();

        let mut deleted = Vec::with_capacity(doomed.len());
        for v in doomed {
            self.repo.delete_version(&v.id)?;
            if let Err(e) = self.store.remove(&v.storage_path) {
                // 元数据已删除,文件残留会被 recover 清理
                warn!(version_id = %v.id, error = %e, "归档文件删除失败");
            }
            deleted.push(v.id.clone());
        }

        if !deleted.is_empty() {
            info!(category = %category, deleted = deleted.len(), "保留策略清理完成");
        }
        Ok(deleted)
    }

    /// 提交后的保留清理; 失败只记录日志
    fn cleanup_after_commit(&self, category: Category) {
        if let Err(e) = self.cleanup_retention(category) {
            warn!(category = %category, error = %e, "保留策略清理失败,提交已生效");
        }
    }

    // ==========================================
    // 拒收记录
    // ==========================================

    /// 记录被拒收的上传,原始字节存入 rejected 区
    pub fn record_rejected(&self, mut upload: FileUpload, raw: &[u8], extension: &str) -> RepositoryResult<FileUpload> {
        let name = if extension.is_empty() {
            upload.id.clone()
        } else {
            format!("{}.{}", upload.id, extension)
        };
        let path = self
            .store
            .write_raw(StorageArea::Rejected, upload.category, &name, raw)?;
        upload.status = UploadStatus::Rejected;
        upload.storage_path = Some(path.clone());
        if let Err(e) = self.repo.insert_rejected(&upload) {
            self.discard(&[path.as_str()]);
            return Err(e);
        }
        Ok(upload)
    }

    // ==========================================
    // 启动恢复
    // ==========================================

    /// 修复崩溃留下的不一致
    ///
    /// - 多条 active: 保留最近提交的一条,其余归档
    /// - active / archive 区未被引用的文件与临时文件: 删除
    #[instrument(skip(self))]
    pub fn recover(&self) -> RepositoryResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for category in Category::ALL {
            let actives = self.repo.find_all_active(category)?;
            if let Some((keeper, extras)) = actives.split_first() {
                for extra in extras {
                    warn!(category = %category, upload_id = %extra.id, keeper = %keeper.id, "发现多余 active 记录,归档");
                    let plan = self.prepare_supersede(extra, Some(keeper.id.clone()))?;
                    self.repo.apply_activation(&ActivationPlan {
                        category,
                        superseded: Some(plan),
                        promotion: Promotion::None,
                    })?;
                    if let Some(path) = &extra.storage_path {
                        self.store.remove(path)?;
                    }
                    report.archived_duplicates += 1;
                }
            }

            let referenced: HashSet<String> = self.repo.referenced_paths(category)?.into_iter().collect();
            for area in [StorageArea::Active, StorageArea::Archive, StorageArea::Rejected] {
                for path in self.store.list(area, category)? {
                    let orphan = area != StorageArea::Rejected && !referenced.contains(&path);
                    if path.ends_with(TEMP_SUFFIX) || orphan {
                        self.store.remove(&path)?;
                        report.removed_files += 1;
                    }
                }
            }
        }

        info!(
            archived_duplicates = report.archived_duplicates,
            removed_files = report.removed_files,
            "启动恢复完成"
        );
        Ok(report)
    }

    // ==========================================
    // 内部辅助
    // ==========================================

    /// 复制 active 快照到归档区,生成归档计划
    fn prepare_supersede(&self, current: &FileUpload, replaced_by: Option<String>) -> RepositoryResult<SupersedePlan> {
        let version_id = Uuid::new_v4().to_string();
        let archive_path = self.store.copy_to(
            stored_path(current)?,
            StorageArea::Archive,
            current.category,
            &snapshot_name(&version_id),
        )?;
        Ok(SupersedePlan {
            upload_id: current.id.clone(),
            version_id,
            archive_path,
            replaced_at: now(),
            replaced_by,
        })
    }

    /// 失败回退: 删除本次新写的文件
    fn discard(&self, paths: &[&str]) {
        for path in paths {
            if let Err(e) = self.store.remove(path) {
                warn!(path = %path, error = %e, "回退时删除文件失败");
            }
        }
    }
}

fn stored_path(upload: &FileUpload) -> RepositoryResult<&str> {
    upload
        .storage_path
        .as_deref()
        .ok_or_else(|| RepositoryError::FieldValueError {
            field: "storage_path".to_string(),
            message: format!("上传记录 {} 缺少数据快照", upload.id),
        })
}
