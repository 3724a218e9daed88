// ==========================================
// 供应链数据导入引擎 - 刷新任务注册表
// ==========================================
// 职责: job_id -> RefreshJob 的线程安全注册表
// 写: 仅由任务所属的流水线推进
// 读: 轮询方获得快照, 不与类别锁交互
// ==========================================

use crate::domain::job::{ErrorReport, JobStateError, RefreshJob};
use crate::domain::types::{Category, JobStepKind, UploadMode};
use crate::domain::upload::ChangeSummary;
use crate::importer::error::{IngestError, IngestResult};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct RefreshJobTracker {
    jobs: Arc<RwLock<HashMap<String, RefreshJob>>>,
}

impl RefreshJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务,返回 job_id
    pub fn create(&self, category: Category, filename: &str, mode: UploadMode) -> IngestResult<String> {
        let job_id = Uuid::new_v4().to_string();
        let job = RefreshJob::new(job_id.clone(), category, filename.to_string(), mode);
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| IngestError::Internal(format!("任务表锁获取失败: {}", e)))?;
        jobs.insert(job_id.clone(), job);
        info!(job_id = %job_id, category = %category, filename, "刷新任务已创建");
        Ok(job_id)
    }

    fn update<T>(
        &self,
        job_id: &str,
        f: impl FnOnce(&mut RefreshJob) -> Result<T, JobStateError>,
    ) -> IngestResult<T> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|e| IngestError::Internal(format!("任务表锁获取失败: {}", e)))?;
        let job = jobs.get_mut(job_id).ok_or_else(|| IngestError::NotFound {
            entity: "RefreshJob".to_string(),
            id: job_id.to_string(),
        })?;
        Ok(f(job)?)
    }

    pub fn start(&self, job_id: &str) -> IngestResult<()> {
        self.update(job_id, |j| j.start())
    }

    pub fn begin_step(&self, job_id: &str, kind: JobStepKind) -> IngestResult<()> {
        debug!(job_id, step = kind.as_str(), "步骤开始");
        self.update(job_id, |j| j.begin_step(kind))
    }

    pub fn complete_step(&self, job_id: &str, kind: JobStepKind, message: Option<String>) -> IngestResult<()> {
        debug!(job_id, step = kind.as_str(), "步骤完成");
        self.update(job_id, |j| j.complete_step(kind, message))
    }

    /// 记录提交结果（upload_id 与变更摘要）
    pub fn set_result(&self, job_id: &str, upload_id: &str, summary: ChangeSummary) -> IngestResult<()> {
        self.update(job_id, |j| {
            j.upload_id = Some(upload_id.to_string());
            j.change_summary = Some(summary);
            Ok(())
        })
    }

    pub fn complete(&self, job_id: &str) -> IngestResult<()> {
        self.update(job_id, |j| j.complete())?;
        info!(job_id, "刷新任务完成");
        Ok(())
    }

    pub fn fail(&self, job_id: &str, report: ErrorReport) -> IngestResult<()> {
        info!(job_id, kind = %report.kind, message = %report.message, "刷新任务失败");
        self.update(job_id, |j| j.fail(report))
    }

    /// 任务快照（轮询用）
    pub fn get(&self, job_id: &str) -> Option<RefreshJob> {
        self.jobs.read().ok()?.get(job_id).cloned()
    }

    /// 协作式取消: 仅设置标志,由流水线在步骤间检查
    ///
    /// # 返回
    /// - Ok(false): 任务已处于终态,无需取消
    pub fn request_cancel(&self, job_id: &str) -> IngestResult<bool> {
        self.update(job_id, |j| {
            if j.status.is_terminal() {
                return Ok(false);
            }
            j.cancel_requested = true;
            Ok(true)
        })
    }

    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        self.get(job_id).map(|j| j.cancel_requested).unwrap_or(false)
    }

    /// 清理超过保留时长的终态任务
    pub fn evict_finished(&self, retention: Duration) -> usize {
        let Ok(mut jobs) = self.jobs.write() else {
            return 0;
        };
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let before = jobs.len();
        jobs.retain(|_, j| match (j.status.is_terminal(), j.finished_at) {
            (true, Some(finished)) => finished > cutoff,
            _ => true,
        });
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::ErrorKind;
    use crate::domain::types::JobStatus;

    #[test]
    fn test_lifecycle_visible_to_pollers() {
        let tracker = RefreshJobTracker::new();
        let id = tracker.create(Category::Inventory, "inv.csv", UploadMode::Replace).unwrap();
        assert_eq!(tracker.get(&id).unwrap().status, JobStatus::Initializing);

        tracker.start(&id).unwrap();
        tracker.begin_step(&id, JobStepKind::ValidateSchema).unwrap();
        tracker.complete_step(&id, JobStepKind::ValidateSchema, None).unwrap();

        let snapshot = tracker.get(&id).unwrap();
        assert_eq!(snapshot.status, JobStatus::InProgress);
        assert_eq!(snapshot.progress_pct, 20);
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let tracker = RefreshJobTracker::new();
        assert!(matches!(tracker.start("nope"), Err(IngestError::NotFound { .. })));
        assert!(tracker.get("nope").is_none());
    }

    #[test]
    fn test_cancel_after_terminal_is_noop() {
        let tracker = RefreshJobTracker::new();
        let id = tracker.create(Category::Sales, "s.csv", UploadMode::Append).unwrap();
        tracker.start(&id).unwrap();
        tracker
            .fail(
                &id,
                ErrorReport {
                    kind: ErrorKind::Schema,
                    message: "bad".into(),
                    affected_rows: vec![],
                },
            )
            .unwrap();
        assert!(!tracker.request_cancel(&id).unwrap());
        assert!(!tracker.is_cancel_requested(&id));
    }

    #[test]
    fn test_evict_only_terminal_jobs() {
        let tracker = RefreshJobTracker::new();
        let running = tracker.create(Category::Sales, "a.csv", UploadMode::Replace).unwrap();
        let done = tracker.create(Category::Sales, "b.csv", UploadMode::Replace).unwrap();
        tracker.start(&running).unwrap();
        tracker.start(&done).unwrap();
        tracker.complete(&done).unwrap();

        assert_eq!(tracker.evict_finished(Duration::ZERO), 1);
        assert!(tracker.get(&running).is_some());
        assert!(tracker.get(&done).is_none());
    }
}
