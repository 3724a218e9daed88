// ==========================================
// 供应链数据导入引擎 - 导入 API
// ==========================================
// 职责: 对外部协作方（HTTP 层、UI、工具层）暴露的窄接口
// - validate_and_score: 预检,不提交
// - ingest: 立即返回 job_id,进度通过 get_job_status 轮询
// - get_active / get_history / restore: 数据集与版本查询
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::config::{ConfigManager, IngestConfigReader, IngestSettings};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::domain::job::RefreshJob;
use crate::domain::table::ParsedTable;
use crate::domain::types::{Category, UploadMode};
use crate::domain::upload::{
    ActiveDatasetInfo, CategoryStatus, FileVersionSummary, PreviewReport, QualityIssue,
};
use crate::engine::{
    CategoryLocks, IngestPipeline, IngestRequest, RecoveryReport, RefreshJobTracker,
    RestoreOutcome, RetentionPolicy, VersionStore,
};
use crate::importer::error::IngestError;
use crate::repository::{DatasetStore, FileUploadRepository, FsDatasetStore};
use crate::schema::{SchemaRegistry, SchemaRule};
use chrono::NaiveDate;
use futures::future::join_all;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info};

/// 导入API
pub struct IngestApi {
    pipeline: Arc<IngestPipeline>,
}

impl IngestApi {
    /// 打开数据库与快照目录,加载配置并执行启动恢复
    ///
    /// # 参数
    /// - db_path: SQLite 文件路径
    /// - storage_root: 快照根目录（active / archive / rejected）
    pub async fn open(db_path: &str, storage_root: impl Into<PathBuf>) -> ApiResult<Self> {
        let conn = open_sqlite_connection(db_path)?;
        ensure_schema(&conn)?;
        let conn = Arc::new(Mutex::new(conn));

        let config = ConfigManager::from_connection(Arc::clone(&conn))
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;
        let settings = config
            .load_settings()
            .await
            .map_err(|e| ApiError::ConfigError(e.to_string()))?;

        let store: Arc<dyn DatasetStore> = Arc::new(FsDatasetStore::new(storage_root)?);
        Self::from_parts(conn, store, settings, None)
    }

    /// 由已有组件装配（测试可注入存储实现与固定日期）
    pub fn from_parts(
        conn: Arc<Mutex<Connection>>,
        store: Arc<dyn DatasetStore>,
        settings: IngestSettings,
        today: Option<NaiveDate>,
    ) -> ApiResult<Self> {
        let registry = SchemaRegistry::builtin()
            .map_err(|e| ApiError::InternalError(format!("内置模式构建失败: {}", e)))?;

        let policy = RetentionPolicy {
            max_versions: settings.max_versions,
            retention_days: settings.retention_days,
        };
        let versions = Arc::new(VersionStore::new(
            FileUploadRepository::new(conn),
            store,
            policy,
        ));
        let report = versions.recover()?;
        if report != RecoveryReport::default() {
            info!(?report, "启动时修复了不一致状态");
        }

        let mut pipeline = IngestPipeline::new(
            registry,
            versions,
            RefreshJobTracker::new(),
            Arc::new(CategoryLocks::new()),
            settings,
        );
        if let Some(today) = today {
            pipeline = pipeline.with_today(today);
        }

        Ok(Self {
            pipeline: Arc::new(pipeline),
        })
    }

    pub fn settings(&self) -> &IngestSettings {
        self.pipeline.settings()
    }

    /// 解析类别名称（未知类别为请求约束错误）
    pub fn parse_category(name: &str) -> ApiResult<Category> {
        Category::parse(name.trim())
            .ok_or_else(|| ApiError::InvalidInput(format!("未知类别: {}", name)))
    }

    // ==========================================
    // 预检与导入
    // ==========================================

    /// 预检: 校验 + 质量评分,不提交
    pub fn validate_and_score(
        &self,
        filename: &str,
        bytes: &[u8],
        category: Category,
    ) -> ApiResult<PreviewReport> {
        Ok(self.pipeline.preview(filename, bytes, category)?)
    }

    /// 提交导入任务,立即返回 job_id
    ///
    /// # 错误
    /// - merge 模式缺少 key: 在创建任务前直接拒绝
    /// - 需在 tokio 运行时内调用
    pub fn ingest(&self, request: IngestRequest) -> ApiResult<String> {
        if let UploadMode::Merge { key } = &request.mode {
            if key.trim().is_empty() {
                return Err(IngestError::MergeConstraint("merge 模式必须指定 key".to_string()).into());
            }
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| ApiError::InternalError(format!("无可用异步运行时: {}", e)))?;

        let tracker = self.pipeline.tracker();
        tracker.evict_finished(Duration::from_secs(self.settings().job_retention_secs));
        let job_id = tracker.create(request.category, &request.filename, request.mode.clone())?;

        let pipeline = Arc::clone(&self.pipeline);
        let spawned_id = job_id.clone();
        handle.spawn(async move {
            if let Err(e) = pipeline.run(&spawned_id, request).await {
                error!(job_id = %spawned_id, kind = %e.kind(), error = %e, "导入任务失败");
            }
        });
        Ok(job_id)
    }

    // ==========================================
    // 任务查询
    // ==========================================

    pub fn get_job_status(&self, job_id: &str) -> ApiResult<RefreshJob> {
        self.pipeline
            .tracker()
            .get(job_id)
            .ok_or_else(|| ApiError::NotFound(format!("RefreshJob(id={})不存在", job_id)))
    }

    /// 轮询直到任务进入终态
    pub async fn wait_for_job(&self, job_id: &str, poll: Duration) -> ApiResult<RefreshJob> {
        loop {
            let job = self.get_job_status(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub async fn wait_for_jobs(&self, job_ids: &[String], poll: Duration) -> ApiResult<Vec<RefreshJob>> {
        join_all(job_ids.iter().map(|id| self.wait_for_job(id, poll)))
            .await
            .into_iter()
            .collect()
    }

    /// 请求协作式取消
    ///
    /// # 返回
    /// - false: 任务已结束
    pub fn cancel_job(&self, job_id: &str) -> ApiResult<bool> {
        Ok(self.pipeline.tracker().request_cancel(job_id)?)
    }

    // ==========================================
    // 数据集与版本
    // ==========================================

    pub fn get_active(&self, category: Category) -> ApiResult<Option<ActiveDatasetInfo>> {
        let Some((upload, table)) = self.pipeline.versions().active_table(category)? else {
            return Ok(None);
        };
        Ok(Some(ActiveDatasetInfo {
            upload_id: upload.id,
            category,
            filename: upload.filename,
            uploaded_by: upload.uploaded_by,
            upload_timestamp: upload.upload_timestamp,
            activated_at: upload.activated_at,
            columns: table.columns,
            row_count: upload.row_count,
            quality_score: upload.quality_score,
            change_summary: upload.change_summary,
        }))
    }

    /// 生效数据集的前 limit 行
    pub fn preview_active(&self, category: Category, limit: usize) -> ApiResult<Option<ParsedTable>> {
        Ok(self
            .pipeline
            .versions()
            .active_table(category)?
            .map(|(_, table)| table.head(limit)))
    }

    /// 历史版本（新版本在前）; limit 缺省取配置
    pub fn get_history(&self, category: Category, limit: Option<usize>) -> ApiResult<Vec<FileVersionSummary>> {
        let limit = limit.unwrap_or(self.settings().history_limit);
        Ok(self.pipeline.versions().history(category, limit)?)
    }

    pub async fn restore(&self, version_id: &str, category: Category) -> ApiResult<RestoreOutcome> {
        Ok(self.pipeline.restore(version_id, category).await?)
    }

    /// 四个类别的生效状态总览
    pub fn get_all_status(&self) -> ApiResult<Vec<CategoryStatus>> {
        Category::ALL
            .iter()
            .map(|c| {
                Ok(match self.pipeline.versions().active(*c)? {
                    Some(upload) => CategoryStatus::from_upload(&upload),
                    None => CategoryStatus::missing(*c),
                })
            })
            .collect()
    }

    pub fn get_schema(&self, category: Category) -> ApiResult<&'static SchemaRule> {
        Ok(self.pipeline.rule(category)?)
    }

    pub fn list_quality_issues(&self, upload_id: &str) -> ApiResult<Vec<QualityIssue>> {
        let versions = self.pipeline.versions();
        if versions.find_upload(upload_id)?.is_none() {
            return Err(ApiError::NotFound(format!("FileUpload(id={})不存在", upload_id)));
        }
        Ok(versions.quality_issues(upload_id)?)
    }
}
