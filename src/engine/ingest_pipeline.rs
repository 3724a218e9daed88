// ==========================================
// 供应链数据导入引擎 - 导入流水线
// ==========================================
// 步骤: 校验模式 -> 质量检查 -> 合并 -> 提交 -> 归档被取代版本
// 锁: 类别锁在合并前获取,提交（含归档收尾）后释放
// 红线: 任一致命错误 -> 任务 failed,生效数据集保持任务开始前的状态
// ==========================================

use crate::config::IngestSettings;
use crate::domain::table::ParsedTable;
use crate::domain::types::{Category, JobStepKind, UploadMode, UploadStatus};
use crate::domain::upload::{FileUpload, PreviewReport, QualityIssue};
use crate::engine::category_lock::CategoryLocks;
use crate::engine::refresh_job::RefreshJobTracker;
use crate::engine::version_store::{RestoreOutcome, VersionStore};
use crate::importer::error::{IngestError, IngestResult};
use crate::importer::file_parser::UniversalFileParser;
use crate::importer::merge_resolver::MergeResolver;
use crate::importer::quality::{QualityEngine, QualityOutcome};
use crate::importer::validator::Validator;
use crate::schema::{SchemaRegistry, SchemaRule};
use crate::db::current_timestamp;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// 预检报告中的输入样本行数
pub const PREVIEW_ROWS: usize = 10;

/// 一次导入请求
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub category: Category,
    pub filename: String,
    pub bytes: Arc<[u8]>,
    pub mode: UploadMode,
    pub uploaded_by: String,
}

pub struct IngestPipeline {
    registry: &'static SchemaRegistry,
    versions: Arc<VersionStore>,
    tracker: RefreshJobTracker,
    locks: Arc<CategoryLocks>,
    settings: IngestSettings,
    today: Option<NaiveDate>,
}

/// 在阻塞线程池中执行同步工作（SQLite / 文件 / 大表变换）
async fn blocking<T, F>(f: F) -> IngestResult<T>
where
    F: FnOnce() -> IngestResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| IngestError::Internal(format!("后台任务异常: {}", e)))?
}

fn parse_with_limit(
    filename: &str,
    bytes: &[u8],
    settings: &IngestSettings,
) -> IngestResult<ParsedTable> {
    if bytes.len() as u64 > settings.max_file_size_bytes() {
        return Err(IngestError::schema(format!(
            "文件过大: {} 字节（上限 {} MB）",
            bytes.len(),
            settings.max_file_size_mb
        )));
    }
    UniversalFileParser.parse(filename, bytes)
}

impl IngestPipeline {
    pub fn new(
        registry: &'static SchemaRegistry,
        versions: Arc<VersionStore>,
        tracker: RefreshJobTracker,
        locks: Arc<CategoryLocks>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            registry,
            versions,
            tracker,
            locks,
            settings,
            today: None,
        }
    }

    /// 固定"当前日期"（未来日期规则使用）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn tracker(&self) -> &RefreshJobTracker {
        &self.tracker
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn rule(&self, category: Category) -> IngestResult<&'static SchemaRule> {
        self.registry
            .get(category)
            .ok_or_else(|| IngestError::MergeConstraint(format!("类别 {} 未定义模式", category)))
    }

    fn quality_engine(&self) -> QualityEngine {
        let engine = QualityEngine::new(self.settings.chunk_size);
        match self.today {
            Some(today) => engine.with_today(today),
            None => engine,
        }
    }

    /// 大小检查后解析原始字节
    pub fn parse_upload(&self, filename: &str, bytes: &[u8]) -> IngestResult<ParsedTable> {
        parse_with_limit(filename, bytes, &self.settings)
    }

    // ==========================================
    // 预检（不提交）
    // ==========================================

    /// 校验并评分,不触碰版本存储
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn preview(&self, filename: &str, bytes: &[u8], category: Category) -> IngestResult<PreviewReport> {
        let rule = self.rule(category)?;
        let table = self.parse_upload(filename, bytes)?;
        let validation = Validator::new().validate(&table, rule);
        let preview = table.head(PREVIEW_ROWS);
        let total_rows = table.row_count();

        if !validation.valid {
            return Ok(PreviewReport {
                category,
                validation,
                issues: Vec::new(),
                quality_score: 0.0,
                total_rows,
                valid_rows: 0,
                rejected_rows: total_rows,
                preview,
            });
        }

        let outcome = self.quality_engine().run(&table, rule);
        Ok(PreviewReport {
            category,
            validation,
            rejected_rows: outcome.rejected_rows(),
            issues: outcome.issues,
            quality_score: outcome.score,
            total_rows,
            valid_rows: outcome.valid_rows,
            preview,
        })
    }

    // ==========================================
    // 完整导入
    // ==========================================

    /// 执行一次导入任务; 任务状态写入 tracker
    #[instrument(skip(self, request), fields(category = %request.category, filename = %request.filename))]
    pub async fn run(&self, job_id: &str, request: IngestRequest) -> IngestResult<()> {
        match self.execute(job_id, &request).await {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.is_rejection() {
                    if let Err(e) = self.record_rejection(&request, &err).await {
                        warn!(job_id, error = %e, "拒收记录写入失败");
                    }
                }
                // 尚未 start 的任务也允许直接失败
                if let Err(e) = self.tracker.fail(job_id, err.report()) {
                    warn!(job_id, error = %e, "任务失败状态写入失败");
                }
                Err(err)
            }
        }
    }

    fn check_cancel(&self, job_id: &str) -> IngestResult<()> {
        if self.tracker.is_cancel_requested(job_id) {
            return Err(IngestError::Cancelled(format!("任务 {} 已被取消", job_id)));
        }
        Ok(())
    }

    async fn execute(&self, job_id: &str, request: &IngestRequest) -> IngestResult<()> {
        let category = request.category;
        self.tracker.start(job_id)?;

        // ===== 1. 校验模式 =====
        self.check_cancel(job_id)?;
        self.tracker.begin_step(job_id, JobStepKind::ValidateSchema)?;
        let rule = self.rule(category)?;
        let filename = request.filename.clone();
        let bytes = Arc::clone(&request.bytes);
        let settings = self.settings.clone();
        // 解析与校验可能处理大文件,放入阻塞线程池
        let table = blocking(move || {
            let table = parse_with_limit(&filename, &bytes, &settings)?;
            let validation = Validator::new().validate(&table, rule);
            if !validation.valid {
                return Err(IngestError::Schema {
                    message: validation.summary(),
                    affected_rows: validation.affected_rows(),
                });
            }
            Ok(table)
        })
        .await?;
        self.tracker.complete_step(
            job_id,
            JobStepKind::ValidateSchema,
            Some(format!("{} 行, {} 列", table.row_count(), table.column_count())),
        )?;

        // ===== 2. 质量检查（无锁） =====
        self.check_cancel(job_id)?;
        self.tracker.begin_step(job_id, JobStepKind::QualityCheck)?;
        let engine = self.quality_engine();
        let quality: QualityOutcome = blocking(move || Ok(engine.run(&table, rule))).await?;
        if quality.valid_rows == 0 {
            return Err(IngestError::Quality {
                message: format!("清洗后无有效行（输入 {} 行）", quality.total_rows),
                affected_rows: (0..quality.total_rows).collect(),
            });
        }
        self.tracker.complete_step(
            job_id,
            JobStepKind::QualityCheck,
            Some(format!(
                "有效 {} / {} 行, 评分 {:.2}",
                quality.valid_rows, quality.total_rows, quality.score
            )),
        )?;

        // ===== 3. 合并（持有类别锁至提交结束） =====
        self.check_cancel(job_id)?;
        self.tracker.begin_step(job_id, JobStepKind::ApplyMerge)?;
        let _guard = self
            .locks
            .acquire(category, Duration::from_millis(self.settings.lock_timeout_ms))
            .await?;

        let versions = Arc::clone(&self.versions);
        let mode = request.mode.clone();
        let chunk_size = self.settings.chunk_size;
        let cleaned = quality.table;
        let merged = blocking(move || {
            let existing = versions.active_table(category)?.map(|(_, t)| t);
            MergeResolver::new(chunk_size).resolve(&cleaned, existing.as_ref(), &mode, rule)
        })
        .await?;
        self.tracker.complete_step(
            job_id,
            JobStepKind::ApplyMerge,
            Some(format!("结果 {} 行", merged.summary.total_row_count_after)),
        )?;

        // ===== 4. 提交 =====
        // 提交前最后一次取消检查; 提交后不可撤回
        self.check_cancel(job_id)?;
        self.tracker.begin_step(job_id, JobStepKind::Commit)?;
        let unresolved: Vec<&QualityIssue> = quality.issues.iter().filter(|i| !i.auto_resolved).collect();
        let upload = FileUpload {
            id: Uuid::new_v4().to_string(),
            category,
            filename: request.filename.clone(),
            upload_timestamp: current_timestamp(),
            uploaded_by: request.uploaded_by.clone(),
            row_count: merged.table.row_count() as i64,
            file_size_bytes: request.bytes.len() as i64,
            status: UploadStatus::Active,
            quality_score: quality.score,
            validation_errors: serde_json::to_value(&unresolved)
                .map_err(|e| IngestError::Internal(e.to_string()))?,
            storage_path: None,
            activated_at: None,
            change_summary: Some(merged.summary),
        };
        let versions = Arc::clone(&self.versions);
        let issues = quality.issues;
        let merged_table = merged.table;
        let committed = blocking(move || Ok(versions.commit_active(upload, &merged_table, issues)?)).await?;
        self.tracker
            .set_result(job_id, &committed.upload.id, merged.summary)?;
        self.tracker.complete_step(
            job_id,
            JobStepKind::Commit,
            Some(format!("upload_id={}", committed.upload.id)),
        )?;

        // ===== 5. 归档收尾（非致命） =====
        self.tracker.begin_step(job_id, JobStepKind::ArchiveSuperseded)?;
        let versions = Arc::clone(&self.versions);
        let finalize_input = committed.clone();
        let message = match blocking(move || Ok(versions.finalize_superseded(&finalize_input)?)).await {
            Ok(cleaned_versions) => match &committed.superseded {
                Some(v) => format!("已归档版本 #{}, 清理 {} 个旧版本", v.version_number, cleaned_versions),
                None => "无被取代版本".to_string(),
            },
            Err(e) => {
                warn!(job_id, error = %e, "归档收尾失败,提交已生效");
                format!("归档收尾失败: {}", e)
            }
        };
        self.tracker
            .complete_step(job_id, JobStepKind::ArchiveSuperseded, Some(message))?;
        self.tracker.complete(job_id)?;

        info!(
            job_id,
            upload_id = %committed.upload.id,
            rows = committed.upload.row_count,
            score = committed.upload.quality_score,
            "导入完成"
        );
        Ok(())
    }

    /// 恢复历史版本; 与导入共用类别锁
    #[instrument(skip(self))]
    pub async fn restore(&self, version_id: &str, category: Category) -> IngestResult<RestoreOutcome> {
        let _guard = self
            .locks
            .acquire(category, Duration::from_millis(self.settings.lock_timeout_ms))
            .await?;
        let versions = Arc::clone(&self.versions);
        let version_id = version_id.to_string();
        blocking(move || Ok(versions.restore(&version_id, category)?)).await
    }

    async fn record_rejection(&self, request: &IngestRequest, err: &IngestError) -> IngestResult<()> {
        let upload = FileUpload {
            id: Uuid::new_v4().to_string(),
            category: request.category,
            filename: request.filename.clone(),
            upload_timestamp: current_timestamp(),
            uploaded_by: request.uploaded_by.clone(),
            row_count: 0,
            file_size_bytes: request.bytes.len() as i64,
            status: UploadStatus::Rejected,
            quality_score: 0.0,
            validation_errors: serde_json::to_value(err.report())
                .map_err(|e| IngestError::Internal(e.to_string()))?,
            storage_path: None,
            activated_at: None,
            change_summary: None,
        };
        let versions = Arc::clone(&self.versions);
        let bytes = Arc::clone(&request.bytes);
        let ext = UniversalFileParser::extension_of(&request.filename);
        let saved = blocking(move || Ok(versions.record_rejected(upload, &bytes, &ext)?)).await?;
        info!(upload_id = %saved.id, kind = %err.kind(), "上传已拒收");
        Ok(())
    }
}
