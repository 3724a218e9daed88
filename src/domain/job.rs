// ==========================================
// 供应链数据导入引擎 - 刷新任务实体
// ==========================================
// 状态机: initializing -> in_progress -> {completed | failed}
// 红线: 终态吸收; progress_pct 单调不减
// ==========================================

use crate::domain::types::{Category, JobStatus, JobStepKind, StepStatus, UploadMode};
use crate::domain::upload::ChangeSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ==========================================
// 结构化错误报告
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    Quality,
    MergeConstraint,
    ConcurrencyTimeout,
    Storage,
    NotFound,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Schema => "schema",
            ErrorKind::Quality => "quality",
            ErrorKind::MergeConstraint => "merge_constraint",
            ErrorKind::ConcurrencyTimeout => "concurrency_timeout",
            ErrorKind::Storage => "storage",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// 调用方是否可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::ConcurrencyTimeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 致命错误的结构化结果 (kind, message, affected rows)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub affected_rows: Vec<usize>,
}

// ==========================================
// 任务状态迁移错误
// ==========================================
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobStateError {
    #[error("无效的任务状态转换: from={from} to={to}")]
    InvalidTransition { from: String, to: String },

    #[error("步骤状态错误 (step={step}): {message}")]
    InvalidStep { step: String, message: String },
}

// ==========================================
// JobStep - 任务步骤记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStep {
    pub kind: JobStepKind,
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

impl JobStep {
    fn pending(kind: JobStepKind) -> Self {
        Self {
            kind,
            name: kind.as_str().to_string(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            message: None,
        }
    }
}

// ==========================================
// RefreshJob - 单次导入流水线
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshJob {
    pub job_id: String,
    pub category: Category,
    pub filename: String,
    pub mode: UploadMode,
    pub status: JobStatus,
    pub progress_pct: u8,
    pub steps: Vec<JobStep>,
    pub error: Option<ErrorReport>,
    pub upload_id: Option<String>,
    pub change_summary: Option<ChangeSummary>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// 每个步骤完成后推进的进度
const PROGRESS_PER_STEP: u8 = 20;

impl RefreshJob {
    pub fn new(job_id: String, category: Category, filename: String, mode: UploadMode) -> Self {
        Self {
            job_id,
            category,
            filename,
            mode,
            status: JobStatus::Initializing,
            progress_pct: 0,
            steps: JobStepKind::ORDERED.iter().map(|k| JobStep::pending(*k)).collect(),
            error: None,
            upload_id: None,
            change_summary: None,
            cancel_requested: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), JobStateError> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Initializing, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::Initializing, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Failed)
        );
        if !allowed {
            return Err(JobStateError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    fn advance_progress(&mut self, pct: u8) {
        self.progress_pct = self.progress_pct.max(pct.min(100));
    }

    fn step_mut(&mut self, kind: JobStepKind) -> &mut JobStep {
        &mut self.steps[kind.index()]
    }

    pub fn step(&self, kind: JobStepKind) -> &JobStep {
        &self.steps[kind.index()]
    }

    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::InProgress)
    }

    pub fn begin_step(&mut self, kind: JobStepKind) -> Result<(), JobStateError> {
        if self.status != JobStatus::InProgress {
            return Err(JobStateError::InvalidStep {
                step: kind.as_str().to_string(),
                message: format!("任务状态为 {}", self.status),
            });
        }
        let step = self.step_mut(kind);
        if step.status != StepStatus::Pending {
            return Err(JobStateError::InvalidStep {
                step: kind.as_str().to_string(),
                message: "步骤已开始".to_string(),
            });
        }
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete_step(
        &mut self,
        kind: JobStepKind,
        message: Option<String>,
    ) -> Result<(), JobStateError> {
        let step = self.step_mut(kind);
        if step.status != StepStatus::Running {
            return Err(JobStateError::InvalidStep {
                step: kind.as_str().to_string(),
                message: "步骤未在运行".to_string(),
            });
        }
        step.status = StepStatus::Completed;
        step.finished_at = Some(Utc::now());
        step.message = message;
        let pct = (kind.index() as u8 + 1) * PROGRESS_PER_STEP;
        self.advance_progress(pct);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), JobStateError> {
        self.transition(JobStatus::Completed)?;
        self.advance_progress(100);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// 失败: 运行中的步骤标记失败,未执行的步骤标记跳过
    pub fn fail(&mut self, report: ErrorReport) -> Result<(), JobStateError> {
        self.transition(JobStatus::Failed)?;
        let now = Utc::now();
        for step in self.steps.iter_mut() {
            match step.status {
                StepStatus::Running => {
                    step.status = StepStatus::Failed;
                    step.finished_at = Some(now);
                    step.message = Some(report.message.clone());
                }
                StepStatus::Pending => step.status = StepStatus::Skipped,
                _ => {}
            }
        }
        self.error = Some(report);
        self.finished_at = Some(now);
        Ok(())
    }
}
