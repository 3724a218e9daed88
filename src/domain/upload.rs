// ==========================================
// 供应链数据导入引擎 - 上传与版本实体
// ==========================================
// 职责: FileUpload / FileVersion 持久化实体,
//       校验结果、质量问题、变更摘要、预览报告等派生对象
// 红线: 每个类别同一时刻至多一条 status=active 的 FileUpload
// ==========================================

use crate::domain::table::ParsedTable;
use crate::domain::types::{Category, IssueKind, Severity, UploadStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// FileUpload - 上传记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpload {
    pub id: String,
    pub category: Category,
    pub filename: String,
    pub upload_timestamp: NaiveDateTime,
    pub uploaded_by: String,
    pub row_count: i64,
    pub file_size_bytes: i64,
    pub status: UploadStatus,
    pub quality_score: f64,              // [0, 100]
    pub validation_errors: serde_json::Value, // 未自动解决的问题 / 拒收原因
    pub storage_path: Option<String>,    // 数据快照位置
    pub activated_at: Option<NaiveDateTime>,
    pub change_summary: Option<ChangeSummary>,
}

impl FileUpload {
    pub fn is_active(&self) -> bool {
        self.status == UploadStatus::Active
    }
}

// ==========================================
// FileVersion - 归档版本
// ==========================================
// 仅在 active -> archived 迁移时创建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersion {
    pub id: String,
    pub file_upload_id: String,
    pub category: Category,
    pub version_number: i64, // 按类别单调递增
    pub replaced_at: NaiveDateTime,
    pub replaced_by: Option<String>, // 取代它的 FileUpload id
    pub storage_path: String,        // 归档区快照
}

/// 历史版本摘要（供查询接口返回）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileVersionSummary {
    pub version_id: String,
    pub version_number: i64,
    pub file_upload_id: String,
    pub filename: String,
    pub uploaded_by: String,
    pub upload_timestamp: NaiveDateTime,
    pub row_count: i64,
    pub quality_score: f64,
    pub replaced_at: NaiveDateTime,
    pub replaced_by: Option<String>,
    pub upload_status: UploadStatus,
}

// ==========================================
// ValidationResult - 模式校验结果
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMismatch {
    pub column: String,
    pub row_index: usize,
    pub expected: String,
    pub found: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_columns: Vec<String>,
    pub type_errors: Vec<TypeMismatch>,
    pub required_columns_present: Vec<String>,
    pub extra_columns: Vec<String>,
}

impl ValidationResult {
    /// 受影响的行号（类型错误所在行,去重升序）
    pub fn affected_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.type_errors.iter().map(|e| e.row_index).collect();
        rows.sort_unstable();
        rows.dedup();
        rows
    }

    /// 人类可读的失败摘要
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing_columns.is_empty() {
            parts.push(format!("缺少必填列: {}", self.missing_columns.join(", ")));
        }
        for e in &self.type_errors {
            parts.push(format!(
                "列 {} 第 {} 行类型错误: 期望 {}, 实际 {}",
                e.column, e.row_index, e.expected, e.found
            ));
        }
        parts.join("; ")
    }
}

// ==========================================
// QualityIssue - 数据质量问题
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub column: Option<String>,
    pub affected_row_indices: Vec<usize>, // 输入表中的 0 基行号
    pub auto_resolved: bool,
    pub resolution_description: String,
}

impl QualityIssue {
    pub fn affected_count(&self) -> usize {
        self.affected_row_indices.len()
    }
}

// ==========================================
// ChangeSummary - 合并变更摘要
// ==========================================
// 不变量: total_row_count_after == 结果表实际行数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub rows_replaced: usize,
    pub rows_appended: usize,
    pub rows_updated: usize,
    pub rows_inserted: usize,
    pub rows_discarded: usize,
    pub total_row_count_after: usize,
}

// ==========================================
// PreviewReport - 预检报告 (不提交)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewReport {
    pub category: Category,
    pub validation: ValidationResult,
    pub issues: Vec<QualityIssue>,
    pub quality_score: f64,
    pub total_rows: usize,
    pub valid_rows: usize,
    pub rejected_rows: usize,
    pub preview: ParsedTable, // 输入前 N 行
}

// ==========================================
// 当前生效数据集信息
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDatasetInfo {
    pub upload_id: String,
    pub category: Category,
    pub filename: String,
    pub uploaded_by: String,
    pub upload_timestamp: NaiveDateTime,
    pub activated_at: Option<NaiveDateTime>,
    pub columns: Vec<String>,
    pub row_count: i64,
    pub quality_score: f64,
    pub change_summary: Option<ChangeSummary>,
}

/// 类别状态总览中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStatus {
    pub category: Category,
    pub status: DatasetPresence,
    pub filename: Option<String>,
    pub upload_timestamp: Option<NaiveDateTime>,
    pub uploaded_by: Option<String>,
    pub row_count: Option<i64>,
    pub quality_score: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetPresence {
    Active,
    Missing,
}

impl CategoryStatus {
    pub fn missing(category: Category) -> Self {
        Self {
            category,
            status: DatasetPresence::Missing,
            filename: None,
            upload_timestamp: None,
            uploaded_by: None,
            row_count: None,
            quality_score: None,
        }
    }

    pub fn from_upload(upload: &FileUpload) -> Self {
        Self {
            category: upload.category,
            status: DatasetPresence::Active,
            filename: Some(upload.filename.clone()),
            upload_timestamp: Some(upload.upload_timestamp),
            uploaded_by: Some(upload.uploaded_by.clone()),
            row_count: Some(upload.row_count),
            quality_score: Some(upload.quality_score),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_affected_rows_dedup_sorted() {
        let v = ValidationResult {
            valid: false,
            type_errors: vec![
                TypeMismatch {
                    column: "quantity".into(),
                    row_index: 4,
                    expected: "float".into(),
                    found: "abc".into(),
                },
                TypeMismatch {
                    column: "date".into(),
                    row_index: 1,
                    expected: "date".into(),
                    found: "x".into(),
                },
                TypeMismatch {
                    column: "revenue".into(),
                    row_index: 4,
                    expected: "float".into(),
                    found: "?".into(),
                },
            ],
            ..Default::default()
        };
        assert_eq!(v.affected_rows(), vec![1, 4]);
        assert!(v.summary().contains("quantity"));
    }
}
