// ==========================================
// 供应链数据导入引擎 - 数据质量引擎
// ==========================================
// 流程: 类型归一化 -> 重复行 -> 必填为空 -> 数值越界 -> 未来日期 -> 格式
// 输出: 清洗后的表 (规则 1-3 之后) + 有序问题列表 + 0~100 评分
// ==========================================

pub mod rules;
pub mod score;

use crate::domain::table::ParsedTable;
use crate::domain::upload::QualityIssue;
use crate::importer::data_cleaner::DataCleaner;
use crate::schema::SchemaRule;
use chrono::{NaiveDate, Utc};
use rules::{CleaningState, RuleContext, PIPELINE};
use tracing::debug;

pub use score::quality_score;

/// 默认分块大小（行）
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

/// 质量检查结果
#[derive(Debug, Clone, PartialEq)]
pub struct QualityOutcome {
    pub table: ParsedTable,
    pub issues: Vec<QualityIssue>,
    pub score: f64,
    pub total_rows: usize,
    pub valid_rows: usize,
}

impl QualityOutcome {
    pub fn rejected_rows(&self) -> usize {
        self.total_rows - self.valid_rows
    }

    /// 未自动解决的问题
    pub fn unresolved(&self) -> Vec<&QualityIssue> {
        self.issues.iter().filter(|i| !i.auto_resolved).collect()
    }
}

pub struct QualityEngine {
    cleaner: DataCleaner,
    chunk_size: usize,
    today: Option<NaiveDate>,
}

impl Default for QualityEngine {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl QualityEngine {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            cleaner: DataCleaner,
            chunk_size: chunk_size.max(1),
            today: None,
        }
    }

    /// 固定"当前日期"（未来日期规则使用）
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// 对已通过校验的表执行质量规则
    pub fn run(&self, table: &ParsedTable, rule: &SchemaRule) -> QualityOutcome {
        let total_rows = table.row_count();
        let ctx = RuleContext {
            rule,
            today: self.today.unwrap_or_else(|| Utc::now().date_naive()),
            chunk_size: self.chunk_size,
        };

        let mut state = CleaningState::from_input(self.cleaner.coerce_table(table, rule));
        let mut issues = Vec::new();
        for apply in PIPELINE {
            let (next, issue) = apply(state, &ctx);
            state = next;
            if let Some(issue) = issue {
                debug!(
                    category = %rule.category,
                    kind = %issue.kind,
                    rows = issue.affected_count(),
                    "质量规则命中"
                );
                issues.push(issue);
            }
        }

        let valid_rows = state.table.row_count();
        let score = quality_score(total_rows, valid_rows, &issues);
        QualityOutcome {
            table: state.table,
            issues,
            score,
            total_rows,
            valid_rows,
        }
    }
}
