// ==========================================
// 供应链数据导入引擎 - 数据质量规则
// ==========================================
// 每条规则都是纯函数: (CleaningState, RuleContext) -> (CleaningState, Option<QualityIssue>)
// 规则 1-3 删除行并自动解决; 规则 4-5 仅标记,不删除行
// 按块处理行,结果与整表处理完全一致
// ==========================================

use crate::domain::table::{CellKey, CellValue, ParsedTable};
use crate::domain::types::{IssueKind, Severity};
use crate::domain::upload::QualityIssue;
use crate::schema::SchemaRule;
use chrono::NaiveDate;
use std::collections::HashSet;

/// 清洗中间状态: 当前表 + 每行在输入表中的原始行号
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningState {
    pub table: ParsedTable,
    pub origins: Vec<usize>,
}

impl CleaningState {
    pub fn from_input(table: ParsedTable) -> Self {
        let origins = (0..table.row_count()).collect();
        Self { table, origins }
    }
}

pub struct RuleContext<'a> {
    pub rule: &'a SchemaRule,
    pub today: NaiveDate,
    pub chunk_size: usize,
}

pub type QualityRule = fn(CleaningState, &RuleContext<'_>) -> (CleaningState, Option<QualityIssue>);

/// 固定执行顺序
pub const PIPELINE: [QualityRule; 5] = [
    remove_duplicates,
    drop_null_required,
    enforce_bounds,
    flag_future_dates,
    check_formats,
];

// ==========================================
// 分块辅助
// ==========================================

/// 按块过滤行; keep 返回 false 的行被删除,返回被删除行的原始行号
fn retain_rows<F>(state: CleaningState, chunk_size: usize, mut keep: F) -> (CleaningState, Vec<usize>)
where
    F: FnMut(&[CellValue]) -> bool,
{
    let CleaningState { table, origins } = state;
    let ParsedTable { columns, rows } = table;
    let chunk = chunk_size.max(1);

    let mut kept_rows = Vec::with_capacity(rows.len());
    let mut kept_origins = Vec::with_capacity(origins.len());
    let mut dropped = Vec::new();

    let mut row_iter = rows.into_iter().zip(origins);
    loop {
        let batch: Vec<(Vec<CellValue>, usize)> = row_iter.by_ref().take(chunk).collect();
        if batch.is_empty() {
            break;
        }
        for (row, origin) in batch {
            if keep(&row) {
                kept_rows.push(row);
                kept_origins.push(origin);
            } else {
                dropped.push(origin);
            }
        }
    }

    (
        CleaningState {
            table: ParsedTable {
                columns,
                rows: kept_rows,
            },
            origins: kept_origins,
        },
        dropped,
    )
}

/// 按块扫描行,返回命中行的原始行号（不删除）
fn flag_rows<F>(state: &CleaningState, chunk_size: usize, mut hit: F) -> Vec<usize>
where
    F: FnMut(&[CellValue]) -> bool,
{
    let chunk = chunk_size.max(1);
    let mut flagged = Vec::new();
    for (rows, origins) in state.table.rows.chunks(chunk).zip(state.origins.chunks(chunk)) {
        for (row, origin) in rows.iter().zip(origins) {
            if hit(row) {
                flagged.push(*origin);
            }
        }
    }
    flagged
}

fn issue(
    kind: IssueKind,
    severity: Severity,
    column: Option<String>,
    rows: Vec<usize>,
    auto_resolved: bool,
    description: String,
) -> Option<QualityIssue> {
    if rows.is_empty() {
        return None;
    }
    Some(QualityIssue {
        kind,
        severity,
        column,
        affected_row_indices: rows,
        auto_resolved,
        resolution_description: description,
    })
}

/// 表中存在的列 -> (列名, 列号)
fn present<'a>(table: &ParsedTable, columns: impl IntoIterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    columns
        .into_iter()
        .filter_map(|c| table.column_index(c).map(|i| (c, i)))
        .collect()
}

fn single_column(cols: &[(&str, usize)]) -> Option<String> {
    match cols {
        [(name, _)] => Some(name.to_string()),
        _ => None,
    }
}

// ==========================================
// 规则 1: 完全重复行
// ==========================================
pub fn remove_duplicates(
    state: CleaningState,
    ctx: &RuleContext<'_>,
) -> (CleaningState, Option<QualityIssue>) {
    let mut seen: HashSet<Vec<CellKey>> = HashSet::new();
    let (state, dropped) = retain_rows(state, ctx.chunk_size, |row| {
        seen.insert(ParsedTable::row_key(row))
    });
    let n = dropped.len();
    let issue = issue(
        IssueKind::DuplicateRows,
        Severity::Warning,
        None,
        dropped,
        true,
        format!("移除 {} 条完全重复行（保留首次出现）", n),
    );
    (state, issue)
}

// ==========================================
// 规则 2: 必填字段为空
// ==========================================
pub fn drop_null_required(
    state: CleaningState,
    ctx: &RuleContext<'_>,
) -> (CleaningState, Option<QualityIssue>) {
    let cols = present(&state.table, ctx.rule.non_null_columns());
    let idx: Vec<usize> = cols.iter().map(|(_, i)| *i).collect();
    let column = single_column(&cols);
    let names: Vec<&str> = cols.iter().map(|(n, _)| *n).collect();

    let (state, dropped) = retain_rows(state, ctx.chunk_size, |row| {
        !idx.iter().any(|i| row.get(*i).map_or(true, CellValue::is_null))
    });
    let n = dropped.len();
    let issue = issue(
        IssueKind::NullRequired,
        Severity::Error,
        column,
        dropped,
        true,
        format!("移除 {} 条必填字段为空的行（字段: {}）", n, names.join(", ")),
    );
    (state, issue)
}

// ==========================================
// 规则 3: 数值越界（含负值）
// ==========================================
pub fn enforce_bounds(
    state: CleaningState,
    ctx: &RuleContext<'_>,
) -> (CleaningState, Option<QualityIssue>) {
    let bounded: Vec<(&str, usize, _)> = ctx
        .rule
        .constraints
        .iter()
        .filter(|(_, c)| c.has_bounds())
        .filter_map(|(name, c)| state.table.column_index(name).map(|i| (name.as_str(), i, *c)))
        .collect();

    let mut violated: Vec<&str> = Vec::new();
    let (state, dropped) = retain_rows(state, ctx.chunk_size, |row| {
        let mut ok = true;
        for (name, i, c) in &bounded {
            if let Some(v) = row.get(*i).and_then(CellValue::as_f64) {
                if !c.accepts(v) {
                    ok = false;
                    if !violated.contains(name) {
                        violated.push(*name);
                    }
                }
            }
        }
        ok
    });
    let n = dropped.len();
    let column = match violated.as_slice() {
        [one] => Some(one.to_string()),
        _ => None,
    };
    let issue = issue(
        IssueKind::NegativeValue,
        Severity::Error,
        column,
        dropped,
        true,
        format!("移除 {} 条数值越界的行（字段: {}）", n, violated.join(", ")),
    );
    (state, issue)
}

// ==========================================
// 规则 4: 未来日期（仅标记）
// ==========================================
pub fn flag_future_dates(
    state: CleaningState,
    ctx: &RuleContext<'_>,
) -> (CleaningState, Option<QualityIssue>) {
    let Some(column) = ctx.rule.future_date_column.as_deref() else {
        return (state, None);
    };
    let Some(idx) = state.table.column_index(column) else {
        return (state, None);
    };

    let today = ctx.today;
    let flagged = flag_rows(&state, ctx.chunk_size, |row| {
        row.get(idx)
            .and_then(CellValue::as_date)
            .map_or(false, |d| d > today)
    });
    let n = flagged.len();
    let issue = issue(
        IssueKind::FutureDate,
        Severity::Warning,
        Some(column.to_string()),
        flagged,
        false,
        format!("{} 行日期晚于 {}，已保留待人工确认", n, today),
    );
    (state, issue)
}

// ==========================================
// 规则 5: 格式检查（仅标记）
// ==========================================
pub fn check_formats(
    state: CleaningState,
    ctx: &RuleContext<'_>,
) -> (CleaningState, Option<QualityIssue>) {
    let checks: Vec<_> = ctx
        .rule
        .formats
        .iter()
        .filter_map(|f| state.table.column_index(&f.column).map(|i| (f, i)))
        .collect();
    if checks.is_empty() {
        return (state, None);
    }

    let mut failed_columns: Vec<&str> = Vec::new();
    let flagged = flag_rows(&state, ctx.chunk_size, |row| {
        let mut bad = false;
        for (fmt, i) in &checks {
            let mismatch = match row.get(*i) {
                Some(CellValue::Text(s)) => !fmt.is_match(s),
                _ => false,
            };
            if mismatch {
                bad = true;
                if !failed_columns.contains(&fmt.column.as_str()) {
                    failed_columns.push(fmt.column.as_str());
                }
            }
        }
        bad
    });
    let n = flagged.len();
    let column = match failed_columns.as_slice() {
        [one] => Some(one.to_string()),
        _ => None,
    };
    let issue = issue(
        IssueKind::InvalidFormat,
        Severity::Warning,
        column,
        flagged,
        false,
        format!("{} 行格式不符（字段: {}），已保留", n, failed_columns.join(", ")),
    );
    (state, issue)
}
