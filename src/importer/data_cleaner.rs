// ==========================================
// 供应链数据导入引擎 - 数据清洗器实现
// ==========================================
// 职责: 表头标准化 / 单元格类型强制转换 / 整表类型归一化
// 规则: 失败即关闭 (NaN/inf/非整数小数/无法识别的日期 均视为类型错误)
// ==========================================

use crate::domain::table::{CellValue, ParsedTable};
use crate::domain::types::ColumnType;
use crate::importer::ingest_trait::DataCleaner as DataCleanerTrait;
use crate::schema::SchemaRule;
use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// 可识别的日期格式
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d", "%m/%d/%Y"];

/// 可识别的日期时间格式（截断为日期）
const DATETIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];

/// 整数可精确表示的浮点上限 (2^53)
const MAX_EXACT_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

pub struct DataCleaner;

impl DataCleanerTrait for DataCleaner {
    fn normalize_header(&self, raw: &str) -> String {
        raw.trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_")
    }

    fn coerce_cell(&self, value: &CellValue, ty: ColumnType) -> Option<CellValue> {
        if value.is_null() {
            return Some(CellValue::Null);
        }
        match ty {
            ColumnType::String => Some(CellValue::Text(match value {
                CellValue::Text(s) => s.trim().to_string(),
                CellValue::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_FLOAT_INT => {
                    format!("{}", *f as i64)
                }
                other => other.to_string(),
            })),
            ColumnType::Integer => match value {
                CellValue::Integer(i) => Some(CellValue::Integer(*i)),
                CellValue::Float(f) => float_to_int(*f).map(CellValue::Integer),
                CellValue::Text(s) => parse_int(s.trim()).map(CellValue::Integer),
                _ => None,
            },
            ColumnType::Float => match value {
                CellValue::Integer(i) => Some(CellValue::Float(*i as f64)),
                CellValue::Float(f) if f.is_finite() => Some(CellValue::Float(*f)),
                CellValue::Text(s) => parse_float(s.trim()).map(CellValue::Float),
                _ => None,
            },
            ColumnType::Date => match value {
                CellValue::Date(d) => Some(CellValue::Date(*d)),
                CellValue::Text(s) => parse_date(s.trim()).map(CellValue::Date),
                _ => None,
            },
        }
    }
}

impl DataCleaner {
    /// 按模式声明对整表做类型归一化
    ///
    /// 说明: 仅在校验通过后调用; 个别无法转换的单元格置为 Null,
    ///       由后续空值规则处理
    pub fn coerce_table(&self, table: &ParsedTable, rule: &SchemaRule) -> ParsedTable {
        let types: Vec<Option<ColumnType>> = table
            .columns
            .iter()
            .map(|c| rule.column_types.get(c).copied())
            .collect();

        let rows = table
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(types.iter())
                    .map(|(cell, ty)| match ty {
                        Some(t) => self.coerce_cell(cell, *t).unwrap_or(CellValue::Null),
                        None => match cell {
                            CellValue::Text(s) if s.trim().is_empty() => CellValue::Null,
                            other => other.clone(),
                        },
                    })
                    .collect()
            })
            .collect();

        ParsedTable {
            columns: table.columns.clone(),
            rows,
        }
    }
}

fn float_to_int(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT_FLOAT_INT {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_int(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(float_to_int))
}

fn parse_float(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.date_naive())
}
