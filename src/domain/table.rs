// ==========================================
// 供应链数据导入引擎 - 表格数据模型
// ==========================================
// 职责: 单元格值 / 解析后的矩形数据表
// 说明: 每次导入流水线独占自己的表副本,不跨任务共享
// ==========================================

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// CellValue - 单元格值
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
}

/// 可哈希的单元格键（用于整行去重、合并键匹配）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CellKey {
    Null,
    Text(String),
    Integer(i64),
    Float(u64),
    Date(NaiveDate),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn key(&self) -> CellKey {
        match self {
            CellValue::Null => CellKey::Null,
            CellValue::Text(s) => CellKey::Text(s.clone()),
            CellValue::Integer(i) => CellKey::Integer(*i),
            // -0.0 与 0.0 视为同一值
            CellValue::Float(f) => {
                let normalized = if *f == 0.0 { 0.0_f64 } else { *f };
                CellKey::Float(normalized.to_bits())
            }
            CellValue::Date(d) => CellKey::Date(*d),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => write!(f, ""),
            CellValue::Text(s) => write!(f, "{}", s),
            CellValue::Integer(i) => write!(f, "{}", i),
            CellValue::Float(v) => write!(f, "{}", v),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

// ==========================================
// ParsedTable - 解析后的数据表
// ==========================================
// 列有序、行有序; 每行长度与列数一致
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl ParsedTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// 以给定行构造表; 过短的行补 Null,过长的行截断
    pub fn with_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, CellValue::Null);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// 整行键（用于完全重复行判定）
    pub fn row_key(row: &[CellValue]) -> Vec<CellKey> {
        row.iter().map(CellValue::key).collect()
    }

    /// 前 n 行
    pub fn head(&self, n: usize) -> ParsedTable {
        ParsedTable {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// 按列名重排到目标列集合; 缺失列补 Null,多余列丢弃
    pub fn align_to(&self, columns: &[String]) -> ParsedTable {
        let mapping: Vec<Option<usize>> = columns.iter().map(|c| self.column_index(c)).collect();
        let rows = self
            .rows
            .iter()
            .map(|row| {
                mapping
                    .iter()
                    .map(|m| match m {
                        Some(i) => row.get(*i).cloned().unwrap_or(CellValue::Null),
                        None => CellValue::Null,
                    })
                    .collect()
            })
            .collect();
        ParsedTable {
            columns: columns.to_vec(),
            rows,
        }
    }

    /// 列并集: 先保留 a 的列顺序,再追加 b 中新增的列
    pub fn union_columns(a: &[String], b: &[String]) -> Vec<String> {
        let mut out = a.to_vec();
        for c in b {
            if !out.contains(c) {
                out.push(c.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_with_rows_pads_short_rows() {
        let t = ParsedTable::with_rows(
            cols(&["a", "b", "c"]),
            vec![vec![CellValue::Integer(1)]],
        );
        assert_eq!(t.rows[0].len(), 3);
        assert_eq!(t.rows[0][2], CellValue::Null);
    }

    #[test]
    fn test_align_to_reorders_and_fills_null() {
        let t = ParsedTable::with_rows(
            cols(&["sku", "qty"]),
            vec![vec![CellValue::Text("A".into()), CellValue::Integer(3)]],
        );
        let aligned = t.align_to(&cols(&["qty", "region", "sku"]));
        assert_eq!(
            aligned.rows[0],
            vec![
                CellValue::Integer(3),
                CellValue::Null,
                CellValue::Text("A".into())
            ]
        );
    }

    #[test]
    fn test_float_key_treats_negative_zero_as_zero() {
        assert_eq!(CellValue::Float(-0.0).key(), CellValue::Float(0.0).key());
        assert_ne!(CellValue::Float(1.0).key(), CellValue::Integer(1).key());
    }

    #[test]
    fn test_blank_text_is_null() {
        assert!(CellValue::Text("   ".into()).is_null());
        assert!(!CellValue::Text("x".into()).is_null());
        assert!(CellValue::Null.is_null());
    }
}
