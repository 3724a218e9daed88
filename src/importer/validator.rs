// ==========================================
// 供应链数据导入引擎 - 模式校验器
// ==========================================
// 职责: 必填列检查 + 声明类型可转换性检查
// 红线: 无副作用,不修改输入表; 每列仅记录第一个类型错误,但扫描所有列
// ==========================================

use crate::domain::table::ParsedTable;
use crate::domain::upload::{TypeMismatch, ValidationResult};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::ingest_trait::DataCleaner as _;
use crate::schema::SchemaRule;

pub struct Validator {
    cleaner: DataCleaner,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            cleaner: DataCleaner,
        }
    }

    /// 校验解析后的表
    ///
    /// # 参数
    /// - table: 解析后的输入表
    /// - rule: 类别对应的模式定义
    ///
    /// # 返回
    /// - ValidationResult: 缺失列存在或任一类型错误时 valid=false
    pub fn validate(&self, table: &ParsedTable, rule: &SchemaRule) -> ValidationResult {
        let missing_columns: Vec<String> = rule
            .required_columns
            .iter()
            .filter(|c| !table.has_column(c))
            .cloned()
            .collect();

        let required_columns_present: Vec<String> = rule
            .required_columns
            .iter()
            .filter(|c| table.has_column(c))
            .cloned()
            .collect();

        let extra_columns: Vec<String> = table
            .columns
            .iter()
            .filter(|c| !rule.is_known(c))
            .cloned()
            .collect();

        let mut type_errors = Vec::new();
        for (col_idx, column) in table.columns.iter().enumerate() {
            let Some(expected) = rule.column_types.get(column) else {
                continue;
            };
            let first_failure = table.rows.iter().enumerate().find_map(|(row_idx, row)| {
                let cell = row.get(col_idx)?;
                match self.cleaner.coerce_cell(cell, *expected) {
                    Some(_) => None,
                    None => Some(TypeMismatch {
                        column: column.clone(),
                        row_index: row_idx,
                        expected: expected.to_string(),
                        found: cell.to_string(),
                    }),
                }
            });
            if let Some(mismatch) = first_failure {
                type_errors.push(mismatch);
            }
        }

        ValidationResult {
            valid: missing_columns.is_empty() && type_errors.is_empty(),
            missing_columns,
            type_errors,
            required_columns_present,
            extra_columns,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::table::CellValue;
    use crate::domain::types::Category;
    use crate::schema::SchemaRegistry;

    fn sales_rule() -> &'static SchemaRule {
        SchemaRegistry::builtin().unwrap().get(Category::Sales).unwrap()
    }

    fn t(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn table(columns: &[&str], rows: Vec<Vec<CellValue>>) -> ParsedTable {
        ParsedTable::with_rows(columns.iter().map(|s| s.to_string()).collect(), rows)
    }

    #[test]
    fn test_valid_sales_table() {
        let input = table(
            &["date", "sku", "quantity", "revenue", "region"],
            vec![vec![t("2024-01-01"), t("A1"), t("3"), t("10.5"), t("EU")]],
        );
        let result = Validator::new().validate(&input, sales_rule());
        assert!(result.valid, "{}", result.summary());
        assert!(result.extra_columns.is_empty());
        assert_eq!(result.required_columns_present.len(), 4);
    }

    #[test]
    fn test_missing_column_invalidates() {
        let input = table(&["date", "sku", "quantity"], vec![]);
        let result = Validator::new().validate(&input, sales_rule());
        assert!(!result.valid);
        assert_eq!(result.missing_columns, vec!["revenue"]);
    }

    #[test]
    fn test_first_failure_per_column_all_columns_scanned() {
        let input = table(
            &["date", "sku", "quantity", "revenue"],
            vec![
                vec![t("2024-01-01"), t("A"), t("x"), t("1")],
                vec![t("nope"), t("B"), t("y"), t("z")],
            ],
        );
        let result = Validator::new().validate(&input, sales_rule());
        assert!(!result.valid);
        let cols: Vec<&str> = result.type_errors.iter().map(|e| e.column.as_str()).collect();
        assert_eq!(cols, vec!["date", "quantity", "revenue"]);
        assert_eq!(result.type_errors[1].row_index, 0, "只记录 quantity 的第一个错误");
        assert_eq!(result.type_errors[2].found, "z");
    }

    #[test]
    fn test_extra_columns_reported_not_invalid() {
        let input = table(
            &["date", "sku", "quantity", "revenue", "notes"],
            vec![vec![t("2024-01-01"), t("A"), t("1"), t("1"), t("free text")]],
        );
        let result = Validator::new().validate(&input, sales_rule());
        assert!(result.valid);
        assert_eq!(result.extra_columns, vec!["notes"]);
    }

    #[test]
    fn test_validation_does_not_mutate_input() {
        let input = table(
            &["date", "sku", "quantity", "revenue"],
            vec![vec![t("2024-01-01"), t("A"), t("1"), t("1")]],
        );
        let before = input.clone();
        let _ = Validator::new().validate(&input, sales_rule());
        assert_eq!(input, before);
    }
}
