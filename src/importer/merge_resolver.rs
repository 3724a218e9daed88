// ==========================================
// 供应链数据导入引擎 - 合并策略
// ==========================================
// 模式: replace / append / merge(key) / smart_merge(日期区间重叠处理)
// 不变量: summary.total_row_count_after == 结果表行数
// 计数约定:
//   rows_replaced  - 被新数据取代而移出的旧行
//   rows_appended  - append 模式追加的新行
//   rows_updated   - 被覆盖的键 / 被取均值的 (日期, 品项) 组
//   rows_inserted  - 进入结果表的新行（不含覆盖旧行的那部分）
//   rows_discarded - 重叠处理中丢弃或被合并掉的行
// ==========================================

use crate::domain::table::{CellKey, CellValue, ParsedTable};
use crate::domain::types::{OverlapStrategy, UploadMode};
use crate::domain::upload::ChangeSummary;
use crate::importer::error::{IngestError, IngestResult};
use crate::importer::quality::DEFAULT_CHUNK_SIZE;
use crate::schema::SchemaRule;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub table: ParsedTable,
    pub summary: ChangeSummary,
}

impl MergeOutcome {
    fn new(table: ParsedTable, mut summary: ChangeSummary) -> Self {
        summary.total_row_count_after = table.row_count();
        Self { table, summary }
    }
}

pub struct MergeResolver {
    chunk_size: usize,
}

impl Default for MergeResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl MergeResolver {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// 按上传模式合并新表与当前生效表
    ///
    /// # 参数
    /// - new_table: 清洗后的新表
    /// - existing: 当前生效表（无则 None）
    /// - mode: 上传模式
    /// - rule: 类别模式（smart_merge 需要日期列与品项列）
    pub fn resolve(
        &self,
        new_table: &ParsedTable,
        existing: Option<&ParsedTable>,
        mode: &UploadMode,
        rule: &SchemaRule,
    ) -> IngestResult<MergeOutcome> {
        match mode {
            UploadMode::Replace => Ok(self.replace(new_table, existing)),
            UploadMode::Append => Ok(self.append(new_table, existing)),
            UploadMode::Merge { key } => self.merge_by_key(new_table, existing, key),
            UploadMode::SmartMerge { strategy } => {
                self.smart_merge(new_table, existing, *strategy, rule)
            }
        }
    }

    // ==========================================
    // replace: 新表原样成为结果
    // ==========================================
    fn replace(&self, new_table: &ParsedTable, existing: Option<&ParsedTable>) -> MergeOutcome {
        MergeOutcome::new(
            new_table.clone(),
            ChangeSummary {
                rows_replaced: existing.map_or(0, ParsedTable::row_count),
                rows_inserted: new_table.row_count(),
                ..Default::default()
            },
        )
    }

    // ==========================================
    // append: 旧行在前、新行在后,不跨边界去重
    // ==========================================
    fn append(&self, new_table: &ParsedTable, existing: Option<&ParsedTable>) -> MergeOutcome {
        let summary = ChangeSummary {
            rows_appended: new_table.row_count(),
            ..Default::default()
        };
        let Some(existing) = existing else {
            return MergeOutcome::new(new_table.clone(), summary);
        };

        let columns = ParsedTable::union_columns(&existing.columns, &new_table.columns);
        let mut result = existing.align_to(&columns);
        for chunk in new_table.rows.chunks(self.chunk_size) {
            let part = ParsedTable {
                columns: new_table.columns.clone(),
                rows: chunk.to_vec(),
            };
            result.rows.extend(part.align_to(&columns).rows);
        }
        MergeOutcome::new(result, summary)
    }

    // ==========================================
    // merge: 按键更新 / 插入,旧表独有的键保持不变
    // ==========================================
    fn merge_by_key(
        &self,
        new_table: &ParsedTable,
        existing: Option<&ParsedTable>,
        key: &str,
    ) -> IngestResult<MergeOutcome> {
        let key = key.trim();
        if key.is_empty() {
            return Err(IngestError::MergeConstraint("merge 模式缺少合并键".to_string()));
        }
        let new_key_idx = new_table.column_index(key).ok_or_else(|| {
            IngestError::MergeConstraint(format!("新数据缺少合并键列: {}", key))
        })?;

        // 新表键必须非空且唯一
        let mut new_index: HashMap<CellKey, usize> = HashMap::with_capacity(new_table.row_count());
        for (i, row) in new_table.rows.iter().enumerate() {
            let cell = &row[new_key_idx];
            if cell.is_null() {
                return Err(IngestError::MergeConstraint(format!(
                    "合并键 {} 在第 {} 行为空",
                    key, i
                )));
            }
            if new_index.insert(cell.key(), i).is_some() {
                return Err(IngestError::MergeConstraint(format!(
                    "合并键 {} 存在重复值: {}",
                    key, cell
                )));
            }
        }

        let Some(existing) = existing else {
            return Ok(MergeOutcome::new(
                new_table.clone(),
                ChangeSummary {
                    rows_inserted: new_table.row_count(),
                    ..Default::default()
                },
            ));
        };
        let existing_key_idx = existing.column_index(key).ok_or_else(|| {
            IngestError::MergeConstraint(format!("当前数据缺少合并键列: {}", key))
        })?;

        let columns = ParsedTable::union_columns(&existing.columns, &new_table.columns);
        let aligned_new = new_table.align_to(&columns);
        let aligned_existing = existing.align_to(&columns);

        let mut updated_keys: HashSet<CellKey> = HashSet::new();
        let mut rows = Vec::with_capacity(existing.row_count() + new_table.row_count());
        for chunk in aligned_existing
            .rows
            .chunks(self.chunk_size)
            .zip(existing.rows.chunks(self.chunk_size))
        {
            let (aligned_chunk, raw_chunk) = chunk;
            for (aligned_row, raw_row) in aligned_chunk.iter().zip(raw_chunk) {
                let k = raw_row[existing_key_idx].key();
                match new_index.get(&k) {
                    Some(&new_i) => {
                        rows.push(aligned_new.rows[new_i].clone());
                        updated_keys.insert(k);
                    }
                    None => rows.push(aligned_row.clone()),
                }
            }
        }

        let mut inserted = 0;
        for (i, row) in aligned_new.rows.iter().enumerate() {
            if !updated_keys.contains(&new_table.rows[i][new_key_idx].key()) {
                rows.push(row.clone());
                inserted += 1;
            }
        }

        Ok(MergeOutcome::new(
            ParsedTable { columns, rows },
            ChangeSummary {
                rows_updated: updated_keys.len(),
                rows_inserted: inserted,
                ..Default::default()
            },
        ))
    }

    // ==========================================
    // smart_merge: 日期区间重叠处理
    // ==========================================
    fn smart_merge(
        &self,
        new_table: &ParsedTable,
        existing: Option<&ParsedTable>,
        strategy: OverlapStrategy,
        rule: &SchemaRule,
    ) -> IngestResult<MergeOutcome> {
        let (Some(date_col), Some(item_col)) = (rule.date_column.as_deref(), rule.item_column.as_deref())
        else {
            return Err(IngestError::MergeConstraint(format!(
                "类别 {} 不支持智能合并（未声明日期列与品项列）",
                rule.category
            )));
        };
        if !new_table.has_column(date_col) {
            return Err(IngestError::MergeConstraint(format!("新数据缺少日期列: {}", date_col)));
        }

        let Some(existing) = existing else {
            return Ok(MergeOutcome::new(
                new_table.clone(),
                ChangeSummary {
                    rows_inserted: new_table.row_count(),
                    ..Default::default()
                },
            ));
        };
        if !existing.has_column(date_col) {
            return Err(IngestError::MergeConstraint(format!("当前数据缺少日期列: {}", date_col)));
        }

        let columns = ParsedTable::union_columns(&existing.columns, &new_table.columns);
        let ex = existing.align_to(&columns);
        let nw = new_table.align_to(&columns);
        let date_idx = columns.iter().position(|c| c == date_col).ok_or_else(|| {
            IngestError::MergeConstraint(format!("数据缺少日期列: {}", date_col))
        })?;

        // 无交集: 两侧全部保留
        let Some((lo, hi)) = intersect(date_range(&ex, date_idx), date_range(&nw, date_idx)) else {
            let mut rows = ex.rows;
            rows.extend(nw.rows);
            return Ok(MergeOutcome::new(
                ParsedTable { columns, rows },
                ChangeSummary {
                    rows_inserted: new_table.row_count(),
                    ..Default::default()
                },
            ));
        };
        let in_window = |row: &[CellValue]| {
            row[date_idx]
                .as_date()
                .map_or(false, |d| d >= lo && d <= hi)
        };

        match strategy {
            OverlapStrategy::KeepExisting => {
                let mut rows = ex.rows;
                let mut discarded = 0;
                let mut inserted = 0;
                for chunk in nw.rows.chunks(self.chunk_size) {
                    for row in chunk {
                        if in_window(&row[..]) {
                            discarded += 1;
                        } else {
                            rows.push(row.clone());
                            inserted += 1;
                        }
                    }
                }
                Ok(MergeOutcome::new(
                    ParsedTable { columns, rows },
                    ChangeSummary {
                        rows_inserted: inserted,
                        rows_discarded: discarded,
                        ..Default::default()
                    },
                ))
            }
            OverlapStrategy::ReplaceWithNew => {
                let mut rows = Vec::with_capacity(ex.row_count() + nw.row_count());
                let mut replaced = 0;
                for chunk in ex.rows.chunks(self.chunk_size) {
                    for row in chunk {
                        if in_window(&row[..]) {
                            replaced += 1;
                        } else {
                            rows.push(row.clone());
                        }
                    }
                }
                let inserted = nw.row_count();
                rows.extend(nw.rows);
                Ok(MergeOutcome::new(
                    ParsedTable { columns, rows },
                    ChangeSummary {
                        rows_replaced: replaced,
                        rows_inserted: inserted,
                        ..Default::default()
                    },
                ))
            }
            OverlapStrategy::AverageValues => {
                let item_idx = columns.iter().position(|c| c == item_col).ok_or_else(|| {
                    IngestError::MergeConstraint(format!("数据缺少品项列: {}", item_col))
                })?;
                let measure_idx: Vec<usize> = rule
                    .measure_columns
                    .iter()
                    .filter_map(|m| columns.iter().position(|c| c == m))
                    .collect();
                let outcome = self.average_overlap(ex, nw, date_idx, item_idx, &measure_idx, &in_window);
                Ok(MergeOutcome::new(
                    ParsedTable {
                        columns,
                        rows: outcome.0,
                    },
                    outcome.1,
                ))
            }
        }
    }

    /// 交集内两侧都出现的 (日期, 品项) 组合并为一行（位于首个旧行位置）;
    /// 度量列取两侧所有行的算术平均; 单侧出现的组合原样保留
    fn average_overlap<F>(
        &self,
        ex: ParsedTable,
        nw: ParsedTable,
        date_idx: usize,
        item_idx: usize,
        measure_idx: &[usize],
        in_window: &F,
    ) -> (Vec<Vec<CellValue>>, ChangeSummary)
    where
        F: Fn(&[CellValue]) -> bool,
    {
        let pair_of = |row: &[CellValue]| (row[date_idx].key(), row[item_idx].key());

        // 新表交集内各组的行号
        let mut new_groups: HashMap<(CellKey, CellKey), Vec<usize>> = HashMap::new();
        for (i, row) in nw.rows.iter().enumerate() {
            if in_window(&row[..]) {
                new_groups.entry(pair_of(&row[..])).or_default().push(i);
            }
        }

        // 旧表交集内、且在新表中也出现的组
        let mut ex_groups: HashMap<(CellKey, CellKey), Vec<usize>> = HashMap::new();
        for (i, row) in ex.rows.iter().enumerate() {
            if in_window(&row[..]) {
                let pair = pair_of(&row[..]);
                if new_groups.contains_key(&pair) {
                    ex_groups.entry(pair).or_default().push(i);
                }
            }
        }

        let mut rows = Vec::with_capacity(ex.row_count() + nw.row_count());
        let mut summary = ChangeSummary::default();
        for chunk_start in (0..ex.row_count()).step_by(self.chunk_size) {
            let chunk_end = (chunk_start + self.chunk_size).min(ex.row_count());
            for i in chunk_start..chunk_end {
                let row = &ex.rows[i];
                if !in_window(&row[..]) {
                    rows.push(row.clone());
                    continue;
                }
                let pair = pair_of(&row[..]);
                let (Some(ex_members), Some(new_members)) = (ex_groups.get(&pair), new_groups.get(&pair))
                else {
                    rows.push(row.clone());
                    continue;
                };
                if ex_members.first() != Some(&i) {
                    continue; // 已合并进首行
                }
                let members: Vec<&Vec<CellValue>> = ex_members
                    .iter()
                    .map(|j| &ex.rows[*j])
                    .chain(new_members.iter().map(|j| &nw.rows[*j]))
                    .collect();
                let mut merged = row.clone();
                for &m in measure_idx {
                    merged[m] = mean_cell(members.iter().map(|r| &r[m]));
                }
                rows.push(merged);
                summary.rows_updated += 1;
                summary.rows_discarded += members.len() - 1;
            }
        }

        for row in nw.rows.into_iter() {
            let consumed = in_window(&row[..]) && ex_groups.contains_key(&pair_of(&row[..]));
            if !consumed {
                rows.push(row);
                summary.rows_inserted += 1;
            }
        }
        (rows, summary)
    }
}

fn date_range(table: &ParsedTable, date_idx: usize) -> Option<(NaiveDate, NaiveDate)> {
    table
        .rows
        .iter()
        .filter_map(|r| r.get(date_idx).and_then(CellValue::as_date))
        .fold(None, |acc, d| match acc {
            None => Some((d, d)),
            Some((lo, hi)) => Some((lo.min(d), hi.max(d))),
        })
}

fn intersect(
    a: Option<(NaiveDate, NaiveDate)>,
    b: Option<(NaiveDate, NaiveDate)>,
) -> Option<(NaiveDate, NaiveDate)> {
    let ((a_lo, a_hi), (b_lo, b_hi)) = (a?, b?);
    let lo = a_lo.max(b_lo);
    let hi = a_hi.min(b_hi);
    (lo <= hi).then_some((lo, hi))
}

/// 均值: 全部为整数时取四舍五入整数,否则取浮点; 全空则为 Null
fn mean_cell<'a>(values: impl Iterator<Item = &'a CellValue>) -> CellValue {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut all_int = true;
    for v in values {
        if let Some(x) = v.as_f64() {
            sum += x;
            count += 1;
            all_int &= matches!(v, CellValue::Integer(_));
        }
    }
    if count == 0 {
        return CellValue::Null;
    }
    let mean = sum / count as f64;
    if all_int {
        CellValue::Integer(mean.round() as i64)
    } else {
        CellValue::Float(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Category;
    use crate::schema::SchemaRegistry;

    fn rule(c: Category) -> &'static SchemaRule {
        SchemaRegistry::builtin().unwrap().get(c).unwrap()
    }

    fn t(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn inv(rows: &[(&str, i64)]) -> ParsedTable {
        ParsedTable::with_rows(
            vec!["sku".into(), "qty_on_hand".into(), "reorder_point".into()],
            rows.iter()
                .map(|(s, q)| vec![t(s), CellValue::Integer(*q), CellValue::Integer(1)])
                .collect(),
        )
    }

    fn sale(date: &str, sku: &str, q: f64) -> Vec<CellValue> {
        vec![
            CellValue::Date(NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()),
            t(sku),
            CellValue::Float(q),
            CellValue::Float(q * 10.0),
        ]
    }

    fn sales(rows: Vec<Vec<CellValue>>) -> ParsedTable {
        ParsedTable::with_rows(
            vec!["date".into(), "sku".into(), "quantity".into(), "revenue".into()],
            rows,
        )
    }

    fn smart(strategy: OverlapStrategy) -> UploadMode {
        UploadMode::SmartMerge { strategy }
    }

    #[test]
    fn test_replace_returns_new_verbatim() {
        let existing = inv(&[("A", 1), ("B", 2)]);
        let new = inv(&[("C", 3)]);
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &UploadMode::Replace, rule(Category::Inventory))
            .unwrap();
        assert_eq!(out.table, new);
        assert_eq!(out.summary.rows_replaced, 2);
        assert_eq!(out.summary.total_row_count_after, 1);
    }

    #[test]
    fn test_append_preserves_order() {
        let a = inv(&[("A", 1), ("B", 2)]);
        let b = inv(&[("A", 1), ("C", 3)]);
        let out = MergeResolver::new(1)
            .resolve(&b, Some(&a), &UploadMode::Append, rule(Category::Inventory))
            .unwrap();
        assert_eq!(out.table.row_count(), 4);
        assert_eq!(&out.table.rows[..2], &a.rows[..]);
        assert_eq!(&out.table.rows[2..], &b.rows[..]);
        assert_eq!(out.summary.rows_appended, 2);
    }

    #[test]
    fn test_append_aligns_columns() {
        let a = inv(&[("A", 1)]);
        let mut b = inv(&[("B", 2)]);
        b.columns.push("location".into());
        b.rows[0].push(t("WH1"));
        let out = MergeResolver::default()
            .resolve(&b, Some(&a), &UploadMode::Append, rule(Category::Inventory))
            .unwrap();
        assert_eq!(out.table.columns.last().map(String::as_str), Some("location"));
        assert_eq!(out.table.rows[0][3], CellValue::Null);
        assert_eq!(out.table.rows[1][3], t("WH1"));
    }

    #[test]
    fn test_merge_correctness() {
        let existing = inv(&[("1", 10), ("2", 20), ("3", 30)]);
        let new = inv(&[("2", 200), ("3", 300), ("4", 400)]);
        let mode = UploadMode::Merge { key: "sku".into() };
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &mode, rule(Category::Inventory))
            .unwrap();

        let qty: Vec<(String, i64)> = out
            .table
            .rows
            .iter()
            .map(|r| (r[0].to_string(), r[1].as_f64().unwrap() as i64))
            .collect();
        assert_eq!(
            qty,
            vec![
                ("1".to_string(), 10),
                ("2".to_string(), 200),
                ("3".to_string(), 300),
                ("4".to_string(), 400)
            ]
        );
        assert_eq!(out.summary.rows_updated, 2);
        assert_eq!(out.summary.rows_inserted, 1);
        assert_eq!(out.summary.total_row_count_after, 4);
    }

    #[test]
    fn test_merge_missing_key_is_constraint_error() {
        let existing = inv(&[("1", 10)]);
        let mode = UploadMode::Merge { key: "po_number".into() };
        let err = MergeResolver::default()
            .resolve(&inv(&[("2", 1)]), Some(&existing), &mode, rule(Category::Inventory))
            .unwrap_err();
        assert!(matches!(err, IngestError::MergeConstraint(_)));

        let blank = UploadMode::Merge { key: " ".into() };
        assert!(MergeResolver::default()
            .resolve(&inv(&[("2", 1)]), None, &blank, rule(Category::Inventory))
            .is_err());
    }

    #[test]
    fn test_merge_duplicate_new_keys_rejected() {
        let mode = UploadMode::Merge { key: "sku".into() };
        let err = MergeResolver::default()
            .resolve(&inv(&[("1", 1), ("1", 2)]), None, &mode, rule(Category::Inventory))
            .unwrap_err();
        assert!(matches!(err, IngestError::MergeConstraint(_)));
    }

    #[test]
    fn test_smart_merge_requires_date_and_item() {
        let err = MergeResolver::default()
            .resolve(
                &inv(&[("1", 1)]),
                None,
                &smart(OverlapStrategy::KeepExisting),
                rule(Category::Inventory),
            )
            .unwrap_err();
        assert!(matches!(err, IngestError::MergeConstraint(_)));
    }

    fn overlap_fixture() -> (ParsedTable, ParsedTable) {
        // 旧: 01-01 ~ 01-10; 新: 01-05 ~ 01-15; 交集 01-05 ~ 01-10
        let existing = sales(vec![
            sale("2024-01-01", "A", 1.0),
            sale("2024-01-05", "A", 2.0),
            sale("2024-01-10", "B", 4.0),
        ]);
        let new = sales(vec![
            sale("2024-01-05", "A", 6.0),
            sale("2024-01-07", "C", 1.0),
            sale("2024-01-15", "A", 9.0),
        ]);
        (existing, new)
    }

    #[test]
    fn test_smart_keep_existing() {
        let (existing, new) = overlap_fixture();
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &smart(OverlapStrategy::KeepExisting), rule(Category::Sales))
            .unwrap();
        assert_eq!(out.table.row_count(), 4);
        assert_eq!(&out.table.rows[..3], &existing.rows[..]);
        assert_eq!(out.table.rows[3], new.rows[2]);
        assert_eq!(out.summary.rows_discarded, 2);
        assert_eq!(out.summary.rows_inserted, 1);
    }

    #[test]
    fn test_smart_replace_with_new() {
        let (existing, new) = overlap_fixture();
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &smart(OverlapStrategy::ReplaceWithNew), rule(Category::Sales))
            .unwrap();
        assert_eq!(out.table.row_count(), 4);
        assert_eq!(out.table.rows[0], existing.rows[0]);
        assert_eq!(&out.table.rows[1..], &new.rows[..]);
        assert_eq!(out.summary.rows_replaced, 2);
    }

    #[test]
    fn test_smart_average_values() {
        let (existing, new) = overlap_fixture();
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &smart(OverlapStrategy::AverageValues), rule(Category::Sales))
            .unwrap();

        // (01-05, A) 两侧都有 -> 合并为一行,均值 (2+6)/2 = 4
        assert_eq!(out.table.rows[1][2], CellValue::Float(4.0));
        assert_eq!(out.table.rows[1][3], CellValue::Float(40.0));
        // 单侧组合 (01-10, B) 与 (01-07, C) 原样保留
        assert_eq!(out.table.rows[2], existing.rows[2]);
        assert!(out.table.rows.contains(&new.rows[1]));
        assert_eq!(out.table.row_count(), 5);
        assert_eq!(out.summary.rows_updated, 1);
        assert_eq!(out.summary.rows_discarded, 1);
        assert_eq!(out.summary.total_row_count_after, 5);
    }

    #[test]
    fn test_smart_no_overlap_keeps_everything() {
        let existing = sales(vec![sale("2024-01-01", "A", 1.0)]);
        let new = sales(vec![sale("2024-02-01", "A", 1.0)]);
        let out = MergeResolver::default()
            .resolve(&new, Some(&existing), &smart(OverlapStrategy::KeepExisting), rule(Category::Sales))
            .unwrap();
        assert_eq!(out.table.row_count(), 2);
        assert_eq!(out.summary.rows_discarded, 0);
    }

    #[test]
    fn test_chunk_size_does_not_change_merge_output() {
        let (existing, new) = overlap_fixture();
        for mode in [
            UploadMode::Append,
            smart(OverlapStrategy::AverageValues),
            smart(OverlapStrategy::ReplaceWithNew),
        ] {
            let whole = MergeResolver::new(10_000)
                .resolve(&new, Some(&existing), &mode, rule(Category::Sales))
                .unwrap();
            let chunked = MergeResolver::new(1)
                .resolve(&new, Some(&existing), &mode, rule(Category::Sales))
                .unwrap();
            assert_eq!(whole, chunked, "模式 {}", mode);
        }
    }

    #[test]
    fn test_mean_cell_integer_rounding() {
        let vals = [CellValue::Integer(1), CellValue::Integer(2)];
        assert_eq!(mean_cell(vals.iter()), CellValue::Integer(2));
        let mixed = [CellValue::Integer(1), CellValue::Float(2.0), CellValue::Null];
        assert_eq!(mean_cell(mixed.iter()), CellValue::Float(1.5));
    }
}
