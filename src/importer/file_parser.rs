// ==========================================
// 供应链数据导入引擎 - 文件解析器实现
// ==========================================
// 支持: Excel (.xlsx) / CSV (.csv)
// 输入: 上传的原始字节（不落盘）
// ==========================================

use crate::domain::table::{CellValue, ParsedTable};
use crate::importer::data_cleaner::DataCleaner;
use crate::importer::error::{IngestError, IngestResult};
use crate::importer::ingest_trait::{DataCleaner as _, FileParser};
use calamine::{Data, DataType, Reader, Xlsx};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::Cursor;

/// 允许的文件扩展名
pub const ALLOWED_EXTENSIONS: [&str; 2] = ["csv", "xlsx"];

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// 表头标准化 + 重复检查
fn build_headers(raw: &[String]) -> IngestResult<Vec<String>> {
    let cleaner = DataCleaner;
    let mut seen = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());

    for (idx, h) in raw.iter().enumerate() {
        let mut name = cleaner.normalize_header(h);
        if name.is_empty() {
            name = format!("unnamed_{}", idx);
        }
        if !seen.insert(name.clone()) {
            return Err(IngestError::schema(format!("表头重复: {}", name)));
        }
        headers.push(name);
    }

    if headers.is_empty() {
        return Err(IngestError::schema("文件无表头"));
    }
    Ok(headers)
}

fn is_blank_row(row: &[CellValue]) -> bool {
    row.iter().all(CellValue::is_null)
}

// ==========================================
// CSV Parser 实现
// ==========================================
pub struct CsvParser;

impl FileParser for CsvParser {
    fn parse_bytes(&self, bytes: &[u8]) -> IngestResult<ParsedTable> {
        let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true) // 允许行长度不一致
            .from_reader(body);

        let raw_headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let headers = build_headers(&raw_headers)?;
        let width = headers.len();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result?;
            let mut row: Vec<CellValue> = record
                .iter()
                .take(width)
                .map(|v| {
                    let v = v.trim();
                    if v.is_empty() {
                        CellValue::Null
                    } else {
                        CellValue::Text(v.to_string())
                    }
                })
                .collect();
            row.resize(width, CellValue::Null);

            // 跳过完全空白的行
            if is_blank_row(&row) {
                continue;
            }
            rows.push(row);
        }

        Ok(ParsedTable::with_rows(headers, rows))
    }
}

// ==========================================
// Excel Parser 实现
// ==========================================
pub struct ExcelParser;

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Null,
        Data::Int(i) => CellValue::Integer(*i),
        Data::Float(f) => CellValue::Float(*f),
        Data::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                CellValue::Null
            } else {
                CellValue::Text(s.to_string())
            }
        }
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => match cell.as_date() {
            Some(d) => CellValue::Date(d),
            None => CellValue::Text(cell.to_string()),
        },
        Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(format!("#ERR:{:?}", e)),
    }
}

impl FileParser for ExcelParser {
    fn parse_bytes(&self, bytes: &[u8]) -> IngestResult<ParsedTable> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes.to_vec()))?;

        // 读取第一个 sheet
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| IngestError::schema("Excel 文件无工作表"))?;
        let range = workbook.worksheet_range(&sheet_name)?;

        // 提取表头（第一行）
        let mut iter = range.rows();
        let header_row = iter
            .next()
            .ok_or_else(|| IngestError::schema("Excel 文件无数据行"))?;
        let raw_headers: Vec<String> = header_row.iter().map(|c| c.to_string()).collect();
        let headers = build_headers(&raw_headers)?;
        let width = headers.len();

        let mut rows = Vec::new();
        for data_row in iter {
            let mut row: Vec<CellValue> = data_row.iter().take(width).map(excel_cell).collect();
            row.resize(width, CellValue::Null);
            if is_blank_row(&row) {
                continue;
            }
            rows.push(row);
        }

        Ok(ParsedTable::with_rows(headers, rows))
    }
}

// ==========================================
// 通用文件解析器（根据扩展名自动选择）
// ==========================================
pub struct UniversalFileParser;

impl UniversalFileParser {
    /// 文件扩展名（小写）
    pub fn extension_of(filename: &str) -> String {
        std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    pub fn parse(&self, filename: &str, bytes: &[u8]) -> IngestResult<ParsedTable> {
        let ext = Self::extension_of(filename);
        match ext.as_str() {
            "csv" => CsvParser.parse_bytes(bytes),
            "xlsx" => ExcelParser.parse_bytes(bytes),
            _ => Err(IngestError::schema(format!(
                "文件格式不支持: {}（仅支持 .{}）",
                if ext.is_empty() { filename } else { ext.as_str() },
                ALLOWED_EXTENSIONS.join("/.")
            ))),
        }
    }
}
