// ==========================================
// 供应链数据导入引擎 - 导入阶段 Trait
// ==========================================
// 职责: 定义文件解析与单元格清洗接口（不包含实现）
// ==========================================

use crate::domain::table::{CellValue, ParsedTable};
use crate::domain::types::ColumnType;
use crate::importer::error::IngestResult;

// ==========================================
// FileParser Trait
// ==========================================
// 用途: 原始字节 -> ParsedTable
// 实现者: CsvParser, ExcelParser
pub trait FileParser: Send + Sync {
    /// 解析上传文件内容
    ///
    /// # 返回
    /// - Ok(ParsedTable): 表头已标准化、全空行已跳过、空单元格为 Null
    /// - Err(IngestError::Schema): 文件无法解析或表头重复
    fn parse_bytes(&self, bytes: &[u8]) -> IngestResult<ParsedTable>;
}

// ==========================================
// DataCleaner Trait
// ==========================================
// 用途: 表头标准化 / 单元格类型强制转换
// 实现者: DataCleaner
pub trait DataCleaner: Send + Sync {
    /// 表头标准化: 去首尾空白、转小写、内部空白替换为下划线
    fn normalize_header(&self, raw: &str) -> String;

    /// 将单元格强制转换为声明类型
    ///
    /// # 返回
    /// - Some(CellValue): 转换成功（Null 原样保留）
    /// - None: 无法转换（类型错误）
    fn coerce_cell(&self, value: &CellValue, ty: ColumnType) -> Option<CellValue>;
}
