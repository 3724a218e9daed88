// ==========================================
// 供应链数据导入引擎 - 数据集快照存储
// ==========================================
// 布局: <root>/{active,archive,rejected}/<category>/<name>
// 写入: 先写 <name>.tmp,fsync 后原子 rename
// 路径: 对外暴露相对 root 的路径（持久化到 file_uploads/file_versions）
// ==========================================

use crate::domain::table::ParsedTable;
use crate::domain::types::Category;
use crate::repository::error::{RepositoryError, RepositoryResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// 临时文件后缀（恢复时清理）
pub const TEMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageArea {
    Active,
    Archive,
    Rejected,
}

impl StorageArea {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageArea::Active => "active",
            StorageArea::Archive => "archive",
            StorageArea::Rejected => "rejected",
        }
    }
}

// ==========================================
// DatasetStore Trait
// ==========================================
// 实现者: FsDatasetStore（测试中可包装以注入故障）
pub trait DatasetStore: Send + Sync {
    /// 写入表快照,返回相对路径
    fn write_table(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        table: &ParsedTable,
    ) -> RepositoryResult<String>;

    fn read_table(&self, path: &str) -> RepositoryResult<ParsedTable>;

    /// 写入原始字节（拒收文件留档）
    fn write_raw(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        bytes: &[u8],
    ) -> RepositoryResult<String>;

    /// 复制已有快照到目标区,返回新相对路径
    fn copy_to(
        &self,
        src: &str,
        area: StorageArea,
        category: Category,
        name: &str,
    ) -> RepositoryResult<String>;

    /// 删除快照; 文件不存在视为成功
    fn remove(&self, path: &str) -> RepositoryResult<()>;

    /// 列出某区某类别下的全部文件（相对路径,含临时文件）
    fn list(&self, area: StorageArea, category: Category) -> RepositoryResult<Vec<String>>;
}

// ==========================================
// FsDatasetStore - 本地文件系统实现
// ==========================================
pub struct FsDatasetStore {
    root: PathBuf,
}

fn io_err(path: &Path, e: std::io::Error) -> RepositoryError {
    RepositoryError::StorageIo {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

impl FsDatasetStore {
    /// 创建存储,并确保各区目录存在
    pub fn new(root: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let root = root.into();
        for area in [StorageArea::Active, StorageArea::Archive, StorageArea::Rejected] {
            for category in Category::ALL {
                let dir = root.join(area.as_str()).join(category.as_str());
                fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            }
        }
        Ok(Self { root })
    }

    fn relative(area: StorageArea, category: Category, name: &str) -> String {
        format!("{}/{}/{}", area.as_str(), category.as_str(), name)
    }

    fn resolve(&self, relative: &str) -> RepositoryResult<PathBuf> {
        // 拒绝越出 root 的路径
        if relative.split('/').any(|seg| seg == ".." || seg.is_empty()) {
            return Err(RepositoryError::FieldValueError {
                field: "storage_path".to_string(),
                message: format!("非法快照路径: {}", relative),
            });
        }
        Ok(self.root.join(relative))
    }

    fn write_atomic(&self, relative: &str, bytes: &[u8]) -> RepositoryResult<()> {
        let target = self.resolve(relative)?;
        let tmp = self.resolve(&format!("{}{}", relative, TEMP_SUFFIX))?;
        {
            let mut file = fs::File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
            file.write_all(bytes).map_err(|e| io_err(&tmp, e))?;
            file.sync_all().map_err(|e| io_err(&tmp, e))?;
        }
        fs::rename(&tmp, &target).map_err(|e| io_err(&target, e))?;
        Ok(())
    }
}

impl DatasetStore for FsDatasetStore {
    fn write_table(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        table: &ParsedTable,
    ) -> RepositoryResult<String> {
        let relative = Self::relative(area, category, name);
        let bytes = serde_json::to_vec(table)?;
        self.write_atomic(&relative, &bytes)?;
        Ok(relative)
    }

    fn read_table(&self, path: &str) -> RepositoryResult<ParsedTable> {
        let full = self.resolve(path)?;
        let bytes = fs::read(&full).map_err(|e| io_err(&full, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_raw(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        bytes: &[u8],
    ) -> RepositoryResult<String> {
        let relative = Self::relative(area, category, name);
        self.write_atomic(&relative, bytes)?;
        Ok(relative)
    }

    fn copy_to(
        &self,
        src: &str,
        area: StorageArea,
        category: Category,
        name: &str,
    ) -> RepositoryResult<String> {
        let from = self.resolve(src)?;
        let bytes = fs::read(&from).map_err(|e| io_err(&from, e))?;
        let relative = Self::relative(area, category, name);
        self.write_atomic(&relative, &bytes)?;
        Ok(relative)
    }

    fn remove(&self, path: &str) -> RepositoryResult<()> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&full, e)),
        }
    }

    fn list(&self, area: StorageArea, category: Category) -> RepositoryResult<Vec<String>> {
        let dir = self.root.join(area.as_str()).join(category.as_str());
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            if entry.path().is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(Self::relative(area, category, name));
                }
            }
        }
        out.sort();
        Ok(out)
    }
}
