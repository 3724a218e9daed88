// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库 + 临时快照目录,以及可注入故障的存储实现
// ==========================================

#![allow(dead_code)]

use chrono::NaiveDate;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supply_chain_ingest::api::IngestApi;
use supply_chain_ingest::config::IngestSettings;
use supply_chain_ingest::db::{configure_sqlite_connection, ensure_schema};
use supply_chain_ingest::domain::table::ParsedTable;
use supply_chain_ingest::domain::types::{Category, UploadMode};
use supply_chain_ingest::domain::RefreshJob;
use supply_chain_ingest::engine::IngestRequest;
use supply_chain_ingest::logging;
use supply_chain_ingest::repository::{
    DatasetStore, FsDatasetStore, RepositoryError, RepositoryResult, StorageArea,
};
use tempfile::TempDir;

/// 测试中"今天"（未来日期规则使用）
pub fn test_today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 30).unwrap()
}

pub struct TestEnv {
    pub dir: TempDir,
    pub conn: Arc<Mutex<Connection>>,
    pub api: IngestApi,
}

impl TestEnv {
    pub fn storage_root(&self) -> PathBuf {
        storage_root(self.dir.path())
    }

    /// 在同一数据库与目录上重新装配 API（模拟进程重启）
    pub fn reopen(&self, settings: IngestSettings) -> IngestApi {
        let store: Arc<dyn DatasetStore> =
            Arc::new(FsDatasetStore::new(self.storage_root()).unwrap());
        IngestApi::from_parts(Arc::clone(&self.conn), store, settings, Some(test_today())).unwrap()
    }

    pub fn count_status(&self, category: Category, status: &str) -> i64 {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM file_uploads WHERE category = ?1 AND status = ?2",
            rusqlite::params![category.as_str(), status],
            |row| row.get(0),
        )
        .unwrap()
    }
}

pub fn storage_root(dir: &Path) -> PathBuf {
    dir.join("datasets")
}

fn open_conn(dir: &Path) -> Arc<Mutex<Connection>> {
    let conn = Connection::open(dir.join("ingest.db")).unwrap();
    configure_sqlite_connection(&conn).unwrap();
    ensure_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

/// 默认配置 + 文件系统存储
pub fn create_test_env() -> TestEnv {
    create_test_env_with(IngestSettings::default(), |root| {
        Arc::new(FsDatasetStore::new(root).unwrap())
    })
}

/// 自定义配置与存储实现
pub fn create_test_env_with(
    settings: IngestSettings,
    make_store: impl FnOnce(PathBuf) -> Arc<dyn DatasetStore>,
) -> TestEnv {
    logging::init_test();
    let dir = TempDir::new().unwrap();
    let conn = open_conn(dir.path());
    let store = make_store(storage_root(dir.path()));
    let api =
        IngestApi::from_parts(Arc::clone(&conn), store, settings, Some(test_today())).unwrap();
    TestEnv { dir, conn, api }
}

pub fn request(category: Category, filename: &str, csv: &str, mode: UploadMode) -> IngestRequest {
    IngestRequest {
        category,
        filename: filename.to_string(),
        bytes: Arc::from(csv.as_bytes()),
        mode,
        uploaded_by: "tester".to_string(),
    }
}

/// 提交并等待任务结束
pub async fn ingest_and_wait(api: &IngestApi, req: IngestRequest) -> RefreshJob {
    let job_id = api.ingest(req).unwrap();
    api.wait_for_job(&job_id, Duration::from_millis(5)).await.unwrap()
}

pub fn active_rows(api: &IngestApi, category: Category) -> ParsedTable {
    api.preview_active(category, usize::MAX).unwrap().unwrap()
}

// ==========================================
// FaultyStore - 可注入写失败 / 写延迟的存储
// ==========================================
pub struct FaultyStore {
    inner: FsDatasetStore,
    fail_writes: AtomicBool,
    write_delay: Option<Duration>,
}

impl FaultyStore {
    pub fn new(root: PathBuf, write_delay: Option<Duration>) -> Self {
        Self {
            inner: FsDatasetStore::new(root).unwrap(),
            fail_writes: AtomicBool::new(false),
            write_delay,
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn before_write(&self, what: &str) -> RepositoryResult<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::StorageIo {
                path: what.to_string(),
                message: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl DatasetStore for FaultyStore {
    fn write_table(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        table: &ParsedTable,
    ) -> RepositoryResult<String> {
        self.before_write(name)?;
        self.inner.write_table(area, category, name, table)
    }

    fn read_table(&self, path: &str) -> RepositoryResult<ParsedTable> {
        self.inner.read_table(path)
    }

    fn write_raw(
        &self,
        area: StorageArea,
        category: Category,
        name: &str,
        bytes: &[u8],
    ) -> RepositoryResult<String> {
        self.inner.write_raw(area, category, name, bytes)
    }

    fn copy_to(
        &self,
        src: &str,
        area: StorageArea,
        category: Category,
        name: &str,
    ) -> RepositoryResult<String> {
        self.before_write(name)?;
        self.inner.copy_to(src, area, category, name)
    }

    fn remove(&self, path: &str) -> RepositoryResult<()> {
        self.inner.remove(path)
    }

    fn list(&self, area: StorageArea, category: Category) -> RepositoryResult<Vec<String>> {
        self.inner.list(area, category)
    }
}

// ==========================================
// 测试数据
// ==========================================

pub const INVENTORY_V1: &str = "sku,qty_on_hand,reorder_point,location\n\
SKU-1,10,5,A\n\
SKU-2,20,5,B\n\
SKU-3,30,5,C\n";

pub const INVENTORY_V2: &str = "SKU,Qty On Hand,Reorder Point,Location\n\
SKU-2,200,5,B\n\
SKU-3,300,6,C\n\
SKU-4,400,7,D\n";

pub const INVENTORY_MISSING_COLUMN: &str = "sku,qty_on_hand\nSKU-1,10\n";

pub const INVENTORY_ALL_NEGATIVE: &str =
    "sku,qty_on_hand,reorder_point\nSKU-1,-1,5\nSKU-2,-2,5\n";

pub const SALES_JAN_1_TO_10: &str = "date,sku,quantity,revenue\n\
2024-01-01,A-1,1,10\n\
2024-01-05,A-1,2,20\n\
2024-01-10,B-2,3,30\n";

pub const SALES_JAN_5_TO_15: &str = "date,sku,quantity,revenue\n\
2024-01-05,A-1,9,90\n\
2024-01-12,B-2,4,40\n\
2024-01-15,C-3,5,50\n";
