// ==========================================
// 版本生命周期集成测试
// ==========================================
// 覆盖: 恢复 / 写失败不破坏生效数据 / 保留策略 / 启动恢复 / 类别锁
// ==========================================

mod test_helpers;

use std::fs;
use std::sync::Arc;
use std::time::Duration;
use supply_chain_ingest::config::IngestSettings;
use supply_chain_ingest::domain::types::{Category, JobStatus, UploadMode};
use supply_chain_ingest::domain::ErrorKind;
use supply_chain_ingest::repository::upload_repo::fmt_ts;
use supply_chain_ingest::repository::DatasetStore;
use test_helpers::*;

fn faulty_env(settings: IngestSettings, delay: Option<Duration>) -> (TestEnv, Arc<FaultyStore>) {
    let mut handle = None;
    let env = create_test_env_with(settings, |root| {
        let store = Arc::new(FaultyStore::new(root, delay));
        handle = Some(Arc::clone(&store));
        let store: Arc<dyn DatasetStore> = store;
        store
    });
    (env, handle.unwrap())
}

// ==========================================
// restore
// ==========================================

#[tokio::test]
async fn test_restore_previous_version_roundtrip() {
    let env = create_test_env();
    let v1 = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace),
    )
    .await;
    let v1_rows = active_rows(&env.api, Category::Inventory);
    let v2 = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v2.csv", INVENTORY_V2, UploadMode::Replace),
    )
    .await;
    assert_eq!(v2.status, JobStatus::Completed);

    let history = env.api.get_history(Category::Inventory, None).unwrap();
    assert_eq!(history.len(), 1);
    let outcome = env
        .api
        .restore(&history[0].version_id, Category::Inventory)
        .await
        .unwrap();

    assert!(!outcome.already_active);
    assert_eq!(outcome.upload.id, v1.upload_id.clone().unwrap());
    assert_eq!(
        outcome.archived.as_ref().map(|v| v.file_upload_id.clone()),
        v2.upload_id.clone()
    );

    let active = env.api.get_active(Category::Inventory).unwrap().unwrap();
    assert_eq!(Some(active.upload_id), v1.upload_id);
    assert_eq!(active_rows(&env.api, Category::Inventory), v1_rows);
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);

    // v2 进入历史,版本号继续递增
    let history = env.api.get_history(Category::Inventory, None).unwrap();
    assert_eq!(history[0].file_upload_id, v2.upload_id.unwrap());
    assert!(history.windows(2).all(|w| w[0].version_number > w[1].version_number));
}

#[tokio::test]
async fn test_restore_with_wrong_category_is_not_found() {
    let env = create_test_env();
    for csv in [INVENTORY_V1, INVENTORY_V2] {
        ingest_and_wait(
            &env.api,
            request(Category::Inventory, "inv.csv", csv, UploadMode::Replace),
        )
        .await;
    }
    let before = env.api.get_active(Category::Inventory).unwrap().unwrap();
    let version_id = env.api.get_history(Category::Inventory, None).unwrap()[0]
        .version_id
        .clone();

    let err = env.api.restore(&version_id, Category::Sales).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = env.api.restore("no-such-version", Category::Inventory).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let after = env.api.get_active(Category::Inventory).unwrap().unwrap();
    assert_eq!(before.upload_id, after.upload_id);
    assert_eq!(env.api.get_history(Category::Inventory, None).unwrap().len(), 1);
}

// ==========================================
// 写失败
// ==========================================

#[tokio::test]
async fn test_storage_failure_leaves_previous_version_active() {
    let (env, store) = faulty_env(IngestSettings::default(), None);
    let v1 = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace),
    )
    .await;
    let v1_rows = active_rows(&env.api, Category::Inventory);

    store.set_fail_writes(true);
    let job = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v2.csv", INVENTORY_V2, UploadMode::Replace),
    )
    .await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().kind, ErrorKind::Storage);
    assert!(job.upload_id.is_none());

    let active = env.api.get_active(Category::Inventory).unwrap().unwrap();
    assert_eq!(Some(active.upload_id), v1.upload_id);
    assert_eq!(active_rows(&env.api, Category::Inventory), v1_rows);
    assert!(env.api.get_history(Category::Inventory, None).unwrap().is_empty());
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);
    // 存储错误不是拒收
    assert_eq!(env.count_status(Category::Inventory, "rejected"), 0);

    store.set_fail_writes(false);
    let retry = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v2.csv", INVENTORY_V2, UploadMode::Replace),
    )
    .await;
    assert_eq!(retry.status, JobStatus::Completed, "{:?}", retry.error);
    assert_eq!(env.api.get_history(Category::Inventory, None).unwrap().len(), 1);
}

// ==========================================
// 保留策略
// ==========================================

#[tokio::test]
async fn test_retention_keeps_newest_versions() {
    let settings = IngestSettings {
        max_versions: 2,
        ..IngestSettings::default()
    };
    let env = create_test_env_with(settings, |root| {
        let store: Arc<dyn DatasetStore> =
            Arc::new(supply_chain_ingest::repository::FsDatasetStore::new(root).unwrap());
        store
    });

    let mut upload_ids = Vec::new();
    for i in 0..5 {
        let csv = format!("sku,qty_on_hand,reorder_point\nSKU-{},{},1\n", i, i + 1);
        let job = ingest_and_wait(
            &env.api,
            request(Category::Inventory, "inv.csv", &csv, UploadMode::Replace),
        )
        .await;
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        upload_ids.push(job.upload_id.unwrap());
    }

    let history = env.api.get_history(Category::Inventory, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].file_upload_id, upload_ids[3]);
    assert_eq!(history[1].file_upload_id, upload_ids[2]);

    // 被清理版本的上传记录与快照一并删除
    assert_eq!(env.count_status(Category::Inventory, "archived"), 2);
    let archive_dir = env.storage_root().join("archive").join("inventory");
    assert_eq!(fs::read_dir(archive_dir).unwrap().count(), 2);
}

#[tokio::test]
async fn test_history_limit_defaults_to_config() {
    let settings = IngestSettings {
        history_limit: 1,
        ..IngestSettings::default()
    };
    let env = create_test_env_with(settings, |root| {
        let store: Arc<dyn DatasetStore> =
            Arc::new(supply_chain_ingest::repository::FsDatasetStore::new(root).unwrap());
        store
    });
    for csv in [INVENTORY_V1, INVENTORY_V2, INVENTORY_V1] {
        ingest_and_wait(
            &env.api,
            request(Category::Inventory, "inv.csv", csv, UploadMode::Replace),
        )
        .await;
    }
    assert_eq!(env.api.get_history(Category::Inventory, None).unwrap().len(), 1);
    assert_eq!(env.api.get_history(Category::Inventory, Some(5)).unwrap().len(), 2);
}

// ==========================================
// 启动恢复
// ==========================================

#[tokio::test]
async fn test_startup_recovery_repairs_duplicate_active_and_stray_files() {
    let env = create_test_env();
    let v1 = ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace),
    )
    .await;
    let v1_id = v1.upload_id.unwrap();
    let root = env.storage_root();
    let active_dir = root.join("active").join("inventory");

    // 模拟中断: 第二条 active 记录 + 残留临时文件 + 孤儿快照
    let dup_id = "dup-upload";
    fs::copy(
        active_dir.join(format!("{}.json", v1_id)),
        active_dir.join(format!("{}.json", dup_id)),
    )
    .unwrap();
    fs::write(active_dir.join("half-written.json.tmp"), b"{").unwrap();
    fs::write(active_dir.join("orphan.json"), b"{}").unwrap();
    {
        let later = chrono::Utc::now().naive_utc() + chrono::Duration::hours(1);
        let conn = env.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO file_uploads (id, category, filename, upload_timestamp, uploaded_by, \
             row_count, file_size_bytes, status, quality_score, validation_errors, storage_path, activated_at) \
             VALUES (?1, 'inventory', 'dup.csv', ?2, 'tester', 3, 10, 'active', 100.0, '[]', ?3, ?2)",
            rusqlite::params![dup_id, fmt_ts(&later), format!("active/inventory/{}.json", dup_id)],
        )
        .unwrap();
    }
    assert_eq!(env.count_status(Category::Inventory, "active"), 2);

    let api = env.reopen(IngestSettings::default());
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);
    assert_eq!(env.count_status(Category::Inventory, "archived"), 1);

    let active = api.get_active(Category::Inventory).unwrap().unwrap();
    assert_eq!(active.upload_id, dup_id);
    let history = api.get_history(Category::Inventory, None).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].file_upload_id, v1_id);

    let mut remaining: Vec<String> = fs::read_dir(&active_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec![format!("{}.json", dup_id)]);

    // 修复后可正常继续导入
    let job = ingest_and_wait(
        &api,
        request(Category::Inventory, "v2.csv", INVENTORY_V2, UploadMode::Replace),
    )
    .await;
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);
}

#[tokio::test]
async fn test_recovery_on_clean_state_changes_nothing() {
    let env = create_test_env();
    ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace),
    )
    .await;
    ingest_and_wait(
        &env.api,
        request(Category::Inventory, "bad.csv", INVENTORY_MISSING_COLUMN, UploadMode::Replace),
    )
    .await;
    let before = env.api.get_active(Category::Inventory).unwrap().unwrap();

    let api = env.reopen(IngestSettings::default());
    let after = api.get_active(Category::Inventory).unwrap().unwrap();
    assert_eq!(before.upload_id, after.upload_id);
    // 拒收文件保留
    let rejected_dir = env.storage_root().join("rejected").join("inventory");
    assert_eq!(fs::read_dir(rejected_dir).unwrap().count(), 1);
}

// ==========================================
// 类别锁
// ==========================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_timeout_fails_second_job_with_retryable_error() {
    let settings = IngestSettings {
        lock_timeout_ms: 10,
        ..IngestSettings::default()
    };
    let (env, _store) = faulty_env(settings, Some(Duration::from_millis(500)));

    let first = env
        .api
        .ingest(request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace))
        .unwrap();
    let second = env
        .api
        .ingest(request(Category::Inventory, "v2.csv", INVENTORY_V2, UploadMode::Replace))
        .unwrap();
    let jobs = env
        .api
        .wait_for_jobs(&[first, second], Duration::from_millis(10))
        .await
        .unwrap();

    let completed = jobs.iter().filter(|j| j.status == JobStatus::Completed).count();
    let timed_out: Vec<_> = jobs
        .iter()
        .filter_map(|j| j.error.as_ref())
        .filter(|e| e.kind == ErrorKind::ConcurrencyTimeout)
        .collect();
    assert_eq!(completed, 1);
    assert_eq!(timed_out.len(), 1);
    assert!(timed_out[0].kind.is_retryable());
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);
    assert_eq!(env.count_status(Category::Inventory, "rejected"), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_appends_are_serialized() {
    let (env, _store) = faulty_env(IngestSettings::default(), Some(Duration::from_millis(50)));
    ingest_and_wait(
        &env.api,
        request(Category::Inventory, "v1.csv", INVENTORY_V1, UploadMode::Replace),
    )
    .await;

    let a = "sku,qty_on_hand,reorder_point\nSKU-A1,1,1\nSKU-A2,2,1\n";
    let b = "sku,qty_on_hand,reorder_point\nSKU-B1,1,1\n";
    let ids = vec![
        env.api
            .ingest(request(Category::Inventory, "a.csv", a, UploadMode::Append))
            .unwrap(),
        env.api
            .ingest(request(Category::Inventory, "b.csv", b, UploadMode::Append))
            .unwrap(),
    ];
    let jobs = env.api.wait_for_jobs(&ids, Duration::from_millis(10)).await.unwrap();
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed), "{:?}", jobs);

    // 两次追加都基于前一次的结果
    let table = active_rows(&env.api, Category::Inventory);
    assert_eq!(table.row_count(), 6);
    assert_eq!(env.api.get_history(Category::Inventory, None).unwrap().len(), 2);
    assert_eq!(env.count_status(Category::Inventory, "active"), 1);
}
