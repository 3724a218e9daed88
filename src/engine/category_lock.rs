// ==========================================
// 供应链数据导入引擎 - 类别互斥锁
// ==========================================
// 约束: 同一类别同一时刻只有一个任务持有提交权
//       （apply_merge 前获取, 提交或失败后释放）
// 不同类别完全并行; 进度查询不经过此锁
// ==========================================

use crate::domain::types::Category;
use crate::importer::error::{IngestError, IngestResult};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// 持有期间独占该类别的提交权
pub type CategoryGuard = OwnedMutexGuard<()>;

pub struct CategoryLocks {
    locks: HashMap<Category, Arc<Mutex<()>>>,
}

impl Default for CategoryLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryLocks {
    pub fn new() -> Self {
        let locks = Category::ALL
            .iter()
            .map(|c| (*c, Arc::new(Mutex::new(()))))
            .collect();
        Self { locks }
    }

    /// 在超时内获取类别锁
    ///
    /// # 返回
    /// - Err(ConcurrencyTimeout): 超时未获取（调用方可重试）
    pub async fn acquire(&self, category: Category, wait: Duration) -> IngestResult<CategoryGuard> {
        let lock = self
            .locks
            .get(&category)
            .cloned()
            .ok_or_else(|| IngestError::Internal(format!("类别 {} 未注册锁", category)))?;

        match tokio::time::timeout(wait, lock.lock_owned()).await {
            Ok(guard) => {
                debug!(category = %category, "已获取类别锁");
                Ok(guard)
            }
            Err(_) => Err(IngestError::ConcurrencyTimeout {
                category,
                waited_ms: wait.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_category_times_out_while_held() {
        let locks = CategoryLocks::new();
        let _held = locks
            .acquire(Category::Sales, Duration::from_millis(50))
            .await
            .unwrap();

        let err = locks
            .acquire(Category::Sales, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ConcurrencyTimeout { .. }));
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_other_category_not_blocked() {
        let locks = CategoryLocks::new();
        let _held = locks
            .acquire(Category::Sales, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(locks
            .acquire(Category::Inventory, Duration::from_millis(20))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let locks = CategoryLocks::new();
        {
            let _g = locks.acquire(Category::Supplier, Duration::from_millis(50)).await.unwrap();
        }
        assert!(locks
            .acquire(Category::Supplier, Duration::from_millis(20))
            .await
            .is_ok());
    }
}
