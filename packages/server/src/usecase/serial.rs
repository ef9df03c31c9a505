//! キー単位の直列化
//!
//! 同じキー（Team 名、Identity ID）に対する変更操作を1つずつ実行するためのロック。
//! 異なるキーの操作は互いに待ちません。

use std::{collections::HashMap, hash::Hash, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

/// キーごとの非同期ミューテックス
pub struct KeyedLock<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// キーのロックを取得
    ///
    /// ガードを保持している間、同じキーでの `lock` は待機します。
    /// 待機者の取得順は tokio の Mutex と同じ FIFO です。
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().await;
            // 保持者も待機者もいないスロットを掃除する
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key.clone()).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// 使用中のキーの数
    pub async fn active_keys(&self) -> usize {
        let slots = self.slots.lock().await;
        slots
            .values()
            .filter(|slot| Arc::strong_count(slot) > 1)
            .count()
    }
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
