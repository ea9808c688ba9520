//! IdentityRegistry - runner name と instance handle の対応表
//!
//! completion イベントは runner の name で届くが、削除には Provisioner の
//! handle が必要になる。その橋渡しをするのがこの Registry。
//!
//! # 設計
//! - HashMap を Mutex で包み、外には put/get/remove などの原子的な操作だけを出す
//! - 生きている name を上書きしない（put は DuplicateName を返す）
//! - remove は冪等（無い name を消してもエラーにしない）
//! - ロックは await をまたがない（std の Mutex で十分）

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::domain::{InstanceHandle, RegistryError, RunnerName};

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entries: Mutex<HashMap<RunnerName, InstanceHandle>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // 中の HashMap はどの操作でも壊れた状態にならないので、poison は無視する
    fn lock(&self) -> MutexGuard<'_, HashMap<RunnerName, InstanceHandle>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn put(&self, name: RunnerName, handle: InstanceHandle) -> Result<(), RegistryError> {
        let mut entries = self.lock();
        if entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }
        entries.insert(name, handle);
        Ok(())
    }

    pub fn get(&self, name: &RunnerName) -> Option<InstanceHandle> {
        self.lock().get(name).cloned()
    }

    /// Returns the handle that was registered, if any.
    pub fn remove(&self, name: &RunnerName) -> Option<InstanceHandle> {
        self.lock().remove(name)
    }

    pub fn contains(&self, name: &RunnerName) -> bool {
        self.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current entries, sorted by name.
    pub fn snapshot(&self) -> Vec<(RunnerName, InstanceHandle)> {
        let mut entries: Vec<_> = self
            .lock()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        entries
    }
}
