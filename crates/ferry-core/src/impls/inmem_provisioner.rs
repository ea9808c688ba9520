//! InMemoryProvisioner - 開発・テスト用の Provisioner
//!
//! # 学習ポイント
//! - 呼び出し履歴を順番どおりに記録して、テストから検証できるようにする
//! - 次の 1 回だけ失敗させる / 永遠に返らない、などの故障注入
//! - std の Mutex は await をまたいで持たない

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{InstanceHandle, ProvisionError, RunnerName};
use crate::ports::{InstanceSpec, ManagedInstance, Provisioner};

/// One recorded provisioner call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionCall {
    Create(RunnerName),
    Start(InstanceHandle),
    Remove(InstanceHandle),
    Pull(String),
    List,
}

#[derive(Default)]
struct Faults {
    fail_create: bool,
    hang_create: bool,
    fail_start: bool,
    hang_start: bool,
    fail_remove: bool,
    fail_pull: bool,
    fail_list: bool,
}

#[derive(Default)]
struct State {
    calls: Vec<ProvisionCall>,
    specs: Vec<InstanceSpec>,
    /// handle -> name of every instance that exists.
    live: HashMap<InstanceHandle, RunnerName>,
    next_handle: u64,
    faults: Faults,
}

#[derive(Default)]
pub struct InMemoryProvisioner {
    state: Mutex<State>,
    create_delay: Option<Duration>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `create` take at least `delay`.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn fail_next_create(&self) {
        self.lock().faults.fail_create = true;
    }

    pub fn hang_next_create(&self) {
        self.lock().faults.hang_create = true;
    }

    pub fn fail_next_start(&self) {
        self.lock().faults.fail_start = true;
    }

    pub fn hang_next_start(&self) {
        self.lock().faults.hang_start = true;
    }

    pub fn fail_next_remove(&self) {
        self.lock().faults.fail_remove = true;
    }

    pub fn fail_pull(&self) {
        self.lock().faults.fail_pull = true;
    }

    pub fn fail_list(&self) {
        self.lock().faults.fail_list = true;
    }

    /// Drop an instance behind the controller's back.
    pub fn forget(&self, handle: &InstanceHandle) {
        self.lock().live.remove(handle);
    }

    pub fn calls(&self) -> Vec<ProvisionCall> {
        self.lock().calls.clone()
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, ProvisionCall::Create(_)))
    }

    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, ProvisionCall::Start(_)))
    }

    pub fn remove_count(&self) -> usize {
        self.count(|c| matches!(c, ProvisionCall::Remove(_)))
    }

    fn count(&self, pred: impl Fn(&ProvisionCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn last_spec(&self) -> Option<InstanceSpec> {
        self.lock().specs.last().cloned()
    }

    pub fn live(&self) -> Vec<InstanceHandle> {
        self.lock().live.keys().cloned().collect()
    }
}

#[async_trait]
impl Provisioner for InMemoryProvisioner {
    async fn create(&self, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError> {
        let (fail, hang) = {
            let mut state = self.lock();
            state.calls.push(ProvisionCall::Create(spec.name.clone()));
            state.specs.push(spec.clone());
            let faults = &mut state.faults;
            (
                std::mem::take(&mut faults.fail_create),
                std::mem::take(&mut faults.hang_create),
            )
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(ProvisionError::failed("injected create failure"));
        }

        let mut state = self.lock();
        state.next_handle += 1;
        let handle = InstanceHandle::new(format!("h{}", state.next_handle));
        state.live.insert(handle.clone(), spec.name.clone());
        Ok(handle)
    }

    async fn start(&self, handle: &InstanceHandle) -> Result<(), ProvisionError> {
        let hang = {
            let mut state = self.lock();
            state.calls.push(ProvisionCall::Start(handle.clone()));
            std::mem::take(&mut state.faults.hang_start)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if std::mem::take(&mut state.faults.fail_start) {
            return Err(ProvisionError::failed("injected start failure"));
        }
        if !state.live.contains_key(handle) {
            return Err(ProvisionError::NotFound(handle.clone()));
        }
        Ok(())
    }

    async fn remove(&self, handle: &InstanceHandle) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        state.calls.push(ProvisionCall::Remove(handle.clone()));
        if std::mem::take(&mut state.faults.fail_remove) {
            return Err(ProvisionError::failed("injected remove failure"));
        }
        match state.live.remove(handle) {
            Some(_) => Ok(()),
            None => Err(ProvisionError::NotFound(handle.clone())),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), ProvisionError> {
        let mut state = self.lock();
        state.calls.push(ProvisionCall::Pull(image.to_string()));
        if state.faults.fail_pull {
            return Err(ProvisionError::failed(format!("pull access denied for {image}")));
        }
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedInstance>, ProvisionError> {
        let mut state = self.lock();
        state.calls.push(ProvisionCall::List);
        if state.faults.fail_list {
            return Err(ProvisionError::failed("injected list failure"));
        }
        let mut managed: Vec<_> = state
            .live
            .iter()
            .map(|(handle, name)| ManagedInstance {
                name: name.clone(),
                handle: handle.clone(),
            })
            .collect();
        managed.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(managed)
    }
}
