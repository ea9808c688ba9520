//! RunnerController - job run ごとの状態機械
//!
//! # 状態遷移
//! - queued:      レコードなし（または前回 provisioning 失敗）→ create → start → Registry 登録 → Running
//! - in_progress: 記録の更新だけ（状態は変えない）
//! - completed:   runner name を Registry で handle に解決 → remove → Completed
//! - その他:      必ず no-op
//!
//! # 排他
//! run ごとに `tokio::sync::Mutex` を持ち、「レコードがあるか確認 → create」を
//! 一つの critical section にする。同じ run の queued が同時に N 件届いても
//! インスタンスは一つしか作られない。別の run 同士は並行に進む。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::config::{ControllerConfig, TOKEN_VAR, URL_OVERRIDE_VARS};
use super::registry::IdentityRegistry;
use super::status::StatusView;
use crate::domain::{
    FerryError, InstanceHandle, JobAction, JobEvent, JobRun, ProvisionError, RunId, RunnerName,
};
use crate::ports::{
    Clock, EnvSource, InstanceSpec, NameGenerator, ProcessEnv, Provisioner, SystemClock,
    UlidNameGenerator,
};

type RunSlot = Arc<tokio::sync::Mutex<Option<JobRun>>>;

/// What a successfully applied event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A runner instance was created, started and registered.
    Spawned {
        name: RunnerName,
        handle: InstanceHandle,
    },
    /// `in_progress` bookkeeping.
    Progressed,
    /// The run is now Completed. `removed` is the instance that was removed,
    /// if the reported runner was tracked here.
    Completed { removed: Option<InstanceHandle> },
    /// Event carried nothing to act on.
    Ignored(&'static str),
}

pub struct RunnerController {
    config: ControllerConfig,
    provisioner: Arc<dyn Provisioner>,
    registry: Arc<IdentityRegistry>,
    names: Arc<dyn NameGenerator>,
    env: Arc<dyn EnvSource>,
    clock: Arc<dyn Clock>,
    runs: Mutex<HashMap<RunId, RunSlot>>,
}

impl RunnerController {
    pub fn new(
        config: ControllerConfig,
        provisioner: Arc<dyn Provisioner>,
        registry: Arc<IdentityRegistry>,
    ) -> Self {
        Self {
            config,
            provisioner,
            registry,
            names: Arc::new(UlidNameGenerator::new(SystemClock)),
            env: Arc::new(ProcessEnv),
            clock: Arc::new(SystemClock),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_name_generator(mut self, names: Arc<dyn NameGenerator>) -> Self {
        self.names = names;
        self
    }

    pub fn with_env_source(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self
    }

    /// Clock for run timestamps and retention.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<IdentityRegistry> {
        &self.registry
    }

    /// Apply one lifecycle event.
    pub async fn handle(&self, event: JobEvent) -> Result<Transition, FerryError> {
        let span = info_span!(
            "job",
            run_id = %event.run_id,
            action = event.action.as_str(),
            repository = event.repository.as_deref().unwrap_or("-"),
            labels = ?event.labels,
        );
        async move {
            match event.action {
                JobAction::Queued => self.on_queued(event.run_id).await,
                JobAction::InProgress => self.on_in_progress(event.run_id).await,
                JobAction::Completed => {
                    self.on_completed(event.run_id, event.runner_name, event.conclusion)
                        .await
                }
                JobAction::Unknown(ref action) => {
                    debug!(action = action.as_str(), "ignoring unknown action");
                    Ok(Transition::Ignored("unknown action"))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Snapshot of one run record.
    pub async fn run(&self, run_id: RunId) -> Option<JobRun> {
        let slot = self.existing_slot(run_id)?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Never waits on a run that is mid-transition; those are counted as
    /// `busy`.
    pub fn status(&self) -> StatusView {
        let slots: Vec<RunSlot> = self.lock_runs().values().cloned().collect();
        let mut view = StatusView::default();
        for slot in slots {
            match slot.try_lock() {
                Ok(guard) => {
                    if let Some(run) = guard.as_ref() {
                        view.count(run.state);
                    }
                }
                Err(_) => view.busy += 1,
            }
        }
        view.live_instances = self.registry.len();
        view
    }

    // ────────────────────────────────────────────────────────────────────────
    // transitions
    // ────────────────────────────────────────────────────────────────────────

    async fn on_queued(&self, run_id: RunId) -> Result<Transition, FerryError> {
        let slot = self.slot(run_id);
        let mut guard = slot.lock().await;

        if let Some(run) = guard.as_ref()
            && run.blocks_spawn()
        {
            info!(state = ?run.state, "duplicate queued event, not spawning");
            return Err(FerryError::DuplicateTransition {
                run_id,
                reason: "run already has a runner or is completed",
            });
        }

        let run = guard.get_or_insert_with(|| JobRun::new(run_id, self.clock.now()));
        let name = self.names.generate();
        let spec = self.instance_spec(name.clone());
        info!(runner = %name, image = %spec.image, "spawning runner");

        let handle = match self.spawn(run_id, &spec).await {
            Ok(handle) => handle,
            Err(source) => {
                error!(runner = %name, error = %source, "provisioning failed");
                run.mark_failed(source.to_string(), self.clock.now());
                return Err(FerryError::Provisioning {
                    run_id,
                    name,
                    source,
                });
            }
        };

        if let Err(e) = self.registry.put(name.clone(), handle.clone()) {
            // 追跡できないインスタンスは残さない
            error!(runner = %name, handle = %handle, error = %e, "runner name collision");
            self.discard(run_id, &name, &handle).await;
            run.mark_failed(e.to_string(), self.clock.now());
            return Err(e.into());
        }

        run.mark_running(name.clone(), self.clock.now());
        info!(runner = %name, handle = %handle, "runner started");
        Ok(Transition::Spawned { name, handle })
    }

    async fn on_in_progress(&self, run_id: RunId) -> Result<Transition, FerryError> {
        let Some(slot) = self.existing_slot(run_id) else {
            debug!("in_progress for untracked run");
            return Ok(Transition::Ignored("run not tracked"));
        };
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            None => Ok(Transition::Ignored("run not tracked")),
            Some(run) if run.state.is_terminal() => {
                info!("in_progress after completion, ignoring");
                Err(FerryError::DuplicateTransition {
                    run_id,
                    reason: "run already completed",
                })
            }
            Some(run) => {
                run.touch(self.clock.now());
                Ok(Transition::Progressed)
            }
        }
    }

    async fn on_completed(
        &self,
        run_id: RunId,
        runner_name: Option<RunnerName>,
        conclusion: Option<String>,
    ) -> Result<Transition, FerryError> {
        let slot = self.slot(run_id);
        let mut guard = slot.lock().await;

        if let Some(run) = guard.as_ref()
            && run.state.is_terminal()
        {
            info!("duplicate completed event, ignoring");
            return Err(FerryError::DuplicateTransition {
                run_id,
                reason: "run already completed",
            });
        }

        let release = match &runner_name {
            Some(name) => self.release(name).await,
            None => {
                info!("completed without a runner, nothing to remove");
                Ok(None)
            }
        };

        let now = self.clock.now();
        let run = guard.get_or_insert_with(|| JobRun::new(run_id, now));
        run.mark_completed(conclusion, now);
        info!(conclusion = run.conclusion.as_deref().unwrap_or("none"), "run completed");

        match (release, runner_name) {
            (Ok(removed), _) => Ok(Transition::Completed { removed }),
            (Err(source), Some(name)) => {
                run.mark_failed(source.to_string(), now);
                Err(FerryError::Provisioning {
                    run_id,
                    name,
                    source,
                })
            }
            // release は name があるときしか呼ばれない
            (Err(_), None) => Ok(Transition::Completed { removed: None }),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // provisioner calls
    // ────────────────────────────────────────────────────────────────────────

    async fn spawn(&self, run_id: RunId, spec: &InstanceSpec) -> Result<InstanceHandle, ProvisionError> {
        let handle = match self.bounded("create", self.provisioner.create(spec)).await {
            Ok(handle) => handle,
            Err(e @ ProvisionError::Timeout { .. }) => {
                // create が遅れて成功している可能性がある
                self.sweep_orphan(&spec.name).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.bounded("start", self.provisioner.start(&handle)).await {
            warn!(runner = %spec.name, handle = %handle, error = %e, "start failed, removing instance");
            self.discard(run_id, &spec.name, &handle).await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Remove the instance behind `name` and drop it from the registry.
    ///
    /// The entry is dropped after any terminal outcome; a failed remove is
    /// reported to the caller but never retried here.
    async fn release(&self, name: &RunnerName) -> Result<Option<InstanceHandle>, ProvisionError> {
        let Some(handle) = self.registry.get(name) else {
            info!(runner = %name, "runner not tracked by this process, nothing to remove");
            return Ok(None);
        };

        let result = self.bounded("remove", self.provisioner.remove(&handle)).await;
        self.registry.remove(name);
        match result {
            Ok(()) => {
                info!(runner = %name, handle = %handle, "runner removed");
                Ok(Some(handle))
            }
            Err(e) if !e.is_fatal() => {
                warn!(runner = %name, handle = %handle, error = %e, "instance already gone");
                Ok(Some(handle))
            }
            Err(e) => {
                error!(runner = %name, handle = %handle, error = %e, "failed to remove runner");
                Err(e)
            }
        }
    }

    /// Best-effort removal of an instance that will not be registered.
    async fn discard(&self, run_id: RunId, name: &RunnerName, handle: &InstanceHandle) {
        match self.bounded("remove", self.provisioner.remove(handle)).await {
            Ok(()) => debug!(%run_id, runner = %name, handle = %handle, "discarded instance"),
            Err(e) => {
                error!(%run_id, runner = %name, handle = %handle, error = %e, "could not discard instance")
            }
        }
    }

    async fn sweep_orphan(&self, name: &RunnerName) {
        let managed = match self.bounded("list", self.provisioner.list_managed()).await {
            Ok(managed) => managed,
            Err(e) => {
                warn!(runner = %name, error = %e, "could not look for orphaned instance");
                return;
            }
        };
        for instance in managed.into_iter().filter(|m| &m.name == name) {
            warn!(runner = %name, handle = %instance.handle, "removing orphan of timed-out create");
            if let Err(e) = self.bounded("remove", self.provisioner.remove(&instance.handle)).await {
                error!(runner = %name, handle = %instance.handle, error = %e, "orphan removal failed");
            }
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, ProvisionError>>,
    ) -> Result<T, ProvisionError> {
        let limit = self.config.provision_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(ProvisionError::Timeout { op, after: limit }))
    }

    fn instance_spec(&self, name: RunnerName) -> InstanceSpec {
        let mut env = BTreeMap::new();
        env.insert(
            TOKEN_VAR.to_string(),
            self.env.get(TOKEN_VAR).unwrap_or_default(),
        );
        for key in URL_OVERRIDE_VARS {
            if let Some(value) = self.env.get(key).filter(|v| !v.is_empty()) {
                debug!(var = key, "forwarding url override");
                env.insert(key.to_string(), value);
            }
        }

        InstanceSpec {
            image: self.config.image.clone(),
            name,
            env,
            runtime_socket: self
                .config
                .allow_runtime_socket
                .then(|| self.config.runtime_socket_path.clone()),
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // run slots
    // ────────────────────────────────────────────────────────────────────────

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<RunId, RunSlot>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, run_id: RunId) -> RunSlot {
        Arc::clone(self.lock_runs().entry(run_id).or_default())
    }

    fn existing_slot(&self, run_id: RunId) -> Option<RunSlot> {
        self.lock_runs().get(&run_id).cloned()
    }

    /// Drop settled records older than the retention window, then the
    /// oldest Completed ones beyond `max_completed_records`.
    ///
    /// Settled means Completed, or left Queued by a failed provisioning
    /// attempt. Running records and slots held by an in-flight handler are
    /// never touched.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.completed_retention;
        let mut runs = self.lock_runs();
        let before = runs.len();

        let mut completed: Vec<(DateTime<Utc>, RunId)> = Vec::new();
        runs.retain(|run_id, slot| {
            // map 以外が Arc を持っていれば誰かが処理中
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            let Some(run) = guard.as_ref() else {
                return false;
            };
            let Some(settled_at) = run.settled_at() else {
                return true;
            };
            // 時計が戻った場合は経過 0 とみなす
            let age = (now - settled_at).to_std().unwrap_or_default();
            if age >= retention {
                return false;
            }
            if run.state.is_terminal() {
                completed.push((settled_at, *run_id));
            }
            true
        });

        if completed.len() > self.config.max_completed_records {
            completed.sort();
            let excess = completed.len() - self.config.max_completed_records;
            for (_, run_id) in completed.into_iter().take(excess) {
                runs.remove(&run_id);
            }
        }

        let purged = before - runs.len();
        if purged > 0 {
            debug!(purged, remaining = runs.len(), "purged expired runs");
        }
        purged
    }

    pub fn tracked_runs(&self) -> usize {
        self.lock_runs().len()
    }
}
