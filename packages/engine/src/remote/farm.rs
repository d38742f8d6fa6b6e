//! Client-side handle on a remote compute farm.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use chrono::Utc;
use farm_core::{
    ContainerId, ContainerJob, ContainerKey, ContainerRequest, FarmConfig, FarmError, FarmEvent,
    JobFilter, JobHandle, JobState, NodeInfo, ParametricTask, Priority, SchedulerTask, SweepTask,
    TaskId, TaskState, convert_state, settle_state,
};
use serde_json::json;
use tokio::sync::{OnceCell, broadcast};

use super::scheduler::{SchedulerClient, SchedulerError};
use crate::completion::DoneWatcher;

/// A container job this farm knows about.
#[derive(Debug, Clone, Copy)]
struct ContainerSlot {
    id: ContainerId,
    /// Created here and not yet submitted; the next task goes in as a batch.
    creating: bool,
}

#[derive(Debug, Default)]
struct Registry {
    containers: HashMap<ContainerKey, ContainerSlot>,
}

struct FarmInner {
    config: FarmConfig,
    scheduler: Arc<dyn SchedulerClient>,
    connection: OnceCell<()>,
    registry: Mutex<Registry>,
    event_tx: OnceLock<broadcast::Sender<FarmEvent>>,
}

/// Handle on a scheduler-managed farm.
///
/// Clones share the connection and the container registry, so a clone can
/// kill tasks while another holder is waiting on them. Submissions through
/// one farm are serialized.
#[derive(Clone)]
pub struct RemoteFarm {
    inner: Arc<FarmInner>,
}

impl std::fmt::Debug for RemoteFarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteFarm")
            .field("head_node", &self.inner.config.head_node)
            .field("job_name", &self.inner.config.job_name)
            .finish_non_exhaustive()
    }
}

impl RemoteFarm {
    pub fn new(config: FarmConfig, scheduler: Arc<dyn SchedulerClient>) -> Self {
        Self {
            inner: Arc::new(FarmInner {
                config,
                scheduler,
                connection: OnceCell::new(),
                registry: Mutex::new(Registry::default()),
                event_tx: OnceLock::new(),
            }),
        }
    }

    /// Set the event broadcaster. Only the first sender sticks.
    pub fn with_event_tx(self, tx: broadcast::Sender<FarmEvent>) -> Self {
        let _ = self.inner.event_tx.set(tx);
        self
    }

    pub fn config(&self) -> &FarmConfig {
        &self.inner.config
    }

    /// Connect to the head node once; later calls reuse the connection.
    pub async fn connect(&self) -> Result<(), FarmError> {
        let head_node = &self.inner.config.head_node;
        self.inner
            .connection
            .get_or_try_init(|| async {
                tracing::info!("Connecting to head node {}", head_node);
                self.inner
                    .scheduler
                    .connect(head_node)
                    .map_err(FarmError::from)
            })
            .await?;
        Ok(())
    }

    /// Build a sweep task owned by the configured owner.
    #[allow(clippy::too_many_arguments)]
    pub fn create_task(
        &self,
        command: impl Into<String>,
        name: impl Into<String>,
        log_file: Option<PathBuf>,
        exclusive: bool,
        start: i64,
        end: i64,
        increment: i64,
        priority: Priority,
    ) -> SweepTask {
        let mut task = SweepTask::new(name, command, start, end)
            .with_increment(increment)
            .with_exclusive(exclusive)
            .with_priority(priority)
            .with_owner(&self.inner.config.owner);
        task.log_path = log_file;
        task
    }

    /// Submit `task`, logging any failure. Returns whether it was accepted.
    pub async fn submit(&self, task: &mut SweepTask) -> bool {
        match self.try_submit(task).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to submit task '{}': {}", task.name, e);
                false
            }
        }
    }

    /// Submit `task` into the container for its owner, creating the container
    /// if there is none or the existing one is closed.
    pub async fn try_submit(&self, task: &mut SweepTask) -> Result<TaskId, FarmError> {
        task.validate()?;
        self.connect().await?;
        self.submit_locked(task)
    }

    fn submit_locked(&self, task: &mut SweepTask) -> Result<TaskId, FarmError> {
        let scheduler = &self.inner.scheduler;
        let config = &self.inner.config;
        let key = config.container_key(&task.owner);

        let mut registry = self.registry();
        let slot = match self.open_container(&mut registry, &key)? {
            Some(slot) => slot,
            None => {
                let request =
                    ContainerRequest::for_task(key.clone(), task, config.max_nodes, config.max_cores);
                let job = scheduler.create_job(&request)?;
                tracing::info!(
                    "Created container {} for {} (up to {} {})",
                    job.id,
                    key,
                    request.max_units,
                    if task.exclusive { "nodes" } else { "cores" }
                );
                self.emit(FarmEvent::ContainerCreated {
                    container_id: job.id,
                    key: key.clone(),
                    timestamp: Utc::now(),
                });
                ContainerSlot {
                    id: job.id,
                    creating: true,
                }
            }
        };

        scheduler.set_priority(slot.id, task.priority)?;

        let parametric = ParametricTask::from(&*task);
        let task_id = if slot.creating {
            let id = scheduler.add_task(slot.id, &parametric)?;
            scheduler.submit_job(slot.id, &config.user_name)?;
            id
        } else {
            scheduler.submit_task(slot.id, &parametric)?
        };

        registry.containers.insert(
            key,
            ContainerSlot {
                id: slot.id,
                creating: false,
            },
        );
        drop(registry);

        task.handle.assign(task_id);
        task.handle.advance(JobState::Pend);
        task.handle
            .custom_info
            .insert("container_id".to_string(), json!(slot.id));

        tracing::info!("Submitted task {} ('{}') to container {}", task_id, task.name, slot.id);
        self.emit(FarmEvent::TaskSubmitted {
            container_id: slot.id,
            task_id,
            name: task.name.clone(),
            timestamp: Utc::now(),
        });
        Ok(task_id)
    }

    /// Cancel `task`, logging any failure. Returns whether the farm is left
    /// without that task running.
    pub async fn kill(&self, task: &SweepTask) -> bool {
        match self.try_kill(task).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to kill task '{}': {}", task.name, e);
                false
            }
        }
    }

    /// Cancel `task` in its container.
    ///
    /// A task that was never submitted, or whose container is missing or
    /// closed, has nothing to cancel.
    pub async fn try_kill(&self, task: &SweepTask) -> Result<(), FarmError> {
        self.try_kill_handle(&task.handle).await
    }

    /// Cancel the work behind `handle`, e.g. one returned by
    /// [`RemoteFarm::query_job_by_owner`].
    pub async fn try_kill_handle(&self, handle: &JobHandle) -> Result<(), FarmError> {
        let (Some(task_id), Some(container_id)) = (handle.id, container_of(handle)) else {
            tracing::debug!("Nothing was submitted; nothing to kill");
            return Ok(());
        };
        self.connect().await?;

        let scheduler = &self.inner.scheduler;
        let job = match scheduler.refresh_job(container_id) {
            Ok(job) => job,
            Err(SchedulerError::UnknownJob(_)) => {
                tracing::debug!("Container {} is gone; nothing to kill", container_id);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !job.is_open() {
            tracing::debug!("Container {} is {}; nothing to kill", container_id, job.state);
            return Ok(());
        }

        scheduler.cancel_task(container_id, task_id)?;
        tracing::info!("Canceled task {} in container {}", task_id, container_id);
        self.emit(FarmEvent::TaskKilled {
            container_id,
            task_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Active tasks in `owner`'s container, logging any failure.
    pub async fn query_job_by_owner(&self, owner: &str) -> Vec<JobHandle> {
        match self.try_query_job_by_owner(owner).await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!("Failed to query tasks for {}: {}", owner, e);
                Vec::new()
            }
        }
    }

    /// Active tasks in `owner`'s open container.
    pub async fn try_query_job_by_owner(&self, owner: &str) -> Result<Vec<JobHandle>, FarmError> {
        self.connect().await?;

        let key = self.inner.config.container_key(owner);
        let mut registry = self.registry();
        let Some(slot) = self.open_container(&mut registry, &key)? else {
            return Ok(Vec::new());
        };
        drop(registry);

        Ok(self
            .inner
            .scheduler
            .list_tasks(slot.id)?
            .iter()
            .filter(|t| t.state.is_active())
            .map(|t| handle_for(t, convert_state(t.state)))
            .collect())
    }

    /// Pull the scheduler's view of `task` into its handle.
    ///
    /// Returns the settled state, keeping success and failure apart.
    pub async fn refresh(&self, task: &mut SweepTask) -> Result<JobState, FarmError> {
        let (Some(task_id), Some(container_id)) = (task.handle.id, container_of(&task.handle))
        else {
            return Ok(task.handle.state);
        };
        self.connect().await?;

        let reported = self
            .inner
            .scheduler
            .list_tasks(container_id)?
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;

        let state = settle_state(reported.state);
        if reported.allocated_node.is_some() {
            task.handle.machine = reported.allocated_node.clone();
        }
        task.handle.cpu_time = reported.cpu_time;
        task.handle.advance(state);
        Ok(state)
    }

    /// Compute nodes visible to the scheduler.
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>, FarmError> {
        self.connect().await?;
        Ok(self.inner.scheduler.list_nodes()?)
    }

    /// Wait for the configured done files on behalf of `tasks`.
    ///
    /// Returns `Succeed` once the files all exist. If every task in `tasks`
    /// has settled and one of them failed or was canceled, or one of their
    /// containers failed, the wait ends early with that state. With no done
    /// files configured, the wait lasts until every task in `tasks` settles.
    /// Tasks never submitted are ignored.
    pub async fn wait_for_done(&self, tasks: &[SweepTask]) -> Result<JobState, FarmError> {
        let watched: Vec<(ContainerId, TaskId)> = tasks
            .iter()
            .filter_map(|t| Some((container_of(&t.handle)?, t.handle.id?)))
            .collect();
        let watcher = DoneWatcher::from_config(&self.inner.config);

        let state = if watcher.files().is_empty() {
            tracing::info!(
                "No done files configured; waiting for {} task(s) to settle, polling every {:?}",
                watched.len(),
                watcher.poll_interval()
            );
            watcher
                .wait_for_state(|| self.settled_probe(&watched))
                .await?
        } else {
            tracing::info!(
                "Waiting for {} done file(s), polling every {:?}",
                watcher.files().len(),
                watcher.poll_interval()
            );
            watcher
                .wait_until(|| {
                    self.settled_probe(&watched)
                        .filter(|state| *state != JobState::Succeed)
                })
                .await?
        };

        self.emit(FarmEvent::WaitFinished {
            state,
            timestamp: Utc::now(),
        });
        Ok(state)
    }

    fn settled_probe(&self, watched: &[(ContainerId, TaskId)]) -> Option<JobState> {
        match self.settled(watched) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Could not check task states: {}", e);
                None
            }
        }
    }

    /// Outcome of `watched` once it is known: a failed or canceled container,
    /// else `None` until every task is final, then the first failure or
    /// `Succeed`.
    fn settled(
        &self,
        watched: &[(ContainerId, TaskId)],
    ) -> Result<Option<JobState>, SchedulerError> {
        let scheduler = &self.inner.scheduler;

        let mut container_ids: Vec<ContainerId> = watched.iter().map(|(c, _)| *c).collect();
        container_ids.sort_unstable();
        container_ids.dedup();

        let mut states = Vec::with_capacity(watched.len());
        for container_id in container_ids {
            match scheduler.refresh_job(container_id)?.state {
                TaskState::Failed => return Ok(Some(JobState::Failed)),
                TaskState::Canceled => return Ok(Some(JobState::Canceled)),
                _ => {}
            }

            let tasks = scheduler.list_tasks(container_id)?;
            for (_, task_id) in watched.iter().filter(|(c, _)| *c == container_id) {
                let state = tasks
                    .iter()
                    .find(|t| t.id == *task_id)
                    .map(|t| settle_state(t.state))
                    .ok_or(SchedulerError::UnknownTask(*task_id))?;
                tracing::trace!("Task {} in {} is {}", task_id, container_id, state);
                states.push(state);
            }
        }

        if !states.iter().all(JobState::is_final) {
            return Ok(None);
        }
        Ok(Some(
            states
                .into_iter()
                .find(|s| matches!(s, JobState::Failed | JobState::Canceled))
                .unwrap_or(JobState::Succeed),
        ))
    }

    /// Find the open container for `key`, from the registry or by asking the
    /// scheduler. Closed or vanished containers are dropped from the registry.
    fn open_container(
        &self,
        registry: &mut Registry,
        key: &ContainerKey,
    ) -> Result<Option<ContainerSlot>, FarmError> {
        let scheduler = &self.inner.scheduler;

        let candidate = match registry.containers.get(key) {
            Some(slot) => Some(*slot),
            None => scheduler
                .list_jobs(&JobFilter::for_key(key))?
                .into_iter()
                .filter(ContainerJob::is_open)
                .max_by_key(|job| job.id)
                .map(|job| ContainerSlot {
                    id: job.id,
                    creating: job.state == TaskState::Configuring,
                }),
        };
        let Some(slot) = candidate else {
            return Ok(None);
        };

        let job = match scheduler.refresh_job(slot.id) {
            Ok(job) => job,
            Err(SchedulerError::UnknownJob(_)) => {
                registry.containers.remove(key);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !job.is_open() {
            tracing::debug!("Container {} for {} is {}; not reusing it", job.id, key, job.state);
            registry.containers.remove(key);
            return Ok(None);
        }

        registry.containers.insert(key.clone(), slot);
        Ok(Some(slot))
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: FarmEvent) {
        if let Some(tx) = self.inner.event_tx.get() {
            let _ = tx.send(event);
        }
    }
}

/// Container recorded in the handle at submit time.
fn container_of(handle: &JobHandle) -> Option<ContainerId> {
    handle
        .custom_info
        .get("container_id")
        .and_then(|v| v.as_i64())
}

fn handle_for(task: &SchedulerTask, state: JobState) -> JobHandle {
    let mut handle = JobHandle {
        id: Some(task.id),
        state,
        machine: task.allocated_node.clone(),
        cpu_time: task.cpu_time,
        submit_time: task.submit_time,
        ..Default::default()
    };
    handle
        .custom_info
        .insert("container_id".to_string(), json!(task.container_id));
    handle
        .custom_info
        .insert("task_state".to_string(), json!(task.state.to_string()));
    handle.custom_info.insert("name".to_string(), json!(task.name));
    handle
}
