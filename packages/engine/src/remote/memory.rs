//! In-memory scheduler for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use farm_core::{
    ContainerId, ContainerJob, ContainerRequest, JobFilter, NodeInfo, ParametricTask, Priority,
    SchedulerTask, TaskId, TaskState,
};

use super::scheduler::{SchedulerClient, SchedulerError};

/// A scheduler that keeps every job in process memory.
///
/// Jobs never progress on their own; tests drive them with
/// [`InMemoryScheduler::set_job_state`] and [`InMemoryScheduler::set_task_state`].
#[derive(Debug, Default)]
pub struct InMemoryScheduler {
    inner: Mutex<SimState>,
}

#[derive(Debug, Default)]
struct SimState {
    head_node: Option<String>,
    unreachable: bool,
    reject_submissions: bool,
    next_job_id: ContainerId,
    next_task_id: TaskId,
    jobs: BTreeMap<ContainerId, ContainerJob>,
    tasks: BTreeMap<TaskId, SchedulerTask>,
    nodes: Vec<NodeInfo>,
    submitted_by: BTreeMap<ContainerId, String>,
    /// Task ids in the order they were submitted.
    submissions: Vec<TaskId>,
}

impl SimState {
    fn connected(&self) -> Result<(), SchedulerError> {
        if self.head_node.is_some() {
            Ok(())
        } else {
            Err(SchedulerError::NotConnected)
        }
    }

    fn job_mut(&mut self, id: ContainerId) -> Result<&mut ContainerJob, SchedulerError> {
        self.jobs.get_mut(&id).ok_or(SchedulerError::UnknownJob(id))
    }

    fn insert_task(&mut self, job_id: ContainerId, task: &ParametricTask, state: TaskState) -> TaskId {
        self.next_task_id += 1;
        let id = self.next_task_id;
        self.tasks.insert(
            id,
            SchedulerTask {
                id,
                container_id: job_id,
                name: task.name.clone(),
                state,
                allocated_node: None,
                cpu_time: 0.0,
                submit_time: None,
            },
        );
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.task_ids.push(id);
        }
        id
    }

    fn mark_submitted(&mut self, task_id: TaskId) {
        if let Some(task) = self.tasks.get_mut(&task_id) {
            task.state = TaskState::Queued;
            task.submit_time = Some(Utc::now());
        }
        self.submissions.push(task_id);
    }
}

impl InMemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduler with the given compute nodes.
    pub fn with_nodes(nodes: Vec<NodeInfo>) -> Self {
        let scheduler = Self::default();
        scheduler.lock().nodes = nodes;
        scheduler
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `connect` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Make `submit_job` and `submit_task` fail.
    pub fn set_reject_submissions(&self, reject: bool) {
        self.lock().reject_submissions = reject;
    }

    pub fn set_job_state(&self, id: ContainerId, state: TaskState) -> Result<(), SchedulerError> {
        self.lock().job_mut(id)?.state = state;
        Ok(())
    }

    pub fn set_task_state(&self, id: TaskId, state: TaskState) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        let node = sim.nodes.first().map(|n| n.name.clone());
        let task = sim.tasks.get_mut(&id).ok_or(SchedulerError::UnknownTask(id))?;
        task.state = state;
        if state == TaskState::Running {
            task.allocated_node = node;
        }
        Ok(())
    }

    /// Settle every task of `job_id` as `state` and close the container.
    pub fn complete_job(&self, job_id: ContainerId, state: TaskState) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        let task_ids = sim.job_mut(job_id)?.task_ids.clone();
        for id in task_ids {
            if let Some(task) = sim.tasks.get_mut(&id) {
                task.state = state;
            }
        }
        sim.job_mut(job_id)?.state = state;
        Ok(())
    }

    pub fn job(&self, id: ContainerId) -> Option<ContainerJob> {
        self.lock().jobs.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<ContainerJob> {
        self.lock().jobs.values().cloned().collect()
    }

    pub fn task(&self, id: TaskId) -> Option<SchedulerTask> {
        self.lock().tasks.get(&id).cloned()
    }

    /// Task ids in the order the scheduler accepted them.
    pub fn submissions(&self) -> Vec<TaskId> {
        self.lock().submissions.clone()
    }

    pub fn head_node(&self) -> Option<String> {
        self.lock().head_node.clone()
    }

    /// Who submitted the container, if anyone has yet.
    pub fn submitted_by(&self, id: ContainerId) -> Option<String> {
        self.lock().submitted_by.get(&id).cloned()
    }
}

impl SchedulerClient for InMemoryScheduler {
    fn connect(&self, head_node: &str) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        if sim.unreachable {
            return Err(SchedulerError::Unreachable(head_node.to_string()));
        }
        sim.head_node = Some(head_node.to_string());
        Ok(())
    }

    fn create_job(&self, request: &ContainerRequest) -> Result<ContainerJob, SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        sim.next_job_id += 1;
        let job = ContainerJob {
            id: sim.next_job_id,
            key: request.key.clone(),
            priority: request.priority,
            unit_type: request.unit_type,
            min_units: request.min_units,
            max_units: request.max_units,
            state: TaskState::Configuring,
            task_ids: Vec::new(),
        };
        sim.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    fn set_priority(&self, job_id: ContainerId, priority: Priority) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        sim.job_mut(job_id)?.priority = priority;
        Ok(())
    }

    fn add_task(&self, job_id: ContainerId, task: &ParametricTask) -> Result<TaskId, SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        let state = sim.job_mut(job_id)?.state;
        if state != TaskState::Configuring {
            return Err(SchedulerError::Rejected(format!(
                "container {job_id} is {state}; tasks can only be added while configuring"
            )));
        }
        Ok(sim.insert_task(job_id, task, TaskState::Configuring))
    }

    fn submit_job(&self, job_id: ContainerId, user_name: &str) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        if sim.reject_submissions {
            return Err(SchedulerError::Rejected("submissions are disabled".into()));
        }
        let job = sim.job_mut(job_id)?;
        if job.state != TaskState::Configuring {
            return Err(SchedulerError::Rejected(format!(
                "container {job_id} was already submitted"
            )));
        }
        job.state = TaskState::Queued;
        let task_ids = job.task_ids.clone();
        for id in task_ids {
            sim.mark_submitted(id);
        }
        sim.submitted_by.insert(job_id, user_name.to_string());
        Ok(())
    }

    fn submit_task(&self, job_id: ContainerId, task: &ParametricTask) -> Result<TaskId, SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        if sim.reject_submissions {
            return Err(SchedulerError::Rejected("submissions are disabled".into()));
        }
        let state = sim.job_mut(job_id)?.state;
        if state == TaskState::Configuring || state.is_closed() {
            return Err(SchedulerError::Rejected(format!(
                "container {job_id} is {state} and cannot take new tasks"
            )));
        }
        let id = sim.insert_task(job_id, task, TaskState::Submitted);
        sim.mark_submitted(id);
        Ok(id)
    }

    fn refresh_job(&self, job_id: ContainerId) -> Result<ContainerJob, SchedulerError> {
        let sim = self.lock();
        sim.connected()?;
        sim.jobs
            .get(&job_id)
            .cloned()
            .ok_or(SchedulerError::UnknownJob(job_id))
    }

    fn list_tasks(&self, job_id: ContainerId) -> Result<Vec<SchedulerTask>, SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        let task_ids = sim.job_mut(job_id)?.task_ids.clone();
        Ok(task_ids
            .iter()
            .filter_map(|id| sim.tasks.get(id).cloned())
            .collect())
    }

    fn cancel_task(&self, job_id: ContainerId, task_id: TaskId) -> Result<(), SchedulerError> {
        let mut sim = self.lock();
        sim.connected()?;
        sim.job_mut(job_id)?;
        let task = sim
            .tasks
            .get_mut(&task_id)
            .filter(|t| t.container_id == job_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        if !matches!(task.state, TaskState::Finished | TaskState::Failed | TaskState::Canceled) {
            task.state = TaskState::Canceled;
        }
        Ok(())
    }

    fn list_nodes(&self) -> Result<Vec<NodeInfo>, SchedulerError> {
        let sim = self.lock();
        sim.connected()?;
        Ok(sim.nodes.clone())
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<ContainerJob>, SchedulerError> {
        let sim = self.lock();
        sim.connected()?;
        Ok(sim
            .jobs
            .values()
            .filter(|job| filter.matches(&job.key))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use farm_core::{ContainerKey, SweepTask, UnitType};

    use super::*;

    fn connected() -> InMemoryScheduler {
        let scheduler = InMemoryScheduler::new();
        scheduler.connect("head").expect("connect");
        scheduler
    }

    fn request(owner: &str) -> ContainerRequest {
        let task = SweepTask::new("frames", "render *", 1, 4);
        ContainerRequest::for_task(ContainerKey::new("sweep", owner, "svc"), &task, 4, 32)
    }

    #[test]
    fn calls_need_a_connection() {
        let scheduler = InMemoryScheduler::new();
        assert_eq!(scheduler.list_nodes(), Err(SchedulerError::NotConnected));
        scheduler.set_unreachable(true);
        assert_eq!(
            scheduler.connect("head"),
            Err(SchedulerError::Unreachable("head".into()))
        );
    }

    #[test]
    fn batch_submission_queues_configured_tasks() -> Result<(), SchedulerError> {
        let scheduler = connected();
        let job = scheduler.create_job(&request("alice"))?;
        assert_eq!(job.state, TaskState::Configuring);
        assert_eq!(job.unit_type, UnitType::Core);

        let task = ParametricTask::from(&SweepTask::new("frames", "render *", 1, 4));
        let id = scheduler.add_task(job.id, &task)?;
        assert_eq!(scheduler.submissions(), Vec::<TaskId>::new());

        scheduler.submit_job(job.id, "svc")?;
        assert_eq!(scheduler.task(id).map(|t| t.state), Some(TaskState::Queued));
        assert_eq!(scheduler.submitted_by(job.id).as_deref(), Some("svc"));
        assert!(scheduler.add_task(job.id, &task).is_err());

        let second = scheduler.submit_task(job.id, &task)?;
        assert_eq!(scheduler.submissions(), vec![id, second]);
        Ok(())
    }

    #[test]
    fn closed_container_refuses_tasks() -> Result<(), SchedulerError> {
        let scheduler = connected();
        let job = scheduler.create_job(&request("alice"))?;
        scheduler.submit_job(job.id, "svc")?;
        scheduler.set_job_state(job.id, TaskState::Finished)?;

        let task = ParametricTask::from(&SweepTask::new("frames", "render *", 1, 4));
        assert!(matches!(
            scheduler.submit_task(job.id, &task),
            Err(SchedulerError::Rejected(_))
        ));
        Ok(())
    }

    #[test]
    fn list_jobs_filters_by_identity() -> Result<(), SchedulerError> {
        let scheduler = connected();
        scheduler.create_job(&request("alice"))?;
        scheduler.create_job(&request("bob"))?;
        let key = ContainerKey::new("sweep", "bob", "svc");
        let jobs = scheduler.list_jobs(&JobFilter::for_key(&key))?;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].key, key);
        Ok(())
    }

    #[test]
    fn cancel_leaves_settled_tasks_alone() -> Result<(), SchedulerError> {
        let scheduler = connected();
        let job = scheduler.create_job(&request("alice"))?;
        let task = ParametricTask::from(&SweepTask::new("frames", "render *", 1, 4));
        let done = scheduler.add_task(job.id, &task)?;
        let live = scheduler.add_task(job.id, &task)?;
        scheduler.submit_job(job.id, "svc")?;
        scheduler.set_task_state(done, TaskState::Finished)?;

        scheduler.cancel_task(job.id, done)?;
        scheduler.cancel_task(job.id, live)?;

        assert_eq!(scheduler.task(done).map(|t| t.state), Some(TaskState::Finished));
        assert_eq!(scheduler.task(live).map(|t| t.state), Some(TaskState::Canceled));
        assert_eq!(
            scheduler.cancel_task(job.id, 999),
            Err(SchedulerError::UnknownTask(999))
        );
        Ok(())
    }
}
