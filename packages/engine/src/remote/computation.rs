//! Remote farm backend: sweep tasks submitted to a cluster scheduler.

use farm_core::{FarmError, JobState, SweepTask};

use super::farm::RemoteFarm;
use crate::pipeline::Backend;
use crate::process::{ProcessCommand, run_reduce};

/// Pipeline backend that ships sweep tasks to a [`RemoteFarm`].
#[derive(Debug)]
pub struct RemoteFarmComputation {
    farm: RemoteFarm,
    tasks: Vec<SweepTask>,
    reduce: Option<ProcessCommand>,
}

impl RemoteFarmComputation {
    pub fn new(farm: RemoteFarm) -> Self {
        Self {
            farm,
            tasks: Vec::new(),
            reduce: None,
        }
    }

    pub fn with_reduce(mut self, command: ProcessCommand) -> Self {
        self.reduce = Some(command);
        self
    }

    pub fn set_reduce(&mut self, command: ProcessCommand) {
        self.reduce = Some(command);
    }

    /// The farm handle; clone it to kill tasks while a run is waiting.
    pub fn farm(&self) -> &RemoteFarm {
        &self.farm
    }

    pub fn add_task(&mut self, task: SweepTask) {
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[SweepTask] {
        &self.tasks
    }
}

impl Backend for RemoteFarmComputation {
    fn name(&self) -> &'static str {
        "remote-farm"
    }

    async fn initialize(&mut self) -> Result<bool, FarmError> {
        for task in &self.tasks {
            task.validate()?;
        }
        if self.tasks.is_empty() {
            tracing::info!("No sweep tasks to submit");
            return Ok(false);
        }

        self.farm.connect().await?;

        let nodes = self.farm.nodes().await?;
        let online = nodes.iter().filter(|n| n.online).count();
        tracing::info!("{} of {} node(s) online", online, nodes.len());
        for task in &self.tasks {
            for wanted in &task.requested_nodes {
                if !nodes.iter().any(|n| &n.name == wanted) {
                    tracing::warn!("Task '{}' asks for unknown node {}", task.name, wanted);
                }
            }
        }
        Ok(true)
    }

    async fn broadcast(&mut self) -> Result<bool, FarmError> {
        for task in self.tasks.iter_mut().filter(|t| !t.handle.is_submitted()) {
            self.farm.try_submit(task).await?;
        }

        match self.farm.wait_for_done(&self.tasks).await? {
            JobState::Succeed => Ok(true),
            state => Err(FarmError::JobAborted(state)),
        }
    }

    async fn reduce(&mut self) -> Result<bool, FarmError> {
        run_reduce(self.reduce.as_ref()).await
    }

    async fn validate_result(&mut self) -> Result<bool, FarmError> {
        let mut failed = Vec::new();
        for task in &mut self.tasks {
            let state = self.farm.refresh(task).await?;
            if state != JobState::Succeed {
                failed.push(format!("{} ({})", task.name, state));
            }
        }

        if failed.is_empty() {
            tracing::info!("All {} task(s) validated", self.tasks.len());
            Ok(true)
        } else {
            Err(FarmError::TasksFailed(failed))
        }
    }
}
