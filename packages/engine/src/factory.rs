//! Platform selection: the backend enum and the factory that builds engines.

use std::str::FromStr;
use std::sync::Arc;

use farm_core::{FarmConfig, FarmError, FarmEvent, SweepTask};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::local::{OpResult, SingleMachineComputation};
use crate::pipeline::{Backend, ParallelComputation};
use crate::pool::MultiWorkerComputation;
use crate::process::ProcessCommand;
use crate::remote::{RemoteFarm, RemoteFarmComputation, SchedulerClient};

/// The available platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    LocalQueue,
    RemoteFarm,
    MultiWorkerThread,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 3] = [
        PlatformKind::LocalQueue,
        PlatformKind::RemoteFarm,
        PlatformKind::MultiWorkerThread,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::LocalQueue => "local-queue",
            PlatformKind::RemoteFarm => "remote-farm",
            PlatformKind::MultiWorkerThread => "multi-worker-thread",
        }
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlatformKind {
    type Err = FarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "local" | "localqueue" => Ok(PlatformKind::LocalQueue),
            "remote" | "remotefarm" | "farm" => Ok(PlatformKind::RemoteFarm),
            "multi" | "multiworker" | "multiworkerthread" => Ok(PlatformKind::MultiWorkerThread),
            _ => Err(FarmError::InvalidPlatform(s.to_string())),
        }
    }
}

/// A backend chosen at run time.
#[derive(Debug)]
pub enum Platform {
    LocalQueue(SingleMachineComputation),
    RemoteFarm(RemoteFarmComputation),
    MultiWorkerThread(MultiWorkerComputation),
}

impl Platform {
    pub fn kind(&self) -> PlatformKind {
        match self {
            Platform::LocalQueue(_) => PlatformKind::LocalQueue,
            Platform::RemoteFarm(_) => PlatformKind::RemoteFarm,
            Platform::MultiWorkerThread(_) => PlatformKind::MultiWorkerThread,
        }
    }

    /// Queue a deferred call. Only the in-process platforms take calls.
    pub fn enqueue_method<F>(&mut self, f: F) -> Result<(), FarmError>
    where
        F: FnOnce() -> OpResult + Send + 'static,
    {
        match self {
            Platform::LocalQueue(local) => local.enqueue_method(f),
            Platform::MultiWorkerThread(multi) => multi.enqueue_method(f),
            Platform::RemoteFarm(_) => return Err(self.mismatch("deferred call")),
        }
        Ok(())
    }

    /// Queue a deferred call that receives `state`.
    pub fn enqueue_method_with<F>(&mut self, f: F, state: Value) -> Result<(), FarmError>
    where
        F: FnOnce(Value) -> OpResult + Send + 'static,
    {
        match self {
            Platform::LocalQueue(local) => local.enqueue_method_with(f, state),
            Platform::MultiWorkerThread(multi) => multi.enqueue_method_with(f, state),
            Platform::RemoteFarm(_) => return Err(self.mismatch("deferred call")),
        }
        Ok(())
    }

    /// Add a sweep task. Only the remote farm takes sweep tasks.
    pub fn add_task(&mut self, task: SweepTask) -> Result<(), FarmError> {
        match self {
            Platform::RemoteFarm(remote) => {
                remote.add_task(task);
                Ok(())
            }
            _ => Err(self.mismatch("sweep task")),
        }
    }

    pub fn set_reduce(&mut self, command: ProcessCommand) {
        match self {
            Platform::LocalQueue(local) => local.set_reduce(command),
            Platform::RemoteFarm(remote) => remote.set_reduce(command),
            Platform::MultiWorkerThread(multi) => multi.set_reduce(command),
        }
    }

    /// The farm handle, on the remote platform.
    pub fn remote_farm(&self) -> Option<&RemoteFarm> {
        match self {
            Platform::RemoteFarm(remote) => Some(remote.farm()),
            _ => None,
        }
    }

    fn mismatch(&self, task: &'static str) -> FarmError {
        FarmError::TypeMismatch {
            platform: self.kind().as_str(),
            task,
        }
    }
}

impl Backend for Platform {
    fn name(&self) -> &'static str {
        match self {
            Platform::LocalQueue(b) => b.name(),
            Platform::RemoteFarm(b) => b.name(),
            Platform::MultiWorkerThread(b) => b.name(),
        }
    }

    async fn initialize(&mut self) -> Result<bool, FarmError> {
        match self {
            Platform::LocalQueue(b) => b.initialize().await,
            Platform::RemoteFarm(b) => b.initialize().await,
            Platform::MultiWorkerThread(b) => b.initialize().await,
        }
    }

    async fn broadcast(&mut self) -> Result<bool, FarmError> {
        match self {
            Platform::LocalQueue(b) => b.broadcast().await,
            Platform::RemoteFarm(b) => b.broadcast().await,
            Platform::MultiWorkerThread(b) => b.broadcast().await,
        }
    }

    async fn reduce(&mut self) -> Result<bool, FarmError> {
        match self {
            Platform::LocalQueue(b) => b.reduce().await,
            Platform::RemoteFarm(b) => b.reduce().await,
            Platform::MultiWorkerThread(b) => b.reduce().await,
        }
    }

    async fn validate_result(&mut self) -> Result<bool, FarmError> {
        match self {
            Platform::LocalQueue(b) => b.validate_result().await,
            Platform::RemoteFarm(b) => b.validate_result().await,
            Platform::MultiWorkerThread(b) => b.validate_result().await,
        }
    }
}

/// Builds an engine bound to the requested platform.
pub struct PlatformFactory {
    config: FarmConfig,
    scheduler: Option<Arc<dyn SchedulerClient>>,
    event_tx: Option<broadcast::Sender<FarmEvent>>,
}

impl PlatformFactory {
    pub fn new(config: FarmConfig) -> Self {
        Self {
            config,
            scheduler: None,
            event_tx: None,
        }
    }

    /// Scheduler client used by the remote farm platform.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn SchedulerClient>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the event broadcaster handed to every engine built here.
    pub fn with_event_tx(mut self, tx: broadcast::Sender<FarmEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &FarmConfig {
        &self.config
    }

    /// Build an engine for `kind`.
    pub fn create_platform(
        &self,
        kind: PlatformKind,
    ) -> Result<ParallelComputation<Platform>, FarmError> {
        self.create_platform_with(kind, |_| Ok(()))
    }

    /// Build an engine for `kind` and run `prep` on its backend before
    /// handing it out. An error from `prep` is returned as is.
    pub fn create_platform_with<F>(
        &self,
        kind: PlatformKind,
        prep: F,
    ) -> Result<ParallelComputation<Platform>, FarmError>
    where
        F: FnOnce(&mut Platform) -> Result<(), FarmError>,
    {
        self.config.validate()?;

        let platform = match kind {
            PlatformKind::LocalQueue => Platform::LocalQueue(SingleMachineComputation::new()),
            PlatformKind::MultiWorkerThread => {
                Platform::MultiWorkerThread(MultiWorkerComputation::new(self.config.workers))
            }
            PlatformKind::RemoteFarm => {
                let scheduler = self.scheduler.clone().ok_or_else(|| {
                    FarmError::Configuration(
                        "the remote farm platform needs a scheduler client".into(),
                    )
                })?;
                let mut farm = RemoteFarm::new(self.config.clone(), scheduler);
                if let Some(ref tx) = self.event_tx {
                    farm = farm.with_event_tx(tx.clone());
                }
                Platform::RemoteFarm(RemoteFarmComputation::new(farm))
            }
        };

        let mut engine = ParallelComputation::new(platform);
        if let Some(ref tx) = self.event_tx {
            engine = engine.with_event_tx(tx.clone());
        }

        prep(engine.backend_mut())?;
        tracing::debug!("Created {} platform", kind);
        Ok(engine)
    }
}
