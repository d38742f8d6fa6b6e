#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use farm_engine::{FarmConfig, InMemoryScheduler, NodeInfo, OpResult, PlatformFactory};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A deferred call that appends `entry` to `log`.
pub fn record(log: &CallLog, entry: impl Into<String>) -> impl FnOnce() -> OpResult + Send + 'static {
    let log = log.clone();
    let entry = entry.into();
    move || {
        log.lock().unwrap().push(entry);
        Ok(())
    }
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn done_file(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.done"))
}

pub fn touch(path: &Path) {
    std::fs::write(path, b"done").unwrap();
}

/// Farm config polling every 5s and giving up after a minute.
pub fn farm_config(done_files: Vec<PathBuf>) -> FarmConfig {
    FarmConfig::default()
        .with_head_node("hpc-head")
        .with_job_name("frames")
        .with_owner("alice")
        .with_user_name("svc-render")
        .with_caps(4, 32)
        .with_wait_policy(Duration::from_secs(5), Duration::from_secs(60))
        .with_done_files(done_files)
}

pub fn scheduler() -> Arc<InMemoryScheduler> {
    Arc::new(InMemoryScheduler::with_nodes(vec![
        NodeInfo {
            name: "node-01".into(),
            cores: 16,
            online: true,
        },
        NodeInfo {
            name: "node-02".into(),
            cores: 16,
            online: false,
        },
    ]))
}

pub fn remote_factory(config: FarmConfig, scheduler: &Arc<InMemoryScheduler>) -> PlatformFactory {
    PlatformFactory::new(config).with_scheduler(scheduler.clone())
}
