//! Done-file polling.
//!
//! Remote work signals completion by writing marker files to shared storage.
//! The watcher checks for them on a fixed interval, deletes them once they
//! are all present and gives up after a ceiling.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use farm_core::{FarmConfig, FarmError, JobState};
use tokio::time::{Instant, MissedTickBehavior};

/// Shortest interval the watcher polls at; a zero interval is raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls a set of done files until they all exist.
#[derive(Debug, Clone)]
pub struct DoneWatcher {
    files: Vec<PathBuf>,
    poll_interval: Duration,
    timeout: Duration,
}

impl DoneWatcher {
    pub fn new(files: Vec<PathBuf>) -> Self {
        let defaults = FarmConfig::default();
        Self {
            files,
            poll_interval: defaults.poll_interval(),
            timeout: defaults.wait_timeout(),
        }
    }

    /// Watcher using the config's done files and wait policy.
    pub fn from_config(config: &FarmConfig) -> Self {
        Self {
            files: config.done_files.clone(),
            poll_interval: config.poll_interval().max(MIN_POLL_INTERVAL),
            timeout: config.wait_timeout(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Files that do not exist yet.
    pub fn missing(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| !f.exists())
            .cloned()
            .collect()
    }

    /// Wait for every done file, then delete them.
    pub async fn wait(&self) -> Result<(), FarmError> {
        self.wait_until(|| None).await.map(|_| ())
    }

    /// Wait for every done file, consulting `probe` on each tick.
    ///
    /// Returns `Succeed` once all files exist (and have been removed), or the
    /// state `probe` reported if it ended the wait first. An empty file list
    /// succeeds on the first tick.
    pub async fn wait_until<P>(&self, mut probe: P) -> Result<JobState, FarmError>
    where
        P: FnMut() -> Option<JobState>,
    {
        self.poll(|missing| {
            if missing.is_empty() {
                self.cleanup()?;
                tracing::info!("All {} done file(s) present", self.files.len());
                return Ok(Some(JobState::Succeed));
            }
            if let Some(state) = probe() {
                tracing::warn!("Wait ended early: work is {}", state);
                return Ok(Some(state));
            }
            Ok(None)
        })
        .await
    }

    /// Poll `probe` alone until it reports a state, under the same interval
    /// and ceiling. The done files are not consulted.
    pub async fn wait_for_state<P>(&self, mut probe: P) -> Result<JobState, FarmError>
    where
        P: FnMut() -> Option<JobState>,
    {
        self.poll(|_| Ok(probe())).await
    }

    async fn poll<C>(&self, mut check: C) -> Result<JobState, FarmError>
    where
        C: FnMut(&[PathBuf]) -> Result<Option<JobState>, FarmError>,
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let missing = self.missing();
            if let Some(state) = check(&missing)? {
                return Ok(state);
            }

            let waited = started.elapsed();
            if waited >= self.timeout {
                tracing::error!(
                    "Gave up after {:?}; {} done file(s) missing",
                    waited,
                    missing.len()
                );
                return Err(FarmError::Timeout { waited, missing });
            }

            tracing::debug!(
                "Still waiting after {:?}; {} of {} done file(s) missing",
                waited,
                missing.len(),
                self.files.len()
            );
        }
    }

    /// Delete the done files. Files already gone are skipped.
    pub fn cleanup(&self) -> Result<(), FarmError> {
        for file in &self.files {
            remove_if_present(file)?;
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), FarmError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FarmError::Io(format!(
            "failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::write(path, b"done").expect("write done file");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_list_succeeds_immediately() -> Result<(), FarmError> {
        let started = Instant::now();
        DoneWatcher::new(Vec::new()).wait().await?;
        assert_eq!(started.elapsed(), Duration::ZERO);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn present_files_are_deleted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let files = vec![dir.path().join("a.done"), dir.path().join("b.done")];
        files.iter().for_each(|f| touch(f));

        let state = DoneWatcher::new(files.clone()).wait_until(|| None).await?;

        assert_eq!(state, JobState::Succeed);
        assert!(files.iter().all(|f| !f.exists()));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_at_the_ceiling() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let present = dir.path().join("a.done");
        let absent = dir.path().join("b.done");
        touch(&present);

        let started = Instant::now();
        let err = DoneWatcher::new(vec![present.clone(), absent.clone()])
            .with_poll_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(60))
            .wait()
            .await
            .unwrap_err();

        match err {
            FarmError::Timeout { waited, missing } => {
                assert!(waited >= Duration::from_secs(60));
                assert!(waited < Duration::from_secs(65));
                assert_eq!(missing, vec![absent]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(60));
        // Nothing is deleted unless every file showed up.
        assert!(present.exists());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn default_policy_gives_up_after_two_days() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let err = DoneWatcher::new(vec![dir.path().join("never.done")])
            .wait()
            .await
            .unwrap_err();
        assert!(
            matches!(err, FarmError::Timeout { waited, .. } if waited >= Duration::from_secs(172_800))
        );
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn probe_can_end_the_wait() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut ticks = 0;
        let state = DoneWatcher::new(vec![dir.path().join("x.done")])
            .wait_until(|| {
                ticks += 1;
                (ticks == 3).then_some(JobState::Canceled)
            })
            .await?;
        assert_eq!(state, JobState::Canceled);
        assert_eq!(ticks, 3);
        Ok(())
    }

    #[test]
    fn cleanup_ignores_missing_files() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("gone.done");
        let watcher = DoneWatcher::new(vec![file]);
        watcher.cleanup()?;
        watcher.cleanup()?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_is_raised() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("a.done");
        touch(&file);

        let watcher = DoneWatcher::new(vec![file.clone()]).with_poll_interval(Duration::ZERO);
        assert_eq!(watcher.poll_interval(), MIN_POLL_INTERVAL);
        watcher.wait().await?;
        assert!(!file.exists());

        let mut config = FarmConfig::default();
        config.poll_interval_secs = 0;
        assert_eq!(DoneWatcher::from_config(&config).poll_interval(), MIN_POLL_INTERVAL);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn state_wait_ignores_the_empty_file_list() -> Result<(), FarmError> {
        let started = Instant::now();
        let mut ticks = 0;
        let state = DoneWatcher::new(Vec::new())
            .with_poll_interval(Duration::from_secs(5))
            .wait_for_state(|| {
                ticks += 1;
                (ticks == 4).then_some(JobState::Succeed)
            })
            .await?;
        assert_eq!(state, JobState::Succeed);
        // First tick is immediate, then three 5s periods.
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(started.elapsed() < Duration::from_secs(20));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn state_wait_times_out() {
        let err = DoneWatcher::new(Vec::new())
            .with_poll_interval(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(30))
            .wait_for_state(|| None)
            .await;
        assert!(matches!(
            err,
            Err(FarmError::Timeout { waited, ref missing }) if waited >= Duration::from_secs(30) && missing.is_empty()
        ));
    }
}
