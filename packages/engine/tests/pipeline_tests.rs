mod common;

use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use farm_engine::{
    FarmConfig, FarmError, FarmEvent, Phase, Platform, PlatformFactory, PlatformKind, SweepTask,
};
use serde_json::json;
use tokio::sync::broadcast;

use common::{call_log, entries, record};

#[tokio::test]
async fn local_queue_runs_deferred_calls_in_order() -> Result<(), Box<dyn Error>> {
    let log = call_log();
    let factory = PlatformFactory::new(FarmConfig::default());

    let mut engine = factory.create_platform_with(PlatformKind::LocalQueue, |platform| {
        platform.enqueue_method(record(&log, "A"))?;
        let l = log.clone();
        platform.enqueue_method_with(
            move |state| {
                l.lock().unwrap().push(format!("B({})", state["label"].as_str().unwrap_or("")));
                Ok(())
            },
            json!({"label": "state1"}),
        )?;
        platform.enqueue_method(record(&log, "C"))
    })?;

    let result = engine.execute().await?;

    assert!(result.succeeded());
    assert_eq!(entries(&log), vec!["A", "B(state1)", "C"]);
    assert!(engine.inner_error().is_none());
    Ok(())
}

#[tokio::test]
async fn empty_queue_stops_after_initialize() -> Result<(), Box<dyn Error>> {
    let factory = PlatformFactory::new(FarmConfig::default());
    for kind in [PlatformKind::LocalQueue, PlatformKind::MultiWorkerThread] {
        let mut engine = factory.create_platform(kind)?;
        let result = engine.execute().await?;

        assert_eq!(result.initialize, Some(false));
        assert_eq!(result.broadcast, None);
        assert_eq!(result.reduce, None);
        assert_eq!(result.validate, None);
        assert!(result.inner_error.is_none());
    }
    Ok(())
}

#[test]
fn unknown_platform_name_is_rejected() {
    let err = "mainframe".parse::<PlatformKind>();
    assert_eq!(err, Err(FarmError::InvalidPlatform("mainframe".into())));
}

#[test]
fn prep_hook_runs_once_before_the_engine_is_returned() -> Result<(), Box<dyn Error>> {
    let calls = AtomicUsize::new(0);
    let log = call_log();
    let factory = PlatformFactory::new(FarmConfig::default());

    let engine = factory.create_platform_with(PlatformKind::LocalQueue, |platform| {
        calls.fetch_add(1, Ordering::SeqCst);
        platform.enqueue_method(record(&log, "first"))?;
        platform.enqueue_method(record(&log, "second"))
    })?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match engine.backend() {
        Platform::LocalQueue(local) => assert_eq!(local.pending(), 2),
        other => panic!("expected local queue, got {:?}", other.kind()),
    }
    // Nothing runs until execute().
    assert!(entries(&log).is_empty());
    Ok(())
}

#[test]
fn prep_hook_error_is_returned_unchanged() {
    let factory = PlatformFactory::new(FarmConfig::default());
    let result = factory.create_platform_with(PlatformKind::MultiWorkerThread, |_| {
        Err(FarmError::Configuration("missing input deck".into()))
    });
    assert!(matches!(
        result,
        Err(FarmError::Configuration(msg)) if msg == "missing input deck"
    ));
}

#[test]
fn deferred_calls_are_rejected_by_the_remote_farm() -> Result<(), Box<dyn Error>> {
    let scheduler = common::scheduler();
    let factory = common::remote_factory(common::farm_config(Vec::new()), &scheduler);
    let mut engine = factory.create_platform(PlatformKind::RemoteFarm)?;

    let err = engine.backend_mut().enqueue_method(|| Ok(()));
    assert_eq!(
        err,
        Err(FarmError::TypeMismatch {
            platform: "remote-farm",
            task: "deferred call",
        })
    );

    let err = engine
        .backend_mut()
        .enqueue_method_with(|_| Ok(()), json!(null));
    assert!(matches!(err, Err(FarmError::TypeMismatch { .. })));
    Ok(())
}

#[test]
fn sweep_tasks_are_rejected_by_the_worker_pool() -> Result<(), Box<dyn Error>> {
    let factory = PlatformFactory::new(FarmConfig::default());
    let mut engine = factory.create_platform(PlatformKind::MultiWorkerThread)?;
    let err = engine
        .backend_mut()
        .add_task(SweepTask::new("frames", "render *", 1, 10));
    assert_eq!(
        err,
        Err(FarmError::TypeMismatch {
            platform: "multi-worker-thread",
            task: "sweep task",
        })
    );
    Ok(())
}

#[tokio::test]
async fn failing_call_fails_broadcast_without_raising() -> Result<(), Box<dyn Error>> {
    let log = call_log();
    let factory = PlatformFactory::new(FarmConfig::default());
    let mut engine = factory.create_platform_with(PlatformKind::LocalQueue, |platform| {
        platform.enqueue_method(record(&log, "A"))?;
        platform.enqueue_method(|| Err("license server down".to_string()))?;
        platform.enqueue_method(record(&log, "C"))
    })?;

    let result = engine.execute().await?;

    assert_eq!(result.initialize, Some(true));
    assert_eq!(result.broadcast, Some(false));
    assert_eq!(result.reduce, None);
    assert_eq!(entries(&log), vec!["A"]);
    assert!(matches!(
        engine.inner_error(),
        Some(FarmError::Operation(msg)) if msg.contains("license server down")
    ));
    Ok(())
}

#[tokio::test]
async fn worker_pool_runs_every_call_once() -> Result<(), Box<dyn Error>> {
    let counter = Arc::new(AtomicUsize::new(0));
    let factory = PlatformFactory::new(FarmConfig::default().with_workers(4));

    let mut engine = factory.create_platform_with(PlatformKind::MultiWorkerThread, |platform| {
        for frame in 0..25 {
            let c = counter.clone();
            platform.enqueue_method_with(
                move |state| {
                    if state["frame"] != json!(frame) {
                        return Err(format!("frame {frame} got {state}"));
                    }
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                json!({"frame": frame}),
            )?;
        }
        Ok(())
    })?;

    let result = engine.execute().await?;

    assert!(result.succeeded());
    assert_eq!(counter.load(Ordering::SeqCst), 25);
    Ok(())
}

#[tokio::test]
async fn phases_are_announced_on_the_event_channel() -> Result<(), Box<dyn Error>> {
    let (tx, mut rx) = broadcast::channel(32);
    let log = call_log();
    let factory = PlatformFactory::new(FarmConfig::default()).with_event_tx(tx);
    let mut engine = factory.create_platform_with(PlatformKind::LocalQueue, |platform| {
        platform.enqueue_method(record(&log, "only"))
    })?;

    let result = engine.execute().await?;

    let mut finished = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let FarmEvent::PhaseFinished { phase, ok, run_id, .. } = event {
            assert_eq!(run_id, result.run_id);
            finished.push((phase, ok));
        }
    }
    assert_eq!(
        finished,
        Phase::ALL.iter().map(|p| (*p, true)).collect::<Vec<_>>()
    );
    Ok(())
}

#[cfg(unix)]
mod reduce {
    use farm_engine::ProcessCommand;

    use super::*;

    #[tokio::test]
    async fn reduce_runs_after_broadcast() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let merged = dir.path().join("merged.txt");
        let log = call_log();
        let factory = PlatformFactory::new(FarmConfig::default());

        let mut engine = factory.create_platform_with(PlatformKind::LocalQueue, |platform| {
            platform.enqueue_method(record(&log, "frame"))?;
            platform.set_reduce(
                ProcessCommand::shell("echo merged > merged.txt").with_working_dir(dir.path()),
            );
            Ok(())
        })?;

        let result = engine.execute().await?;

        assert!(result.succeeded());
        assert_eq!(std::fs::read_to_string(&merged)?.trim(), "merged");
        Ok(())
    }

    #[tokio::test]
    async fn failing_reduce_stops_before_validate() -> Result<(), Box<dyn Error>> {
        let log = call_log();
        let factory = PlatformFactory::new(FarmConfig::default().with_workers(2));
        let mut engine = factory.create_platform_with(PlatformKind::MultiWorkerThread, |platform| {
            platform.enqueue_method(record(&log, "frame"))?;
            platform.set_reduce(ProcessCommand::shell("exit 7"));
            Ok(())
        })?;

        let result = engine.execute().await?;

        assert_eq!(result.broadcast, Some(true));
        assert_eq!(result.reduce, Some(false));
        assert_eq!(result.validate, None);
        assert!(matches!(result.inner_error, Some(FarmError::Process(_))));
        Ok(())
    }
}
