// Copyright (c) The browsertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use browsertest_protocol::{RunTestResponse, WorkerError};
use browsertest_runner::{
    config::elements::KeepBrowserMode,
    errors::{InterceptError, RunError, RunnerEventError, TestError},
    list::{Suite, Test},
    reporter::{EventName, RunStats, RunnerEvent},
    runner::{Interception, Interceptor, MainRunner, MainRunnerBuilder},
    signal::SignalHandlerKind,
};
use color_eyre::eyre::{Result, bail, ensure};
use maplit::btreeset;
use pretty_assertions::assert_eq;
use std::{
    collections::BTreeSet,
    sync::{Arc, OnceLock},
    time::Duration,
};

fn builder(listener: &Arc<RecordingListener>) -> MainRunnerBuilder {
    let mut builder = MainRunnerBuilder::new();
    builder
        .set_signal_handler(SignalHandlerKind::Noop)
        .add_listener(listener.clone());
    builder
}

fn runner_end_stats(listener: &RecordingListener) -> Option<RunStats> {
    listener.events().iter().find_map(|event| match event {
        RunnerEvent::RunnerEnd(stats) => Some(*stats),
        _ => None,
    })
}

#[tokio::test]
async fn retried_test_passes_on_second_attempt() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let spawner = Arc::new(FakeWorkerSpawner::new(|request, attempt| {
        if request.full_title.ends_with("second") && attempt == 1 {
            Err(WorkerError::new("AssertionError", "button is not visible"))
        } else {
            Ok(RunTestResponse::default())
        }
    }));
    let pool_factory = Arc::new(FakePoolFactory::default());
    let mut config = config(&["chrome"], 1);
    config.set_workers(browsertest_runner::config::elements::WorkerCount::Count(2));

    let runner = builder(&listener).build(config, pool_factory.clone(), spawner.clone());
    let stats = runner
        .run(collection(&[("chrome", "first"), ("chrome", "second")]))
        .await?;

    let expected = RunStats {
        total: 2,
        passed: 2,
        failed: 0,
        skipped: 0,
        retries: 1,
    };
    assert_eq!(stats, expected);
    assert_eq!(runner_end_stats(&listener), Some(expected));

    assert_eq!(
        listener.for_test("first"),
        [
            recorded("TEST_BEGIN", "first"),
            recorded("TEST_PASS", "first"),
            recorded("TEST_END", "first"),
        ]
    );
    let mut retry = recorded("RETRY", "second");
    retry.retries_left = Some(0);
    assert_eq!(
        listener.for_test("second"),
        [
            recorded("TEST_BEGIN", "second"),
            retry,
            recorded("TEST_END", "second"),
            recorded("TEST_BEGIN", "second"),
            recorded("TEST_PASS", "second"),
            recorded("TEST_END", "second"),
        ]
    );
    assert_eq!(spawner.attempts("main page second"), 2);

    let names = listener.names();
    assert_eq!(names.first(), Some(&"RUNNER_START"));
    assert_eq!(names.last(), Some(&"RUNNER_END"));
    let expected_names = [
        "BEGIN",
        "END",
        "SUITE_BEGIN",
        "SUITE_END",
        "SESSION_START",
        "NEW_WORKER_PROCESS",
    ];
    for name in expected_names {
        ensure!(names.contains(&name), "missing {name} in {names:?}");
    }
    let suite_begin = names.iter().position(|name| *name == "SUITE_BEGIN");
    let first_test = names.iter().position(|name| *name == "TEST_BEGIN");
    ensure!(suite_begin < first_test, "suite must begin before its tests");

    // Every session was released since no test asked to keep it.
    assert_eq!(pool_factory.pool().freed().len(), 3);
    ensure!(spawner.spawned() <= 2, "at most two workers may be spawned");
    Ok(())
}

#[tokio::test]
async fn interceptors_rewrite_test_events() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let spawner = Arc::new(FakeWorkerSpawner::new(|_, _| {
        Err(WorkerError::new("AssertionError", "always fails"))
    }));

    let mut builder = builder(&listener);
    builder
        .add_interceptor(Interceptor::new(EventName::TestPending, |_| {
            Ok(Interception::Suppress)
        }))
        .add_interceptor(Interceptor::new(EventName::TestFail, |event| {
            let test = event.test().cloned().expect("TEST_FAIL carries a test");
            Ok(Interception::Replace(RunnerEvent::TestPass(test)))
        }));
    let runner = builder.build(
        config(&["chrome"], 0),
        Arc::new(FakePoolFactory::default()),
        spawner,
    );

    let mut collection = collection(&[("chrome", "flaky")]);
    let root = Suite::root("root");
    let mut pending = Test::new("later", "tests/later.js", root, "chrome");
    pending.pending = true;
    collection.add_test(pending);

    let stats = runner.run(collection).await?;

    assert_eq!(
        stats,
        RunStats {
            total: 1,
            passed: 1,
            ..RunStats::default()
        }
    );
    let names = listener.names();
    ensure!(!names.contains(&"TEST_PENDING"), "pending test was not suppressed: {names:?}");
    ensure!(!names.contains(&"TEST_FAIL"), "failure was not rewritten: {names:?}");
    assert_eq!(
        listener.for_test("flaky"),
        [
            recorded("TEST_BEGIN", "flaky"),
            recorded("TEST_PASS", "flaky"),
            recorded("TEST_END", "flaky"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn interceptor_error_is_reported_as_error_event() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let mut builder = builder(&listener);
    builder.add_interceptor(Interceptor::new(EventName::TestPass, |_| {
        Err(InterceptError::new("html reporter crashed"))
    }));
    let runner = builder.build(
        config(&["chrome"], 0),
        Arc::new(FakePoolFactory::default()),
        Arc::new(FakeWorkerSpawner::passing()),
    );

    let stats = runner.run(collection(&[("chrome", "only")])).await?;

    // The error event replaced the pass, so nothing was counted.
    assert_eq!(stats.total, 0);
    let errors: Vec<_> = listener
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunnerEvent::Error(err) => Some(err),
            _ => None,
        })
        .collect();
    match errors.as_slice() {
        [RunnerEventError::Interceptor { event, .. }] => assert_eq!(*event, EventName::TestPass),
        other => bail!("expected one interceptor error, found {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn runner_start_failure_skips_tests() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::failing_runner_start();
    let spawner = Arc::new(FakeWorkerSpawner::passing());
    let runner = builder(&listener).build(
        config(&["chrome"], 0),
        Arc::new(FakePoolFactory::default()),
        spawner.clone(),
    );

    let result = runner.run(collection(&[("chrome", "never runs")])).await;

    match result {
        Err(RunError::RunnerStart(_)) => {}
        other => bail!("expected a RUNNER_START error, found {other:?}"),
    }
    assert_eq!(listener.names(), ["RUNNER_START", "RUNNER_END"]);
    assert_eq!(runner_end_stats(&listener), Some(RunStats::default()));
    assert_eq!(spawner.spawned(), 0);
    ensure!(!runner.is_running(), "runner must be finished");
    Ok(())
}

#[tokio::test]
async fn cancel_fails_queued_tests() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let spawner = Arc::new(FakeWorkerSpawner::passing().gated());
    let pool_factory = Arc::new(FakePoolFactory::with_capacity(1));
    let runner = builder(&listener).build(
        config(&["chrome"], 1),
        pool_factory.clone(),
        spawner.clone(),
    );

    let handle = tokio::spawn({
        let runner = runner.clone();
        async move {
            runner
                .run(collection(&[("chrome", "running"), ("chrome", "queued")]))
                .await
        }
    });

    // "running" holds the only session, so "queued" is waiting for the pool.
    spawner.wait_started().await;
    runner.cancel();
    ensure!(runner.is_cancelled(), "runner must be cancelled");
    spawner.open_gate();

    let stats = handle.await??;
    assert_eq!(
        stats,
        RunStats {
            total: 2,
            passed: 1,
            failed: 1,
            skipped: 0,
            retries: 0,
        }
    );

    let queued_failure = listener.events().into_iter().find_map(|event| match event {
        RunnerEvent::TestFail(test) if test.title == "queued" => Some(test),
        _ => None,
    });
    match queued_failure.and_then(|test| test.err) {
        Some(TestError::Cancelled) => {}
        other => bail!("expected the queued test to fail as cancelled, found {other:?}"),
    }
    ensure!(
        !listener.names().contains(&"RETRY"),
        "cancelled tests must not be retried"
    );
    assert_eq!(pool_factory.pool().freed().len(), 1);
    ensure!(
        !runner.add_test_to_run(Test::new("late", "t.js", Suite::root("root"), "chrome"), None),
        "a finished run refuses new tests"
    );
    Ok(())
}

#[tokio::test]
async fn keep_browser_on_fail_keeps_failed_sessions() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let spawner = Arc::new(FakeWorkerSpawner::new(|request, _| {
        if request.full_title.ends_with("broken") {
            Err(WorkerError::new("AssertionError", "layout shifted"))
        } else {
            Ok(RunTestResponse::default())
        }
    }));
    let pool_factory = Arc::new(FakePoolFactory::default());
    let config = config(&["chrome"], 0);
    config
        .for_browser(&"chrome".into())?
        .set_keep_browser_mode(KeepBrowserMode {
            enabled: true,
            on_fail: true,
        });

    let runner = builder(&listener).build(config, pool_factory.clone(), spawner);
    let stats = runner
        .run(collection(&[("chrome", "fine"), ("chrome", "broken")]))
        .await?;

    assert_eq!((stats.passed, stats.failed), (1, 1));
    let freed = pool_factory.pool().freed();
    assert_eq!(freed.len(), 1, "only the passing test's session is released");
    ensure!(!freed[0].1, "a healthy session is released without force");
    Ok(())
}

#[tokio::test]
async fn tests_added_mid_run_are_waited_for() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let runner_slot = Arc::new(OnceLock::<MainRunner>::new());
    listener.set_on_event({
        let runner_slot = runner_slot.clone();
        move |event| {
            if let RunnerEvent::TestBegin(test) = event
                && test.title == "first"
                && let Some(runner) = runner_slot.get()
            {
                let late = Test::new("late", "tests/late.js", test.parent.clone(), "chrome");
                assert!(runner.add_test_to_run(late, Some("firefox".into())));
            }
        }
    });

    let runner = builder(&listener).build(
        config(&["chrome", "firefox"], 0),
        Arc::new(FakePoolFactory::default()),
        Arc::new(FakeWorkerSpawner::passing()),
    );
    _ = runner_slot.set(runner.clone());

    let stats = runner.run(collection(&[("chrome", "first")])).await?;

    assert_eq!((stats.total, stats.passed), (2, 2));
    let passed: BTreeSet<_> = listener
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunnerEvent::TestPass(test) => Some((test.title, test.browser_id.to_string())),
            _ => None,
        })
        .collect();
    assert_eq!(
        passed,
        btreeset! {
            ("first".to_owned(), "chrome".to_owned()),
            ("late".to_owned(), "firefox".to_owned()),
        }
    );
    Ok(())
}

#[tokio::test]
async fn unhandled_rejections_are_reported() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let runner = builder(&listener).build(
        config(&["chrome"], 0),
        Arc::new(FakePoolFactory::default()),
        Arc::new(FakeWorkerSpawner::passing().rejecting()),
    );

    let stats = runner.run(collection(&[("chrome", "only")])).await?;

    assert_eq!(stats.passed, 1);
    let rejection = listener.events().into_iter().find_map(|event| match event {
        RunnerEvent::Error(RunnerEventError::WorkerUnhandledRejection { error, .. }) => {
            Some(error)
        }
        _ => None,
    });
    assert_eq!(
        rejection.map(|error| error.message),
        Some("unhandled rejection in test file".to_owned())
    );
    Ok(())
}

#[tokio::test]
async fn finished_browser_takes_tests_while_others_run() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let spawner = Arc::new(FakeWorkerSpawner::passing().gated_on("slow"));
    let runner = builder(&listener).build(
        config(&["chrome", "firefox"], 0),
        Arc::new(FakePoolFactory::default()),
        spawner.clone(),
    );

    let handle = tokio::spawn({
        let runner = runner.clone();
        async move {
            runner
                .run(collection(&[("chrome", "fast"), ("firefox", "slow")]))
                .await
        }
    });

    // Once "fast" is over, chrome has nothing left to run while firefox is still busy.
    tokio::time::timeout(Duration::from_secs(10), listener.wait_for("TEST_END", "fast")).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    ensure!(runner.is_running(), "firefox is still running");

    let late = Test::new("late", "tests/late.js", Suite::root("root"), "chrome");
    ensure!(
        runner.add_test_to_run(late, None),
        "chrome must take new tests while the run is in progress"
    );
    spawner.open_gate();

    let stats = handle.await??;
    assert_eq!((stats.total, stats.passed), (3, 3));
    let passed: BTreeSet<_> = listener
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RunnerEvent::TestPass(test) => Some((test.title, test.browser_id.to_string())),
            _ => None,
        })
        .collect();
    assert_eq!(
        passed,
        btreeset! {
            ("fast".to_owned(), "chrome".to_owned()),
            ("late".to_owned(), "chrome".to_owned()),
            ("slow".to_owned(), "firefox".to_owned()),
        }
    );
    Ok(())
}

#[tokio::test]
async fn init_creates_one_pool_and_starts_workers_up_front() -> Result<()> {
    init_tracing();
    let listener = RecordingListener::new();
    let pool_factory = Arc::new(FakePoolFactory::default());
    let spawner = Arc::new(FakeWorkerSpawner::passing());
    let mut config = config(&["chrome"], 0);
    config.set_workers(browsertest_runner::config::elements::WorkerCount::Count(2));
    let runner = builder(&listener).build(config, pool_factory.clone(), spawner.clone());

    runner.init();
    runner.init();
    assert_eq!(pool_factory.created(), 1);

    let stats = runner.run(collection(&[("chrome", "only")])).await?;

    assert_eq!(stats.passed, 1);
    assert_eq!(pool_factory.created(), 1, "run reuses the pool from init");
    assert_eq!(spawner.spawned(), 2, "every worker starts before tests are dispatched");
    let names = listener.names();
    let first_worker = names.iter().position(|name| *name == "NEW_WORKER_PROCESS");
    let begin = names.iter().position(|name| *name == "BEGIN");
    ensure!(
        first_worker.is_some() && first_worker < begin,
        "workers must start before BEGIN: {names:?}"
    );
    assert_eq!(
        names.iter().filter(|name| **name == "NEW_WORKER_PROCESS").count(),
        2
    );
    Ok(())
}
