//! Run lifecycle tests against a stand-in test executable
#![cfg(unix)]

use runwright_common::{Error, OutcomeStatus, Phase, Report, RunId, RunStatus};
use runwright_daemon::{Orchestrator, ReportLookup, RunnerConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

const PASSING_JSON: &str = r#"{"stats":{"expected":1,"unexpected":0,"duration":42.4},"suites":[{"title":"dynamic.spec.js","suites":[{"title":"URL Visit Verification","specs":[{"title":"should successfully visit and verify the URL","tests":[{"projectName":"chromium","results":[{"status":"passed","duration":40}]}]}]}]}]}"#;

/// Runner configuration executing `body` as a shell script inside `dir`.
fn fake_runner(dir: &Path, body: &str) -> RunnerConfig {
    let script = dir.join("fake-runner.sh");
    std::fs::write(&script, body).unwrap();

    RunnerConfig {
        program: Some("sh".to_string()),
        args: vec![script.display().to_string()],
        workspace_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn scratch_file(dir: &Path, id: &RunId) -> PathBuf {
    dir.join("tests").join(format!("dynamic-{}.spec.js", id))
}

async fn wait_terminal(orch: &Orchestrator, id: &RunId) -> RunStatus {
    timeout(Duration::from_secs(20), async {
        loop {
            let status = orch.status(id).unwrap();
            if status.completed {
                return status;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("run did not finish in time")
}

/// Waits until the pipeline has released its process and scratch file.
async fn wait_cleaned_up(orch: &Orchestrator, dir: &Path, id: &RunId) {
    timeout(Duration::from_secs(20), async {
        while orch.registry().has_process(id) || scratch_file(dir, id).exists() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline did not clean up in time")
}

fn ready_report(orch: &Orchestrator, id: &RunId) -> Report {
    match orch.report(id).unwrap() {
        ReportLookup::Ready(report) => report,
        other => panic!("expected a report, got {:?}", other),
    }
}

#[tokio::test]
async fn structured_report_completes_run() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(
        tmp.path(),
        &format!(
            "printf '%s\\n' \"$@\" > args.txt\ncat <<'JSON'\n{}\nJSON\n",
            PASSING_JSON
        ),
    );
    let orch = Orchestrator::new(runner);

    let id = orch
        .submit("https://example.com", Some(&["chromium".to_string()]))
        .unwrap();

    let status = wait_terminal(&orch, &id).await;
    assert_eq!(status.phase, Phase::Completed);
    assert_eq!(status.progress, 100);

    let report = ready_report(&orch, &id);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.total, 1);
    assert_eq!(report.summary.duration, "42ms");
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].agent.as_deref(), Some("chromium"));
    assert_eq!(report.url, "https://example.com");

    wait_cleaned_up(&orch, tmp.path(), &id).await;

    let args = std::fs::read_to_string(tmp.path().join("args.txt")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(
        args,
        vec![
            format!("dynamic-{}.spec.js", id).as_str(),
            "--reporter=json",
            "--project=chromium",
        ]
    );
}

#[tokio::test]
async fn structured_report_wins_over_exit_code() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(
        tmp.path(),
        &format!("cat <<'JSON'\n{}\nJSON\nexit 1\n", PASSING_JSON),
    );
    let orch = Orchestrator::new(runner);

    let id = orch.submit("https://example.com", None).unwrap();
    let status = wait_terminal(&orch, &id).await;

    assert_eq!(status.phase, Phase::Completed);
    assert!(!ready_report(&orch, &id).has_failures());
}

#[tokio::test]
async fn progress_never_decreases() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(
        tmp.path(),
        "for i in 1 2 3 4 5; do echo \"✓ step $i\"; sleep 0.05; done\n",
    );
    let orch = Orchestrator::new(runner);

    let id = orch.submit("https://example.com", None).unwrap();

    let mut last = 0;
    loop {
        let status = orch.status(&id).unwrap();
        assert!(status.progress >= last, "{} < {}", status.progress, last);
        last = status.progress;
        if !status.completed {
            assert!(status.progress <= 95);
        } else {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, 100);

    let report = ready_report(&orch, &id);
    assert_eq!(report.summary.passed, 5);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].status, OutcomeStatus::Passed);
}

#[tokio::test]
async fn silent_failure_ends_run_failed() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(tmp.path(), "echo 'browser not installed' >&2\nexit 1\n");
    let orch = Orchestrator::new(runner);

    let id = orch.submit("https://example.com", None).unwrap();
    let status = wait_terminal(&orch, &id).await;
    assert_eq!(status.phase, Phase::Failed);

    let report = ready_report(&orch, &id);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(report.tests[0].status, OutcomeStatus::Failed);
    let error = report.tests[0].error.as_deref().unwrap();
    assert!(error.contains("no output"), "{}", error);
    assert!(error.contains("exit code: 1"), "{}", error);

    wait_cleaned_up(&orch, tmp.path(), &id).await;
}

#[tokio::test]
async fn missing_executable_fails_run() {
    let tmp = TempDir::new().unwrap();
    let runner = RunnerConfig {
        program: Some(tmp.path().join("no-such-runner").display().to_string()),
        args: vec![],
        workspace_dir: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let orch = Orchestrator::new(runner);

    let id = orch.submit("https://example.com", None).unwrap();
    let status = wait_terminal(&orch, &id).await;
    assert_eq!(status.phase, Phase::Failed);
    assert_eq!(status.progress, 100);

    let report = ready_report(&orch, &id);
    assert_eq!(report.tests[0].title, "Test Setup Error");
    assert_eq!(report.summary.total, 1);

    wait_cleaned_up(&orch, tmp.path(), &id).await;
}

#[tokio::test]
async fn cancel_running_process() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(tmp.path(), "echo started\nexec sleep 30\n");
    let orch = Orchestrator::new(runner);

    let id = orch.submit("https://example.com", None).unwrap();

    timeout(Duration::from_secs(20), async {
        while !orch.registry().has_process(&id) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("process never attached");

    orch.cancel(&id).await.unwrap();

    let status = orch.status(&id).unwrap();
    assert_eq!(status.phase, Phase::Cancelled);
    assert_eq!(status.progress, 100);
    assert!(status.completed);

    assert!(matches!(
        orch.cancel(&id).await,
        Err(Error::AlreadyTerminal { .. })
    ));

    wait_cleaned_up(&orch, tmp.path(), &id).await;

    // Pipeline has observed the exit by now and must not overwrite.
    sleep(Duration::from_millis(200)).await;
    let report = ready_report(&orch, &id);
    assert!(report.is_cancelled());
    assert_eq!(report.summary.total, 0);
    assert_eq!(report.tests.len(), 1);
    assert_eq!(orch.status(&id).unwrap().phase, Phase::Cancelled);
}

#[tokio::test]
async fn cancel_racing_completion_is_coherent() {
    let tmp = TempDir::new().unwrap();
    let runner = fake_runner(
        tmp.path(),
        &format!("cat <<'JSON'\n{}\nJSON\n", PASSING_JSON),
    );
    let orch = Orchestrator::new(runner);

    for _ in 0..10 {
        let id = orch.submit("https://example.com", None).unwrap();
        sleep(Duration::from_millis(5)).await;
        let _ = orch.cancel(&id).await;

        let status = wait_terminal(&orch, &id).await;
        wait_cleaned_up(&orch, tmp.path(), &id).await;
        sleep(Duration::from_millis(20)).await;

        let report = ready_report(&orch, &id);
        match orch.status(&id).unwrap().phase {
            Phase::Cancelled => {
                assert!(report.is_cancelled());
                assert_eq!(report.summary.passed, 0);
                assert_eq!(report.summary.total, 0);
            }
            Phase::Completed => {
                assert!(!report.is_cancelled());
                assert_eq!(report.summary.passed, 1);
            }
            other => panic!("unexpected terminal phase {} ({:?})", other, status),
        }
    }
}

#[tokio::test]
async fn rejected_submissions_leave_registry_untouched() {
    let tmp = TempDir::new().unwrap();
    let orch = Orchestrator::new(fake_runner(tmp.path(), "exit 0\n"));

    let empty: &[String] = &[];
    assert!(orch.submit("https://example.com", Some(empty)).is_err());
    assert!(orch
        .submit("https://example.com", Some(&["safari".to_string()]))
        .is_err());
    assert!(orch.submit("javascript:alert(1)", None).is_err());
    assert!(orch.submit("", None).is_err());

    assert!(orch.registry().is_empty());
    assert!(!tmp.path().join("tests").exists());
}
