//! Run orchestration
//!
//! Drives each run through `initializing -> preparing -> executing ->
//! finalizing -> completed | failed`, with `cancelled` reachable from any
//! non-terminal phase. Every pipeline runs as its own task; the registry's
//! compare-and-set writes decide which terminal state sticks.

use crate::config::RunnerConfig;
use crate::driver::{Invocation, ProcessDriver, ProcessEvent};
use crate::scratch::ScratchStore;
use crate::state::RunRegistry;
use chrono::Utc;
use runwright_common::{
    parse_report, validate_agents, validate_url, Agent, Error, OutcomeStatus, ParseContext,
    ParsedReport, Phase, Report, ReportSource, Result, Run, RunId, RunStatus, Summary,
    TestOutcome,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PREPARING_PROGRESS: u8 = 10;
const EXECUTING_PROGRESS: u8 = 30;
const FINALIZING_PROGRESS: u8 = 95;

/// Result of a report lookup on a known run
#[derive(Debug, Clone)]
pub enum ReportLookup {
    Ready(Report),
    /// Run has not reached a terminal phase yet
    Pending,
    /// Run is terminal but carries no report
    Missing,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDebug {
    pub run: Run,
    pub has_report: bool,
    pub has_process: bool,
    pub scratch_file: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnknownRun {
    pub error: String,
    pub run_id: RunId,
    pub known_run_ids: Vec<RunId>,
}

/// Diagnostic view of a run id
#[derive(Debug, Clone)]
pub enum DebugSnapshot {
    Known(RunDebug),
    Unknown(UnknownRun),
}

struct Inner {
    registry: RunRegistry,
    driver: ProcessDriver,
    scratch: ScratchStore,
    runner: RunnerConfig,
}

/// Owns every run of this daemon
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(runner: RunnerConfig) -> Self {
        let scratch = ScratchStore::new(runner.tests_path(), runner.screenshot_dir.clone());
        Self {
            inner: Arc::new(Inner {
                registry: RunRegistry::new(),
                driver: ProcessDriver::new(),
                scratch,
                runner,
            }),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.inner.registry
    }

    pub fn runner(&self) -> &RunnerConfig {
        &self.inner.runner
    }

    /// Validate a request, register the run and start its pipeline.
    ///
    /// Must be called from within a Tokio runtime. Returns as soon as the
    /// run is registered.
    pub fn submit(&self, url: &str, agents: Option<&[String]>) -> Result<RunId> {
        let url = validate_url(url)?;
        let agents = validate_agents(agents)?;

        let id = self.inner.registry.create(url.clone(), agents.clone());
        info!(
            "Run {} submitted for {} on [{}]",
            id,
            url,
            agents.iter().map(Agent::as_str).collect::<Vec<_>>().join(", ")
        );

        let this = self.clone();
        let pipeline_url = url.clone();
        self.spawn_supervised(id, url, async move {
            this.drive(id, pipeline_url, agents).await;
        });

        Ok(id)
    }

    /// Register a run that completes immediately with a mock report.
    pub fn simulate(&self, url: &str) -> Result<RunId> {
        let url = validate_url(url)?;

        let mut run = Run::new(url.clone(), Agent::ALL.to_vec());
        run.phase = Phase::Completed;
        run.progress = 100;
        run.completed = true;
        run.report = Some(Report {
            summary: Summary::new(1, 0, 1000),
            tests: vec![TestOutcome {
                title: "Mock URL Visit Test".to_string(),
                agent: None,
                status: OutcomeStatus::Passed,
                duration: 1000,
                error: None,
            }],
            url,
            timestamp: Utc::now(),
        });

        let id = self.inner.registry.insert(run);
        info!("Simulated run {} registered", id);
        Ok(id)
    }

    pub fn status(&self, id: &RunId) -> Result<RunStatus> {
        self.inner
            .registry
            .get(id)
            .map(|run| run.status())
            .ok_or_else(|| Error::not_found(id))
    }

    pub fn report(&self, id: &RunId) -> Result<ReportLookup> {
        let run = self
            .inner
            .registry
            .get(id)
            .ok_or_else(|| Error::not_found(id))?;

        Ok(match (run.completed, run.report) {
            (false, _) => ReportLookup::Pending,
            (true, Some(report)) => ReportLookup::Ready(report),
            (true, None) => {
                error!("Run {} is {} without a report", id, run.phase);
                ReportLookup::Missing
            }
        })
    }

    /// Cancel a running run.
    ///
    /// The cancelled state is written before the process is signalled, so a
    /// pipeline finishing concurrently always loses.
    pub async fn cancel(&self, id: &RunId) -> Result<()> {
        let inner = &self.inner;
        let run = inner.registry.get(id).ok_or_else(|| Error::not_found(id))?;

        inner
            .registry
            .finalize(id, Phase::Cancelled, Report::cancelled(&run.url))?;
        info!("Run {} cancelled during {}", id, run.phase);

        if let Some(handle) = inner.registry.take_process(id) {
            inner.driver.terminate(&handle);
        }
        inner.scratch.remove(id).await;
        Ok(())
    }

    /// Drop a terminal run and anything it left on disk.
    pub async fn evict(&self, id: &RunId) -> Result<Run> {
        let inner = &self.inner;
        let run = inner.registry.get(id).ok_or_else(|| Error::not_found(id))?;
        if !run.phase.is_terminal() {
            return Err(Error::StillRunning { id: *id });
        }

        inner.scratch.remove(id).await;
        let run = inner.registry.remove(id).ok_or_else(|| Error::not_found(id))?;
        info!("Run {} evicted", id);
        Ok(run)
    }

    pub fn debug(&self, id: &RunId) -> DebugSnapshot {
        let registry = &self.inner.registry;
        match registry.get(id) {
            Some(run) => DebugSnapshot::Known(RunDebug {
                has_report: run.report.is_some(),
                has_process: registry.has_process(id),
                scratch_file: self.inner.scratch.path_for(id).display().to_string(),
                run,
            }),
            None => DebugSnapshot::Unknown(UnknownRun {
                error: "Test run not found".to_string(),
                run_id: *id,
                known_run_ids: registry.ids(),
            }),
        }
    }

    /// Signal every live test process. Used on daemon shutdown.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        for id in inner.registry.ids() {
            if let Some(handle) = inner.registry.take_process(&id) {
                inner.driver.terminate(&handle);
            }
        }
    }

    async fn drive(&self, id: RunId, url: String, agents: Vec<Agent>) {
        let inner = &self.inner;

        let outcome = match self.execute(id, &url, &agents).await {
            Ok(parsed) => {
                let phase = match parsed.source {
                    ReportSource::NoOutput => Phase::Failed,
                    _ => Phase::Completed,
                };
                Some((phase, parsed.report))
            }
            Err(Error::AlreadyTerminal { phase, .. }) => {
                debug!("Run {} already {}, pipeline stopped", id, phase);
                None
            }
            Err(Error::NotFound { .. }) => {
                debug!("Run {} evicted, pipeline stopped", id);
                None
            }
            Err(e) => {
                error!("Run {} failed: {}", id, e);
                Some((
                    Phase::Failed,
                    Report::failure(&url, "Test Setup Error", e.to_string()),
                ))
            }
        };

        if let Some((phase, report)) = outcome {
            let (passed, failed) = (report.summary.passed, report.summary.failed);
            match inner.registry.finalize(&id, phase, report) {
                Ok(()) => info!(
                    "Run {} {} ({} passed, {} failed)",
                    id, phase, passed, failed
                ),
                Err(Error::AlreadyTerminal { phase: winner, .. }) => {
                    debug!("Run {} already {}, discarding {} result", id, winner, phase)
                }
                Err(e) => warn!("Run {} could not be finalized: {}", id, e),
            }
        }

        self.release(&id).await;
    }

    /// Run `pipeline` as its own task. A panic inside it fails the run
    /// instead of leaving it non-terminal.
    fn spawn_supervised<F>(&self, id: RunId, url: String, pipeline: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(pipeline);
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = task.await {
                error!("Run {} pipeline task aborted: {}", id, e);
                this.recover(id, &url, e.to_string()).await;
            }
        });
    }

    async fn recover(&self, id: RunId, url: &str, reason: String) {
        let report = Report::failure(
            url,
            "Test Setup Error",
            format!("pipeline task failed: {}", reason),
        );
        match self.inner.registry.finalize(&id, Phase::Failed, report) {
            Ok(()) => info!("Run {} failed after pipeline fault", id),
            Err(Error::AlreadyTerminal { phase, .. }) => {
                debug!("Run {} already {}, nothing to recover", id, phase)
            }
            Err(e) => warn!("Run {} could not be finalized: {}", id, e),
        }
        self.release(&id).await;
    }

    /// Signal the run's process, if any, and drop its scratch file.
    async fn release(&self, id: &RunId) {
        let inner = &self.inner;
        if let Some(handle) = inner.registry.take_process(id) {
            inner.driver.terminate(&handle);
        }
        inner.scratch.remove(id).await;
    }

    async fn execute(&self, id: RunId, url: &str, agents: &[Agent]) -> Result<ParsedReport> {
        let inner = &self.inner;
        let started_at = Utc::now();

        inner
            .registry
            .advance(&id, Phase::Preparing, PREPARING_PROGRESS)?;
        inner.scratch.write(&id, url).await?;

        inner
            .registry
            .advance(&id, Phase::Executing, EXECUTING_PROGRESS)?;
        let invocation = Invocation::for_run(&inner.runner, &ScratchStore::file_name(&id), agents);
        let mut process = inner.driver.start(id, &invocation)?;

        if let Err(e) = inner.registry.attach_process(&id, process.handle().clone()) {
            // Cancelled between spawn and attach; nobody else will stop it.
            inner.driver.terminate(process.handle());
            if let Err(wait_err) = process.wait().await {
                debug!("Run {} orphaned process: {}", id, wait_err);
            }
            return Err(e);
        }

        let (step, cap) = (inner.runner.progress_step, inner.runner.progress_cap);
        while let Some(event) = process.next_event().await {
            match event {
                ProcessEvent::Stdout { bytes } => {
                    if let Some(progress) = inner.registry.nudge_progress(&id, step, cap) {
                        debug!("Run {} received {} bytes, progress {}%", id, bytes, progress);
                    }
                }
            }
        }

        let output = process.wait().await?;
        inner.registry.take_process(&id);

        inner
            .registry
            .advance(&id, Phase::Finalizing, FINALIZING_PROGRESS)?;

        Ok(parse_report(
            &output.stdout,
            &output.stderr,
            &ParseContext {
                url,
                exit_code: output.exit_code,
                started_at,
                finished_at: Utc::now(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(RunnerConfig::default())
    }

    #[test]
    fn test_invalid_submit_creates_nothing() {
        let orch = orchestrator();

        let err = orch.submit("example.com", None).unwrap_err();
        assert!(err.to_string().contains("scheme"));

        let err = orch.submit("ftp://example.com", None).unwrap_err();
        assert!(err.to_string().contains("ftp"));

        let empty: &[String] = &[];
        assert!(matches!(
            orch.submit("https://example.com", Some(empty)),
            Err(Error::Validation(_))
        ));

        assert!(orch.registry().is_empty());
    }

    #[test]
    fn test_simulate_completes_immediately() {
        let orch = orchestrator();
        let id = orch.simulate("https://example.com").unwrap();

        let status = orch.status(&id).unwrap();
        assert_eq!(status.phase, Phase::Completed);
        assert_eq!(status.progress, 100);
        assert!(status.completed);

        match orch.report(&id).unwrap() {
            ReportLookup::Ready(report) => {
                assert_eq!(report.summary.passed, 1);
                assert_eq!(report.summary.total, 1);
                assert_eq!(report.tests[0].title, "Mock URL Visit Test");
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
    }

    #[test]
    fn test_report_pending_and_missing() {
        let orch = orchestrator();
        let id = orch
            .registry()
            .create("https://example.com".to_string(), vec![Agent::Firefox]);
        assert!(matches!(orch.report(&id).unwrap(), ReportLookup::Pending));

        let mut broken = Run::new("https://example.com".to_string(), vec![Agent::Firefox]);
        broken.phase = Phase::Completed;
        broken.completed = true;
        let broken_id = orch.registry().insert(broken);
        assert!(matches!(orch.report(&broken_id).unwrap(), ReportLookup::Missing));

        assert!(matches!(
            orch.report(&RunId::new()),
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipeline_panic_fails_run() {
        let orch = orchestrator();
        let url = "https://example.com".to_string();
        let id = orch.registry().create(url.clone(), vec![Agent::Chromium]);

        orch.spawn_supervised(id, url, async {
            panic!("pipeline fault");
        });

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                let status = orch.status(&id).unwrap();
                if status.completed {
                    return status;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("run never left its non-terminal phase");
        assert_eq!(status.phase, Phase::Failed);

        match orch.report(&id).unwrap() {
            ReportLookup::Ready(report) => {
                assert_eq!(report.tests[0].title, "Test Setup Error");
                let error = report.tests[0].error.clone().unwrap();
                assert!(error.contains("pipeline task failed"));
                assert_eq!(report.summary.failed, 1);
            }
            other => panic!("unexpected lookup: {:?}", other),
        }
        assert!(!orch.registry().has_process(&id));
    }

    #[tokio::test]
    async fn test_cancel_lookup_errors() {
        let orch = orchestrator();
        assert!(matches!(
            orch.cancel(&RunId::new()).await,
            Err(Error::NotFound { .. })
        ));

        let id = orch.simulate("https://example.com").unwrap();
        assert!(matches!(
            orch.cancel(&id).await,
            Err(Error::AlreadyTerminal { .. })
        ));
    }

    #[tokio::test]
    async fn test_evict_only_terminal_runs() {
        let orch = orchestrator();
        let running = orch
            .registry()
            .create("https://example.com".to_string(), vec![Agent::Webkit]);
        assert!(matches!(
            orch.evict(&running).await,
            Err(Error::StillRunning { .. })
        ));

        let done = orch.simulate("https://example.com").unwrap();
        orch.evict(&done).await.unwrap();
        assert!(matches!(orch.status(&done), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_debug_unknown_lists_known_ids() {
        let orch = orchestrator();
        let id = orch.simulate("https://example.com").unwrap();

        match orch.debug(&RunId::new()) {
            DebugSnapshot::Unknown(unknown) => assert_eq!(unknown.known_run_ids, vec![id]),
            DebugSnapshot::Known(_) => panic!("unexpected run"),
        }
        match orch.debug(&id) {
            DebugSnapshot::Known(snapshot) => {
                assert!(snapshot.has_report);
                assert!(!snapshot.has_process);
            }
            DebugSnapshot::Unknown(_) => panic!("run should be known"),
        }
    }
}
