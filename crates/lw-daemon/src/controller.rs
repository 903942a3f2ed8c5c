use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lw_bridge::{tracking_script, EventBus, ExternalEventReceiver, LiveEvent, Notification};
use lw_core::config::{AutoCommit, ConfigError, LiveConfig, ProcessCommand};
use lw_core::file_watcher::{FileWatcher, FileWatcherConfig};
use lw_core::types::{Issue, Severity, Signal, SignalPayload, SignalSource};
use lw_harness::{CircuitState, ShutdownGuard, ShutdownListener, ShutdownSignal};
use lw_intelligence::{AnthropicProvider, Analysis, Classifier, DeepAnalyzer, DeepOutcome, LlmProvider};
use lw_remediation::{FixError, FixPreview, FixRecord, FixRequest, FixResult, RemediationEngine, UndoResult};
use lw_session::{ProcessError, ProcessOutputMonitor, ProcessStatus, TestResult, TestRunner, TestScope, TestStats};
use lw_telemetry::{MetricsCollector, MetricsSnapshot};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::git::{CommitOutcome, GitCommitter};
use crate::network_tracker::{normalize_endpoint, NetworkReport, NetworkStats, NetworkTracker};
use crate::performance::{BuildTiming, BundleSnapshot, PerformanceError, PerformanceMonitor, PerformanceReport};
use crate::readiness::{DeploymentChecker, ReadinessReport};
use crate::scheduler::{EnqueueOutcome, NotificationScheduler, SchedulerStatus};
use crate::session_logger::{Activity, SessionError, SessionLogger, SessionSummary};

/// How long deactivation waits for the pipeline tasks before aborting them.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveState {
    Inactive,
    Activating,
    Active,
    Deactivating,
}

impl LiveState {
    pub fn as_str(self) -> &'static str {
        match self {
            LiveState::Inactive => "inactive",
            LiveState::Activating => "activating",
            LiveState::Active => "active",
            LiveState::Deactivating => "deactivating",
        }
    }
}

impl fmt::Display for LiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LiveState,
    },

    #[error("no adapter could be started")]
    NothingStarted { components: Vec<ComponentReport> },

    #[error("live mode is not active")]
    NotActive,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fix(#[from] FixError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub name: String,
    pub started: bool,
    pub detail: String,
}

impl ComponentReport {
    fn started(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: true,
            detail: detail.into(),
        }
    }

    fn failed(name: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            started: false,
            detail: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivationReport {
    pub success: bool,
    pub session_id: String,
    pub components: Vec<ComponentReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeactivationReport {
    pub success: bool,
    pub session: SessionSummary,
    pub report_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub error: Option<String>,
    /// Commits made for this session's fixes when auto-commit is
    /// `session_end`.
    pub commits: Vec<CommitOutcome>,
}

/// Point-in-time snapshot returned by [`LiveController::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct LiveStatus {
    pub state: LiveState,
    pub project_dir: PathBuf,
    pub session: Option<SessionSummary>,
    pub watched_paths: Vec<PathBuf>,
    pub receiver: Option<SocketAddr>,
    pub processes: Vec<ProcessStatus>,
    pub queue: SchedulerStatus,
    pub network: NetworkStats,
    pub tests: TestStats,
    pub metrics: MetricsSnapshot,
    /// Breaker state of the deep-analysis collaborator, if one is configured.
    pub deep_analysis: Option<CircuitState>,
}

/// Everything owned by one activation.
struct Running {
    session: Arc<SessionLogger>,
    watcher: Option<FileWatcher>,
    receiver: Option<ExternalEventReceiver>,
    processes: ProcessOutputMonitor,
    shutdown: ShutdownSignal,
    tasks: Vec<JoinHandle<()>>,
    signal_tx: flume::Sender<Signal>,
}

/// State shared by the pipeline and ticker tasks of one activation.
struct Pipeline {
    scheduler: Arc<Mutex<NotificationScheduler>>,
    network: Arc<NetworkTracker>,
    classifier: Classifier,
    session: Arc<SessionLogger>,
    metrics: Arc<MetricsCollector>,
    bus: EventBus,
    deep: Option<Arc<DeepAnalyzer>>,
    deep_reports: Arc<Mutex<HashMap<String, Analysis>>>,
    shutdown: ShutdownSignal,
    wake: Notify,
    slow_request_ms: u64,
}

impl Pipeline {
    fn scheduler(&self) -> MutexGuard<'_, NotificationScheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take the one-time endpoint snapshot off the async workers.
    async fn scan_endpoints(&self) {
        if self.network.is_scanned() {
            return;
        }
        let network = Arc::clone(&self.network);
        if let Err(e) = tokio::task::spawn_blocking(move || {
            network.inventory();
        })
        .await
        {
            warn!(error = %e, "endpoint scan task failed");
        }
    }

    fn handle(self: &Arc<Self>, signal: Signal) {
        self.metrics
            .increment_labeled("signals_total", &signal.source.to_string());

        let issues = match &signal.payload {
            SignalPayload::HttpCall(call) => {
                let failed = call.error.is_some() || call.status.is_some_and(|s| s >= 400);
                let slow = call.duration_ms.is_some_and(|d| d > self.slow_request_ms);
                self.session.log(Activity::ApiCall {
                    method: call.method.to_uppercase(),
                    endpoint: normalize_endpoint(&call.url),
                    status: call.status,
                    failed,
                    slow,
                });
                self.network.track(call)
            }
            SignalPayload::Text(_) => {
                if signal.source == SignalSource::Filesystem {
                    if let Some(file) = &signal.file {
                        self.session.log(Activity::FileModified { file: file.clone() });
                        self.scheduler().record_change();
                    }
                }
                self.classifier.classify(&signal)
            }
        };
        if issues.is_empty() {
            return;
        }

        for issue in &issues {
            self.metrics
                .increment_labeled("issues_total", issue.severity.as_str());
            self.session.log(Activity::IssueDetected {
                issue_type: issue.issue_type,
                severity: issue.severity,
                file: issue.file.clone(),
            });
            match self.scheduler().enqueue(issue.clone()) {
                EnqueueOutcome::Urgent => self.wake.notify_one(),
                EnqueueOutcome::Suppressed => {
                    self.metrics.increment("notifications_suppressed");
                    self.session
                        .log(Activity::NotificationSuppressed { count: 1 });
                }
                EnqueueOutcome::Queued | EnqueueOutcome::Passive => {}
            }
        }

        if signal.source == SignalSource::Filesystem && DeepAnalyzer::should_refine(&issues) {
            if let (Some(file), SignalPayload::Text(content)) = (&signal.file, &signal.payload) {
                self.spawn_deep_analysis(file.clone(), content.clone(), issues);
            }
        }
    }

    /// Tier 2 runs off the pipeline task. A result arriving after shutdown
    /// is dropped.
    fn spawn_deep_analysis(self: &Arc<Self>, file: String, content: String, issues: Vec<Issue>) {
        let Some(analyzer) = self.deep.clone() else {
            return;
        };
        let ctx = Arc::clone(self);
        let mut listener = self.shutdown.listener();
        tokio::spawn(async move {
            let analysis = tokio::select! {
                _ = listener.wait() => {
                    debug!(file = %file, "deep analysis discarded at shutdown");
                    return;
                }
                analysis = analyzer.refine(&file, &content, issues) => analysis,
            };
            ctx.record_analysis(analysis);
        });
    }

    fn record_analysis(&self, analysis: Analysis) {
        let status = match &analysis.deep {
            DeepOutcome::Skipped => "skipped",
            DeepOutcome::Refined { report } => {
                if !report.recommended_fixes.is_empty() {
                    self.session.log(Activity::ImprovementsSuggested {
                        file: analysis.file.clone(),
                        count: report.recommended_fixes.len() as u64,
                    });
                }
                "refined"
            }
            DeepOutcome::Fallback { reason } => {
                debug!(file = %analysis.file, reason = %reason, "deep analysis fell back to tier 1");
                "fallback"
            }
        };
        self.metrics.increment_labeled("deep_analysis_total", status);
        let file = analysis.file.clone();
        // Stored before the event goes out, so subscribers can read it.
        self.deep_reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file.clone(), analysis);
        self.bus.publish(LiveEvent::DeepAnalysis {
            file,
            status: status.to_string(),
        });
    }

    fn flush(&self) {
        let flush = self.scheduler().flush();
        if flush.suppressed > 0 {
            debug!(count = flush.suppressed, "queued issues suppressed at flush");
            self.metrics.increment("notifications_suppressed");
            self.session.log(Activity::NotificationSuppressed {
                count: flush.suppressed as u64,
            });
        }
        for notification in flush.notifications {
            self.show(notification);
        }
    }

    fn show(&self, notification: Notification) {
        let summary = notification.summary();
        self.metrics
            .increment_labeled("notifications_shown", notification.severity().as_str());
        self.session.log(Activity::NotificationShown { summary });
        self.bus.publish(LiveEvent::Notification(notification));
    }
}

async fn run_pipeline(
    ctx: Arc<Pipeline>,
    signals: flume::Receiver<Signal>,
    mut shutdown: ShutdownListener,
    _drained: ShutdownGuard,
) {
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            received = signals.recv_async() => match received {
                Ok(signal) => {
                    if matches!(signal.payload, SignalPayload::HttpCall(_)) {
                        ctx.scan_endpoints().await;
                    }
                    ctx.handle(signal)
                }
                Err(_) => break,
            },
        }
    }
    debug!("signal pipeline stopped");
}

async fn run_ticker(ctx: Arc<Pipeline>, tick: Duration, mut shutdown: ShutdownListener, _drained: ShutdownGuard) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = interval.tick() => {}
            _ = ctx.wake.notified() => {}
        }
        ctx.flush();
    }
    debug!("notification ticker stopped");
}

/// Owns every adapter and drives the live-mode lifecycle
/// `inactive -> activating -> active -> deactivating -> inactive`.
///
/// The remediation engine, network tracker and test runner outlive a single
/// activation; adapters, the session and the scheduler queues are created
/// fresh on each [`activate`](Self::activate).
pub struct LiveController {
    project_dir: PathBuf,
    config: LiveConfig,
    state: Mutex<LiveState>,
    runtime: tokio::sync::Mutex<Option<Running>>,
    bus: EventBus,
    metrics: Arc<MetricsCollector>,
    scheduler: Arc<Mutex<NotificationScheduler>>,
    network: Arc<NetworkTracker>,
    remediation: Arc<RemediationEngine>,
    tests: TestRunner,
    git: GitCommitter,
    performance: Arc<PerformanceMonitor>,
    deep: Option<Arc<DeepAnalyzer>>,
    deep_reports: Arc<Mutex<HashMap<String, Analysis>>>,
}

impl LiveController {
    /// Build a controller from an explicit config. The config is used as-is.
    pub fn new(project_dir: impl Into<PathBuf>, config: LiveConfig) -> Result<Self, ControllerError> {
        let project_dir = project_dir.into();
        let remediation = RemediationEngine::new(&project_dir, &config.remediation)?;
        let deep = if config.classifier.deep_analysis {
            AnthropicProvider::from_env(Duration::from_secs(config.classifier.deep_timeout_secs)).map(
                |provider| Arc::new(DeepAnalyzer::new(Arc::new(provider), &config.classifier)),
            )
        } else {
            None
        };
        if deep.is_none() {
            debug!("deep analysis disabled");
        }

        Ok(Self {
            network: Arc::new(NetworkTracker::new(&project_dir, &config.network)),
            tests: TestRunner::new(&project_dir, &config.tests),
            git: GitCommitter::new(&project_dir, Duration::from_secs(config.remediation.git_timeout_secs)),
            performance: Arc::new(PerformanceMonitor::new(
                &project_dir,
                config.network.frontend_dir.clone(),
                &config.performance,
            )),
            scheduler: Arc::new(Mutex::new(NotificationScheduler::new(config.scheduler.clone()))),
            remediation: Arc::new(remediation),
            state: Mutex::new(LiveState::Inactive),
            runtime: tokio::sync::Mutex::new(None),
            bus: EventBus::new(),
            metrics: Arc::new(MetricsCollector::new()),
            deep,
            deep_reports: Arc::new(Mutex::new(HashMap::new())),
            project_dir,
            config,
        })
    }

    /// Load `<project>/.live/config.toml` (or defaults) and build a controller.
    pub fn open(project_dir: impl Into<PathBuf>) -> Result<Self, ControllerError> {
        let project_dir = project_dir.into();
        let config = LiveConfig::load(&project_dir)?;
        Self::new(project_dir, config)
    }

    /// Use `provider` for Tier-2 deep analysis instead of the environment.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.deep = Some(Arc::new(DeepAnalyzer::new(provider, &self.config.classifier)));
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn config(&self) -> &LiveConfig {
        &self.config
    }

    pub fn state(&self) -> LiveState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: LiveState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
        info!(state = %state, "live mode state changed");
        self.bus.publish(LiveEvent::StateChanged {
            state: state.to_string(),
        });
    }

    fn scheduler(&self) -> MutexGuard<'_, NotificationScheduler> {
        self.scheduler.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state_dir(&self) -> PathBuf {
        self.project_dir.join(&self.config.remediation.state_dir)
    }

    fn adapter_failed(&self, component: &str, error: impl fmt::Display) {
        warn!(component, error = %error, "adapter failed to start");
        self.metrics.increment_labeled("adapter_failures", component);
        self.bus.publish(LiveEvent::AdapterFailed {
            component: component.to_string(),
            error: error.to_string(),
        });
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start every adapter independently. Individual failures disable that
    /// adapter only; the call fails when none could start.
    pub async fn activate(&self) -> Result<ActivationReport, ControllerError> {
        let mut runtime = self.runtime.lock().await;
        let current = self.state();
        if current != LiveState::Inactive {
            return Err(ControllerError::InvalidState {
                operation: "activate",
                state: current,
            });
        }
        self.set_state(LiveState::Activating);

        let (signal_tx, signal_rx) = flume::unbounded();
        let mut components = Vec::new();

        let watcher = self.start_watcher(signal_tx.clone(), &mut components).await;
        let receiver = self.start_receiver(signal_tx.clone(), &mut components).await;
        let processes = ProcessOutputMonitor::new(&self.config.process, signal_tx.clone());
        for command in &self.config.process.commands {
            let name = format!("process:{}", command.name);
            match processes.spawn(command, &self.project_dir) {
                Ok(pid) => components.push(ComponentReport::started(
                    name,
                    pid.map(|p| format!("pid {p}")).unwrap_or_default(),
                )),
                Err(e) => {
                    self.adapter_failed(&name, &e);
                    components.push(ComponentReport::failed(name, e));
                }
            }
        }

        if !components.iter().any(|c| c.started) {
            error!("live mode activation failed: no adapter started");
            self.set_state(LiveState::Inactive);
            return Err(ControllerError::NothingStarted { components });
        }

        let session = Arc::new(SessionLogger::start(&self.state_dir()));
        *self.scheduler() = NotificationScheduler::new(self.config.scheduler.clone());
        let shutdown = ShutdownSignal::new();
        let pipeline = Arc::new(Pipeline {
            scheduler: Arc::clone(&self.scheduler),
            network: Arc::clone(&self.network),
            classifier: Classifier::new(),
            session: Arc::clone(&session),
            metrics: Arc::clone(&self.metrics),
            bus: self.bus.clone(),
            deep: self.deep.clone(),
            deep_reports: Arc::clone(&self.deep_reports),
            shutdown: shutdown.clone(),
            wake: Notify::new(),
            slow_request_ms: self.config.network.slow_request_ms,
        });
        let tasks = vec![
            tokio::spawn(run_pipeline(
                Arc::clone(&pipeline),
                signal_rx,
                shutdown.listener(),
                shutdown.guard(),
            )),
            tokio::spawn(run_ticker(
                pipeline,
                self.config.scheduler.tick(),
                shutdown.listener(),
                shutdown.guard(),
            )),
        ];

        let session_id = session.session_id();
        *runtime = Some(Running {
            session,
            watcher,
            receiver,
            processes,
            shutdown,
            tasks,
            signal_tx,
        });
        self.set_state(LiveState::Active);
        info!(
            session_id = %session_id,
            started = components.iter().filter(|c| c.started).count(),
            total = components.len(),
            "live mode activated"
        );

        Ok(ActivationReport {
            success: true,
            session_id,
            components,
        })
    }

    async fn start_watcher(
        &self,
        sink: flume::Sender<Signal>,
        components: &mut Vec<ComponentReport>,
    ) -> Option<FileWatcher> {
        const NAME: &str = "file_watcher";
        let mut watcher = FileWatcher::new(FileWatcherConfig::from_settings(
            &self.project_dir,
            &self.config.watcher,
        ));
        let started = tokio::task::spawn_blocking(move || {
            let result = watcher.start(sink);
            (watcher, result)
        })
        .await;
        match started {
            Ok((watcher, Ok(paths))) => {
                components.push(ComponentReport::started(
                    NAME,
                    format!("{} directories", paths.len()),
                ));
                Some(watcher)
            }
            Ok((_, Err(e))) => {
                self.adapter_failed(NAME, &e);
                components.push(ComponentReport::failed(NAME, e));
                None
            }
            Err(e) => {
                self.adapter_failed(NAME, &e);
                components.push(ComponentReport::failed(NAME, e));
                None
            }
        }
    }

    async fn start_receiver(
        &self,
        sink: flume::Sender<Signal>,
        components: &mut Vec<ComponentReport>,
    ) -> Option<ExternalEventReceiver> {
        const NAME: &str = "event_receiver";
        let mut receiver = ExternalEventReceiver::new(self.config.receiver.clone());
        match receiver.start(sink).await {
            Ok(addr) => {
                components.push(ComponentReport::started(NAME, addr.to_string()));
                if self.config.receiver.inject_script {
                    self.inject_tracking_script(addr);
                }
                Some(receiver)
            }
            Err(e) => {
                self.adapter_failed(NAME, &e);
                components.push(ComponentReport::failed(NAME, e));
                None
            }
        }
    }

    /// Best-effort; a frontend without an HTML entry point is not an error.
    fn inject_tracking_script(&self, addr: SocketAddr) {
        let mut receiver_config = self.config.receiver.clone();
        receiver_config.port = addr.port();
        let frontend = self.project_dir.join(&self.config.network.frontend_dir);
        match tracking_script::inject(&frontend, &receiver_config) {
            Ok(outcome) => debug!(?outcome, "tracking script injection"),
            Err(e) => warn!(error = %e, "failed to inject tracking script"),
        }
    }

    /// Stop every adapter and archive the session. Returns
    /// [`ControllerError::NotActive`] when there is nothing to stop.
    pub async fn deactivate(&self) -> Result<DeactivationReport, ControllerError> {
        let mut runtime = self.runtime.lock().await;
        let Some(mut running) = runtime.take() else {
            return Err(ControllerError::NotActive);
        };
        self.set_state(LiveState::Deactivating);

        running.shutdown.trigger();
        if let Some(mut watcher) = running.watcher.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || watcher.stop()).await {
                warn!(error = %e, "file watcher did not stop cleanly");
            }
        }
        if let Some(mut receiver) = running.receiver.take() {
            receiver.stop().await;
        }
        running.processes.stop_all().await;
        drop(running.signal_tx);

        let drain = running
            .shutdown
            .wait_for_drain(running.tasks.len(), TASK_DRAIN_TIMEOUT)
            .await;
        if !drain.is_complete() {
            warn!(?drain, "pipeline tasks did not drain in time, aborting");
            for task in &running.tasks {
                task.abort();
            }
        }

        let commits = match self.config.remediation.auto_commit {
            AutoCommit::SessionEnd => self.commit_session_fixes(&running.session).await,
            _ => Vec::new(),
        };

        let report = match running.session.finish() {
            Ok(archive) => DeactivationReport {
                success: true,
                session: archive.summary,
                report_path: Some(archive.report_path),
                archive_path: Some(archive.json_path),
                error: None,
                commits,
            },
            Err(e) => {
                error!(error = %e, "failed to archive session");
                DeactivationReport {
                    success: false,
                    session: running.session.summary(),
                    report_path: None,
                    archive_path: None,
                    error: Some(e.to_string()),
                    commits,
                }
            }
        };
        self.set_state(LiveState::Inactive);
        info!(
            session_id = %report.session.session_id,
            quality_score = report.session.quality_score,
            "live mode deactivated"
        );
        Ok(report)
    }

    pub async fn get_status(&self) -> LiveStatus {
        let runtime = self.runtime.lock().await;
        let running = runtime.as_ref();
        LiveStatus {
            state: self.state(),
            project_dir: self.project_dir.clone(),
            session: running.map(|r| r.session.summary()),
            watched_paths: running
                .and_then(|r| r.watcher.as_ref())
                .map(FileWatcher::watched_paths)
                .unwrap_or_default(),
            receiver: running
                .and_then(|r| r.receiver.as_ref())
                .and_then(ExternalEventReceiver::local_addr),
            processes: running.map(|r| r.processes.status()).unwrap_or_default(),
            queue: self.scheduler().status(),
            network: self.network.stats(),
            tests: self.tests.stats(),
            metrics: self.metrics.snapshot(),
            deep_analysis: self.deep.as_ref().map(|d| d.breaker_state()),
        }
    }

    // ------------------------------------------------------------------
    // Remediation
    // ------------------------------------------------------------------

    pub async fn apply_fix(&self, request: FixRequest) -> FixResult {
        let engine = Arc::clone(&self.remediation);
        let file = request.file.clone();
        let severity = request.severity;
        let result = match tokio::task::spawn_blocking(move || engine.apply(&request)).await {
            Ok(result) => result,
            Err(e) => FixResult {
                success: false,
                fix_id: String::new(),
                file,
                error: Some(format!("fix task failed: {e}")),
                backup_path: None,
                backup_restored: false,
                verified: false,
                undo_available: false,
            },
        };

        let session = self.session().await;
        if result.success {
            self.metrics.increment("fixes_applied");
            if let Some(session) = &session {
                session.log(Activity::FixApplied {
                    fix_id: result.fix_id.clone(),
                    file: result.file.clone(),
                    severity,
                });
            }
            self.bus.publish(LiveEvent::FixApplied {
                fix_id: result.fix_id.clone(),
                file: result.file.clone(),
            });
            if self.config.remediation.auto_commit == AutoCommit::AfterFix {
                if let Some(record) = self.remediation.record(&result.fix_id) {
                    match self.git.commit_fix(&record).await {
                        Ok(commit) => self.announce_commit(commit),
                        Err(e) => warn!(fix_id = %result.fix_id, error = %e, "auto-commit failed"),
                    }
                }
            }
        } else {
            let error = result.error.clone().unwrap_or_default();
            self.metrics.increment("fixes_failed");
            if let Some(session) = &session {
                session.log(Activity::FixFailed {
                    file: result.file.clone(),
                    error: error.clone(),
                });
            }
            self.bus.publish(LiveEvent::FixFailed {
                file: result.file.clone(),
                error,
                backup_restored: result.backup_restored,
            });
        }
        result
    }

    /// What `request` would change, without applying it.
    pub async fn preview_fix(&self, request: FixRequest) -> Result<FixPreview, ControllerError> {
        let engine = Arc::clone(&self.remediation);
        match tokio::task::spawn_blocking(move || engine.preview(&request)).await {
            Ok(preview) => Ok(preview?),
            Err(e) => Err(FixError::Io(std::io::Error::other(format!("preview task failed: {e}"))).into()),
        }
    }

    fn announce_commit(&self, commit: CommitOutcome) {
        self.bus.publish(LiveEvent::FixesCommitted {
            hash: commit.hash,
            fix_ids: commit.fix_ids,
        });
    }

    /// Applied, not undone fixes made since `session` started, grouped into
    /// commits.
    async fn commit_session_fixes(&self, session: &SessionLogger) -> Vec<CommitOutcome> {
        let since = session.summary().started_at;
        let records: Vec<FixRecord> = self
            .remediation
            .history(usize::MAX)
            .into_iter()
            .filter(|r| r.applied && !r.undone && r.created_at >= since)
            .collect();
        if records.is_empty() {
            return Vec::new();
        }
        match self.git.commit_grouped(&records).await {
            Ok(commits) => {
                for commit in &commits {
                    self.announce_commit(commit.clone());
                }
                commits
            }
            Err(e) => {
                warn!(fixes = records.len(), error = %e, "session-end commit failed");
                Vec::new()
            }
        }
    }

    pub async fn undo_last_fix(&self) -> UndoResult {
        self.undo(None).await
    }

    pub async fn undo_fix(&self, fix_id: &str) -> UndoResult {
        self.undo(Some(fix_id.to_string())).await
    }

    async fn undo(&self, fix_id: Option<String>) -> UndoResult {
        let engine = Arc::clone(&self.remediation);
        let outcome: Result<FixRecord, FixError> =
            match tokio::task::spawn_blocking(move || engine.undo(fix_id.as_deref())).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    return UndoResult {
                        success: false,
                        fix_id: None,
                        file: None,
                        error: Some(format!("undo task failed: {e}")),
                    }
                }
            };

        if let Ok(record) = &outcome {
            self.metrics.increment("fixes_undone");
            if let Some(session) = self.session().await {
                session.log(Activity::FixUndone {
                    fix_id: record.fix_id.clone(),
                    file: record.file.clone(),
                });
            }
            self.bus.publish(LiveEvent::FixUndone {
                fix_id: record.fix_id.clone(),
                file: record.file.clone(),
            });
        }
        UndoResult::from_outcome(outcome)
    }

    pub fn fix_history(&self, limit: usize) -> Vec<FixRecord> {
        self.remediation.history(limit)
    }

    // ------------------------------------------------------------------
    // Tests and readiness
    // ------------------------------------------------------------------

    pub async fn run_tests(&self, scope: Option<TestScope>) -> TestResult {
        let result = self.tests.run(scope.unwrap_or(TestScope::All)).await;
        self.metrics
            .increment_labeled("test_runs", if result.success { "passed" } else { "failed" });
        self.metrics.observe_ms("test_run_ms", result.duration_ms);
        if let Some(session) = self.session().await {
            session.log(Activity::TestRun {
                total: u64::from(result.total),
                passed: u64::from(result.passed),
                failed: u64::from(result.failed),
            });
        }
        self.bus.publish(LiveEvent::TestsCompleted {
            success: result.success,
            passed: result.passed,
            failed: result.failed,
        });
        result
    }

    pub async fn check_deployment_readiness(&self) -> ReadinessReport {
        DeploymentChecker::new(&self.project_dir).check().await
    }

    pub async fn check_bundle_size(&self) -> Result<BundleSnapshot, PerformanceError> {
        let monitor = Arc::clone(&self.performance);
        tokio::task::spawn_blocking(move || monitor.check_bundle_size())
            .await
            .unwrap_or_else(|e| Err(PerformanceError::Task(e.to_string())))
    }

    pub async fn measure_build(&self) -> Result<BuildTiming, PerformanceError> {
        self.performance.measure_build().await
    }

    /// Latest bundle and build measurements, API latency from the network
    /// log and the static leak scan.
    pub async fn performance_report(&self) -> PerformanceReport {
        let monitor = Arc::clone(&self.performance);
        let requests = self.network.recent(usize::MAX);
        let slow_ms = self.config.network.slow_request_ms;
        let fallback = PerformanceReport {
            bundle: monitor.latest_bundle(),
            build: monitor.latest_build(),
            api: crate::performance::ApiPerformance::from_records(&requests, slow_ms),
            leaks: Vec::new(),
        };
        match tokio::task::spawn_blocking(move || monitor.report(&requests, slow_ms)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "performance scan task failed");
                fallback
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries and host hooks
    // ------------------------------------------------------------------

    /// Queued issues at or above `min_severity`, most severe first. This is
    /// the only way low and info findings are surfaced.
    pub fn pending_issues(&self, min_severity: Severity) -> Vec<Issue> {
        self.scheduler().pending(min_severity)
    }

    /// Record user activity that the file watcher cannot see.
    pub fn mark_activity(&self) {
        self.scheduler().mark_activity();
    }

    /// Spawn and monitor another process in the running session.
    pub async fn monitor_process(
        &self,
        name: &str,
        program: &str,
        args: Vec<String>,
        cwd: Option<String>,
    ) -> Result<Option<u32>, ControllerError> {
        let runtime = self.runtime.lock().await;
        let running = runtime.as_ref().ok_or(ControllerError::NotActive)?;
        let command = ProcessCommand {
            name: name.to_string(),
            program: program.to_string(),
            args,
            cwd,
        };
        Ok(running.processes.spawn(&command, &self.project_dir)?)
    }

    pub fn subscribe(&self) -> flume::Receiver<LiveEvent> {
        self.bus.subscribe()
    }

    /// Latest Tier-2 analysis for `file`, if one completed this process.
    pub fn deep_report(&self, file: &str) -> Option<Analysis> {
        self.deep_reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(file)
            .cloned()
    }

    pub fn network_report(&self) -> NetworkReport {
        self.network.report()
    }

    /// Channel into the running pipeline, for hosts that produce their own
    /// signals.
    pub async fn signal_sink(&self) -> Option<flume::Sender<Signal>> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|r| r.signal_tx.clone())
    }

    async fn session(&self) -> Option<Arc<SessionLogger>> {
        self.runtime
            .lock()
            .await
            .as_ref()
            .map(|r| Arc::clone(&r.session))
    }
}
