//! The orchestrator: one [`FileCheck`] in, exactly one [`Outcome`] out.

use super::*;
use crate::channel::{RunLabel, Signal, SignalBus, Subscription};
use crate::config::HarnessConfig;
use crate::context::{ContextHandle, ContextManager};
use crate::sequencer::{SequencerStep, TestSequencer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

const CANCELLED: &str = "The functionality check was cancelled";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Failure(reason) => Some(reason),
        }
    }
}

/// A page to check and the test scripts to run against it, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileCheck {
    pub path: String,
    #[serde(default)]
    pub tests: Vec<String>,
}

impl FileCheck {
    pub fn new<I, S>(path: impl Into<String>, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            tests: tests.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a JSON array of `{ "path": ..., "tests": [...] }` objects.
    pub fn list_from_json_str(json: &str) -> Result<Vec<Self>> {
        serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))
    }
}

/// Progress reported to the caller while checks run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ProgressEvent {
    GroupStarted {
        group: String,
        label: String,
    },
    Started {
        group: String,
        check: String,
        label: String,
    },
    Computing {
        group: String,
        check: String,
    },
    /// `errors` is empty on success and holds one message on failure.
    Completed {
        group: String,
        check: String,
        label: String,
        errors: Vec<String>,
    },
    Debug {
        group: String,
        check: String,
        message: String,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardProgress;

impl ProgressSink for DiscardProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// How a run ended, before it is flattened into an [`Outcome`].
#[derive(Debug)]
enum RunEnd {
    Passed,
    /// A test called `fail(reason)` or its script threw.
    Failed(String),
    /// The harness gave up: load failure, timeout or cancellation.
    Aborted(String),
}

impl RunEnd {
    fn from_outcome(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::Passed,
            Outcome::Failure(reason) => Self::Failed(reason),
        }
    }

    fn completed_errors(&self) -> Vec<String> {
        match self {
            Self::Passed => Vec::new(),
            Self::Failed(reason) => {
                vec![format!("The website isn’t functioning as expected: {reason}")]
            }
            Self::Aborted(message) => vec![message.clone()],
        }
    }

    fn into_outcome(self) -> Outcome {
        match self {
            Self::Passed => Outcome::Success,
            Self::Failed(reason) | Self::Aborted(reason) => Outcome::Failure(reason),
        }
    }
}

/// Resources held by one live run. Dropping it is the single teardown path:
/// the surface is destroyed and the run label is deregistered.
struct ActiveRun {
    context: ContextHandle,
    subscription: Subscription,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.context.destroy();
        let mut discarded = 0usize;
        while self.subscription.try_recv().is_some() {
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(
                label = %self.subscription.label(),
                discarded,
                "discarded pending signals at teardown"
            );
        }
    }
}

async fn within<F: Future>(limit_ms: Option<u64>, future: F) -> Option<F::Output> {
    match limit_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), future).await.ok(),
        None => Some(future.await),
    }
}

/// Runs functionality checks against pages under a project root.
pub struct FunctionalityHarness {
    config: HarnessConfig,
    bus: SignalBus,
    contexts: ContextManager,
    progress: Arc<dyn ProgressSink>,
}

impl FunctionalityHarness {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            bus: SignalBus::new(),
            contexts: ContextManager::new(),
            progress: Arc::new(DiscardProgress),
        }
    }

    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Arc::new(progress);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn bus(&self) -> &SignalBus {
        &self.bus
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    pub async fn run(&self, group: &str, check: FileCheck) -> Outcome {
        self.run_with_cancellation(group, check, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), but cancelling `token` tears the run down and
    /// yields a cancellation failure.
    pub async fn run_with_cancellation(
        &self,
        group: &str,
        check: FileCheck,
        token: CancellationToken,
    ) -> Outcome {
        let span = tracing::info_span!("functionality_check", group, path = %check.path);
        self.run_inner(group, check, token).instrument(span).await
    }

    /// Runs every check concurrently; outcomes come back in input order.
    pub async fn run_all(&self, group: &str, checks: Vec<FileCheck>) -> Vec<Outcome> {
        self.progress.emit(ProgressEvent::GroupStarted {
            group: group.to_string(),
            label: group.to_string(),
        });
        futures::future::join_all(checks.into_iter().map(|check| self.run(group, check))).await
    }

    async fn run_inner(&self, group: &str, check: FileCheck, token: CancellationToken) -> Outcome {
        let FileCheck { path, tests } = check;
        self.progress.emit(ProgressEvent::Started {
            group: group.to_string(),
            check: path.clone(),
            label: path.clone(),
        });
        tracing::info!(tests = tests.len(), "functionality check started");

        let end = self.execute(group, &path, tests, &token).await;

        let errors = end.completed_errors();
        match errors.first() {
            None => tracing::info!("functionality check passed"),
            Some(error) => tracing::info!(%error, "functionality check failed"),
        }
        self.progress.emit(ProgressEvent::Completed {
            group: group.to_string(),
            check: path.clone(),
            label: path,
            errors,
        });
        end.into_outcome()
    }

    async fn execute(
        &self,
        group: &str,
        path: &str,
        tests: Vec<String>,
        token: &CancellationToken,
    ) -> RunEnd {
        let full_path = self.config.project_root.join(path);
        let exists = tokio::fs::metadata(&full_path)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !exists {
            return RunEnd::Aborted(format!("The file “{path}” is missing or misspelled"));
        }
        if token.is_cancelled() {
            return RunEnd::Aborted(CANCELLED.to_string());
        }

        self.progress.emit(ProgressEvent::Computing {
            group: group.to_string(),
            check: path.to_string(),
        });

        let run_label = RunLabel::generate(path);
        let subscription = match self.bus.subscribe(run_label.clone()) {
            Ok(subscription) => subscription,
            Err(err) => return RunEnd::Aborted(err.to_string()),
        };
        let context = match self.contexts.create(
            &full_path,
            self.bus.sender(run_label),
            self.config.surface_options(),
        ) {
            Ok(context) => context,
            Err(err) => return RunEnd::Aborted(err.to_string()),
        };
        let mut run = ActiveRun {
            context,
            subscription,
        };

        let label = run.subscription.label().clone();
        let end = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(%label, "functionality check cancelled");
                RunEnd::Aborted(CANCELLED.to_string())
            }
            end = self.drive(&mut run, group, path, tests) => end,
        };
        drop(run);
        end
    }

    async fn drive(
        &self,
        run: &mut ActiveRun,
        group: &str,
        path: &str,
        tests: Vec<String>,
    ) -> RunEnd {
        let load_failed = |detail: String| {
            RunEnd::Aborted(format!("The page “{path}” could not be loaded: {detail}"))
        };
        match within(self.config.load_timeout_ms, run.context.wait_until_ready()).await {
            None => {
                let ms = self.config.load_timeout_ms.unwrap_or_default();
                return load_failed(format!("it did not become ready within {ms} ms"));
            }
            Some(Err(Error::Context(detail))) => return load_failed(detail),
            Some(Err(other)) => return load_failed(other.to_string()),
            Some(Ok(())) => {}
        }
        tracing::debug!(label = %run.context.label(), "page ready");
        if self.config.settle_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        }

        let mut sequencer = TestSequencer::new(tests);
        let mut step = sequencer.dispatch_next(&run.context);
        let mut deadline = None;
        loop {
            match step {
                Err(err) => return RunEnd::Aborted(err.to_string()),
                Ok(SequencerStep::Finished(outcome)) => return RunEnd::from_outcome(outcome),
                Ok(SequencerStep::Dispatched(_)) => {
                    deadline = self
                        .config
                        .test_timeout_ms
                        .map(|ms| (ms, Instant::now() + Duration::from_millis(ms)));
                }
                Ok(SequencerStep::Continue) => {}
            }

            let next = match deadline {
                Some((_, at)) => tokio::time::timeout_at(at, run.subscription.recv()).await.ok(),
                None => Some(run.subscription.recv().await),
            };
            let signal = match next {
                None => {
                    let ms = deadline.map(|(ms, _)| ms).unwrap_or_default();
                    return RunEnd::Aborted(format!(
                        "The functionality test did not finish within {ms} ms"
                    ));
                }
                Some(None) => {
                    return RunEnd::Aborted("The signal channel closed unexpectedly".into());
                }
                Some(Some(signal)) => signal,
            };
            if signal.is_control() {
                tracing::debug!(
                    test = ?sequencer.in_flight(),
                    remaining = sequencer.remaining(),
                    ?signal,
                    "control signal"
                );
            }
            if let Signal::Debug(message) = &signal {
                tracing::debug!(%message, "debug signal");
                self.progress.emit(ProgressEvent::Debug {
                    group: group.to_string(),
                    check: path.to_string(),
                    message: message.clone(),
                });
            }
            step = sequencer.on_signal(&signal, &run.context);
        }
    }
}
