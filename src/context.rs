//! Execution contexts: one isolated page surface per checked file.
//!
//! Each surface owns its [`Page`] on a dedicated thread, since the script
//! runtime is single-threaded and never leaves that thread. The orchestrator
//! talks to it through a command queue and observes its lifecycle events.

use super::*;
use crate::channel::{RunLabel, SignalSender};
use crate::config::Viewport;
use crate::page::Page;
use crate::sequencer::{InjectedTest, ScriptTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Stack reserved for each surface thread; deeper work grows on demand.
const SURFACE_STACK_SIZE: usize = 32 * 1024 * 1024;

/// Per-surface settings derived from [`crate::HarnessConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceOptions {
    pub viewport: Viewport,
    /// Virtual time granted to page timers after `load`.
    pub settle_delay_ms: u64,
    pub timer_step_limit: usize,
    pub script_step_limit: u64,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        crate::HarnessConfig::default().surface_options()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The document is parsed and its scripts have run.
    DomReady,
    /// The page and its subresources finished loading.
    ContentLoaded,
    LoadFailed(String),
}

/// Tracks the two readiness events, which may arrive in any order and more
/// than once, and reports dual readiness exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessLatch {
    dom_ready: bool,
    content_loaded: bool,
    fired: bool,
}

impl ReadinessLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the single event that completes dual readiness.
    pub fn observe(&mut self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::DomReady => self.dom_ready = true,
            LifecycleEvent::ContentLoaded => self.content_loaded = true,
            LifecycleEvent::LoadFailed(_) => return false,
        }
        if self.is_ready() && !self.fired {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn is_ready(&self) -> bool {
        self.dom_ready && self.content_loaded
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

#[derive(Debug)]
enum SurfaceCommand {
    Execute(InjectedTest),
    Shutdown,
}

/// Creates surfaces and counts them.
#[derive(Debug, Clone, Default)]
pub struct ContextManager {
    created: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl ContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a surface that loads `path` and reports its scripts' signals
    /// through `sender`.
    pub fn create(
        &self,
        path: &Path,
        sender: SignalSender,
        options: SurfaceOptions,
    ) -> Result<ContextHandle> {
        let label = sender.label().clone();
        let abort = Arc::new(AtomicBool::new(false));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle_rx) = mpsc::unbounded_channel();

        let surface = Surface {
            path: path.to_path_buf(),
            options,
            sender,
            abort: Arc::clone(&abort),
            lifecycle: lifecycle_tx,
            commands: command_rx,
        };
        std::thread::Builder::new()
            .name(format!("surface-{label}"))
            .spawn(move || stacker::grow(SURFACE_STACK_SIZE, || surface.run()))
            .map_err(|err| Error::Context(format!("failed to spawn surface thread: {err}")))?;

        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(%label, path = %path.display(), "created execution context");

        Ok(ContextHandle {
            label,
            commands: command_tx,
            lifecycle: lifecycle_rx,
            latch: ReadinessLatch::new(),
            abort,
            destroyed: AtomicBool::new(false),
            live: Arc::clone(&self.live),
        })
    }

    /// Contexts created since this manager was made.
    pub fn created_contexts(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Orchestrator-side handle to one surface. Dropping it destroys the surface.
#[derive(Debug)]
pub struct ContextHandle {
    label: RunLabel,
    commands: mpsc::UnboundedSender<SurfaceCommand>,
    lifecycle: mpsc::UnboundedReceiver<LifecycleEvent>,
    latch: ReadinessLatch,
    abort: Arc<AtomicBool>,
    destroyed: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl ContextHandle {
    pub fn label(&self) -> &RunLabel {
        &self.label
    }

    /// Resolves once both readiness events have been observed.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        if self.latch.has_fired() {
            return Ok(());
        }
        while let Some(event) = self.lifecycle.recv().await {
            tracing::debug!(label = %self.label, ?event, "lifecycle event");
            if let LifecycleEvent::LoadFailed(detail) = event {
                return Err(Error::Context(detail));
            }
            if self.latch.observe(&event) {
                return Ok(());
            }
        }
        Err(Error::Context("surface exited before it became ready".into()))
    }

    pub fn execute(&self, test: InjectedTest) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::Context(format!("context {} was destroyed", self.label)));
        }
        self.commands
            .send(SurfaceCommand::Execute(test))
            .map_err(|_| Error::Context(format!("surface {} is gone", self.label)))
    }

    /// Terminates the surface. Safe to call any number of times.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.abort.store(true, Ordering::SeqCst);
        if self.commands.send(SurfaceCommand::Shutdown).is_err() {
            tracing::debug!(label = %self.label, "surface already exited");
        }
        self.live.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(label = %self.label, "destroyed execution context");
    }

    pub fn is_alive(&self) -> bool {
        !self.destroyed.load(Ordering::SeqCst)
    }
}

impl ScriptTarget for ContextHandle {
    fn inject(&self, test: InjectedTest) -> Result<()> {
        self.execute(test)
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.destroy();
    }
}

struct Surface {
    path: PathBuf,
    options: SurfaceOptions,
    sender: SignalSender,
    abort: Arc<AtomicBool>,
    lifecycle: mpsc::UnboundedSender<LifecycleEvent>,
    commands: mpsc::UnboundedReceiver<SurfaceCommand>,
}

impl Surface {
    fn run(mut self) {
        let mut page = match Page::open(
            &self.path,
            self.options.clone(),
            self.sender.clone(),
            Arc::clone(&self.abort),
        ) {
            Ok(page) => page,
            Err(err) => {
                self.emit(LifecycleEvent::LoadFailed(err.to_string()));
                return;
            }
        };

        page.finish_parsing();
        self.emit(LifecycleEvent::DomReady);
        page.finish_loading();
        self.emit(LifecycleEvent::ContentLoaded);

        while let Some(command) = self.commands.blocking_recv() {
            match command {
                SurfaceCommand::Execute(_) if self.abort.load(Ordering::SeqCst) => break,
                SurfaceCommand::Execute(test) => page.run_test(&test),
                SurfaceCommand::Shutdown => break,
            }
        }
        tracing::debug!(label = %self.sender.label(), "surface thread exiting");
    }

    fn emit(&self, event: LifecycleEvent) {
        if self.lifecycle.send(event).is_err() {
            tracing::debug!(label = %self.sender.label(), "lifecycle receiver dropped");
        }
    }
}
