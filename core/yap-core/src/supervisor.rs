//! Lifecycle of the listening worker: start, pause, resume, stop, toggle.
//!
//! Every `yap` invocation builds a fresh `Supervisor`. Only `start` (or a
//! `toggle` that starts) blocks; it owns the worker until the worker exits.
//! All other operations find the worker through the handle store and talk
//! to it with signals.
//!
//! ```text
//! absent ──start──► active ──pause──► paused
//!    ▲                 ▲                │
//!    │                 └─────resume─────┘
//!    └──────stop / worker exit──────────┘
//! ```

use fs_err as fs;
use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::bootstrap::{Bootstrap, VenvProvisioner};
use crate::config::{Config, EffectiveStartOptions, StartOverrides};
use crate::error::{Result, YapError};
use crate::handle::{HandleStore, RuntimeState, WorkerHandle};
use crate::notify::{notify, DesktopNotifier, NotificationEvent, NotificationSpec, Notifier};
use crate::process::{ProcessControl, SignalFailure, SystemProcesses, WorkerSignal};
use crate::storage::StorageConfig;
use crate::typing::TypingReadiness;
use crate::worker::{SystemLauncher, WorkerCommand, WorkerLauncher, READY_SENTINEL};

const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(50);
/// How long to wait for the stderr reader after the worker has exited.
const DIAGNOSTICS_DRAIN: Duration = Duration::from_secs(1);

const READY_MESSAGE: &str = "Ready to listen";
const RESUMED_MESSAGE: &str = "Yapping started";
const PAUSED_MESSAGE: &str = "Yapping paused";
const STOPPED_MESSAGE: &str = "Yapping stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A live worker already exists; nothing was launched.
    AlreadyRunning { pid: u32 },
    /// The launched worker ran and exited. `code` is `None` when it was
    /// killed by a signal.
    Exited { pid: u32, code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started(StartOutcome),
    Paused(WorkerHandle),
    Resumed(WorkerHandle),
}

pub struct Supervisor {
    storage: StorageConfig,
    config: Config,
    notifications: NotificationSpec,
    handles: HandleStore,
    processes: Box<dyn ProcessControl>,
    launcher: Box<dyn WorkerLauncher>,
    notifier: Arc<dyn Notifier>,
    bootstrap: Bootstrap,
    typing: TypingReadiness,
    stop_grace: Duration,
}

impl Supervisor {
    /// Supervisor wired to the real system.
    pub fn new(storage: StorageConfig, config: Config) -> Self {
        let notifications = NotificationSpec::parse(&config.notifications);
        let bootstrap = Bootstrap::new(storage.clone(), Box::new(VenvProvisioner::default()));
        Self {
            handles: HandleStore::new(&storage),
            storage,
            config,
            notifications,
            processes: Box::new(SystemProcesses),
            launcher: Box::new(SystemLauncher),
            notifier: Arc::new(DesktopNotifier),
            bootstrap,
            typing: TypingReadiness::system(),
            stop_grace: STOP_GRACE,
        }
    }

    pub fn with_processes(mut self, processes: Box<dyn ProcessControl>) -> Self {
        self.processes = processes;
        self
    }

    pub fn with_launcher(mut self, launcher: Box<dyn WorkerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: Bootstrap) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_typing(mut self, typing: TypingReadiness) -> Self {
        self.typing = typing;
        self
    }

    /// How long `stop` waits for the worker to disappear.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn handles(&self) -> &HandleStore {
        &self.handles
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Launches the worker and blocks until it exits.
    pub fn start(&self, overrides: &StartOverrides) -> Result<StartOutcome> {
        if let Some(handle) = self.live_handle()? {
            tracing::info!(pid = handle.pid, "Worker already running");
            return Ok(StartOutcome::AlreadyRunning { pid: handle.pid });
        }
        self.handles.clear_state()?;

        let report = self.bootstrap.run()?;
        tracing::debug!(?report, "Bootstrap complete");

        let options = EffectiveStartOptions::resolve(&self.config, overrides);
        if options.enable_typing {
            self.typing.ensure_ready()?;
        }
        self.reset_output()?;

        let command = WorkerCommand::new(&self.storage, &options);
        let mut worker = self.launcher.launch(&command)?;
        let pid = worker.id();
        tracing::info!(
            pid,
            model = %options.model,
            device = %options.device,
            language = %options.language,
            typing = options.enable_typing,
            "Worker started"
        );

        match self.handles.write_handle(pid) {
            Ok(()) => {
                if let Err(err) = self
                    .handles
                    .record_state(WorkerHandle { pid }, RuntimeState::Active)
                {
                    tracing::warn!(pid, error = %err, "Failed to record worker state");
                }
            }
            Err(err) => tracing::warn!(pid, error = %err, "Failed to record worker handle"),
        }

        let drained = worker.take_diagnostics().map(|stream| {
            forward_diagnostics(
                stream,
                io::stderr(),
                Arc::clone(&self.notifier),
                self.notifications.clone(),
            )
        });

        let exit = worker.wait();
        if let Some(drained) = drained {
            if drained.recv_timeout(DIAGNOSTICS_DRAIN).is_err() {
                tracing::debug!(pid, "Diagnostics reader still running after worker exit");
            }
        }

        if let Err(err) = self.handles.release(pid) {
            tracing::warn!(pid, error = %err, "Failed to clean up worker handle");
        }

        let code = exit?;
        tracing::info!(pid, ?code, "Worker exited");
        Ok(StartOutcome::Exited { pid, code })
    }

    pub fn pause(&self) -> Result<WorkerHandle> {
        let handle = self.require_live()?;
        self.send(handle, WorkerSignal::Pause)?;
        self.handles.record_state(handle, RuntimeState::Paused)?;
        notify(&*self.notifier, &self.notifications, NotificationEvent::Pause, PAUSED_MESSAGE);
        Ok(handle)
    }

    pub fn resume(&self) -> Result<WorkerHandle> {
        let handle = self.require_live()?;
        self.send(handle, WorkerSignal::Resume)?;
        self.handles.record_state(handle, RuntimeState::Active)?;
        notify(&*self.notifier, &self.notifications, NotificationEvent::Start, RESUMED_MESSAGE);
        Ok(handle)
    }

    /// Sends SIGTERM, waits up to the stop grace period, then removes the
    /// handle and state files whether or not the worker is gone.
    pub fn stop(&self) -> Result<WorkerHandle> {
        let handle = self.require_live()?;
        self.send(handle, WorkerSignal::Terminate)?;

        if !self.wait_for_exit(handle.pid) {
            tracing::warn!(
                pid = handle.pid,
                grace_ms = self.stop_grace.as_millis() as u64,
                "Worker still alive after stop grace period"
            );
        }

        self.handles.clear()?;
        notify(&*self.notifier, &self.notifications, NotificationEvent::Stop, STOPPED_MESSAGE);
        Ok(handle)
    }

    /// Starts when absent, resumes when paused, pauses otherwise. Unreadable
    /// state counts as active.
    pub fn toggle(&self, overrides: &StartOverrides) -> Result<ToggleOutcome> {
        if self.live_handle()?.is_none() {
            self.handles.clear_state()?;
            return self.start(overrides).map(ToggleOutcome::Started);
        }

        match self.handles.read_state() {
            Ok(Some(RuntimeState::Paused)) => self.resume().map(ToggleOutcome::Resumed),
            Ok(_) => self.pause().map(ToggleOutcome::Paused),
            Err(err) => {
                tracing::warn!(error = %err, "Unreadable worker state; pausing");
                self.pause().map(ToggleOutcome::Paused)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────

    fn live_handle(&self) -> Result<Option<WorkerHandle>> {
        self.handles.live_handle(&*self.processes)
    }

    fn require_live(&self) -> Result<WorkerHandle> {
        self.live_handle()?.ok_or(YapError::NotRunning)
    }

    fn send(&self, handle: WorkerHandle, signal: WorkerSignal) -> Result<()> {
        tracing::debug!(pid = handle.pid, %signal, "Signalling worker");
        self.processes
            .signal(handle.pid, signal)
            .map_err(|failure| match failure {
                SignalFailure::NoSuchProcess => YapError::ProcessVanished {
                    signal,
                    pid: handle.pid,
                },
                SignalFailure::Os(source) => YapError::Signal {
                    signal,
                    pid: handle.pid,
                    source,
                },
            })
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.stop_grace;
        loop {
            if !self.processes.is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    /// Each session starts with an empty transcript.
    fn reset_output(&self) -> Result<()> {
        match fs::remove_file(self.storage.output_file()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(YapError::io("removing previous output", err)),
        }
    }
}

/// Drains the worker's stderr on a detached thread, echoing every line except
/// the readiness sentinel and announcing readiness once. The receiver fires
/// when the stream closes.
fn forward_diagnostics(
    stream: Box<dyn Read + Send>,
    mut sink: impl Write + Send + 'static,
    notifier: Arc<dyn Notifier>,
    notifications: NotificationSpec,
) -> Receiver<()> {
    let (done_tx, done_rx) = mpsc::channel();

    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        let mut announced = false;

        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end_matches(['\n', '\r']);
                    if !text.contains(READY_SENTINEL) {
                        let _ = writeln!(sink, "{}", text);
                        continue;
                    }
                    if !announced {
                        announced = true;
                        notify(&*notifier, &notifications, NotificationEvent::Start, READY_MESSAGE);
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    tracing::debug!(error = %err, "Worker diagnostics stream failed");
                    break;
                }
            }
        }

        let _ = sink.flush();
        let _ = done_tx.send(());
    });

    done_rx
}
