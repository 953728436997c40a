//! Liveness probes and signal delivery for the worker process.

use std::fmt;
use std::io;

/// Signals the supervisor sends to a running worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    /// SIGUSR1: stop listening, keep the model loaded.
    Pause,
    /// SIGUSR2: start listening again.
    Resume,
    /// SIGTERM: shut down.
    Terminate,
}

impl WorkerSignal {
    pub fn raw(self) -> libc::c_int {
        match self {
            WorkerSignal::Pause => libc::SIGUSR1,
            WorkerSignal::Resume => libc::SIGUSR2,
            WorkerSignal::Terminate => libc::SIGTERM,
        }
    }

    /// Verb used in user-facing diagnostics ("failed to pause").
    pub fn verb(self) -> &'static str {
        match self {
            WorkerSignal::Pause => "pause",
            WorkerSignal::Resume => "resume",
            WorkerSignal::Terminate => "stop",
        }
    }
}

impl fmt::Display for WorkerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerSignal::Pause => "SIGUSR1",
            WorkerSignal::Resume => "SIGUSR2",
            WorkerSignal::Terminate => "SIGTERM",
        };
        f.write_str(name)
    }
}

/// Why a signal could not be delivered.
#[derive(Debug)]
pub enum SignalFailure {
    /// The pid disappeared between the liveness probe and the send.
    NoSuchProcess,
    Os(io::Error),
}

/// Operating-system process operations the supervisor depends on.
pub trait ProcessControl {
    /// Zero-signal probe: true if `pid` exists and may be signalled.
    fn is_alive(&self, pid: u32) -> bool;

    fn signal(&self, pid: u32, signal: WorkerSignal) -> Result<(), SignalFailure>;
}

/// `kill(2)` backed process control.
#[derive(Debug, Default)]
pub struct SystemProcesses;

impl ProcessControl for SystemProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs permission and existence checks only.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    fn signal(&self, pid: u32, signal: WorkerSignal) -> Result<(), SignalFailure> {
        let Some(raw_pid) = to_pid(pid) else {
            return Err(SignalFailure::NoSuchProcess);
        };
        // SAFETY: raw_pid is strictly positive, so this never targets a
        // process group. ESRCH is reported back as NoSuchProcess.
        let rc = unsafe { libc::kill(raw_pid, signal.raw()) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Err(SignalFailure::NoSuchProcess)
        } else {
            Err(SignalFailure::Os(err))
        }
    }
}

/// pids 0 and negatives address process groups; never treat them as a worker.
fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 0)
}
