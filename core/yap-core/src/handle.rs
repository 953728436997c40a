//! Worker handle (pid file) and runtime state (state file).
//!
//! These two files are the only channel between independent `yap`
//! invocations. Nothing locks them, so every read is re-validated:
//!
//! - a pid is only trusted after a liveness probe; a stale or unparseable
//!   pid file is deleted on sight
//! - the state file is only consulted while the handle is live
//! - writes that follow a signal check that the pid file still names the
//!   signalled worker (compare-and-write)
//!
//! ```text
//! yap.pid     "48213"
//! yap-state   "active" | "paused"
//! ```

use fs_err as fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::error::{Result, YapError};
use crate::process::ProcessControl;
use crate::storage::StorageConfig;

/// A worker pid confirmed live at the time it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: u32,
}

/// Persisted activity of a live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Active,
    Paused,
}

impl RuntimeState {
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeState::Active => "active",
            RuntimeState::Paused => "paused",
        }
    }

    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "active" => Some(RuntimeState::Active),
            "paused" => Some(RuntimeState::Paused),
            _ => None,
        }
    }
}

/// Reads and writes the pid and state files.
#[derive(Debug, Clone)]
pub struct HandleStore {
    pid_file: PathBuf,
    state_file: PathBuf,
}

impl HandleStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            pid_file: storage.pid_file(),
            state_file: storage.state_file(),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Returns the worker handle if the pid file names a live process.
    ///
    /// A pid file that fails to parse or names a dead process is removed, so
    /// callers only ever observe "live" or "absent".
    pub fn live_handle(&self, processes: &dyn ProcessControl) -> Result<Option<WorkerHandle>> {
        let Some(content) = read_optional(&self.pid_file)? else {
            return Ok(None);
        };

        match content.trim().parse::<u32>() {
            Ok(pid) if processes.is_alive(pid) => Ok(Some(WorkerHandle { pid })),
            Ok(pid) => {
                tracing::info!(pid, "Removing stale worker handle");
                self.remove_handle()?;
                Ok(None)
            }
            Err(_) => {
                tracing::warn!(content = %content.trim(), "Removing unparseable worker handle");
                self.remove_handle()?;
                Ok(None)
            }
        }
    }

    /// The raw pid currently recorded, without a liveness check.
    fn recorded_pid(&self) -> Result<Option<u32>> {
        Ok(read_optional(&self.pid_file)?.and_then(|content| content.trim().parse().ok()))
    }

    pub fn write_handle(&self, pid: u32) -> Result<()> {
        atomic_write(&self.pid_file, pid.to_string().as_bytes())
    }

    /// Reads the state token. Missing or unrecognised content is `None`;
    /// only meaningful while the handle is live.
    pub fn read_state(&self) -> Result<Option<RuntimeState>> {
        Ok(read_optional(&self.state_file)?.and_then(|content| RuntimeState::parse(&content)))
    }

    /// Writes `state` if the pid file still names `handle`. Returns false
    /// (and writes nothing) when another invocation replaced or removed the
    /// handle after it was read.
    pub fn record_state(&self, handle: WorkerHandle, state: RuntimeState) -> Result<bool> {
        if self.recorded_pid()? != Some(handle.pid) {
            tracing::warn!(
                pid = handle.pid,
                state = state.as_str(),
                "Worker handle changed underneath us; not recording state"
            );
            return Ok(false);
        }
        atomic_write(&self.state_file, state.as_str().as_bytes())?;
        Ok(true)
    }

    pub fn clear_state(&self) -> Result<()> {
        remove_if_exists(&self.state_file)
    }

    fn remove_handle(&self) -> Result<()> {
        remove_if_exists(&self.pid_file)
    }

    /// Removes both files unconditionally.
    pub fn clear(&self) -> Result<()> {
        self.remove_handle()?;
        self.clear_state()
    }

    /// Removes both files unless the pid file now names a different worker.
    /// Used when a supervised worker exits, so a worker started after a
    /// `stop` keeps its handle.
    pub fn release(&self, pid: u32) -> Result<bool> {
        match self.recorded_pid()? {
            Some(recorded) if recorded != pid => {
                tracing::debug!(pid, recorded, "Handle owned by another worker; leaving it");
                Ok(false)
            }
            _ => {
                self.clear()?;
                Ok(true)
            }
        }
    }
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(YapError::io("reading runtime file", err)),
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(YapError::io("removing runtime file", err)),
    }
}

fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|err| YapError::io("creating runtime directory", err))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|err| YapError::io(format!("creating temp file in {}", dir.display()), err))?;
    tmp.write_all(contents)
        .map_err(|err| YapError::io("writing temp file", err))?;
    tmp.persist(path).map_err(|err| {
        YapError::io(format!("persisting temp file to {}", path.display()), err.error)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tests::FakeProcesses;
    use tempfile::tempdir;

    fn store_in(root: &Path) -> HandleStore {
        HandleStore::new(&StorageConfig::with_root(root.to_path_buf()))
    }

    #[test]
    fn missing_pid_file_is_absent() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        assert_eq!(store.live_handle(&FakeProcesses::default()).unwrap(), None);
    }

    #[test]
    fn live_pid_is_returned() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write_handle(42).unwrap();

        let handle = store.live_handle(&FakeProcesses::with_alive(&[42])).unwrap();
        assert_eq!(handle, Some(WorkerHandle { pid: 42 }));
        assert_eq!(fs::read_to_string(store.pid_file()).unwrap(), "42");
    }

    #[test]
    fn dead_pid_is_deleted() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write_handle(42).unwrap();

        assert_eq!(store.live_handle(&FakeProcesses::default()).unwrap(), None);
        assert!(!store.pid_file().exists());
    }

    #[test]
    fn garbage_pid_file_is_deleted() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        fs::create_dir_all(store.pid_file().parent().unwrap()).unwrap();
        fs::write(store.pid_file(), "not-a-pid").unwrap();

        assert_eq!(store.live_handle(&FakeProcesses::with_alive(&[1])).unwrap(), None);
        assert!(!store.pid_file().exists());
    }

    #[test]
    fn state_tokens_are_trimmed() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        fs::create_dir_all(store.state_file().parent().unwrap()).unwrap();

        fs::write(store.state_file(), "paused\n").unwrap();
        assert_eq!(store.read_state().unwrap(), Some(RuntimeState::Paused));

        fs::write(store.state_file(), "  active ").unwrap();
        assert_eq!(store.read_state().unwrap(), Some(RuntimeState::Active));

        fs::write(store.state_file(), "sleeping").unwrap();
        assert_eq!(store.read_state().unwrap(), None);
    }

    #[test]
    fn record_state_requires_matching_handle() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write_handle(42).unwrap();

        assert!(store
            .record_state(WorkerHandle { pid: 42 }, RuntimeState::Paused)
            .unwrap());
        assert_eq!(store.read_state().unwrap(), Some(RuntimeState::Paused));

        store.write_handle(43).unwrap();
        assert!(!store
            .record_state(WorkerHandle { pid: 42 }, RuntimeState::Active)
            .unwrap());
        assert_eq!(store.read_state().unwrap(), Some(RuntimeState::Paused));
    }

    #[test]
    fn release_leaves_a_newer_workers_handle() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write_handle(43).unwrap();

        assert!(!store.release(42).unwrap());
        assert!(store.pid_file().exists());

        assert!(store.release(43).unwrap());
        assert!(!store.pid_file().exists());
    }

    #[test]
    fn clear_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = store_in(temp.path());
        store.write_handle(7).unwrap();
        store
            .record_state(WorkerHandle { pid: 7 }, RuntimeState::Active)
            .unwrap();

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.pid_file().exists());
        assert!(!store.state_file().exists());
    }
}
