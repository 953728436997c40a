//! Launching the listening worker.

use fs_err as fs;
use std::env;
use std::ffi::OsString;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::EffectiveStartOptions;
use crate::error::{Result, YapError};
use crate::storage::StorageConfig;

/// Line the worker writes to stderr once its model is loaded.
pub const READY_SENTINEL: &str = "SYSTEM_READY";

/// Tells the worker where to append transcriptions.
pub const OUTPUT_FILE_ENV: &str = "YAP_OUTPUT_FILE";

const CUDA_LIBRARIES: &[&str] = &["cublas", "cudnn"];

/// Fully resolved worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, OsString)>,
}

impl WorkerCommand {
    pub fn new(storage: &StorageConfig, options: &EffectiveStartOptions) -> Self {
        let mut args: Vec<OsString> = vec![
            storage.worker_script().into_os_string(),
            "--model".into(),
            options.model.clone().into(),
            "--device".into(),
            options.device.clone().into(),
            "--language".into(),
            options.language.clone().into(),
        ];
        if options.fast_mode {
            args.push("--fast".into());
        }
        if !options.enable_typing {
            args.push("--no-typing".into());
        }
        if options.output_file {
            args.push("--output-file".into());
        }

        let mut env = vec![(
            OUTPUT_FILE_ENV.to_string(),
            storage.output_file().into_os_string(),
        )];
        if let Some(library_path) = library_path(&storage.venv_dir(), env::var_os("LD_LIBRARY_PATH")) {
            env.push(("LD_LIBRARY_PATH".to_string(), library_path));
        }

        Self {
            program: storage.venv_python(),
            args,
            env,
        }
    }
}

/// Prepends the CUDA libraries shipped inside the environment to
/// `LD_LIBRARY_PATH`. `None` when the environment carries none.
fn library_path(venv_dir: &Path, existing: Option<OsString>) -> Option<OsString> {
    let mut dirs = cuda_library_dirs(venv_dir);
    if dirs.is_empty() {
        return None;
    }
    if let Some(existing) = existing {
        dirs.extend(env::split_paths(&existing));
    }
    env::join_paths(dirs).ok()
}

fn cuda_library_dirs(venv_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(venv_dir.join("lib")) else {
        return Vec::new();
    };

    let mut interpreters: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("python3"))
        .map(|entry| entry.path())
        .collect();
    interpreters.sort();

    interpreters
        .iter()
        .flat_map(|lib| {
            CUDA_LIBRARIES
                .iter()
                .map(move |name| lib.join("site-packages/nvidia").join(name).join("lib"))
        })
        .filter(|dir| dir.is_dir())
        .collect()
}

/// A running worker as seen by its supervisor.
pub trait WorkerProcess: Send {
    fn id(&self) -> u32;

    /// The worker's stderr. Yields `Some` once.
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>>;

    /// Blocks until the worker exits. `None` means it was killed by a signal.
    fn wait(&mut self) -> Result<Option<i32>>;
}

pub trait WorkerLauncher {
    fn launch(&self, command: &WorkerCommand) -> Result<Box<dyn WorkerProcess>>;
}

/// Spawns the worker as a child process: stdin and stdout inherited, stderr
/// piped back to the supervisor.
#[derive(Debug, Default)]
pub struct SystemLauncher;

impl WorkerLauncher for SystemLauncher {
    fn launch(&self, command: &WorkerCommand) -> Result<Box<dyn WorkerProcess>> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .envs(command.env.iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| YapError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        tracing::debug!(pid = child.id(), program = %command.program.display(), "Worker spawned");
        Ok(Box::new(ChildWorker { child }))
    }
}

struct ChildWorker {
    child: Child,
}

impl WorkerProcess for ChildWorker {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .wait()
            .map_err(|err| YapError::io("waiting for worker", err))?;
        Ok(status.code())
    }
}
