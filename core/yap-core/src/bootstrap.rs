//! Self-healing setup of the worker's runtime environment.
//!
//! Runs before every launch. Each step is idempotent and cheap when nothing
//! changed:
//!
//! 1. create the system directory
//! 2. write the bundled worker files (always overwritten)
//! 3. create the interpreter environment unless `venv/bin/python` exists
//! 4. install dependencies unless the manifest hash matches the marker
//!
//! The marker is only rewritten after a successful install, so a failed or
//! interrupted install is retried by the next invocation.

use fs_err as fs;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, ErrorKind};
use std::path::Path;
use std::process::Command;

use crate::bundle::{BundledFile, WORKER_BUNDLE};
use crate::error::{Result, YapError};
use crate::storage::StorageConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStep {
    RuntimeDir,
    WorkerFiles,
    Environment,
    Dependencies,
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BootstrapStep::RuntimeDir => "ensure runtime directory",
            BootstrapStep::WorkerFiles => "extract worker files",
            BootstrapStep::Environment => "ensure interpreter environment",
            BootstrapStep::Dependencies => "install dependencies",
        };
        f.write_str(label)
    }
}

/// Creates interpreter environments and installs packages into them.
pub trait Provisioner {
    fn create_environment(&self, venv_dir: &Path) -> std::result::Result<(), String>;

    fn install_dependencies(&self, pip: &Path, manifest: &Path) -> std::result::Result<(), String>;
}

/// `python3 -m venv` + `pip install -r`, output streamed to the terminal.
#[derive(Debug, Clone)]
pub struct VenvProvisioner {
    interpreter: String,
}

impl Default for VenvProvisioner {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl Provisioner for VenvProvisioner {
    fn create_environment(&self, venv_dir: &Path) -> std::result::Result<(), String> {
        let mut command = Command::new(&self.interpreter);
        command.arg("-m").arg("venv").arg(venv_dir);
        run_inherited(command, &format!("{} -m venv", self.interpreter))
    }

    fn install_dependencies(&self, pip: &Path, manifest: &Path) -> std::result::Result<(), String> {
        let mut command = Command::new(pip);
        command.arg("install").arg("-r").arg(manifest);
        run_inherited(command, "pip install")
    }
}

fn run_inherited(mut command: Command, label: &str) -> std::result::Result<(), String> {
    let status = command
        .status()
        .map_err(|err| format!("{}: {}", label, err))?;
    if status.success() {
        Ok(())
    } else {
        Err(format!("{} exited with {}", label, status))
    }
}

/// What a bootstrap run actually did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub environment_created: bool,
    pub dependencies_installed: bool,
}

pub struct Bootstrap {
    storage: StorageConfig,
    bundle: &'static [BundledFile],
    provisioner: Box<dyn Provisioner>,
}

impl Bootstrap {
    pub fn new(storage: StorageConfig, provisioner: Box<dyn Provisioner>) -> Self {
        Self {
            storage,
            bundle: WORKER_BUNDLE,
            provisioner,
        }
    }

    /// Replaces the embedded worker bundle.
    pub fn with_bundle(mut self, bundle: &'static [BundledFile]) -> Self {
        self.bundle = bundle;
        self
    }

    pub fn run(&self) -> Result<BootstrapReport> {
        self.ensure_runtime_dir()
            .map_err(|err| step_failed(BootstrapStep::RuntimeDir, err))?;
        self.write_bundle()
            .map_err(|err| step_failed(BootstrapStep::WorkerFiles, err))?;
        let environment_created = self
            .ensure_environment()
            .map_err(|details| YapError::Bootstrap {
                step: BootstrapStep::Environment,
                details,
            })?;
        let dependencies_installed =
            self.reconcile_dependencies()
                .map_err(|details| YapError::Bootstrap {
                    step: BootstrapStep::Dependencies,
                    details,
                })?;

        Ok(BootstrapReport {
            environment_created,
            dependencies_installed,
        })
    }

    fn ensure_runtime_dir(&self) -> io::Result<()> {
        fs::create_dir_all(self.storage.system_dir())
    }

    fn write_bundle(&self) -> io::Result<()> {
        let system_dir = self.storage.system_dir();
        for file in self.bundle {
            let target = system_dir.join(file.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, file.contents)?;
        }
        tracing::debug!(files = self.bundle.len(), "Worker files written");
        Ok(())
    }

    /// Existence check only; a broken environment is not detected here.
    fn ensure_environment(&self) -> std::result::Result<bool, String> {
        if self.storage.venv_python().exists() {
            return Ok(false);
        }

        tracing::info!(path = %self.storage.venv_dir().display(), "Creating interpreter environment");
        self.provisioner
            .create_environment(&self.storage.venv_dir())?;
        if !self.storage.venv_python().exists() {
            return Err(format!(
                "environment created but {} is missing",
                self.storage.venv_python().display()
            ));
        }
        Ok(true)
    }

    fn reconcile_dependencies(&self) -> std::result::Result<bool, String> {
        let manifest = self.storage.dependency_manifest();
        let marker = self.storage.installed_marker();

        let current = manifest_hash(&manifest).map_err(|err| err.to_string())?;
        let installed = read_marker(&marker).map_err(|err| err.to_string())?;
        if installed.as_deref() == Some(current.as_str()) {
            tracing::debug!(hash = %current, "Dependencies up to date");
            return Ok(false);
        }

        tracing::info!(
            previous = installed.as_deref().unwrap_or("none"),
            current = %current,
            "Installing worker dependencies"
        );
        self.provisioner
            .install_dependencies(&self.storage.venv_pip(), &manifest)?;
        fs::write(&marker, &current).map_err(|err| err.to_string())?;
        Ok(true)
    }
}

fn step_failed(step: BootstrapStep, err: io::Error) -> YapError {
    YapError::Bootstrap {
        step,
        details: err.to_string(),
    }
}

/// Lowercase hex SHA-256 of the file contents.
pub fn manifest_hash(path: &Path) -> io::Result<String> {
    let contents = fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&contents)))
}

fn read_marker(path: &Path) -> io::Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;

    /// Creates `bin/python` on demand and counts installs.
    #[derive(Clone, Default)]
    pub(crate) struct FakeProvisioner {
        pub environments: Arc<Mutex<u32>>,
        pub installs: Arc<Mutex<u32>>,
        pub fail_install: Arc<Mutex<bool>>,
        pub fail_environment: bool,
    }

    impl FakeProvisioner {
        pub(crate) fn install_count(&self) -> u32 {
            *self.installs.lock().unwrap()
        }
    }

    impl Provisioner for FakeProvisioner {
        fn create_environment(&self, venv_dir: &Path) -> std::result::Result<(), String> {
            if self.fail_environment {
                return Err("python3: not found".to_string());
            }
            *self.environments.lock().unwrap() += 1;
            let bin = venv_dir.join("bin");
            fs::create_dir_all(&bin).map_err(|e| e.to_string())?;
            fs::write(bin.join("python"), b"").map_err(|e| e.to_string())
        }

        fn install_dependencies(&self, _pip: &Path, manifest: &Path) -> std::result::Result<(), String> {
            assert!(manifest.exists(), "manifest must be written before install");
            *self.installs.lock().unwrap() += 1;
            if *self.fail_install.lock().unwrap() {
                Err("pip install exited with exit status: 1".to_string())
            } else {
                Ok(())
            }
        }
    }

    const SCRIPT: BundledFile = BundledFile {
        path: "main.py",
        contents: b"print('worker')\n",
    };
    const MANIFEST_V1: BundledFile = BundledFile {
        path: "requirements.txt",
        contents: b"numpy\n",
    };
    const MANIFEST_V2: BundledFile = BundledFile {
        path: "requirements.txt",
        contents: b"numpy\nfaster-whisper\n",
    };
    pub(crate) const BUNDLE_V1: &[BundledFile] = &[SCRIPT, MANIFEST_V1];
    const BUNDLE_V2: &[BundledFile] = &[SCRIPT, MANIFEST_V2];

    fn bootstrap(root: &Path, provisioner: &FakeProvisioner, bundle: &'static [BundledFile]) -> Bootstrap {
        Bootstrap::new(
            StorageConfig::with_root(root.to_path_buf()),
            Box::new(provisioner.clone()),
        )
        .with_bundle(bundle)
    }

    #[test]
    fn first_run_provisions_everything() {
        let temp = tempdir().unwrap();
        let provisioner = FakeProvisioner::default();

        let report = bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        assert_eq!(
            report,
            BootstrapReport {
                environment_created: true,
                dependencies_installed: true,
            }
        );

        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        assert_eq!(fs::read(storage.worker_script()).unwrap(), SCRIPT.contents);
        assert_eq!(
            fs::read_to_string(storage.installed_marker()).unwrap(),
            manifest_hash(&storage.dependency_manifest()).unwrap()
        );
    }

    #[test]
    fn unchanged_manifest_installs_once() {
        let temp = tempdir().unwrap();
        let provisioner = FakeProvisioner::default();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        let second = bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();

        assert_eq!(second, BootstrapReport::default());
        assert_eq!(provisioner.install_count(), 1);
        assert_eq!(*provisioner.environments.lock().unwrap(), 1);
    }

    #[test]
    fn changed_manifest_reinstalls_and_rewrites_marker() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let provisioner = FakeProvisioner::default();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        let old_marker = fs::read_to_string(storage.installed_marker()).unwrap();

        let report = bootstrap(temp.path(), &provisioner, BUNDLE_V2).run().unwrap();
        assert!(report.dependencies_installed);
        assert_eq!(provisioner.install_count(), 2);

        let new_marker = fs::read_to_string(storage.installed_marker()).unwrap();
        assert_ne!(old_marker, new_marker);
        assert_eq!(new_marker, hex::encode(Sha256::digest(MANIFEST_V2.contents)));
    }

    #[test]
    fn failed_install_keeps_stale_marker_and_retries() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let provisioner = FakeProvisioner::default();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        let old_marker = fs::read_to_string(storage.installed_marker()).unwrap();

        *provisioner.fail_install.lock().unwrap() = true;
        let err = bootstrap(temp.path(), &provisioner, BUNDLE_V2)
            .run()
            .unwrap_err();
        assert!(matches!(
            err,
            YapError::Bootstrap {
                step: BootstrapStep::Dependencies,
                ..
            }
        ));
        assert_eq!(
            fs::read_to_string(storage.installed_marker()).unwrap(),
            old_marker
        );

        *provisioner.fail_install.lock().unwrap() = false;
        bootstrap(temp.path(), &provisioner, BUNDLE_V2).run().unwrap();
        assert_eq!(provisioner.install_count(), 3);
    }

    #[test]
    fn environment_failure_names_the_step() {
        let temp = tempdir().unwrap();
        let provisioner = FakeProvisioner {
            fail_environment: true,
            ..FakeProvisioner::default()
        };

        let err = bootstrap(temp.path(), &provisioner, BUNDLE_V1)
            .run()
            .unwrap_err();
        assert!(err.to_string().contains("ensure interpreter environment"));
        assert_eq!(provisioner.install_count(), 0);
    }

    #[test]
    fn worker_files_are_overwritten_every_run() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let provisioner = FakeProvisioner::default();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        fs::write(storage.worker_script(), b"tampered").unwrap();
        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();

        assert_eq!(fs::read(storage.worker_script()).unwrap(), SCRIPT.contents);
    }

    #[test]
    fn marker_whitespace_is_ignored() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().to_path_buf());
        let provisioner = FakeProvisioner::default();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        let marker = fs::read_to_string(storage.installed_marker()).unwrap();
        fs::write(storage.installed_marker(), format!("{marker}\n")).unwrap();

        bootstrap(temp.path(), &provisioner, BUNDLE_V1).run().unwrap();
        assert_eq!(provisioner.install_count(), 1);
    }
}
