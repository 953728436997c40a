use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A stand-in worker that ignores pause/resume and dies on SIGTERM.
struct FakeWorker {
    child: Option<Child>,
}

impl FakeWorker {
    fn spawn() -> Self {
        let child = Command::new("sh")
            .args(["-c", "trap '' USR1 USR2; exec sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("Failed to spawn fake worker");
        // Let the trap install before anything signals it.
        thread::sleep(Duration::from_millis(200));
        Self { child: Some(child) }
    }

    fn pid(&self) -> u32 {
        self.child.as_ref().map(Child::id).unwrap_or_default()
    }

    fn take(&mut self) -> Child {
        self.child.take().expect("worker already taken")
    }
}

impl Drop for FakeWorker {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn yap_home() -> TempDir {
    let home = TempDir::new().expect("Failed to create temp dir");
    let config_dir = home.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), "notifications = \"disabled\"\n").unwrap();
    home
}

fn yap(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_yap"))
        .args(args)
        .env("YAP_HOME", home)
        .env_remove("YAP_DEBUG_LOG")
        .stdin(Stdio::null())
        .output()
        .expect("Failed to run yap")
}

fn pid_file(home: &Path) -> PathBuf {
    home.join("run").join("yap.pid")
}

fn state_file(home: &Path) -> PathBuf {
    home.join("run").join("yap-state")
}

fn write_pid(home: &Path, pid: u32) {
    std::fs::create_dir_all(home.join("run")).unwrap();
    std::fs::write(pid_file(home), pid.to_string()).unwrap();
}

fn read_state(home: &Path) -> String {
    std::fs::read_to_string(state_file(home)).unwrap_or_default()
}

fn dead_pid() -> u32 {
    let mut child = Command::new("true").spawn().expect("Failed to spawn true");
    let pid = child.id();
    child.wait().unwrap();
    pid
}

#[test]
fn pause_without_worker_reports_not_running() {
    let home = yap_home();

    let output = yap(home.path(), &["pause"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not running"));
    assert!(!state_file(home.path()).exists());
    assert!(!pid_file(home.path()).exists());
}

#[test]
fn stale_pid_file_is_removed() {
    let home = yap_home();
    write_pid(home.path(), dead_pid());

    let output = yap(home.path(), &["resume"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(!pid_file(home.path()).exists());
}

#[test]
fn toggle_flips_a_running_worker() {
    let home = yap_home();
    let worker = FakeWorker::spawn();
    write_pid(home.path(), worker.pid());

    let first = yap(home.path(), &["toggle"]);
    assert!(first.status.success(), "{:?}", first);
    assert_eq!(read_state(home.path()), "paused");

    let second = yap(home.path(), &["toggle"]);
    assert!(second.status.success(), "{:?}", second);
    assert_eq!(read_state(home.path()), "active");
}

#[test]
fn pause_and_resume_record_state() {
    let home = yap_home();
    let worker = FakeWorker::spawn();
    write_pid(home.path(), worker.pid());

    assert!(yap(home.path(), &["pause"]).status.success());
    assert_eq!(read_state(home.path()), "paused");

    assert!(yap(home.path(), &["resume"]).status.success());
    assert_eq!(read_state(home.path()), "active");
}

#[test]
fn stop_terminates_worker_and_clears_files() {
    let home = yap_home();
    let mut worker = FakeWorker::spawn();
    write_pid(home.path(), worker.pid());
    assert!(yap(home.path(), &["pause"]).status.success());

    // Reap concurrently so the pid disappears within the stop grace period.
    let mut child = worker.take();
    let reaper = thread::spawn(move || child.wait().unwrap());

    let started = Instant::now();
    let output = yap(home.path(), &["kill"]);
    assert!(output.status.success(), "{:?}", output);
    assert!(started.elapsed() < Duration::from_secs(5));

    let status = reaper.join().unwrap();
    assert_eq!(status.signal(), Some(libc::SIGTERM));
    assert!(!pid_file(home.path()).exists());
    assert!(!state_file(home.path()).exists());

    let again = yap(home.path(), &["stop"]);
    assert_eq!(again.status.code(), Some(1));
}

#[test]
fn models_lists_cached_models() {
    let home = yap_home();
    let output = yap(home.path(), &["models"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "no models installed");

    let hub = home.path().join("cache/huggingface/hub");
    std::fs::create_dir_all(hub.join("models--Systran--faster-whisper-tiny")).unwrap();
    let output = yap(home.path(), &["models"]);
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "installed: tiny");
}

#[test]
fn output_requires_opt_in() {
    let home = yap_home();

    let output = yap(home.path(), &["output"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("output file is disabled"));
}

#[test]
fn version_prints_package_version() {
    let home = yap_home();
    let output = yap(home.path(), &["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn conflicting_device_flags_are_rejected() {
    let home = yap_home();

    let output = yap(home.path(), &["start", "--gpu", "--cpu"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot be used with"));
    assert!(!pid_file(home.path()).exists());
}
