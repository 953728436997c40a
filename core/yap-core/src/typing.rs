//! Readiness of the keystroke-injection backend.
//!
//! Only consulted when typing is enabled. The backend is chosen once from the
//! display session:
//!
//! - **Wayland**: `ydotool` needs the privileged `ydotoold` daemon. A daemon
//!   that died without cleaning up leaves `/tmp/.ydotool_socket` behind,
//!   which blocks a restart until it is removed with sudo.
//! - **X11** (and anything else): `xdotool` only has to be installed.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::error::{Result, YapError};

const YDOTOOL: &str = "ydotool";
const YDOTOOLD: &str = "ydotoold";
const XDOTOOL: &str = "xdotool";
const YDOTOOL_SOCKET: &str = "/tmp/.ydotool_socket";
const DAEMON_WORKDIR: &str = "/tmp";
const DAEMON_GRACE: Duration = Duration::from_millis(500);
const YDOTOOL_ISSUE_URL: &str = "https://github.com/ReimuNotMoe/ydotool/issues/99";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingBackend {
    /// Wayland: ydotool client plus ydotoold daemon.
    Ydotool,
    /// X11: xdotool, no daemon.
    Xdotool,
}

impl TypingBackend {
    /// Selects the backend from `XDG_SESSION_TYPE`.
    pub fn detect() -> Self {
        Self::for_session_type(env::var("XDG_SESSION_TYPE").ok().as_deref())
    }

    pub fn for_session_type(session_type: Option<&str>) -> Self {
        match session_type.map(str::to_ascii_lowercase).as_deref() {
            Some("wayland") => TypingBackend::Ydotool,
            _ => TypingBackend::Xdotool,
        }
    }

    fn required_tools(self) -> &'static [&'static str] {
        match self {
            TypingBackend::Ydotool => &[YDOTOOL, YDOTOOLD],
            TypingBackend::Xdotool => &[XDOTOOL],
        }
    }
}

/// System probes and actions the readiness check needs.
pub trait TypingHost {
    fn has_command(&self, name: &str) -> bool;

    fn daemon_running(&self) -> bool;

    fn stale_socket(&self) -> Option<PathBuf>;

    /// Removes the socket with elevated privileges (may prompt for a password).
    fn remove_socket(&self, path: &Path) -> std::result::Result<(), String>;

    /// Starts the daemon detached from this process.
    fn launch_daemon(&self) -> std::result::Result<(), String>;

    /// Installed ydotool package version, when the package manager knows it.
    fn ydotool_version(&self) -> Option<String>;
}

/// Asks the interactive user a yes/no question.
pub trait Prompter {
    fn confirm(&self, question: &str) -> bool;
}

pub struct TypingReadiness {
    backend: TypingBackend,
    host: Box<dyn TypingHost>,
    prompter: Box<dyn Prompter>,
    grace: Duration,
}

impl TypingReadiness {
    pub fn new(backend: TypingBackend, host: Box<dyn TypingHost>, prompter: Box<dyn Prompter>) -> Self {
        Self {
            backend,
            host,
            prompter,
            grace: DAEMON_GRACE,
        }
    }

    /// Production wiring: detected backend, real system, stdin prompt.
    pub fn system() -> Self {
        Self::new(
            TypingBackend::detect(),
            Box::new(SystemTypingHost),
            Box::new(TerminalPrompter),
        )
    }

    /// How long to wait after launching the daemon before re-checking.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn backend(&self) -> TypingBackend {
        self.backend
    }

    pub fn ensure_ready(&self) -> Result<()> {
        self.check_tools()?;
        if self.backend == TypingBackend::Xdotool {
            return Ok(());
        }

        if self.host.daemon_running() {
            tracing::debug!("ydotoold already running");
            return Ok(());
        }

        if let Some(socket) = self.host.stale_socket() {
            self.repair_stale_socket(&socket)?;
        }

        self.start_daemon()
    }

    fn check_tools(&self) -> Result<()> {
        let missing: Vec<&str> = self
            .backend
            .required_tools()
            .iter()
            .copied()
            .filter(|tool| !self.host.has_command(tool))
            .collect();

        if missing.is_empty() {
            return Ok(());
        }
        Err(YapError::TypingToolMissing {
            tools: missing.join(", "),
        })
    }

    fn repair_stale_socket(&self, socket: &Path) -> Result<()> {
        eprintln!("wayland input needs the ydotoold daemon, but a stale socket is blocking it:");
        eprintln!("  {}", socket.display());
        eprintln!("removing it once requires sudo; ydotoold starts automatically afterwards.");
        eprintln!();

        if !self.prompter.confirm("remove stale socket? [Y/n]: ") {
            tracing::info!(path = %socket.display(), "User declined stale socket removal");
            return Err(YapError::Cancelled);
        }

        self.host
            .remove_socket(socket)
            .map_err(|details| YapError::SocketCleanup { details })?;
        tracing::info!(path = %socket.display(), "Removed stale ydotoold socket");
        Ok(())
    }

    fn start_daemon(&self) -> Result<()> {
        self.host
            .launch_daemon()
            .map_err(|details| YapError::TypingDaemonFailed {
                daemon: YDOTOOLD.to_string(),
                hint: format!(": {}", details),
            })?;

        thread::sleep(self.grace);
        if self.host.daemon_running() {
            tracing::info!("ydotoold started");
            return Ok(());
        }

        Err(YapError::TypingDaemonFailed {
            daemon: YDOTOOLD.to_string(),
            hint: version_hint(self.host.ydotool_version().as_deref()),
        })
    }
}

/// ydotool 0.x is known to spam keystrokes or never start its daemon.
fn version_hint(version: Option<&str>) -> String {
    match version {
        Some(version) if version.starts_with("0.") => format!(
            " (ydotool {} is known to break; update to 1.0+ or start with --no-typing, see {})",
            version, YDOTOOL_ISSUE_URL
        ),
        _ => " (start with --no-typing to skip typing)".to_string(),
    }
}

/// Extracts the ydotool version column from `dpkg -l` output.
fn parse_dpkg_version(listing: &str) -> Option<String> {
    listing.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            [_, name, version, ..] if name.split(':').next() == Some(YDOTOOL) => {
                Some((*version).to_string())
            }
            _ => None,
        }
    })
}

/// Real system probes.
#[derive(Debug, Default)]
pub struct SystemTypingHost;

impl TypingHost for SystemTypingHost {
    fn has_command(&self, name: &str) -> bool {
        find_in_path(name).is_some()
    }

    fn daemon_running(&self) -> bool {
        use sysinfo::{ProcessRefreshKind, System};

        let mut sys = System::new();
        sys.refresh_processes_specifics(ProcessRefreshKind::new());
        let running = sys.processes_by_exact_name(YDOTOOLD).next().is_some();
        running
    }

    fn stale_socket(&self) -> Option<PathBuf> {
        let path = PathBuf::from(YDOTOOL_SOCKET);
        path.exists().then_some(path)
    }

    fn remove_socket(&self, path: &Path) -> std::result::Result<(), String> {
        let status = Command::new("sudo")
            .arg("rm")
            .arg(path)
            .status()
            .map_err(|err| format!("sudo rm: {}", err))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("sudo rm exited with {}", status))
        }
    }

    fn launch_daemon(&self) -> std::result::Result<(), String> {
        let mut child = Command::new("nohup")
            .arg(YDOTOOLD)
            .current_dir(DAEMON_WORKDIR)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| format!("nohup {}: {}", YDOTOOLD, err))?;

        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }

    fn ydotool_version(&self) -> Option<String> {
        let output = Command::new("dpkg").arg("-l").output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_dpkg_version(&String::from_utf8_lossy(&output.stdout))
    }
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Reads the answer from stdin. An empty line counts as yes; closed or
/// unreadable stdin counts as no.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str) -> bool {
        print!("{}", question);
        let _ = io::stdout().flush();
        read_answer(&mut io::stdin().lock())
    }
}

fn read_answer(input: &mut impl BufRead) -> bool {
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => is_affirmative(&answer),
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}
