//! yap: voice typing in the background.
//!
//! ## Subcommands
//!
//! - `start`: provision the environment and run the listening worker (blocks)
//! - `toggle`: start when stopped, otherwise flip between paused and listening
//! - `pause` / `resume` / `stop`: signal the running worker
//! - `models`, `config`, `output`, `version`: housekeeping

mod logging;

use clap::{Args, Parser, Subcommand};
use std::env;
use std::process::Command;
use yap_core::{
    installed_models, read_output, Config, StartOutcome, StartOverrides, StorageConfig, Supervisor,
    ToggleOutcome, YapError,
};

const DEFAULT_EDITOR: &str = "vim";

#[derive(Parser)]
#[command(name = "yap")]
#[command(about = "Voice typing for Linux")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start listening (runs until stopped)
    Start(StartArgs),

    /// Start, or pause/resume if already running
    Toggle(StartArgs),

    /// Pause listening, keeping the model loaded
    Pause,

    /// Resume listening
    Resume,

    /// Stop the worker
    #[command(visible_alias = "kill")]
    Stop,

    /// List downloaded speech models
    Models,

    /// Open config.toml in $EDITOR
    Config,

    /// Print the transcript of the last session
    Output,

    /// Print the version
    Version,
}

#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Speech model (tiny, base, small, medium, large-v3)
    #[arg(long)]
    model: Option<String>,

    /// Inference device (cpu, cuda)
    #[arg(long, conflicts_with_all = ["gpu", "cpu"])]
    device: Option<String>,

    /// Spoken language code
    #[arg(long, visible_alias = "lang")]
    language: Option<String>,

    /// Trade accuracy for speed
    #[arg(long)]
    fast: bool,

    /// Transcribe without typing into the focused window
    #[arg(long)]
    no_typing: bool,

    /// Same as --device cuda
    #[arg(long, visible_alias = "cuda", conflicts_with = "cpu")]
    gpu: bool,

    /// Same as --device cpu
    #[arg(long)]
    cpu: bool,
}

impl StartArgs {
    fn into_overrides(self) -> StartOverrides {
        let device = if self.gpu {
            Some("cuda".to_string())
        } else if self.cpu {
            Some("cpu".to_string())
        } else {
            self.device
        };

        StartOverrides {
            model: self.model,
            device,
            language: self.language,
            fast: self.fast,
            no_typing: self.no_typing,
        }
    }
}

fn main() {
    let storage = StorageConfig::from_env();
    let _logging_guard = logging::init(storage.as_ref().ok());
    let cli = Cli::parse();

    if let Err(e) = storage.and_then(|storage| run(cli.command, &storage)) {
        tracing::error!(error = %e, "yap command failed");
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(command: Commands, storage: &StorageConfig) -> yap_core::Result<()> {
    match command {
        Commands::Start(args) => {
            let outcome = supervisor(storage).start(&args.into_overrides())?;
            report_start(outcome);
        }
        Commands::Toggle(args) => match supervisor(storage).toggle(&args.into_overrides())? {
            ToggleOutcome::Started(outcome) => report_start(outcome),
            ToggleOutcome::Paused(handle) => tracing::info!(pid = handle.pid, "Paused via toggle"),
            ToggleOutcome::Resumed(handle) => tracing::info!(pid = handle.pid, "Resumed via toggle"),
        },
        Commands::Pause => {
            supervisor(storage).pause()?;
        }
        Commands::Resume => {
            supervisor(storage).resume()?;
        }
        Commands::Stop => {
            supervisor(storage).stop()?;
        }
        Commands::Models => {
            let models = installed_models(storage.model_cache_dir());
            if models.is_empty() {
                println!("no models installed");
            } else {
                println!("installed: {}", models.join(", "));
            }
        }
        Commands::Config => edit_config(storage)?,
        Commands::Output => {
            let config = Config::load(&storage.config_file());
            print!("{}", read_output(&config, storage)?);
        }
        Commands::Version => println!("yap {}", env!("CARGO_PKG_VERSION")),
    }
    Ok(())
}

fn supervisor(storage: &StorageConfig) -> Supervisor {
    let config = Config::load(&storage.config_file());
    Supervisor::new(storage.clone(), config)
}

fn report_start(outcome: StartOutcome) {
    match outcome {
        StartOutcome::AlreadyRunning { pid } => println!("already running (pid {})", pid),
        StartOutcome::Exited { pid, code } => match code {
            Some(0) | None => tracing::debug!(pid, ?code, "Worker finished"),
            Some(code) => eprintln!("worker exited with status {}", code),
        },
    }
}

/// Writes the default config if needed, then hands it to `$EDITOR`.
fn edit_config(storage: &StorageConfig) -> yap_core::Result<()> {
    let path = storage.config_file();
    if Config::write_default_if_missing(&path)? {
        tracing::info!(path = %path.display(), "Wrote default config");
    }

    let editor = env::var("EDITOR")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_EDITOR.to_string());
    let mut words = editor.split_whitespace();
    let program = words.next().unwrap_or(DEFAULT_EDITOR);

    let status = Command::new(program)
        .args(words)
        .arg(&path)
        .status()
        .map_err(|err| YapError::CommandFailed {
            command: editor.clone(),
            details: format!("failed to open editor: {}", err),
        })?;

    if !status.success() {
        return Err(YapError::CommandFailed {
            command: editor,
            details: format!("editor exited with {}", status),
        });
    }
    Ok(())
}
