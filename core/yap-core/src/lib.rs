//! Supervisor for the yap listening worker.
//!
//! Each `yap` command is a short-lived process. The only state shared between
//! invocations is the pid and state files managed by [`HandleStore`]; the
//! [`Supervisor`] re-validates them on every call.
//!
//! ## Modules
//!
//! - [`supervisor`]: start, pause, resume, stop and toggle
//! - [`bootstrap`]: idempotent provisioning of the worker environment
//! - [`typing`]: keystroke backend readiness and stale-socket repair
//! - [`notify`]: notification policy and delivery
//! - [`storage`]: every path the crate touches

pub mod bootstrap;
pub mod bundle;
pub mod config;
pub mod error;
pub mod handle;
pub mod models;
pub mod notify;
pub mod output;
pub mod process;
pub mod storage;
pub mod supervisor;
pub mod typing;
pub mod worker;

pub use bootstrap::{Bootstrap, BootstrapReport, BootstrapStep, Provisioner, VenvProvisioner};
pub use config::{Config, EffectiveStartOptions, StartOverrides};
pub use error::{Result, YapError};
pub use handle::{HandleStore, RuntimeState, WorkerHandle};
pub use models::installed_models;
pub use notify::{DesktopNotifier, NotificationEvent, NotificationSpec, Notifier, Urgency};
pub use output::read_output;
pub use process::{ProcessControl, SystemProcesses, WorkerSignal};
pub use storage::StorageConfig;
pub use supervisor::{StartOutcome, Supervisor, ToggleOutcome};
pub use typing::{TypingBackend, TypingReadiness};
pub use worker::{WorkerCommand, WorkerLauncher, WorkerProcess};
