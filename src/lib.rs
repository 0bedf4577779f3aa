//! botdeploy library
//!
//! Provisions a remote host over SSH, transfers a Python bot over SFTP and
//! registers it as a systemd service with a restart-on-failure watcher.

pub mod cli;
pub mod config_file;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod process_guard;
pub mod remote_script;
pub mod secrets;
pub mod shell;
pub mod step_runner;
pub mod steps;
pub mod transport;
pub mod types;
pub mod units;
pub mod workflow;

pub use config_file::DeployConfig;
pub use error::{DeployError, PipelineError, TransportError};
pub use pipeline::{Job, JobOutcome, Pipeline, PipelineReport};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use remote_script::RemoteScript;
pub use secrets::SecretValues;
pub use step_runner::{RunOptions, StepOutput, run_remote_safe, run_upload_safe};
pub use transport::{CommandOutput, RemoteCommand, RemoteTarget, SshTransport, Transport, UploadPlan};
pub use types::{PackageManager, RestartPolicy, Stage};
pub use units::{ServiceUnits, UnitFile};
pub use workflow::{DeployWorkflow, StagePlan};
