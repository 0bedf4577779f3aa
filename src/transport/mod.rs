//! Remote transport
//!
//! Everything that touches the target host goes through the `Transport`
//! trait: shell commands over SSH and the source upload over SFTP. The
//! production implementation shells out to the OpenSSH client binaries;
//! tests substitute a recording fake.

mod program;
mod ssh;
mod upload;

pub use program::resolve_program;
pub use ssh::SshTransport;
pub use upload::{UploadPlan, sftp_quote};

use std::path::PathBuf;
use std::time::Duration;

use crate::error::TransportError;

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    /// Extra `-o` options, e.g. `ConnectTimeout=10`
    pub options: Vec<String>,
}

impl RemoteTarget {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Options for `ssh` (port flag `-p`)
    pub fn ssh_args(&self) -> Vec<String> {
        self.common_args("-p")
    }

    /// Options for `sftp` (port flag `-P`)
    pub fn sftp_args(&self) -> Vec<String> {
        self.common_args("-P")
    }

    fn common_args(&self, port_flag: &str) -> Vec<String> {
        let mut args = vec![port_flag.to_string(), self.port.to_string()];
        if let Some(ref identity) = self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        // Never prompt: a deploy runs unattended
        for opt in ["BatchMode=yes", "StrictHostKeyChecking=accept-new"]
            .into_iter()
            .map(str::to_string)
            .chain(self.options.iter().cloned())
        {
            args.push("-o".to_string());
            args.push(opt);
        }
        args
    }
}

/// A script to run with `sh -c` on the remote host
#[derive(Clone)]
pub struct RemoteCommand {
    /// Short name used in logs
    pub label: String,
    pub script: String,
    /// Payload piped to the remote script's stdin
    pub stdin: Option<String>,
    pub timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCommand")
            .field("label", &self.label)
            .field("script", &self.script)
            .field("stdin", &self.stdin.as_ref().map(|s| format!("<{} bytes>", s.len())))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured result of a transport invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by signal
    pub exit_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    /// A successful, empty result
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            success: true,
            ..Self::default()
        }
    }

    /// A failed result with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code: Some(code),
            success: false,
            ..Self::default()
        }
    }
}

/// Remote execution seam
///
/// Implementations must be shareable across the threads of a pipeline wave.
pub trait Transport: Send + Sync {
    /// Name of the transport (for logging)
    fn name(&self) -> &'static str;

    /// Run a shell script on the remote host
    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, TransportError>;

    /// Copy the planned files to the remote host
    fn upload(&self, plan: &UploadPlan) -> Result<CommandOutput, TransportError>;
}
