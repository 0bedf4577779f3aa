//! Step execution
//!
//! Every remote stage goes through `run_remote_safe`, and the source upload
//! through `run_upload_safe`. Both log what they run (with secret payloads
//! replaced by their redacted form), honour dry-run and time the call.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::remote_script::RemoteScript;
use crate::transport::{CommandOutput, Transport, UploadPlan};

/// Knobs shared by every step of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Log and report success without touching the remote host
    pub dry_run: bool,
    /// Run independent jobs of a wave on separate threads
    pub parallel: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            parallel: true,
        }
    }
}

/// Result of one step
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    /// None if terminated by signal
    pub exit_code: Option<i32>,
    pub success: bool,
    /// True when nothing was actually run
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl StepOutput {
    fn from_command(output: CommandOutput, elapsed: Duration) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            success: output.success,
            dry_run: false,
            elapsed,
        }
    }

    fn skipped_by_dry_run() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            success: true,
            dry_run: true,
            elapsed: Duration::ZERO,
        }
    }

    /// Turn a non-zero exit into a `DeployError::Step`
    pub fn ensure_success(&self, context: &str) -> Result<()> {
        if self.success {
            return Ok(());
        }
        let code = self
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            Err(DeployError::step(format!("{} failed (exit code {})", context, code)))
        } else {
            Err(DeployError::step(format!(
                "{} failed (exit code {}): {}",
                context, code, stderr
            )))
        }
    }
}

/// Run a typed remote script through `transport`.
///
/// Transport failures (ssh missing, timeout) are errors; a script that ran
/// and exited non-zero is an `Ok` output with `success == false`.
pub fn run_remote_safe<S: RemoteScript + ?Sized>(
    transport: &dyn Transport,
    script: &S,
    options: &RunOptions,
) -> Result<StepOutput> {
    let command = script.to_command();

    info!(
        step = script.name(),
        transport = transport.name(),
        destructive = script.is_destructive(),
        timeout_secs = command.timeout.map(|t| t.as_secs()),
        "running remote step"
    );
    debug!(step = script.name(), script = %command.script, "remote script");
    if let Some(payload) = script.redacted_stdin() {
        debug!(step = script.name(), stdin = %payload, "remote stdin");
    }

    if options.dry_run {
        info!(step = script.name(), "dry run: not executed");
        return Ok(StepOutput::skipped_by_dry_run());
    }

    let started = Instant::now();
    let output = transport.execute(&command)?;
    let output = StepOutput::from_command(output, started.elapsed());
    log_result(script.name(), &output);
    Ok(output)
}

/// Upload the planned source tree through `transport`.
pub fn run_upload_safe(
    transport: &dyn Transport,
    plan: &UploadPlan,
    options: &RunOptions,
) -> Result<StepOutput> {
    info!(
        step = "transfer",
        transport = transport.name(),
        files = plan.files.len(),
        directories = plan.directories.len(),
        remote = %plan.remote_root,
        "uploading source"
    );
    debug!(step = "transfer", batch = %plan.batch_script(), "sftp batch");

    if options.dry_run {
        info!(step = "transfer", "dry run: not executed");
        return Ok(StepOutput::skipped_by_dry_run());
    }

    let started = Instant::now();
    let output = transport.upload(plan)?;
    let output = StepOutput::from_command(output, started.elapsed());
    log_result("transfer", &output);
    Ok(output)
}

fn log_result(step: &str, output: &StepOutput) {
    if output.success {
        info!(step, elapsed_ms = output.elapsed.as_millis() as u64, "step succeeded");
    } else {
        warn!(
            step,
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "step failed"
        );
    }
}
