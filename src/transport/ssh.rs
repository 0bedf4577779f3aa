//! OpenSSH client transport.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{CommandOutput, RemoteCommand, RemoteTarget, Transport, UploadPlan, resolve_program};
use crate::error::TransportError;
use crate::process_guard::{self, CommandProcessGroup};
use crate::shell::quote;

/// Transport that runs the system `ssh` and `sftp` binaries
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: RemoteTarget,
    ssh: String,
    sftp: String,
    /// How long a timed-out client gets between SIGTERM and SIGKILL
    kill_grace: Duration,
}

impl SshTransport {
    /// Resolve `ssh`/`sftp` from `BOTDEPLOY_SSH`/`BOTDEPLOY_SFTP` or PATH
    pub fn new(target: RemoteTarget) -> Result<Self, TransportError> {
        let ssh = resolve_program("ssh", "BOTDEPLOY_SSH")?;
        let sftp = resolve_program("sftp", "BOTDEPLOY_SFTP")?;
        Ok(Self::with_programs(target, ssh, sftp))
    }

    pub fn with_programs(
        target: RemoteTarget,
        ssh: impl Into<String>,
        sftp: impl Into<String>,
    ) -> Self {
        Self {
            target,
            ssh: ssh.into(),
            sftp: sftp.into(),
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    /// `ssh [opts] user@host "sh -c '<script>'"`
    fn ssh_command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.target.ssh_args())
            .arg(self.target.destination())
            .arg(format!("sh -c {}", quote(script)));
        cmd
    }

    /// `sftp [opts] -b - user@host`, batch read from stdin
    fn sftp_command(&self) -> Command {
        let mut cmd = Command::new(&self.sftp);
        cmd.args(self.target.sftp_args())
            .args(["-b", "-"])
            .arg(self.target.destination());
        cmd
    }
}

impl Transport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn execute(&self, command: &RemoteCommand) -> Result<CommandOutput, TransportError> {
        tracing::debug!(
            label = %command.label,
            destination = %self.target.destination(),
            "ssh exec"
        );
        run_child(
            "ssh",
            self.ssh_command(&command.script),
            command.stdin.as_deref(),
            command.timeout,
            self.kill_grace,
        )
    }

    fn upload(&self, plan: &UploadPlan) -> Result<CommandOutput, TransportError> {
        tracing::debug!(
            files = plan.files.len(),
            directories = plan.directories.len(),
            remote = %plan.remote_root,
            "sftp upload"
        );
        run_child(
            "sftp",
            self.sftp_command(),
            Some(&plan.batch_script()),
            None,
            self.kill_grace,
        )
    }
}

/// Spawn `cmd` in its own process group, feed `stdin`, capture output,
/// enforce `timeout`.
pub(crate) fn run_child(
    program: &str,
    mut cmd: Command,
    stdin: Option<&str>,
    timeout: Option<Duration>,
    kill_grace: Duration,
) -> Result<CommandOutput, TransportError> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .in_new_process_group();

    let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let pid = child.id();
    process_guard::register_child(pid);

    let result = supervise(program, &mut child, stdin, timeout, kill_grace);

    process_guard::unregister_child(pid);
    result
}

fn supervise(
    program: &str,
    child: &mut Child,
    stdin: Option<&str>,
    timeout: Option<Duration>,
    kill_grace: Duration,
) -> Result<CommandOutput, TransportError> {
    // Writer and readers run on their own threads so a chatty remote
    // command cannot deadlock against a full pipe.
    let writer = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(payload)) => {
            let payload = payload.to_owned();
            Some(thread::spawn(move || pipe.write_all(payload.as_bytes())))
        }
        _ => None,
    };
    let stdout = child.stdout.take().map(spawn_reader);
    let stderr = child.stderr.take().map(spawn_reader);

    let deadline = timeout.map(|t| Instant::now() + t);
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let (Some(deadline), Some(limit)) = (deadline, timeout) {
            if Instant::now() >= deadline {
                tracing::warn!(program, seconds = limit.as_secs(), "timeout, terminating");
                process_guard::terminate_group(child.id(), kill_grace);
                let _ = child.wait();
                let _ = collect(stdout);
                let _ = collect(stderr);
                return Err(TransportError::Timeout {
                    program: program.to_string(),
                    seconds: limit.as_secs(),
                });
            }
        }
        thread::sleep(Duration::from_millis(50));
    };

    if let Some(writer) = writer {
        if let Ok(Err(e)) = writer.join() {
            // The remote side may legitimately exit before reading everything
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                tracing::warn!(program, error = %e, "failed writing stdin");
            }
        }
    }

    Ok(CommandOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
        exit_code: status.code(),
        success: status.success(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn target() -> RemoteTarget {
        RemoteTarget {
            host: "example.org".to_string(),
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            options: vec![],
        }
    }

    #[test]
    fn run_child_captures_output_and_status() {
        let out = run_child(
            "sh",
            sh("echo out; echo err >&2; exit 3"),
            None,
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success);
    }

    #[test]
    fn run_child_pipes_stdin() {
        let out = run_child(
            "sh",
            sh("cat"),
            Some("bot_token = \"x\"\n"),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout, "bot_token = \"x\"\n");
    }

    #[test]
    fn run_child_enforces_timeout() {
        let start = Instant::now();
        let err = run_child(
            "sh",
            sh("sleep 30"),
            None,
            Some(Duration::from_millis(200)),
            Duration::from_millis(200),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn run_child_reports_spawn_failure() {
        let err = run_child(
            "nope",
            Command::new("/nonexistent/binary"),
            None,
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }));
    }

    #[test]
    fn ssh_command_wraps_script_in_sh() {
        let transport = SshTransport::with_programs(target(), "ssh", "sftp");
        let cmd = transport.ssh_command("echo 'hi'");
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();

        assert_eq!(args.last().unwrap(), "sh -c 'echo '\\''hi'\\'''");
        assert_eq!(args[args.len() - 2], "root@example.org");
        assert!(args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn sftp_command_reads_batch_from_stdin() {
        let transport = SshTransport::with_programs(target(), "ssh", "sftp");
        let cmd = transport.sftp_command();
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();

        let b = args.iter().position(|a| a == "-b").unwrap();
        assert_eq!(args[b + 1], "-");
        assert_eq!(args.last().unwrap(), "root@example.org");
    }
}
