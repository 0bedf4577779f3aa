//! End-to-end tests for the OpenSSH transport
//!
//! `ssh`, `sftp`, the interpreter and `systemctl` are replaced by small
//! shell scripts so the whole pipeline runs against a temporary directory
//! standing in for the remote host.
//!
//! These tests verify:
//! - The six stages produce the expected remote tree, secrets file and units
//! - A stage timeout takes down the ssh client's whole process group

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use botdeploy::config_file::DeployConfig;
use botdeploy::error::TransportError;
use botdeploy::secrets::SecretValues;
use botdeploy::step_runner::RunOptions;
use botdeploy::transport::{RemoteCommand, SshTransport, Transport};
use botdeploy::workflow::DeployWorkflow;
use tempfile::TempDir;

/// Helper: check if a process is alive (not dead or zombie)
fn is_process_alive(pid: i32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    if signal::kill(Pid::from_raw(pid), None).is_err() {
        return false;
    }
    if let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }
    true
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// A fake host: `bin/` holds the stand-in programs, `host/` is the remote filesystem
struct FakeHost {
    dir: TempDir,
}

impl FakeHost {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let host = Self { dir };
        fs::create_dir_all(host.bin()).unwrap();
        fs::create_dir_all(host.root().join("units")).unwrap();

        // ssh: run the last argument (`sh -c '<script>'`) locally
        write_executable(
            &host.bin().join("ssh"),
            &format!(
                "#!/bin/sh\nfor last; do :; done\nPATH='{}':\"$PATH\"\nexport PATH\nexec sh -c \"$last\"\n",
                host.bin().display()
            ),
        );

        // sftp: interpret the `-mkdir` and `put` lines of the batch on stdin
        write_executable(
            &host.bin().join("sftp"),
            "#!/bin/sh\n\
             while IFS= read -r line; do\n\
               eval \"set -- $line\"\n\
               case \"$1\" in\n\
                 -mkdir) mkdir -p \"$2\" ;;\n\
                 put) cp \"$2\" \"$3\" || exit 1 ;;\n\
               esac\n\
             done\n",
        );

        // python: answers the runtime probes and builds a venv with a logging pip
        write_executable(
            &host.bin().join("fakepython"),
            &format!(
                "#!/bin/sh\n\
                 case \"$1 $2\" in\n\
                   '-m venv')\n\
                     [ \"$3\" = --help ] && exit 0\n\
                     mkdir -p \"$3/bin\"\n\
                     printf '#!/bin/sh\\necho \"$*\" >> {log}\\n' > \"$3/bin/pip\"\n\
                     chmod +x \"$3/bin/pip\" ;;\n\
                   '-m ensurepip') exit 0 ;;\n\
                   '--version '*) echo 'Python 3.12.0' ;;\n\
                 esac\n",
                log = host.root().join("pip.log").display()
            ),
        );

        write_executable(
            &host.bin().join("systemctl"),
            &format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\n",
                host.root().join("systemctl.log").display()
            ),
        );

        host
    }

    fn bin(&self) -> PathBuf {
        self.dir.path().join("bin")
    }

    fn root(&self) -> PathBuf {
        self.dir.path().join("host")
    }

    fn transport(&self, config: &DeployConfig) -> SshTransport {
        SshTransport::with_programs(
            config.target(),
            self.bin().join("ssh").display().to_string(),
            self.bin().join("sftp").display().to_string(),
        )
    }

    fn config(&self, source: &Path) -> DeployConfig {
        let mut config = DeployConfig::example();
        config.target.identity_file = None;
        config.source_dir = source.to_path_buf();
        config.remote_root = self.root().display().to_string();
        config.unit_dir = self.root().join("units").display().to_string();
        config.runtime.interpreter = self.bin().join("fakepython").display().to_string();
        config
    }
}

fn source_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    fs::write(root.join("launcher.py"), "import config\n").unwrap();
    fs::write(root.join("requirements.txt"), "pyrogram\npymongo\n").unwrap();
    fs::create_dir_all(root.join("cogs")).unwrap();
    fs::write(root.join("cogs/live.py"), "# cog\n").unwrap();
    fs::write(root.join("error.log"), "noise").unwrap();
    dir
}

#[test]
fn test_full_deploy_through_fake_ssh() {
    let host = FakeHost::new();
    let source = source_tree();
    let config = host.config(source.path());
    config.validate().unwrap();

    // stale file from a previous deploy, removed by the clean stage
    let remote = PathBuf::from(config.remote_path());
    fs::create_dir_all(&remote).unwrap();
    fs::write(remote.join("stale.py"), "old").unwrap();

    let secrets = SecretValues::new(vec![
        ("bot_token".to_string(), "42:tok\"en".to_string()),
        ("mongo_uri".to_string(), "mongodb://db".to_string()),
    ]);
    let workflow = DeployWorkflow::from_config(&config, secrets);
    let transport = host.transport(&config);
    let report = workflow.run(&transport, &RunOptions::default()).unwrap();
    assert!(report.is_success(), "{}", report);

    // transfer (the `*.log` exclude comes from the example config)
    assert!(!remote.join("stale.py").exists());
    assert_eq!(fs::read_to_string(remote.join("launcher.py")).unwrap(), "import config\n");
    assert!(remote.join("cogs/live.py").exists());
    assert!(!remote.join("error.log").exists());

    // dependencies
    let pip_log = fs::read_to_string(host.root().join("pip.log")).unwrap();
    assert!(pip_log.contains("install --quiet --upgrade pip"));
    assert!(pip_log.contains(&format!("install --quiet -r {}/requirements.txt", remote.display())));

    // secrets
    let secrets_file = remote.join("config.py");
    assert_eq!(
        fs::read_to_string(&secrets_file).unwrap(),
        "bot_token = \"42:tok\\\"en\"\nmongo_uri = \"mongodb://db\"\n"
    );
    let mode = fs::metadata(&secrets_file).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    // services
    let units = host.root().join("units");
    let main = fs::read_to_string(units.join("goliveguardian.service")).unwrap();
    assert!(main.contains(&format!("WorkingDirectory={}", remote.display())));
    assert!(main.contains("OnFailure=goliveguardian-watcher.service"));
    let watcher = fs::read_to_string(units.join("goliveguardian-watcher.service")).unwrap();
    assert!(watcher.contains("ExecStart=/bin/systemctl restart goliveguardian.service"));
    assert_eq!(
        fs::read_to_string(host.root().join("systemctl.log")).unwrap(),
        "daemon-reload\nenable goliveguardian.service\nrestart goliveguardian.service\n"
    );
}

#[test]
fn test_timeout_kills_client_process_group() {
    let host = FakeHost::new();
    let source = source_tree();
    let config = host.config(source.path());
    let transport = host.transport(&config);
    let pid_file = host.root().join("sleeper.pid");

    let command = RemoteCommand {
        label: "hang".to_string(),
        script: format!("sleep 1000 & echo $! > '{}'; wait", pid_file.display()),
        stdin: None,
        timeout: Some(Duration::from_millis(500)),
    };

    let start = Instant::now();
    let err = transport.execute(&command).unwrap_err();
    assert!(matches!(err, TransportError::Timeout { .. }), "{}", err);
    assert!(start.elapsed() < Duration::from_secs(10));

    let pid: i32 = fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    while is_process_alive(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(!is_process_alive(pid), "background sleep {} survived the timeout", pid);
}

#[test]
fn test_failed_stage_reports_stderr() {
    let host = FakeHost::new();
    let source = source_tree();
    let mut config = host.config(source.path());
    // no interpreter and nothing to install: the runtime stage must fail
    config.runtime.interpreter = host.bin().join("missing-python").display().to_string();
    config.runtime.packages = Some(Vec::new());

    let workflow = DeployWorkflow::from_config(&config, SecretValues::placeholders(&config.secrets));
    let report = workflow
        .run(&host.transport(&config), &RunOptions::default())
        .unwrap();

    assert!(!report.is_success());
    let failed = report.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].name, "runtime");
    assert!(failed[0].outcome.to_string().contains("runtime missing"));
}
