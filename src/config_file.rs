//! Deployment configuration file handling.
//!
//! The config is a JSON document describing the target host, where the
//! repository lands, how the runtime is provisioned and which secrets are
//! written. Secret *values* never live here, only the environment variables
//! they are read from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::shell::join_remote;
use crate::transport::RemoteTarget;
use crate::types::{PackageManager, RestartPolicy};

/// Deployment configuration that can be saved/loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Repository name; names the remote directory and the service
    pub repository: String,
    pub target: TargetConfig,

    /// Directory on the remote host that holds the repository directory
    #[serde(default = "default_remote_root")]
    pub remote_root: String,
    /// Local directory whose contents are transferred
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// Extra gitignore-style patterns excluded from the transfer
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default = "default_requirements_file")]
    pub requirements_file: String,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,

    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Directory the unit files are installed into
    #[serde(default = "default_unit_dir")]
    pub unit_dir: String,
    /// User the bot process runs as
    #[serde(default = "default_service_user")]
    pub service_user: String,
    /// Overrides the generated unit `Description=`
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default = "default_restart_sec")]
    pub restart_sec: u32,

    /// Upper bound for the dependency installation stage
    #[serde(default = "default_dependency_timeout")]
    pub dependency_timeout_secs: u64,
}

/// SSH connection details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub host: String,
    pub user: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Additional `-o Key=Value` options passed to ssh and sftp
    #[serde(default)]
    pub ssh_options: Vec<String>,
}

/// How the interpreter is provisioned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub package_manager: PackageManager,
    /// Packages installed when the interpreter or venv is missing.
    /// Defaults to the package manager's python set.
    #[serde(default)]
    pub packages: Option<Vec<String>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            package_manager: PackageManager::default(),
            packages: None,
        }
    }
}

impl RuntimeConfig {
    pub fn packages(&self) -> Vec<String> {
        self.packages
            .clone()
            .unwrap_or_else(|| self.package_manager.default_python_packages())
    }
}

/// Secrets file layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// File name relative to the remote repository directory
    #[serde(default = "default_secrets_file")]
    pub file: String,
    #[serde(default = "default_secret_keys")]
    pub keys: Vec<SecretKey>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            file: default_secrets_file(),
            keys: default_secret_keys(),
        }
    }
}

/// One key of the secrets file and the environment variable holding its value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey {
    pub name: String,
    pub env: String,
}

impl SecretKey {
    pub fn new(name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: env.into(),
        }
    }
}

fn default_remote_root() -> String {
    "/root".to_string()
}
fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_requirements_file() -> String {
    "requirements.txt".to_string()
}
fn default_entry_point() -> String {
    "launcher.py".to_string()
}
fn default_unit_dir() -> String {
    crate::units::UNIT_DIR.to_string()
}

fn default_service_user() -> String {
    "root".to_string()
}
fn default_restart_sec() -> u32 {
    5
}
fn default_dependency_timeout() -> u64 {
    600
}
fn default_port() -> u16 {
    22
}
fn default_interpreter() -> String {
    "python3".to_string()
}
fn default_secrets_file() -> String {
    "config.py".to_string()
}
fn default_secret_keys() -> Vec<SecretKey> {
    vec![
        SecretKey::new("bot_token", "BOT_TOKEN"),
        SecretKey::new("mongo_uri", "MONGO_URI"),
    ]
}

impl DeployConfig {
    /// A starting point for `botdeploy init`
    pub fn example() -> Self {
        Self {
            repository: "GoLiveGuardian".to_string(),
            target: TargetConfig {
                host: "203.0.113.10".to_string(),
                user: "root".to_string(),
                port: default_port(),
                identity_file: Some(PathBuf::from("~/.ssh/id_ed25519")),
                ssh_options: Vec::new(),
            },
            remote_root: default_remote_root(),
            source_dir: default_source_dir(),
            exclude: vec!["*.log".to_string(), "__pycache__/".to_string()],
            runtime: RuntimeConfig::default(),
            requirements_file: default_requirements_file(),
            entry_point: default_entry_point(),
            secrets: SecretsConfig::default(),
            unit_dir: default_unit_dir(),
            service_user: default_service_user(),
            description: None,
            restart_policy: RestartPolicy::default(),
            restart_sec: default_restart_sec(),
            dependency_timeout_secs: default_dependency_timeout(),
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .context("Failed to serialize configuration to JSON")?;

        fs::write(&path, json)
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Absolute path of the repository on the remote host
    pub fn remote_path(&self) -> String {
        join_remote(&self.remote_root, &self.repository)
    }

    /// systemd service name derived from the repository
    pub fn service_name(&self) -> String {
        sanitize_service_name(&self.repository)
    }

    /// Unit `Description=`
    pub fn description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("{} bot", self.repository))
    }

    /// SSH target built from the `target` section
    pub fn target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.target.host.clone(),
            user: self.target.user.clone(),
            port: self.target.port,
            identity_file: self.target.identity_file.as_deref().map(expand_home),
            options: self.target.ssh_options.clone(),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.target.host.trim().is_empty() {
            anyhow::bail!("Target host must be specified");
        }
        if self.target.user.trim().is_empty() {
            anyhow::bail!("Target user must be specified");
        }
        if self.target.port == 0 {
            anyhow::bail!("Target port must be between 1 and 65535");
        }

        let repository = self.repository.trim();
        if repository.is_empty() {
            anyhow::bail!("Repository name must be specified");
        }
        if repository.contains('/') || repository == "." || repository == ".." {
            anyhow::bail!("Repository name must be a single path component");
        }
        if self.service_name().is_empty() {
            anyhow::bail!(
                "Repository name '{}' does not yield a usable service name",
                self.repository
            );
        }

        // The clean stage runs `rm -rf` on the remote path
        if !self.remote_root.starts_with('/') {
            anyhow::bail!("Remote root must be an absolute path");
        }
        if self.remote_root.split('/').any(|seg| seg == "..") {
            anyhow::bail!("Remote root cannot contain '..' segments");
        }
        if self.remote_path().trim_end_matches('/').is_empty() {
            anyhow::bail!("Remote path cannot be the filesystem root");
        }

        if self.entry_point.trim().is_empty() {
            anyhow::bail!("Entry point must be specified");
        }
        if self.requirements_file.trim().is_empty() {
            anyhow::bail!("Requirements file must be specified");
        }
        if !self.unit_dir.starts_with('/') {
            anyhow::bail!("Unit directory must be an absolute path");
        }
        if self.service_user.trim().is_empty() {
            anyhow::bail!("Service user must be specified");
        }
        if self.runtime.interpreter.trim().is_empty() {
            anyhow::bail!("Runtime interpreter must be specified");
        }
        if self.dependency_timeout_secs == 0 {
            anyhow::bail!("Dependency timeout must be greater than zero");
        }

        self.validate_unit_values()?;
        self.validate_secrets()
    }

    /// Values interpolated into unit files must not split `ExecStart=`
    /// arguments, start a new directive or expand as a `%` specifier.
    fn validate_unit_values(&self) -> Result<()> {
        for (field, value) in [
            ("Remote root", self.remote_root.as_str()),
            ("Repository name", self.repository.as_str()),
            ("Entry point", self.entry_point.as_str()),
            ("Service user", self.service_user.as_str()),
        ] {
            if let Some(c) = value.chars().find(|c| c.is_whitespace() || c.is_control() || *c == '%') {
                anyhow::bail!("{} cannot contain {:?}", field, c);
            }
        }
        if let Some(description) = &self.description {
            if let Some(c) = description.chars().find(|c| c.is_control() || *c == '%') {
                anyhow::bail!("Description cannot contain {:?}", c);
            }
        }
        Ok(())
    }

    fn validate_secrets(&self) -> Result<()> {
        let file = self.secrets.file.trim();
        if file.is_empty() {
            anyhow::bail!("Secrets file name must be specified");
        }
        if file.contains('/') || file == "." || file == ".." {
            anyhow::bail!("Secrets file must live directly in the repository directory");
        }

        let mut seen = HashSet::new();
        for key in &self.secrets.keys {
            if !is_identifier(&key.name) {
                anyhow::bail!("Secret key '{}' is not a valid identifier", key.name);
            }
            if !seen.insert(key.name.as_str()) {
                anyhow::bail!("Secret key '{}' is declared twice", key.name);
            }
            if key.env.trim().is_empty() {
                anyhow::bail!("Secret key '{}' has no environment variable", key.name);
            }
        }
        Ok(())
    }
}

/// Lowercase, `[a-z0-9_-]` only, no leading/trailing or doubled dashes.
pub fn sanitize_service_name(repository: &str) -> String {
    let mut name = String::with_capacity(repository.len());
    for c in repository.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' };
        if c == '-' && (name.is_empty() || name.ends_with('-')) {
            continue;
        }
        name.push(c);
    }
    while name.ends_with('-') {
        name.pop();
    }
    name
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}
