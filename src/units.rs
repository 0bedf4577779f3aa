//! systemd unit generation for the bot and its restart watcher.

use std::fmt;

use crate::config_file::DeployConfig;
use crate::shell::join_remote;

/// Default directory units are installed into on the remote host
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// An INI-style unit file with ordered sections and keys
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitFile {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `key=value` to `section`, creating the section on first use
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        match self.sections.iter_mut().find(|(name, _)| name == section) {
            Some((_, entries)) => entries.push((key.to_string(), value)),
            None => self
                .sections
                .push((section.to_string(), vec![(key.to_string(), value)])),
        }
        self
    }

    /// First value of `key` in `section`
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(name, _)| name == section)
            .and_then(|(_, entries)| entries.iter().find(|(k, _)| k == key))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|(name, _)| name == section)
    }

    /// File contents as installed on the host
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for UnitFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, entries)) in self.sections.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", name)?;
            for (key, value) in entries {
                writeln!(f, "{}={}", key, value)?;
            }
        }
        Ok(())
    }
}

/// The two units registered for a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnits {
    pub service_name: String,
    /// Directory the units are installed into
    pub unit_dir: String,
    pub main: UnitFile,
    pub watcher: UnitFile,
}

impl ServiceUnits {
    pub fn build(config: &DeployConfig) -> Self {
        let service_name = config.service_name();
        let remote_path = config.remote_path();
        let watcher_unit = watcher_unit_name(&service_name);

        let exec_start = format!(
            "{} {}",
            join_remote(&remote_path, "venv/bin/python"),
            join_remote(&remote_path, &config.entry_point)
        );

        let mut main = UnitFile::new();
        main.set("Unit", "Description", config.description())
            .set("Unit", "After", "network-online.target")
            .set("Unit", "Wants", "network-online.target")
            .set("Unit", "OnFailure", watcher_unit.clone())
            .set("Service", "Type", "simple")
            .set("Service", "User", config.service_user.clone())
            .set("Service", "WorkingDirectory", remote_path.clone())
            .set("Service", "ExecStart", exec_start)
            .set("Service", "Restart", config.restart_policy.to_string())
            .set("Service", "RestartSec", config.restart_sec.to_string())
            .set("Install", "WantedBy", "multi-user.target");

        let mut watcher = UnitFile::new();
        watcher
            .set(
                "Unit",
                "Description",
                format!("Restart watcher for {}", main_unit_name(&service_name)),
            )
            .set("Service", "Type", "oneshot")
            .set(
                "Service",
                "ExecStart",
                format!("/bin/systemctl restart {}", main_unit_name(&service_name)),
            );

        Self {
            service_name,
            unit_dir: config.unit_dir.clone(),
            main,
            watcher,
        }
    }

    pub fn main_unit(&self) -> String {
        main_unit_name(&self.service_name)
    }

    pub fn watcher_unit(&self) -> String {
        watcher_unit_name(&self.service_name)
    }

    pub fn main_path(&self) -> String {
        join_remote(&self.unit_dir, &self.main_unit())
    }

    pub fn watcher_path(&self) -> String {
        join_remote(&self.unit_dir, &self.watcher_unit())
    }
}

fn main_unit_name(service: &str) -> String {
    format!("{}.service", service)
}

fn watcher_unit_name(service: &str) -> String {
    format!("{}-watcher.service", service)
}
