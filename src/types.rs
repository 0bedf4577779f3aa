//! Type-safe configuration types for botdeploy
//!
//! Stringly-typed choices in the deployment config are proper enums so that
//! typos fail at load time instead of on the remote host.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::shell::quote;

/// Deployment stages, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Remove and recreate the remote working directory
    Clean,
    /// Make sure the interpreter and its venv module exist
    Runtime,
    /// Upload the source tree over SFTP
    Transfer,
    /// Create the virtualenv and pip install requirements
    Dependencies,
    /// Write the secrets module
    Secrets,
    /// Install and start the systemd units
    Services,
}

impl Stage {
    /// Stages that must succeed before this one may run.
    pub const fn needs(self) -> &'static [Stage] {
        match self {
            Self::Clean => &[],
            Self::Runtime => &[Self::Clean],
            Self::Transfer => &[Self::Runtime],
            Self::Dependencies => &[Self::Transfer],
            Self::Secrets => &[Self::Transfer],
            Self::Services => &[Self::Dependencies, Self::Secrets],
        }
    }

    /// Job name, same as `Display`
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns true if the stage deletes remote data
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Clean)
    }

    /// Human readable description for plans and logs
    pub const fn description(self) -> &'static str {
        match self {
            Self::Clean => "Clean remote working directory",
            Self::Runtime => "Ensure runtime and virtualenv tooling",
            Self::Transfer => "Transfer repository over SFTP",
            Self::Dependencies => "Install dependencies into virtualenv",
            Self::Secrets => "Write secrets file",
            Self::Services => "Install and activate systemd units",
        }
    }

    /// All stages in declaration order
    pub fn all() -> Vec<Stage> {
        Stage::iter().collect()
    }
}

/// Package manager available on the target host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Apt,
    Dnf,
    Pacman,
}

impl PackageManager {
    /// Non-interactive install command for the given packages
    pub fn install_command(self, packages: &[String]) -> String {
        let pkgs = packages
            .iter()
            .map(|p| quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        match self {
            Self::Apt => format!(
                "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq {}",
                pkgs
            ),
            Self::Dnf => format!("dnf install -y -q {}", pkgs),
            Self::Pacman => format!("pacman -Sy --noconfirm --needed {}", pkgs),
        }
    }

    /// Packages providing python3 and its venv module
    pub fn default_python_packages(self) -> Vec<String> {
        let pkgs: &[&str] = match self {
            Self::Apt => &["python3", "python3-venv", "python3-pip"],
            Self::Dnf => &["python3", "python3-pip"],
            Self::Pacman => &["python", "python-pip"],
        };
        pkgs.iter().map(|s| s.to_string()).collect()
    }
}

/// systemd `Restart=` policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    #[default]
    OnFailure,
    OnAbnormal,
    OnAbort,
    OnSuccess,
    OnWatchdog,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_stage_display_is_lowercase() {
        assert_eq!(Stage::Dependencies.to_string(), "dependencies");
        assert_eq!(Stage::Dependencies.name(), "dependencies");
        assert_eq!(Stage::from_str("services").unwrap(), Stage::Services);
    }

    #[test]
    fn test_stage_needs_form_declared_graph() {
        assert!(Stage::Clean.needs().is_empty());
        assert_eq!(Stage::Transfer.needs(), &[Stage::Runtime]);
        assert_eq!(Stage::Services.needs(), &[Stage::Dependencies, Stage::Secrets]);
    }

    #[test]
    fn test_stage_needs_point_backwards() {
        for stage in Stage::all() {
            for need in stage.needs() {
                assert!(need < &stage, "{} needs later stage {}", stage, need);
            }
        }
    }

    #[test]
    fn test_only_clean_is_destructive() {
        let destructive: Vec<_> = Stage::all()
            .into_iter()
            .filter(|s| s.is_destructive())
            .collect();
        assert_eq!(destructive, vec![Stage::Clean]);
    }

    #[test]
    fn test_apt_install_command() {
        let cmd = PackageManager::Apt.install_command(&["python3".into(), "python3-venv".into()]);
        assert_eq!(
            cmd,
            "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get install -y -qq 'python3' 'python3-venv'"
        );
    }

    #[test]
    fn test_pacman_install_command() {
        let cmd = PackageManager::Pacman.install_command(&["python".into()]);
        assert_eq!(cmd, "pacman -Sy --noconfirm --needed 'python'");
    }

    #[test]
    fn test_restart_policy_serializes_kebab_case() {
        assert_eq!(RestartPolicy::OnFailure.to_string(), "on-failure");
        assert_eq!(RestartPolicy::from_str("on-abnormal").unwrap(), RestartPolicy::OnAbnormal);
        let json = serde_json::to_string(&RestartPolicy::OnWatchdog).unwrap();
        assert_eq!(json, "\"on-watchdog\"");
    }

    #[test]
    fn test_package_manager_serde() {
        let pm: PackageManager = serde_json::from_str("\"dnf\"").unwrap();
        assert_eq!(pm, PackageManager::Dnf);
        assert!(serde_json::from_str::<PackageManager>("\"yum\"").is_err());
    }
}
