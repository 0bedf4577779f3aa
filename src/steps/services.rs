//! Stage 6: install both units and (re)start the bot.

use crate::remote_script::RemoteScript;
use crate::shell::quote;
use crate::units::ServiceUnits;

/// Line separating the main unit from the watcher unit on stdin
pub const UNIT_SPLIT_MARKER: &str = "#--- botdeploy watcher unit ---";

/// Write both unit files, reload systemd, enable and restart the main unit.
#[derive(Debug, Clone)]
pub struct ServicesArgs {
    pub units: ServiceUnits,
}

impl RemoteScript for ServicesArgs {
    fn name(&self) -> &'static str {
        "services"
    }

    fn script(&self) -> String {
        let main = quote(&self.units.main_unit());
        let mut script = String::from("set -e\numask 022\n");
        // awk writes lines before the marker to the main unit, the rest to the watcher
        script.push_str(&format!(
            "awk -v main={} -v watcher={} -v marker={} 'BEGIN {{ out = main; printf \"\" > main; printf \"\" > watcher }} $0 == marker {{ out = watcher; next }} {{ print > out }}'\n",
            quote(&self.units.main_path()),
            quote(&self.units.watcher_path()),
            quote(UNIT_SPLIT_MARKER),
        ));
        script.push_str("systemctl daemon-reload\n");
        script.push_str(&format!("systemctl enable {main}\n"));
        script.push_str(&format!("systemctl restart {main}\n"));
        script
    }

    fn stdin(&self) -> Option<String> {
        Some(format!(
            "{}{}\n{}",
            self.units.main.render(),
            UNIT_SPLIT_MARKER,
            self.units.watcher.render()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_file::DeployConfig;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::process::{Command, Stdio};

    fn units() -> ServiceUnits {
        ServiceUnits::build(&DeployConfig::example())
    }

    #[test]
    fn test_services_script_activation_order() {
        let args = ServicesArgs { units: units() };
        let script = args.script();
        let reload = script.find("systemctl daemon-reload").unwrap();
        let enable = script.find("systemctl enable").unwrap();
        let restart = script.find("systemctl restart").unwrap();
        assert!(reload < enable && enable < restart);
        assert!(script.contains(&quote(&args.units.main_path())));
        assert!(script.contains(&quote(&args.units.watcher_path())));
    }

    #[test]
    fn test_services_splits_units_remotely() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir(&bin).unwrap();
        let log = dir.path().join("systemctl.log");
        let fake = bin.join("systemctl");
        std::fs::write(
            &fake,
            format!("#!/bin/sh\necho \"$@\" >> '{}'\n", log.display()),
        )
        .unwrap();
        std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut args = ServicesArgs { units: units() };
        args.units.unit_dir = dir.path().display().to_string();

        let path = format!(
            "{}:{}",
            bin.display(),
            std::env::var("PATH").unwrap_or_default()
        );
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(args.script())
            .env("PATH", path)
            .stdin(Stdio::piped())
            .spawn()
            .unwrap();
        child
            .stdin
            .take()
            .unwrap()
            .write_all(args.stdin().unwrap().as_bytes())
            .unwrap();
        assert!(child.wait().unwrap().success());

        let main = std::fs::read_to_string(args.units.main_path()).unwrap();
        let watcher = std::fs::read_to_string(args.units.watcher_path()).unwrap();
        assert_eq!(main, args.units.main.to_string());
        assert_eq!(watcher, args.units.watcher.to_string());

        let service = args.units.main_unit();
        let calls = std::fs::read_to_string(log).unwrap();
        assert_eq!(
            calls,
            format!("daemon-reload\nenable {service}\nrestart {service}\n")
        );
    }
}
