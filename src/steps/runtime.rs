//! Stage 2: make sure the interpreter and its venv module are installed.

use crate::remote_script::RemoteScript;
use crate::shell::quote;
use crate::types::PackageManager;

/// Probe for the interpreter and `venv`, installing packages only when missing.
#[derive(Debug, Clone)]
pub struct RuntimeArgs {
    /// Interpreter command, e.g. `python3`
    pub interpreter: String,
    pub package_manager: PackageManager,
    pub packages: Vec<String>,
}

impl RuntimeArgs {
    fn probe(&self) -> String {
        let interp = quote(&self.interpreter);
        format!(
            "command -v {interp} >/dev/null 2>&1 && {interp} -m venv --help >/dev/null 2>&1 && {interp} -m ensurepip --version >/dev/null 2>&1"
        )
    }
}

impl RemoteScript for RuntimeArgs {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn script(&self) -> String {
        let mut script = String::from("set -e\n");
        script.push_str(&format!("if {}; then\n", self.probe()));
        script.push_str("  echo 'runtime already present'\n");
        script.push_str("else\n");
        if self.packages.is_empty() {
            script.push_str("  echo 'runtime missing and no packages configured' >&2\n");
            script.push_str("  exit 1\n");
        } else {
            script.push_str(&format!(
                "  {}\n",
                self.package_manager.install_command(&self.packages)
            ));
        }
        script.push_str("fi\n");
        script.push_str(&format!("{} --version\n", quote(&self.interpreter)));
        script
    }
}
