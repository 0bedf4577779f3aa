//! Stage 4: virtualenv and pip install.

use std::time::Duration;

use crate::remote_script::RemoteScript;
use crate::shell::{join_remote, quote};

/// Create `<path>/venv` and install `<path>/<requirements>` into it.
///
/// | Field          | Use |
/// |----------------|-----|
/// | `path`         | remote repository path |
/// | `interpreter`  | interpreter used to create the venv |
/// | `requirements` | requirements file, relative to `path`; skipped if absent |
/// | `timeout`      | hard limit for the whole stage |
#[derive(Debug, Clone)]
pub struct DependenciesArgs {
    pub path: String,
    pub interpreter: String,
    pub requirements: String,
    pub timeout: Duration,
}

impl DependenciesArgs {
    pub fn venv_path(&self) -> String {
        join_remote(&self.path, "venv")
    }
}

impl RemoteScript for DependenciesArgs {
    fn name(&self) -> &'static str {
        "dependencies"
    }

    fn script(&self) -> String {
        let venv = self.venv_path();
        let pip = quote(&join_remote(&venv, "bin/pip"));
        let requirements = quote(&join_remote(&self.path, &self.requirements));

        let mut script = String::from("set -e\n");
        script.push_str(&format!("cd {}\n", quote(&self.path)));
        script.push_str(&format!(
            "{} -m venv {}\n",
            quote(&self.interpreter),
            quote(&venv)
        ));
        script.push_str(&format!("{pip} install --quiet --upgrade pip\n"));
        script.push_str(&format!("if [ -f {requirements} ]; then\n"));
        script.push_str(&format!("  {pip} install --quiet -r {requirements}\n"));
        script.push_str("else\n");
        script.push_str(&format!(
            "  echo {} >&2\n",
            quote(&format!("no {} found, skipping", self.requirements))
        ));
        script.push_str("fi\n");
        script
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}
