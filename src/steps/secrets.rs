//! Stage 5: write the secrets module.

use crate::remote_script::RemoteScript;
use crate::secrets::SecretValues;
use crate::shell::{join_remote, quote};

/// Write `<path>/<file>` with mode 0600 from stdin.
#[derive(Debug, Clone)]
pub struct SecretsArgs {
    pub path: String,
    pub file: String,
    pub values: SecretValues,
}

impl SecretsArgs {
    pub fn remote_file(&self) -> String {
        join_remote(&self.path, &self.file)
    }
}

impl RemoteScript for SecretsArgs {
    fn name(&self) -> &'static str {
        "secrets"
    }

    fn script(&self) -> String {
        let target = quote(&self.remote_file());
        let tmp = quote(&format!("{}.tmp", self.remote_file()));
        format!("set -e\numask 077\ncat > {tmp}\nmv -f {tmp} {target}\n")
    }

    fn stdin(&self) -> Option<String> {
        Some(self.values.render())
    }

    fn redacted_stdin(&self) -> Option<String> {
        Some(self.values.redacted())
    }
}
