//! Stage 1: reset the remote working directory.

use crate::remote_script::RemoteScript;
use crate::shell::quote;

/// Remove and recreate the repository directory.
///
/// | Field  | Use                          |
/// |--------|------------------------------|
/// | `path` | absolute remote repository path |
#[derive(Debug, Clone)]
pub struct CleanArgs {
    pub path: String,
}

impl RemoteScript for CleanArgs {
    fn name(&self) -> &'static str {
        "clean"
    }

    fn script(&self) -> String {
        let p = quote(&self.path);
        format!("set -e\nrm -rf -- {p}\nmkdir -p -- {p}\n")
    }

    fn is_destructive(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_script() {
        let args = CleanArgs {
            path: "/root/GoLiveGuardian".to_string(),
        };
        assert_eq!(
            args.script(),
            "set -e\nrm -rf -- '/root/GoLiveGuardian'\nmkdir -p -- '/root/GoLiveGuardian'\n"
        );
        assert!(args.is_destructive());
        assert!(args.stdin().is_none());
    }

    #[test]
    fn test_clean_quotes_hostile_path() {
        let args = CleanArgs {
            path: "/srv/it's here".to_string(),
        };
        assert!(args.script().contains("rm -rf -- '/srv/it'\\''s here'"));
    }
}
