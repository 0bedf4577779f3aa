//! Type-safe remote script contracts.
//!
//! Each deployment stage that runs on the target host is a struct
//! implementing `RemoteScript`. The struct fields are the stage's inputs;
//! the trait turns them into the exact shell text executed remotely and the
//! payload piped to it. Nothing else builds remote command strings.
//!
//! # Contract
//!
//! - `script()` is POSIX `sh`; every interpolated value is quoted with
//!   [`crate::shell::quote`].
//! - Sensitive data travels through `stdin()`, never through `script()`,
//!   so it does not show up in process listings or logs.
//! - `redacted_stdin()` is what logs and plans may show instead.

use std::time::Duration;

use crate::transport::RemoteCommand;

pub trait RemoteScript {
    /// Short stable name used in logs and reports (e.g. `"clean"`)
    fn name(&self) -> &'static str;

    /// Shell script run with `sh -c` on the remote host
    fn script(&self) -> String;

    /// Payload for the script's stdin
    fn stdin(&self) -> Option<String> {
        None
    }

    /// Loggable stand-in for `stdin()`
    fn redacted_stdin(&self) -> Option<String> {
        self.stdin()
    }

    /// Upper bound on the remote run time
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Whether the script deletes remote data
    fn is_destructive(&self) -> bool {
        false
    }

    /// Package the script for a transport
    fn to_command(&self) -> RemoteCommand {
        RemoteCommand {
            label: self.name().to_string(),
            script: self.script(),
            stdin: self.stdin(),
            timeout: self.timeout(),
        }
    }
}
