//! Locating the OpenSSH client binaries.

use crate::error::TransportError;

/// Resolve `name` (e.g. `ssh`) to an executable path.
///
/// `env_override` names an environment variable that, when set and
/// non-empty, wins over PATH lookup.
pub fn resolve_program(name: &str, env_override: &str) -> Result<String, TransportError> {
    if let Ok(p) = std::env::var(env_override) {
        let p = p.trim();
        if !p.is_empty() {
            if std::path::Path::new(p).exists() || which::which(p).is_ok() {
                return Ok(p.to_string());
            }
            return Err(TransportError::ProgramNotFound {
                program: name.to_string(),
                detail: format!("{} points to {}, which does not exist", env_override, p),
            });
        }
    }

    which::which(name)
        .map(|p| p.to_string_lossy().to_string())
        .map_err(|e| TransportError::ProgramNotFound {
            program: name.to_string(),
            detail: format!(
                "{}. Install the OpenSSH client or set {} to a full path.",
                e, env_override
            ),
        })
}
