//! Secrets file rendering.
//!
//! Secret values are read from the environment of the deploying process and
//! written on the remote host as a Python module (`bot_token = "..."`).
//! `SecretValues` has no `Display`, and its `Debug` masks every value.

use std::fmt;

use crate::config_file::SecretsConfig;
use crate::error::{DeployError, Result};

const REDACTED: &str = "********";

/// Resolved secret key/value pairs in configuration order
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValues {
    entries: Vec<(String, String)>,
}

impl fmt::Debug for SecretValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, _)| (k, REDACTED)))
            .finish()
    }
}

impl SecretValues {
    /// Build directly from pairs (tests, `render --reveal` callers)
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// Read every configured key from the process environment.
    ///
    /// All missing variables are reported at once.
    pub fn from_env(config: &SecretsConfig) -> Result<Self> {
        Self::from_lookup(config, |var| std::env::var(var).ok())
    }

    /// Read every configured key through `lookup`.
    pub fn from_lookup<F>(config: &SecretsConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entries = Vec::with_capacity(config.keys.len());
        let mut missing = Vec::new();

        for key in &config.keys {
            match lookup(&key.env) {
                Some(value) if !value.is_empty() => entries.push((key.name.clone(), value)),
                _ => missing.push(key.env.as_str()),
            }
        }

        if !missing.is_empty() {
            return Err(DeployError::secret(format!(
                "environment variable(s) not set or empty: {}",
                missing.join(", ")
            )));
        }
        Ok(Self { entries })
    }

    /// Placeholder values, for plans and dry runs without a populated environment
    pub fn placeholders(config: &SecretsConfig) -> Self {
        Self {
            entries: config
                .keys
                .iter()
                .map(|k| (k.name.clone(), format!("${{{}}}", k.env)))
                .collect(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The secrets module as written to the remote host
    pub fn render(&self) -> String {
        self.render_with(escape_value)
    }

    /// Same layout with every value masked
    pub fn redacted(&self) -> String {
        self.render_with(|_| REDACTED.to_string())
    }

    fn render_with<F: Fn(&str) -> String>(&self, value: F) -> String {
        let mut out = String::new();
        for (key, v) in &self.entries {
            out.push_str(key);
            out.push_str(" = \"");
            out.push_str(&value(v));
            out.push_str("\"\n");
        }
        out
    }
}

/// Escape a value for a double-quoted Python string literal.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}
