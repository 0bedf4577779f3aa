//! Source tree upload planning.
//!
//! The local tree is walked with gitignore semantics and turned into an
//! `sftp -b` batch: one `-mkdir` per directory (parents first), one `put`
//! per regular file. Symlinks are not followed.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;

use crate::error::TransportError;
use crate::shell::join_remote;

/// Files and directories to copy, relative to `local_root`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub local_root: PathBuf,
    pub remote_root: String,
    pub directories: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

impl UploadPlan {
    /// Walk `local_root`, honouring `.gitignore` files, always skipping
    /// `.git`, and skipping anything matching `excludes`.
    pub fn build(
        local_root: &Path,
        remote_root: &str,
        excludes: &[String],
    ) -> Result<Self, TransportError> {
        let walk_err = |message: String| TransportError::Walk {
            path: local_root.display().to_string(),
            message,
        };

        if !local_root.is_dir() {
            return Err(walk_err("not a directory".to_string()));
        }

        let mut overrides = OverrideBuilder::new(local_root);
        overrides.add("!.git").map_err(|e| walk_err(e.to_string()))?;
        for pattern in excludes {
            overrides
                .add(&format!("!{}", pattern))
                .map_err(|e| walk_err(format!("bad exclude pattern '{}': {}", pattern, e)))?;
        }
        let overrides = overrides.build().map_err(|e| walk_err(e.to_string()))?;

        let walker = WalkBuilder::new(local_root)
            .hidden(false)
            .parents(false)
            .git_global(false)
            .require_git(false)
            .follow_links(false)
            .overrides(overrides)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let mut directories = Vec::new();
        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| walk_err(e.to_string()))?;
            if entry.depth() == 0 {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(local_root)
                .map_err(|e| walk_err(e.to_string()))?
                .to_path_buf();
            match entry.file_type() {
                Some(ft) if ft.is_dir() => directories.push(rel),
                Some(ft) if ft.is_file() => files.push(rel),
                _ => tracing::debug!(path = %rel.display(), "skipping non-regular file"),
            }
        }

        Ok(Self {
            local_root: local_root.to_path_buf(),
            remote_root: remote_root.to_string(),
            directories,
            files,
        })
    }

    /// Remote path for a relative entry
    pub fn remote_path(&self, rel: &Path) -> String {
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        join_remote(&self.remote_root, &rel)
    }

    /// `sftp -b` batch script. `-` prefixed commands may fail (dir exists).
    pub fn batch_script(&self) -> String {
        let mut script = format!("-mkdir {}\n", sftp_quote(&self.remote_root));
        for dir in &self.directories {
            script.push_str(&format!("-mkdir {}\n", sftp_quote(&self.remote_path(dir))));
        }
        for file in &self.files {
            let local = self.local_root.join(file);
            script.push_str(&format!(
                "put {} {}\n",
                sftp_quote(&local.to_string_lossy()),
                sftp_quote(&self.remote_path(file))
            ));
        }
        script
    }
}

/// Double-quote an argument for an sftp batch file
pub fn sftp_quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
