/*
 * This source code is licensed under the MIT license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! PanelConfiguration (spec §3) and the environment half of Mount
//! Bootstrap (spec §6, §9 "Global mutable configuration").
//!
//! The source kept session/base roots in process-wide static buffers; here
//! they are an immutable value built once in [`Config::from_env`] and
//! passed by reference to the Dispatcher. Nothing mutates it after
//! construction, so no synchronisation is required (spec §5).

use std::path::Path;
use std::path::PathBuf;

/// Soft maximum of base layers a mount will honour (spec §3).
pub const MAX_BASE_LAYERS: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("SESSION_LAYER_DIR environment variable is not set")]
    MissingSessionDir,
    #[error("SESSION_LAYER_DIR must be an absolute path, got {0:?}")]
    SessionDirNotAbsolute(String),
    #[error("BASE_LAYER_DIRS entry must be an absolute path, got {0:?}")]
    BaseDirNotAbsolute(String),
}

/// Process-wide configuration: the session root, the ordered base roots,
/// and the soft cap on how many of the latter we'll honour.
#[derive(Debug, Clone)]
pub struct Config {
    session_root: PathBuf,
    base_roots: Vec<PathBuf>,
}

impl Config {
    /// Build configuration directly (used by tests and by callers that
    /// don't want environment-variable bootstrap).
    pub fn new(session_root: PathBuf, base_roots: Vec<PathBuf>) -> Self {
        let mut base_roots = base_roots;
        base_roots.truncate(MAX_BASE_LAYERS);
        Self {
            session_root,
            base_roots,
        }
    }

    /// Read `SESSION_LAYER_DIR` (required) and `BASE_LAYER_DIRS` (optional,
    /// comma-separated, capped at [`MAX_BASE_LAYERS`] entries) per spec §6.
    /// An unset `BASE_LAYER_DIRS` yields a single base layer of `/`.
    pub fn from_env() -> Result<Self, BootstrapError> {
        let session_dir =
            std::env::var("SESSION_LAYER_DIR").map_err(|_| BootstrapError::MissingSessionDir)?;
        if !session_dir.starts_with('/') {
            return Err(BootstrapError::SessionDirNotAbsolute(session_dir));
        }

        let base_roots = match std::env::var("BASE_LAYER_DIRS") {
            Ok(list) => {
                let mut roots = Vec::new();
                for entry in list.split(',') {
                    let entry = entry.trim();
                    if entry.is_empty() {
                        continue;
                    }
                    if !entry.starts_with('/') {
                        return Err(BootstrapError::BaseDirNotAbsolute(entry.to_string()));
                    }
                    roots.push(PathBuf::from(entry));
                    if roots.len() == MAX_BASE_LAYERS {
                        break;
                    }
                }
                roots
            }
            Err(_) => vec![PathBuf::from("/")],
        };

        Ok(Self::new(PathBuf::from(session_dir), base_roots))
    }

    pub fn session_root(&self) -> &Path {
        &self.session_root
    }

    pub fn base_roots(&self) -> &[PathBuf] {
        &self.base_roots
    }

    pub fn base_root(&self, index: usize) -> Option<&Path> {
        self.base_roots.get(index).map(PathBuf::as_path)
    }

    pub fn num_base_layers(&self) -> usize {
        self.base_roots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_to_max_base_layers() {
        let roots: Vec<PathBuf> = (0..20).map(|i| PathBuf::from(format!("/b{i}"))).collect();
        let config = Config::new(PathBuf::from("/session"), roots);
        assert_eq!(config.num_base_layers(), MAX_BASE_LAYERS);
    }
}
