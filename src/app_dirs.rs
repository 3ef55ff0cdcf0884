//! Per-user directories for riskfuse, anchored to a single `.riskfuse` folder.
//!
//! Resolves to the OS config directory by default; `RISKFUSE_CONFIG_HOME` points it somewhere
//! else (tests, portable installs, CI).

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

use directories::BaseDirs;
use thiserror::Error;

/// Folder created under the base config directory.
pub const APP_DIR_NAME: &str = ".riskfuse";
/// Environment variable replacing the base config directory.
pub const CONFIG_HOME_ENV: &str = "RISKFUSE_CONFIG_HOME";
/// Run configuration picked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "riskfuse.toml";

static BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("No suitable base config directory available for riskfuse files")]
    NoBaseDir,
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The `.riskfuse` root, created on demand.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = base_dir().ok_or(AppDirError::NoBaseDir)?;
    ensure_dir(base.join(APP_DIR_NAME))
}

/// `logs/` inside the root, created on demand.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    ensure_dir(app_root_dir()?.join("logs"))
}

/// Location of the default run configuration (the file itself may not exist).
pub fn default_config_path() -> Result<PathBuf, AppDirError> {
    Ok(app_root_dir()?.join(DEFAULT_CONFIG_FILE))
}

fn ensure_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn base_dir() -> Option<PathBuf> {
    if let Some(path) = BASE_OVERRIDE.lock().ok().and_then(|guard| guard.clone()) {
        return Some(path);
    }
    if let Some(path) = std::env::var_os(CONFIG_HOME_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

#[cfg(test)]
fn set_base_override(path: Option<PathBuf>) {
    if let Ok(mut guard) = BASE_OVERRIDE.lock() {
        *guard = path;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct OverrideGuard;

    impl OverrideGuard {
        fn set(path: &std::path::Path) -> Self {
            set_base_override(Some(path.to_path_buf()));
            Self
        }
    }

    impl Drop for OverrideGuard {
        fn drop(&mut self) {
            set_base_override(None);
        }
    }

    #[test]
    fn directories_live_under_override() {
        let base = tempdir().unwrap();
        let _guard = OverrideGuard::set(base.path());
        let root = app_root_dir().unwrap();
        assert_eq!(root, base.path().join(APP_DIR_NAME));
        assert!(root.is_dir());
        let logs = logs_dir().unwrap();
        assert_eq!(logs, root.join("logs"));
        assert!(logs.is_dir());
        assert_eq!(
            default_config_path().unwrap(),
            root.join(DEFAULT_CONFIG_FILE)
        );
    }
}
