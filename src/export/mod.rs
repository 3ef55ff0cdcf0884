//! Artifact formats and all-or-nothing artifact commits.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

pub mod combiner;
pub mod forest;

pub use combiner::{CombinerFormatError, CombinerModel};
pub use forest::{ForestFormatError, NodeRow, export_forest, parse_forest, write_forest};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to move {from} into place at {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// Write every `(path, contents)` pair so that no destination is replaced unless all of them
/// were written out completely.
///
/// Contents go to `<name>.tmp` siblings first, are flushed and synced, and only then renamed
/// into place. Temporaries are removed on failure.
pub fn commit_artifacts(artifacts: &[(&Path, &str)]) -> Result<(), ExportError> {
    let mut staged: Vec<(PathBuf, &Path)> = Vec::with_capacity(artifacts.len());
    for &(dest, contents) in artifacts {
        let tmp = tmp_path(dest);
        if let Err(source) = write_synced(&tmp, contents) {
            discard(&staged);
            let _ = fs::remove_file(&tmp);
            return Err(ExportError::Write { path: tmp, source });
        }
        staged.push((tmp, dest));
    }
    for (idx, (tmp, dest)) in staged.iter().enumerate() {
        if let Err(source) = fs::rename(tmp, dest) {
            discard(&staged[idx..]);
            return Err(ExportError::Rename {
                from: tmp.clone(),
                to: dest.to_path_buf(),
                source,
            });
        }
        info!(path = %dest.display(), "Wrote artifact");
    }
    Ok(())
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    dest.with_file_name(name)
}

fn write_synced(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    file.sync_all()
}

fn discard(staged: &[(PathBuf, &Path)]) {
    for (tmp, _) in staged {
        let _ = fs::remove_file(tmp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commit_writes_every_artifact() {
        let dir = tempdir().unwrap();
        let forest = dir.path().join("out").join("exported_forest.model");
        let combiner = dir.path().join("exported_calibrator.cfg");
        commit_artifacts(&[(&forest, "n_trees 0\n"), (&combiner, "bias 1\n")]).unwrap();
        assert_eq!(fs::read_to_string(&forest).unwrap(), "n_trees 0\n");
        assert_eq!(fs::read_to_string(&combiner).unwrap(), "bias 1\n");
        assert!(!tmp_path(&forest).exists());
        assert!(!tmp_path(&combiner).exists());
    }

    #[test]
    fn failed_write_leaves_existing_artifacts_untouched() {
        let dir = tempdir().unwrap();
        let forest = dir.path().join("exported_forest.model");
        fs::write(&forest, "old").unwrap();
        // A directory at the temp location makes the second write fail.
        let blocked = dir.path().join("exported_calibrator.cfg");
        fs::create_dir(tmp_path(&blocked)).unwrap();

        let err = commit_artifacts(&[(&forest, "new"), (&blocked, "bias 1\n")]).unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
        assert_eq!(fs::read_to_string(&forest).unwrap(), "old");
        assert!(!tmp_path(&forest).exists());
        assert!(!blocked.exists());
    }

    #[test]
    fn tmp_path_appends_suffix() {
        assert_eq!(
            tmp_path(Path::new("a/exported_forest.model")),
            PathBuf::from("a/exported_forest.model.tmp")
        );
    }
}
