//! Crash-safe replacement of the published list
//!
//! A publish writes the new body to a temp file beside the target, syncs it,
//! optionally snapshots the outgoing artifact to `<target>.prev`, renames the
//! temp file over the target and finally syncs the directory. Readers of the
//! target path only ever see a complete old or a complete new file.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("output path has no file name: {0}")]
    InvalidTarget(PathBuf),
    #[error("cannot create output directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("cannot write temp file {path}: {source}")]
    WriteTemp { path: PathBuf, source: io::Error },
    #[error("cannot sync temp file {path}: {source}")]
    SyncTemp { path: PathBuf, source: io::Error },
    #[error("cannot back up {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },
    #[error("cannot rename {from} onto {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// What a successful publish did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub target: PathBuf,
    pub bytes: usize,
    /// Path of the `.prev` snapshot, when one was taken
    pub backup: Option<PathBuf>,
}

/// `<target>.prev`
pub fn preview_path(target: &Path) -> PathBuf {
    with_suffix(target, ".prev")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Hidden temp path in the same directory as `target`
fn temp_path_for(target: &Path) -> Option<PathBuf> {
    let name = target.file_name()?;
    let mut tmp = OsString::from(".");
    tmp.push(name);
    tmp.push(format!(".{}.tmp", std::process::id()));
    Some(target.with_file_name(tmp))
}

fn parent_dir(target: &Path) -> &Path {
    match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Write `body` to a new file at `path` and flush it to storage
fn write_synced(path: &Path, body: &[u8]) -> Result<(), (bool, io::Error)> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| (false, e))?;
    file.write_all(body).map_err(|e| (false, e))?;
    file.flush().map_err(|e| (false, e))?;
    file.sync_all().map_err(|e| (true, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct AtomicPublisher {
    preview: bool,
}

impl Default for AtomicPublisher {
    fn default() -> Self {
        Self { preview: true }
    }
}

impl AtomicPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep (or skip) the `.prev` snapshot of the outgoing artifact
    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    /// Replace `target` with `body`
    pub fn publish(&self, target: &Path, body: &[u8]) -> Result<PublishReport, PublishError> {
        self.stage(target, body)?.commit()
    }

    /// Run every step up to, but not including, the rename onto `target`.
    ///
    /// The target is untouched until [`StagedArtifact::commit`]. Dropping the
    /// staged artifact instead removes the temp file.
    pub fn stage(&self, target: &Path, body: &[u8]) -> Result<StagedArtifact, PublishError> {
        let tmp = temp_path_for(target)
            .ok_or_else(|| PublishError::InvalidTarget(target.to_path_buf()))?;
        let dir = parent_dir(target).to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| PublishError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let mut staged = StagedArtifact {
            tmp,
            target: target.to_path_buf(),
            dir,
            bytes: body.len(),
            backup: None,
            committed: false,
        };

        write_synced(&staged.tmp, body).map_err(|(synced, source)| {
            let path = staged.tmp.clone();
            if synced {
                PublishError::SyncTemp { path, source }
            } else {
                PublishError::WriteTemp { path, source }
            }
        })?;

        if self.preview {
            staged.backup = backup_current(target)?;
        }
        Ok(staged)
    }
}

/// Copy the current artifact's bytes to `<target>.prev` through its own
/// temp file, so `.prev` is never torn either.
fn backup_current(target: &Path) -> Result<Option<PathBuf>, PublishError> {
    let current = match fs::read(target) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(PublishError::Backup {
                path: target.to_path_buf(),
                source,
            })
        }
    };
    let prev = preview_path(target);
    let prev_tmp = temp_path_for(&prev)
        .ok_or_else(|| PublishError::InvalidTarget(target.to_path_buf()))?;
    let result = write_synced(&prev_tmp, &current)
        .map_err(|(_, e)| e)
        .and_then(|()| fs::rename(&prev_tmp, &prev));
    if let Err(source) = result {
        let _ = fs::remove_file(&prev_tmp);
        return Err(PublishError::Backup { path: prev, source });
    }
    debug!(path = %prev.display(), bytes = current.len(), "previous artifact saved");
    Ok(Some(prev))
}

/// A fully written, synced temp file waiting to be renamed onto the target
#[derive(Debug)]
pub struct StagedArtifact {
    tmp: PathBuf,
    target: PathBuf,
    dir: PathBuf,
    bytes: usize,
    backup: Option<PathBuf>,
    committed: bool,
}

impl StagedArtifact {
    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    /// Rename onto the target, then sync the directory. The rename is the
    /// last step that can fail the publish.
    pub fn commit(mut self) -> Result<PublishReport, PublishError> {
        fs::rename(&self.tmp, &self.target).map_err(|source| PublishError::Rename {
            from: self.tmp.clone(),
            to: self.target.clone(),
            source,
        })?;
        self.committed = true;

        if let Err(e) = sync_dir(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "directory sync after publish failed");
        }
        Ok(PublishReport {
            target: self.target.clone(),
            bytes: self.bytes,
            backup: self.backup.clone(),
        })
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
