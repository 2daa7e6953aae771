//! Productions backed by files on disk.

use crate::production::{Artifact, MTime};
use crate::sink::{TraceSink, TracingSink, Verbosity};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// stat() an on-disk path, producing its MTime.
pub fn stat(path: &Path) -> std::io::Result<MTime> {
    Ok(match std::fs::metadata(path) {
        Ok(meta) => MTime::Stamp(meta.modified()?),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                MTime::Missing
            } else {
                return Err(err);
            }
        }
    })
}

/// A file produced or consumed by rules.
///
/// Actions write to `out_path()`, a temporary sibling of the final path; the
/// file is only moved into place once its producing rule succeeds, so a
/// failed or interrupted rule never leaves a partial file that looks current.
pub struct FileProduction {
    path: PathBuf,
    tmp_path: PathBuf,
    consumers_done: AtomicUsize,
    /// Where stat failures are reported.
    sink: Arc<dyn TraceSink>,
}

impl FileProduction {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", std::process::id()));
        let tmp_path = path.with_file_name(tmp_name);
        FileProduction {
            path,
            tmp_path,
            consumers_done: AtomicUsize::new(0),
            sink: Arc::new(TracingSink),
        }
    }

    /// Report stat failures to `sink`, usually the graph's own.
    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the producing action should write.  Creates the directory.
    pub fn out_path(&self) -> anyhow::Result<&Path> {
        if let Some(dir) = self.tmp_path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("create directory {}", dir.display()))?;
            }
        }
        Ok(&self.tmp_path)
    }

    /// How many consuming rules have finished with this file.
    pub fn consumers_done(&self) -> usize {
        self.consumers_done.load(Ordering::Relaxed)
    }
}

impl Artifact for FileProduction {
    fn local_time(&self) -> MTime {
        // Unreadable metadata is treated like a missing file, which forces
        // a rebuild or reports the file as having no rule.
        stat(&self.path).unwrap_or_else(|err| {
            self.sink.emit(
                Verbosity::Error,
                &format!("stat {}: {}", self.path.display(), err),
            );
            MTime::Missing
        })
    }

    fn finish_succeed(&self) -> anyhow::Result<()> {
        match std::fs::rename(&self.tmp_path, &self.path) {
            Ok(()) => Ok(()),
            // The action wrote the final path directly.
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!(
                    "install {} as {}",
                    self.tmp_path.display(),
                    self.path.display()
                )
            }),
        }
    }

    fn finish_fail(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.tmp_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove {}", self.tmp_path.display()))
            }
        }
    }

    fn finish_require(&self) -> anyhow::Result<()> {
        self.consumers_done.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
