//! Static file copying.
//!
//! Files with no build role are mirrored into the destination at the same
//! relative path. Directories named in the `copy` config are mirrored into
//! the destination root. Each file is copied independently; failures are
//! collected, not fatal.

use crate::module::catch_panic;
use crate::walk::{SourceFile, relative_path};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum CopyError {
    #[error("Failed to copy {} to {}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read copy directory {}", .dir.display())]
    Walk {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("copying {} panicked: {message}", .from.display())]
    Panicked { from: PathBuf, message: String },
}

#[derive(Debug, Default)]
pub struct CopyOutcome {
    /// Relative output paths, sorted.
    pub copied: Vec<String>,
    pub errors: Vec<CopyError>,
}

impl CopyOutcome {
    pub fn merge(&mut self, other: CopyOutcome) {
        self.copied.extend(other.copied);
        self.errors.extend(other.errors);
        self.copied.sort();
    }
}

/// Copy site files to the same relative path under `dest`.
pub fn copy_static(files: &[SourceFile], dest: &Path) -> CopyOutcome {
    let jobs: Vec<CopyJob> = files
        .iter()
        .map(|file| CopyJob {
            from: file.path.clone(),
            to: dest.join(&file.disk_relative),
            relative: file.relative_path.clone(),
        })
        .collect();
    copy_all(jobs)
}

/// Mirror the contents of each directory into the root of `dest`.
pub fn copy_directories(dirs: &[PathBuf], dest: &Path) -> CopyOutcome {
    let mut outcome = CopyOutcome::default();
    let mut jobs = Vec::new();
    for dir in dirs {
        for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    let Ok(target) = entry.path().strip_prefix(dir) else {
                        continue;
                    };
                    jobs.push(CopyJob {
                        from: entry.path().to_path_buf(),
                        to: dest.join(target),
                        relative: relative_path(dir, entry.path()),
                    });
                }
                Ok(_) => {}
                Err(source) => outcome.errors.push(CopyError::Walk {
                    dir: dir.clone(),
                    source,
                }),
            }
        }
    }
    outcome.merge(copy_all(jobs));
    outcome
}

/// One file to copy. `relative` is the reported output path; `to` keeps the
/// on-disk name, which may not be valid UTF-8.
struct CopyJob {
    from: PathBuf,
    to: PathBuf,
    relative: String,
}

fn copy_all(jobs: Vec<CopyJob>) -> CopyOutcome {
    let results: Vec<Result<String, CopyError>> = jobs
        .into_par_iter()
        .map(|job| {
            catch_panic(|| copy_one(&job)).unwrap_or_else(|message| {
                Err(CopyError::Panicked {
                    from: job.from.clone(),
                    message,
                })
            })
        })
        .collect();

    let mut outcome = CopyOutcome::default();
    for result in results {
        match result {
            Ok(relative) => outcome.copied.push(relative),
            Err(err) => outcome.errors.push(err),
        }
    }
    outcome.copied.sort();
    tracing::debug!(
        copied = outcome.copied.len(),
        errors = outcome.errors.len(),
        "static copy done"
    );
    outcome
}

fn copy_one(job: &CopyJob) -> Result<String, CopyError> {
    let copied = match job.to.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
    .and_then(|_| fs::copy(&job.from, &job.to));
    copied.map_err(|source| CopyError::Copy {
        from: job.from.clone(),
        to: job.to.clone(),
        source,
    })?;
    Ok(job.relative.clone())
}
