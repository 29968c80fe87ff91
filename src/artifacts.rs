//! Per-run temp logs: the limiter's watcher log and the target's output.
//!
//! Both files get unique names in the temp directory. They are deleted at
//! cleanup unless the run ended in ABORT or CRASHED.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::NamedTempFile;

use crate::error::WrapperError;
use crate::supervisor::LogPaths;

pub struct RunArtifacts {
    watcher: NamedTempFile,
    solver: NamedTempFile,
}

impl RunArtifacts {
    pub fn create(dir: &Path) -> Result<Self, WrapperError> {
        let pid = std::process::id();
        Ok(Self {
            watcher: create_log(dir, &format!("watcher-{}-", pid))?,
            solver: create_log(dir, &format!("solver-{}-", pid))?,
        })
    }

    pub fn paths(&self) -> LogPaths {
        LogPaths {
            watcher: self.watcher.path().to_path_buf(),
            solver: self.solver.path().to_path_buf(),
        }
    }

    /// A handle to the solver log usable as a child's stdout
    pub fn solver_stdio(&self) -> Result<Stdio, WrapperError> {
        let file = self
            .solver
            .as_file()
            .try_clone()
            .map_err(|source| self.temp_err(self.solver.path(), source))?;
        Ok(Stdio::from(file))
    }

    pub fn read_watcher(&self) -> Result<String, WrapperError> {
        read_from_start(self.watcher.as_file())
            .map_err(|source| self.temp_err(self.watcher.path(), source))
    }

    pub fn read_solver(&self) -> Result<String, WrapperError> {
        read_from_start(self.solver.as_file())
            .map_err(|source| self.temp_err(self.solver.path(), source))
    }

    /// Keep both files on disk and return their paths, or delete them.
    pub fn release(self, keep: bool) -> std::io::Result<Option<LogPaths>> {
        if keep {
            let (_, watcher) = self.watcher.keep().map_err(|e| e.error)?;
            let (_, solver) = self.solver.keep().map_err(|e| e.error)?;
            return Ok(Some(LogPaths { watcher, solver }));
        }

        let watcher = self.watcher.close();
        let solver = self.solver.close();
        watcher.and(solver)?;
        Ok(None)
    }

    fn temp_err(&self, path: &Path, source: std::io::Error) -> WrapperError {
        WrapperError::TempFile {
            path: PathBuf::from(path),
            source,
        }
    }
}

fn create_log(dir: &Path, prefix: &str) -> Result<NamedTempFile, WrapperError> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(".log")
        .tempfile_in(dir)
        .map_err(|source| WrapperError::TempFile {
            path: dir.to_path_buf(),
            source,
        })
}

/// Rewind and read the whole file, replacing invalid UTF-8
fn read_from_start(mut file: &File) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;
    Ok(String::from_utf8_lossy(&content).into_owned())
}
