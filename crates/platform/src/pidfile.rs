//! Pidfile acquisition: the daemon's exclusive-run token.
//!
//! A stale pidfile left behind by a crashed daemon must not block a fresh
//! start. We reclaim it, but only after confirming the recorded PID is
//! genuinely gone (`kill(pid, 0)` fails with `ESRCH`) rather than just
//! "some other process happens to reuse that number".

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// Error acquiring or releasing the pidfile.
#[derive(Debug, thiserror::Error)]
pub enum PidFileError {
    /// I/O failure opening, reading, or writing the pidfile.
    #[error("pidfile I/O error at {path}: {source}")]
    Io {
        /// The pidfile path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Another process holds the pidfile and is confirmed alive.
    #[error("another instance is already running (pid {0})")]
    AlreadyRunning(i32),
    /// The pidfile's contents could not be parsed as a PID.
    #[error("pidfile at {0} does not contain a valid PID")]
    Corrupt(PathBuf),
}

/// A held pidfile. Dropping this does not remove the file; call
/// [`PidFile::release`] explicitly during graceful shutdown so the removal
/// is an observable, ordered step rather than a destructor side effect.
pub struct PidFile {
    path: PathBuf,
    file: File,
}

impl PidFile {
    /// Acquires the pidfile at `path` for the current process.
    ///
    /// If the file exists and names a live process, returns
    /// [`PidFileError::AlreadyRunning`]. If it exists but names a dead
    /// process, it is reclaimed: truncated and rewritten with this
    /// process's PID.
    pub fn acquire(path: &Path) -> Result<Self, PidFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| PidFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|source| PidFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if file.try_lock_exclusive().is_err() {
            let mut contents = String::new();
            file.read_to_string(&mut contents)
                .map_err(|source| PidFileError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            let recorded_pid: i32 = contents
                .trim()
                .parse()
                .map_err(|_| PidFileError::Corrupt(path.to_path_buf()))?;
            return Err(PidFileError::AlreadyRunning(recorded_pid));
        }

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|source| PidFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        if !contents.trim().is_empty() {
            if let Ok(recorded_pid) = contents.trim().parse::<i32>() {
                if is_process_alive(recorded_pid) {
                    return Err(PidFileError::AlreadyRunning(recorded_pid));
                }
            }
        }

        let pid = std::process::id() as i32;
        file.set_len(0).map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        file.seek(SeekFrom::Start(0))
            .map_err(|source| PidFileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        writeln!(file, "{pid}").map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        file.flush().map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Reads the PID currently recorded in a pidfile, without acquiring it.
    /// Used by the `status` and `kill` admin verbs.
    pub fn read_pid(path: &Path) -> Result<i32, PidFileError> {
        let contents = fs::read_to_string(path).map_err(|source| PidFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        contents
            .trim()
            .parse()
            .map_err(|_| PidFileError::Corrupt(path.to_path_buf()))
    }

    /// Releases the lock and removes the pidfile. Part of the graceful
    /// shutdown sequence; errors are reported, not panicked on.
    pub fn release(self) -> Result<(), PidFileError> {
        fs2::FileExt::unlock(&self.file).ok();
        fs::remove_file(&self.path).map_err(|source| PidFileError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Returns whether `pid` names a live process, using `kill(pid, 0)`.
///
/// This does not distinguish "alive but not this daemon" from "alive and is
/// this daemon" — the pidfile's own exclusive lock is what prevents a
/// second instance from mistaking someone else's process for itself while
/// the lock is held. The liveness check here only guards reclaiming a
/// pidfile nobody holds the lock for anymore.
#[must_use]
pub fn is_process_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_writes_own_pid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spa-authd.pid");
        let pidfile = PidFile::acquire(&path).unwrap();
        let recorded = PidFile::read_pid(&path).unwrap();
        assert_eq!(recorded, std::process::id() as i32);
        pidfile.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn acquire_reclaims_stale_pidfile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spa-authd.pid");
        fs::write(&path, "999999999\n").unwrap();
        let pidfile = PidFile::acquire(&path).unwrap();
        let recorded = PidFile::read_pid(&path).unwrap();
        assert_eq!(recorded, std::process::id() as i32);
        pidfile.release().unwrap();
    }

    #[test]
    fn acquire_rejects_when_held_by_live_process() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spa-authd.pid");
        let _held = PidFile::acquire(&path).unwrap();
        let second = PidFile::acquire(&path);
        assert!(matches!(second, Err(PidFileError::AlreadyRunning(_))));
    }

    #[test]
    fn is_process_alive_is_true_for_self() {
        assert!(is_process_alive(std::process::id() as i32));
    }
}
