//! Singleton lock and pid file management.
//!
//! Exactly one daemon instance may run per runtime directory. The lock file
//! is created with `create_new`; when it already exists the recorded pid is
//! probed, and only a dead pid allows the stale artefacts to be cleaned and
//! the lock retried.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{info, warn};

use ttr_config::RuntimePaths;

use super::PROCESS_TARGET;
use super::errors::GuardError;

/// Guard responsible for the lifecycle of the lock and pid files.
#[derive(Debug)]
pub(crate) struct ProcessGuard {
    paths: RuntimePaths,
    _lock: File,
}

impl ProcessGuard {
    pub(crate) fn acquire(paths: RuntimePaths) -> Result<Self, GuardError> {
        let lock = acquire_lock(&paths)?;
        Ok(Self { paths, _lock: lock })
    }

    pub(crate) fn write_pid(&self, pid: u32) -> Result<(), GuardError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let path = self.paths.pid_path();
        let mut file = options.open(path).map_err(|source| GuardError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        writeln!(file, "{pid}").map_err(|source| GuardError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        file.sync_all().map_err(|source| GuardError::PidWrite {
            path: path.to_path_buf(),
            source,
        })?;
        info!(
            target: PROCESS_TARGET,
            pid,
            file = %path.display(),
            "pid file written"
        );
        Ok(())
    }

    pub(crate) fn paths(&self) -> &RuntimePaths {
        &self.paths
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        for path in [self.paths.lock_path(), self.paths.pid_path()] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: PROCESS_TARGET,
                        file = %path.display(),
                        %error,
                        "failed to remove runtime artefact"
                    );
                }
                _ => {}
            }
        }
    }
}

fn acquire_lock(paths: &RuntimePaths) -> Result<File, GuardError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(paths.lock_path()) {
        Ok(file) => {
            info!(
                target: PROCESS_TARGET,
                file = %paths.lock_path().display(),
                "acquired daemon lock"
            );
            Ok(file)
        }
        Err(error) if error.kind() == io::ErrorKind::AlreadyExists => handle_existing_lock(paths),
        Err(source) => Err(GuardError::LockCreate {
            path: paths.lock_path().to_path_buf(),
            source,
        }),
    }
}

fn handle_existing_lock(paths: &RuntimePaths) -> Result<File, GuardError> {
    if let Some(pid) = read_pid(paths.pid_path())
        && pid != 0
    {
        match check_process(pid) {
            Ok(true) => {
                info!(
                    target: PROCESS_TARGET,
                    pid,
                    "refusing to start: existing daemon alive"
                );
                return Err(GuardError::AlreadyRunning { pid });
            }
            Ok(false) => {
                warn!(
                    target: PROCESS_TARGET,
                    pid,
                    "existing daemon not detected; cleaning stale files"
                );
            }
            Err(error) => return Err(error),
        }
    }
    remove_file(paths.lock_path())?;
    remove_file(paths.pid_path())?;
    acquire_lock(paths)
}

fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse::<u32>().ok()
}

fn remove_file(path: &Path) -> Result<(), GuardError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(GuardError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn check_process(pid: u32) -> Result<bool, GuardError> {
    if pid == 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => Ok(true),
        Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) | Err(Errno::ECHILD) => Ok(false),
        Err(errno) => Err(GuardError::CheckProcess { pid, source: errno }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_recognises_the_current_process() {
        assert!(check_process(std::process::id()).expect("probe self"));
    }

    #[test]
    fn probe_rejects_pid_zero() {
        assert!(!check_process(0).expect("probe zero"));
    }

    #[test]
    fn missing_pid_file_reads_as_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert!(read_pid(&dir.path().join("absent.pid")).is_none());
    }

    #[test]
    fn pid_file_round_trips() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("ttrd.pid");
        fs::write(&path, "4242\n").expect("write pid");
        assert_eq!(read_pid(&path), Some(4242));
    }
}
